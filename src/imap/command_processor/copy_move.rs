//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Mailvane.
//
// Mailvane is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailvane is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailvane. If not, see <http://www.gnu.org/licenses/>.

use log::{info, warn};

use super::defs::*;

macro_rules! map_transfer_error {
    ($this:expr) => {
        map_error! {
            $this,
            Error::Repository(RepositoryError::QuotaExceeded) => (
                No,
                Some(s::RespTextCode::OverQuota),
                "Quota exceeded",
            ),
            Error::Repository(RepositoryError::NotFound(_)) => (
                No,
                Some(s::RespTextCode::TryCreate),
                "No such mailbox",
            ),
        }
    };
}

impl CommandProcessor {
    pub(super) async fn cmd_copy(
        &mut self,
        uid: bool,
        set: SequenceSet,
        dst: String,
        _sender: &SendResponse,
    ) -> CmdResult {
        let (src, uids) = {
            let selected = selected!(self)?;
            (selected.folder.clone(), selected.resolve(&set, uid))
        };
        let dst_folder = self.transfer_target(&dst).await?;

        // RFC 4315 has no way to express an empty COPYUID.
        if uids.is_empty() {
            return success("COPY completed");
        }

        let map = repo!(self, copy_messages(&src.id, &uids, &dst_folder.id))
            .map_err(map_transfer_error!(self))?;
        self.announce_arrivals(&dst_folder, map.len() as u32).await;

        info!(
            "{} Copied {} message(s) from {:?} to {:?}",
            self.log_prefix,
            map.len(),
            src.full_path,
            dst
        );

        Ok(s::Response::cond(
            s::RespCondType::Ok,
            Some(copy_uid(dst_folder.uid_validity, &map)),
            "COPY completed",
        ))
    }

    pub(super) async fn cmd_move(
        &mut self,
        uid: bool,
        set: SequenceSet,
        dst: String,
        sender: &SendResponse,
    ) -> CmdResult {
        let (src, uids) = {
            let selected = selected!(self)?;
            if selected.read_only {
                return Err(read_only_error());
            }
            if !selected.access.can_delete() {
                return Err(no_permission(
                    "No permission to remove messages from this mailbox",
                ));
            }
            (selected.folder.clone(), selected.resolve(&set, uid))
        };
        let dst_folder = self.transfer_target(&dst).await?;

        if uids.is_empty() {
            return success("MOVE completed");
        }

        let mut map =
            repo!(self, move_messages(&src.id, &uids, &dst_folder.id))
                .map_err(map_transfer_error!(self))?;
        map.sort_unstable();

        // RFC 6851: the COPYUID goes out before the expunges.
        send_response(
            sender,
            s::Response::cond(
                s::RespCondType::Ok,
                Some(copy_uid(dst_folder.uid_validity, &map)),
                "Messages moved",
            ),
        )
        .await;

        let qresync = self.qresync_enabled;
        let mut lines = Vec::new();
        let mut events = Vec::new();
        if let Some(selected) = self.selected.as_mut() {
            for &(src_uid, _) in map.iter().rev() {
                if let Some(seq) = selected.seq_of(src_uid) {
                    if !qresync {
                        lines.push(s::Response::Expunge(seq));
                    }
                    events.push(Event::Expunge { seq, uid: src_uid });
                    selected.uids.remove(seq as usize - 1);
                }
            }
        }
        if qresync {
            lines.push(s::Response::Vanished(
                map.iter().map(|&(src_uid, _)| src_uid).collect(),
            ));
        }

        for event in events {
            self.notify(&src, event);
        }
        match repo!(self, refresh_folder_counts(&src.id)) {
            Ok(fresh) => self.notify(
                &fresh,
                Event::Status {
                    messages: fresh.message_count,
                },
            ),
            Err(e) => {
                warn!("{} Failed to refresh counts: {}", self.log_prefix, e)
            },
        }
        for line in lines {
            send_response(sender, line).await;
        }

        self.announce_arrivals(&dst_folder, map.len() as u32).await;

        info!(
            "{} Moved {} message(s) from {:?} to {:?}",
            self.log_prefix,
            map.len(),
            src.full_path,
            dst
        );

        success("MOVE completed")
    }

    /// Resolves and checks the destination of `COPY` or `MOVE` before any
    /// message is touched.
    async fn transfer_target(&self, dst: &str) -> PartialResult<Folder> {
        let resolved = self.resolve(dst)?;
        if !resolved.access.can_insert() {
            return Err(no_permission(
                "No permission to add messages to that mailbox",
            ));
        }

        let folder = self.folder_for(&resolved, true).await?;
        if !folder.selectable {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "Mailbox cannot hold messages",
            ));
        }

        Ok(folder)
    }

    /// Tells other sessions about `count` new messages in `folder`.
    async fn announce_arrivals(&mut self, folder: &Folder, count: u32) {
        match repo!(self, refresh_folder_counts(&folder.id)) {
            Ok(fresh) => {
                self.notify(&fresh, Event::Exists(fresh.message_count));
                self.notify(&fresh, Event::Recent(count));
            },
            Err(e) => {
                warn!("{} Failed to refresh counts: {}", self.log_prefix, e)
            },
        }

        // The hub does not echo our own events back to us.
        if let Some(selected) = self.selected.as_mut() {
            if selected.folder.id == folder.id {
                selected.pending_resync = true;
            }
        }
    }
}

fn copy_uid(uid_validity: u32, map: &[(u32, u32)]) -> s::RespTextCode {
    s::RespTextCode::CopyUid(
        uid_validity,
        map.iter().map(|&(src, _)| src).collect(),
        map.iter().map(|&(_, dst)| dst).collect(),
    )
}

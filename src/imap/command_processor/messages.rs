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

//! Commands that change messages in the selected folder, and the poll which
//! brings the session's view of that folder up to date.

use std::collections::HashMap;

use log::warn;

use super::defs::*;
use crate::imap::sequence::SeqRange;

impl CommandProcessor {
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn cmd_store(
        &mut self,
        uid: bool,
        set: SequenceSet,
        op: FlagOp,
        silent: bool,
        flags: Vec<Flag>,
        unchanged_since: Option<u64>,
        sender: &SendResponse,
    ) -> CmdResult {
        let by_uid = uid;
        let (folder, uids) = {
            let selected = selected!(self)?;
            if selected.read_only {
                return Err(read_only_error());
            }
            (selected.folder.clone(), selected.resolve(&set, by_uid))
        };

        if uids.is_empty() {
            return success("STORE completed");
        }

        if unchanged_since.is_some() {
            self.condstore_enabled = true;
        }

        // recent and modseq by UID, as of before the change
        let current = repo!(self, messages(&folder.id))
            .map_err(map_error!(self))?
            .into_iter()
            .map(|m| (m.uid, (m.recent, m.modseq)))
            .collect::<HashMap<_, _>>();

        let mut modified = SeqRange::new();
        let mut fetches = Vec::new();
        for uid in uids {
            let (recent, modseq) = match current.get(&uid) {
                Some(&state) => state,
                // Expunged by someone else; nothing to do.
                None => continue,
            };

            if unchanged_since.map_or(false, |limit| modseq > limit) {
                modified.append(uid);
                continue;
            }

            let (new_flags, new_modseq) =
                match repo!(self, update_flags(&folder.id, uid, op, &flags)) {
                    Ok(result) => result,
                    Err(Error::Repository(RepositoryError::NotFound(_))) => {
                        continue
                    },
                    Err(e) => {
                        return Err(catch_all_error_handling(
                            &self.log_prefix,
                            e,
                        ))
                    },
                };

            let seq = match self.selected.as_ref().and_then(|s| s.seq_of(uid))
            {
                Some(seq) => seq,
                None => continue,
            };

            self.notify(
                &folder,
                Event::Flags {
                    seq,
                    uid,
                    flags: new_flags.iter().map(Flag::to_string).collect(),
                },
            );

            if !silent {
                let mut reported = new_flags;
                if recent {
                    reported.push(Flag::Recent);
                }

                let mut atts = vec![s::FetchAtt::Flags(reported)];
                // RFC 7162 requires the UID whenever CONDSTORE is in use.
                if by_uid || self.condstore_enabled {
                    atts.push(s::FetchAtt::Uid(uid));
                }
                if self.condstore_enabled {
                    atts.push(s::FetchAtt::Modseq(new_modseq));
                }
                fetches.push(s::Response::Fetch(seq, atts));
            }
        }

        for fetch in fetches {
            send_response(sender, fetch).await;
        }

        if modified.is_empty() {
            success("STORE completed")
        } else {
            // RFC 7162 reports MODIFIED in terms of whatever the command was
            // addressed by.
            let modified = if by_uid {
                modified
            } else {
                let selected = selected!(self)?;
                modified
                    .items()
                    .filter_map(|uid| selected.seq_of(uid))
                    .collect()
            };

            Ok(s::Response::cond(
                s::RespCondType::Ok,
                Some(s::RespTextCode::Modified(modified)),
                "Conditional STORE failed for some messages",
            ))
        }
    }

    pub(super) async fn cmd_expunge(
        &mut self,
        uid: bool,
        set: Option<SequenceSet>,
        sender: &SendResponse,
    ) -> CmdResult {
        let limit = {
            let selected = selected!(self)?;
            if selected.read_only {
                return Err(read_only_error());
            }
            // UID EXPUNGE only removes the given messages.
            set.map(|set| selected.resolve(&set, uid))
        };

        self.expunge_deleted(limit, false, sender)
            .await
            .map_err(map_error!(self))?;
        success("EXPUNGE completed")
    }

    pub(super) async fn cmd_close(&mut self, sender: &SendResponse) -> CmdResult {
        if !selected!(self)?.read_only {
            if let Err(e) = self.expunge_deleted(None, true, sender).await {
                warn!("{} Implicit EXPUNGE failed: {}", self.log_prefix, e);
            }
        }

        self.deselect();
        success("CLOSE completed")
    }

    pub(super) async fn cmd_unselect(
        &mut self,
        _sender: &SendResponse,
    ) -> CmdResult {
        self.deselect();
        success("UNSELECT completed")
    }

    /// Removes every `\Deleted` message in the current view, optionally
    /// limited to the UIDs in `limit`.
    ///
    /// The removals are reported to the client (unless `silent`) and to other
    /// sessions in descending sequence number order, so that every number
    /// remains meaningful when it is processed.
    async fn expunge_deleted(
        &mut self,
        limit: Option<Vec<u32>>,
        silent: bool,
        sender: &SendResponse,
    ) -> Result<(), Error> {
        let folder = match self.selected.as_ref() {
            Some(selected) => selected.folder.clone(),
            None => return Ok(()),
        };

        let targets = {
            let messages = repo!(self, messages(&folder.id))?;
            let selected = match self.selected.as_ref() {
                Some(selected) => selected,
                None => return Ok(()),
            };
            messages
                .into_iter()
                .filter(|m| m.has_flag(&Flag::Deleted))
                .map(|m| m.uid)
                .filter(|&uid| selected.seq_of(uid).is_some())
                .filter(|uid| limit.as_ref().map_or(true, |l| l.contains(uid)))
                .collect::<Vec<_>>()
        };

        if targets.is_empty() {
            return Ok(());
        }

        let mut removed = repo!(self, expunge(&folder.id, &targets))?;
        removed.sort_unstable();

        let qresync = self.qresync_enabled;
        let mut lines = Vec::new();
        let mut events = Vec::new();
        if let Some(selected) = self.selected.as_mut() {
            for &uid in removed.iter().rev() {
                if let Some(seq) = selected.seq_of(uid) {
                    if !qresync {
                        lines.push(s::Response::Expunge(seq));
                    }
                    events.push(Event::Expunge { seq, uid });
                    selected.uids.remove(seq as usize - 1);
                }
            }
        }

        if qresync {
            lines.push(s::Response::Vanished(removed.iter().copied().collect()));
        }

        for event in events {
            self.notify(&folder, event);
        }

        if !silent {
            for line in lines {
                send_response(sender, line).await;
            }
        }

        Ok(())
    }

    /// Brings the selected folder's view up to date with whatever other
    /// sessions have reported, sending the corresponding untagged responses.
    ///
    /// If `allow_expunge` is false, removals are not reported yet and the
    /// view keeps the removed messages until the next poll that allows it.
    pub(super) async fn poll(
        &mut self,
        sender: &SendResponse,
        allow_expunge: bool,
        idling: bool,
    ) -> Result<(), Error> {
        let mut notifications = Vec::new();
        match self.selected.as_mut() {
            Some(selected) => {
                while let Some(n) = selected.subscription.try_recv() {
                    notifications.push(n);
                }
            },
            None => return Ok(()),
        }

        self.apply_notifications(notifications, sender, allow_expunge, idling)
            .await
    }

    /// Handles notifications received from the hub.
    ///
    /// Changes to the selected folder update the view. Changes to any other
    /// folder are only reported (as `STATUS`) while `idling`.
    pub(super) async fn apply_notifications(
        &mut self,
        notifications: Vec<Notification>,
        sender: &SendResponse,
        allow_expunge: bool,
        idling: bool,
    ) -> Result<(), Error> {
        let mut lines = Vec::new();
        let mut elsewhere = Vec::new();
        let mut resync = false;
        let mut exists = false;

        {
            let selected = match self.selected.as_mut() {
                Some(selected) => selected,
                None => return Ok(()),
            };

            for notification in notifications {
                if notification.folder_id != selected.folder.id {
                    if idling {
                        elsewhere.push(notification);
                    }
                    continue;
                }

                match notification.event {
                    Event::Flags { uid, ref flags, .. } => {
                        if let Some(seq) = selected.seq_of(uid) {
                            let flags = flags
                                .iter()
                                .filter_map(|f| f.parse::<Flag>().ok())
                                .collect();
                            lines.push(s::Response::Fetch(
                                seq,
                                vec![
                                    s::FetchAtt::Flags(flags),
                                    s::FetchAtt::Uid(uid),
                                ],
                            ));
                        }
                    },
                    Event::Exists(..) => {
                        resync = true;
                        exists = true;
                    },
                    Event::Expunge { .. } | Event::Recent(..) => resync = true,
                    Event::Status { .. } => (),
                }
            }

            resync |= selected.pending_resync;
        }

        if let Some(identity) = self.identity.as_ref() {
            for notification in elsewhere {
                let messages = match notification.event {
                    Event::Exists(messages) | Event::Status { messages } => {
                        messages
                    },
                    _ => continue,
                };
                let mailbox =
                    match identity.namespace.mailbox(&notification.mailbox_id) {
                        Some(mailbox) => mailbox,
                        None => continue,
                    };

                lines.push(s::Response::Status(s::StatusResponse {
                    mailbox: identity
                        .namespace
                        .display_name(mailbox, &notification.folder_path),
                    atts: vec![(
                        crate::imap::response::StatusAtt::Messages,
                        u64::from(messages),
                    )],
                }));
            }
        }

        for line in lines {
            send_response(sender, line).await;
        }

        if resync {
            self.resync(sender, allow_expunge, exists).await?;
        }

        Ok(())
    }

    /// Reconciles the view with the repository's listing of the folder.
    ///
    /// Working from the listing rather than from individual events means
    /// lost or coalesced notifications cannot leave the view wrong.
    async fn resync(
        &mut self,
        sender: &SendResponse,
        allow_expunge: bool,
        force_exists: bool,
    ) -> Result<(), Error> {
        let folder_id = match self.selected.as_ref() {
            Some(selected) => selected.folder.id.clone(),
            None => return Ok(()),
        };

        let current = repo!(self, messages(&folder_id))?
            .into_iter()
            .map(|m| m.uid)
            .collect::<Vec<_>>();
        let folder = repo!(self, refresh_folder_counts(&folder_id))?;

        let qresync = self.qresync_enabled;
        let selected = match self.selected.as_mut() {
            Some(selected) => selected,
            None => return Ok(()),
        };

        let gone = selected
            .uids
            .iter()
            .copied()
            .filter(|uid| current.binary_search(uid).is_err())
            .collect::<Vec<_>>();

        let mut lines = Vec::new();
        selected.pending_resync = false;
        if !gone.is_empty() {
            if allow_expunge {
                if qresync {
                    lines.push(s::Response::Vanished(
                        gone.iter().copied().collect(),
                    ));
                } else {
                    // Every number is computed against the view before any
                    // removal; descending order keeps them all valid.
                    for &uid in gone.iter().rev() {
                        if let Some(seq) = selected.seq_of(uid) {
                            lines.push(s::Response::Expunge(seq));
                        }
                    }
                }
                selected.uids.retain(|uid| current.binary_search(uid).is_ok());
            } else {
                selected.pending_resync = true;
            }
        }

        let max_uid = selected.max_uid();
        let before = selected.uids.len();
        selected
            .uids
            .extend(current.iter().copied().filter(|&uid| uid > max_uid));
        if selected.uids.len() != before || force_exists {
            lines.push(s::Response::Exists(selected.uids.len() as u32));
            lines.push(s::Response::Recent(folder.recent_count));
        }

        selected.folder = folder;

        for line in lines {
            send_response(sender, line).await;
        }

        Ok(())
    }
}

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

use std::borrow::Cow;
use std::collections::BTreeSet;

use chrono::prelude::*;
use log::{error, info, warn};

use super::defs::*;
use crate::imap::namespace::{name_matcher, DELIMITER};
use crate::imap::response::StatusAtt;

/// Where an `APPEND` will store its message, established before the literal
/// is read.
pub struct AppendTarget {
    folder: Folder,
    /// The name the client used, for logging.
    name: String,
}

/// One line of a `LIST` response, before attributes are computed.
struct ListEntry {
    name: String,
    folder: Option<Folder>,
}

impl CommandProcessor {
    pub(super) async fn cmd_select(
        &mut self,
        mailbox: String,
        condstore: bool,
        examine: bool,
        sender: &SendResponse,
    ) -> CmdResult {
        // SELECT and EXAMINE unselect any selected mailbox regardless of
        // whether they succeed.
        self.deselect();

        let resolved = self.resolve(&mailbox)?;
        if !resolved.access.can_read() {
            return Err(no_permission("No read access to mailbox"));
        }

        let folder = self.folder_for(&resolved, false).await?;
        if !folder.selectable {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::NonExistent),
                "Mailbox is not selectable",
            ));
        }

        let messages =
            repo!(self, messages(&folder.id)).map_err(map_error!(self))?;

        if condstore && self.config.imap.enable_condstore {
            self.condstore_enabled = true;
        }

        let read_only = examine || !resolved.access.can_write();
        let flags = Flag::SETTABLE.to_vec();

        send_response(sender, s::Response::Flags(flags.clone())).await;
        send_response(sender, s::Response::Exists(messages.len() as u32))
            .await;
        send_response(
            sender,
            s::Response::Recent(
                messages.iter().filter(|m| m.recent).count() as u32
            ),
        )
        .await;
        if let Some(unseen) = messages
            .iter()
            .find(|m| !m.has_flag(&Flag::Seen))
            .map(|m| m.seq)
        {
            send_response(
                sender,
                s::Response::cond(
                    s::RespCondType::Ok,
                    Some(s::RespTextCode::Unseen(unseen)),
                    "First unseen message",
                ),
            )
            .await;
        }
        send_response(
            sender,
            s::Response::cond(
                s::RespCondType::Ok,
                Some(s::RespTextCode::UidValidity(folder.uid_validity)),
                "UIDs valid",
            ),
        )
        .await;
        send_response(
            sender,
            s::Response::cond(
                s::RespCondType::Ok,
                Some(s::RespTextCode::UidNext(folder.uid_next)),
                "Predicted next UID",
            ),
        )
        .await;
        if folder.highest_modseq > 0 {
            send_response(
                sender,
                s::Response::cond(
                    s::RespCondType::Ok,
                    Some(s::RespTextCode::HighestModseq(folder.highest_modseq)),
                    "Highest",
                ),
            )
            .await;
        }
        send_response(
            sender,
            if read_only {
                s::Response::cond(
                    s::RespCondType::Ok,
                    Some(s::RespTextCode::PermanentFlags(vec![], false)),
                    "No permanent flags permitted",
                )
            } else {
                s::Response::cond(
                    s::RespCondType::Ok,
                    Some(s::RespTextCode::PermanentFlags(flags, true)),
                    "Flags permitted",
                )
            },
        )
        .await;

        let subscription =
            self.hub.subscribe(&resolved.mailbox.id, &self.session_id);
        self.selected = Some(Selected {
            mailbox: resolved.mailbox,
            access: resolved.access,
            folder,
            name: mailbox,
            read_only,
            uids: messages.iter().map(|m| m.uid).collect(),
            subscription,
            pending_resync: false,
        });

        Ok(s::Response::cond(
            s::RespCondType::Ok,
            Some(if read_only {
                s::RespTextCode::ReadOnly
            } else {
                s::RespTextCode::ReadWrite
            }),
            if examine {
                "EXAMINE completed"
            } else {
                "SELECT completed"
            },
        ))
    }

    pub(super) async fn cmd_create(
        &mut self,
        name: String,
        _sender: &SendResponse,
    ) -> CmdResult {
        let resolved = self.resolve(&name)?;
        if !resolved.access.can_admin() {
            return Err(no_permission("No permission to create mailboxes"));
        }
        if resolved.path.is_empty() {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "Cannot create a namespace root",
            ));
        }

        repo!(self, create_folder(&resolved.mailbox.id, &resolved.path))
            .map_err(map_error! {
                self,
                Error::Repository(RepositoryError::AlreadyExists(_)) => (
                    No,
                    Some(s::RespTextCode::AlreadyExists),
                    "Mailbox already exists",
                ),
                Error::Repository(RepositoryError::NotFound(_)) => (
                    No,
                    Some(s::RespTextCode::NonExistent),
                    "No such mailbox",
                ),
            })?;

        info!("{} Created mailbox {:?}", self.log_prefix, name);
        success("CREATE completed")
    }

    pub(super) async fn cmd_delete(
        &mut self,
        name: String,
        _sender: &SendResponse,
    ) -> CmdResult {
        let resolved = self.resolve(&name)?;
        if !resolved.access.can_admin() {
            return Err(no_permission("No permission to delete mailboxes"));
        }

        let folder = self.folder_for(&resolved, false).await?;
        if folder.is_inbox() || folder.special_use.is_some() {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "Special-use mailboxes cannot be deleted",
            ));
        }

        let children_prefix = format!("{}{}", folder.full_path, DELIMITER);
        let has_children = repo!(self, folders(&folder.mailbox_id))
            .map_err(map_error!(self))?
            .iter()
            .any(|f| f.full_path.starts_with(&children_prefix));
        if has_children {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::HasChildren),
                "Mailbox has inferior mailboxes",
            ));
        }

        if self
            .selected
            .as_ref()
            .map_or(false, |sel| sel.folder.id == folder.id)
        {
            self.deselect();
        }

        repo!(self, delete_folder(&folder.id)).map_err(map_error! {
            self,
            Error::Repository(RepositoryError::NotFound(_)) => (
                No,
                Some(s::RespTextCode::NonExistent),
                "No such mailbox",
            ),
        })?;

        info!("{} Deleted mailbox {:?}", self.log_prefix, name);
        success("DELETE completed")
    }

    pub(super) async fn cmd_rename(
        &mut self,
        src: String,
        dst: String,
        _sender: &SendResponse,
    ) -> CmdResult {
        let src_resolved = self.resolve(&src)?;
        let dst_resolved = self.resolve(&dst)?;
        if !src_resolved.access.can_admin() || !dst_resolved.access.can_admin()
        {
            return Err(no_permission("No permission to rename mailboxes"));
        }
        if src_resolved.mailbox.id != dst_resolved.mailbox.id {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "Cannot move mailboxes between accounts",
            ));
        }

        let folder = self.folder_for(&src_resolved, false).await?;
        if folder.is_inbox() {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "INBOX cannot be renamed",
            ));
        }

        let new_path = dst_resolved.path;
        let children_prefix = format!("{}{}", folder.full_path, DELIMITER);
        if new_path.is_empty() || new_path.starts_with(&children_prefix) {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "Cannot rename mailbox into itself",
            ));
        }

        repo!(self, rename_folder(&folder.id, &new_path)).map_err(
            map_error! {
                self,
                Error::Repository(RepositoryError::AlreadyExists(_)) => (
                    No,
                    Some(s::RespTextCode::AlreadyExists),
                    "Target mailbox already exists",
                ),
                Error::Repository(RepositoryError::NotFound(_)) => (
                    No,
                    Some(s::RespTextCode::NonExistent),
                    "No such mailbox",
                ),
            },
        )?;

        // Keep the selection pointing at the right path if it was moved
        // along.
        if let Some(selected) = self.selected.as_mut() {
            if selected.folder.mailbox_id == folder.mailbox_id {
                if selected.folder.id == folder.id {
                    selected.folder.full_path = new_path.clone();
                } else if let Some(rest) =
                    selected.folder.full_path.strip_prefix(&children_prefix)
                {
                    selected.folder.full_path =
                        format!("{}{}{}", new_path, DELIMITER, rest);
                }
            }
        }

        info!("{} Renamed {:?} to {:?}", self.log_prefix, src, dst);
        success("RENAME completed")
    }

    pub(super) async fn cmd_subscribe(
        &mut self,
        name: String,
        subscribe: bool,
        _sender: &SendResponse,
    ) -> CmdResult {
        let resolved = self.resolve(&name)?;
        let folder = self.folder_for(&resolved, false).await?;
        repo!(self, set_subscribed(&folder.id, subscribe))
            .map_err(map_error!(self))?;

        success(if subscribe {
            "SUBSCRIBE completed"
        } else {
            "UNSUBSCRIBE completed"
        })
    }

    pub(super) async fn cmd_list(
        &mut self,
        cmd: syntax::ListCommand,
        lsub: bool,
        sender: &SendResponse,
    ) -> CmdResult {
        let done = if lsub {
            "LSUB completed"
        } else {
            "LIST completed"
        };

        // RFC 3501 special case: an empty pattern asks for the delimiter.
        if !lsub && cmd.patterns.iter().all(|p| p.is_empty()) {
            send_response(
                sender,
                s::Response::List(s::ListResponse {
                    attributes: vec![Cow::Borrowed("\\Noselect")],
                    name: String::new(),
                }),
            )
            .await;
            return success(done);
        }

        let namespace = identity!(self)?.namespace.clone();
        let mut entries = Vec::<ListEntry>::new();
        for (mailbox, access) in namespace.mailboxes() {
            if !access.can_read() {
                continue;
            }

            let folders =
                repo!(self, folders(&mailbox.id)).map_err(map_error!(self))?;
            for folder in folders {
                entries.push(ListEntry {
                    name: namespace.display_name(mailbox, &folder.full_path),
                    folder: Some(folder),
                });
            }
        }

        // Domain prefixes, the shared root and the like exist only as
        // hierarchy; they are listed as placeholders.
        let known = entries
            .iter()
            .map(|e| e.name.clone())
            .collect::<BTreeSet<_>>();
        let mut placeholders = BTreeSet::new();
        for name in &known {
            let mut end = 0;
            while let Some(ix) = name[end..].find(DELIMITER) {
                let parent = &name[..end + ix];
                if !known.contains(parent) {
                    placeholders.insert(parent.to_owned());
                }
                end += ix + 1;
            }
        }
        entries.extend(placeholders.into_iter().map(|name| ListEntry {
            name,
            folder: None,
        }));
        entries.sort_by(|a, b| {
            (a.name != "INBOX", &a.name).cmp(&(b.name != "INBOX", &b.name))
        });

        let patterns = cmd
            .patterns
            .iter()
            .map(|p| format!("{}{}", cmd.reference, p))
            .collect::<Vec<_>>();
        let matcher = name_matcher(patterns.iter().map(String::as_str));

        let all_names = entries
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>();
        let mut responses = Vec::new();
        for entry in &entries {
            if !matcher(&entry.name) {
                continue;
            }

            let subscribed =
                entry.folder.as_ref().map_or(false, |f| f.subscribed);
            let special_use = entry.folder.as_ref().and_then(|f| f.special_use);
            if (cmd.select_subscribed && !subscribed)
                || (cmd.select_special_use && special_use.is_none())
            {
                continue;
            }

            let mut attributes = Vec::<Cow<'static, str>>::new();
            if entry.folder.as_ref().map_or(true, |f| !f.selectable) {
                attributes.push(Cow::Borrowed("\\Noselect"));
            }
            if !lsub {
                let children_prefix = format!("{}{}", entry.name, DELIMITER);
                attributes.push(Cow::Borrowed(
                    if all_names.iter().any(|n| n.starts_with(&children_prefix))
                    {
                        "\\HasChildren"
                    } else {
                        "\\HasNoChildren"
                    },
                ));
                if subscribed
                    && (cmd.return_subscribed || cmd.select_subscribed)
                {
                    attributes.push(Cow::Borrowed("\\Subscribed"));
                }
                match special_use {
                    None | Some(SpecialUse::Inbox) => (),
                    Some(special_use) => {
                        attributes.push(Cow::Borrowed(special_use.name()))
                    },
                }
            }

            let list = s::ListResponse {
                attributes,
                name: entry.name.clone(),
            };
            responses.push(if lsub {
                s::Response::Lsub(list)
            } else {
                s::Response::List(list)
            });

            if let (Some(ref atts), Some(folder)) =
                (&cmd.return_status, entry.folder.as_ref())
            {
                if folder.selectable {
                    responses.push(s::Response::Status(s::StatusResponse {
                        mailbox: entry.name.clone(),
                        atts: status_atts(folder, atts),
                    }));
                }
            }
        }

        for response in responses {
            send_response(sender, response).await;
        }

        success(done)
    }

    pub(super) async fn cmd_status(
        &mut self,
        mailbox: String,
        atts: Vec<StatusAtt>,
        sender: &SendResponse,
    ) -> CmdResult {
        let resolved = self.resolve(&mailbox)?;
        if !resolved.access.can_read() {
            return Err(no_permission("No read access to mailbox"));
        }

        let folder = self.folder_for(&resolved, false).await?;
        if !folder.selectable {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::NonExistent),
                "Mailbox is not selectable",
            ));
        }
        let folder = repo!(self, refresh_folder_counts(&folder.id))
            .map_err(map_error!(self))?;

        send_response(
            sender,
            s::Response::Status(s::StatusResponse {
                mailbox,
                atts: status_atts(&folder, &atts),
            }),
        )
        .await;
        success("STATUS completed")
    }

    /// Checks everything about an `APPEND` that can be checked before its
    /// literal is read.
    ///
    /// On `Err`, the server must reject or skip the literal and send the
    /// response as the tagged result.
    pub async fn append_start(
        &mut self,
        mailbox: &str,
        size: u32,
    ) -> PartialResult<AppendTarget> {
        if u64::from(size) > self.config.imap.max_message_size {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::TooBig),
                "Message exceeds the size limit",
            ));
        }

        let resolved = self.resolve(mailbox)?;
        if !resolved.access.can_insert() {
            return Err(no_permission("No permission to append to mailbox"));
        }

        let folder = self.folder_for(&resolved, true).await?;
        if !folder.selectable {
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "Mailbox is not selectable",
            ));
        }

        let quota = repo!(self, quota(&folder.mailbox_id))
            .map_err(map_error!(self))?;
        if quota.storage_limit > 0
            && quota.storage_used + u64::from(size) > quota.storage_limit
        {
            return Err(over_quota());
        }

        Ok(AppendTarget {
            folder,
            name: mailbox.to_owned(),
        })
    }

    /// Stores the message of an `APPEND` once its literal has been read.
    /// Returns the tagged response.
    ///
    /// Like any other command, a successful `APPEND` is followed by a poll,
    /// so a message appended to the selected folder is announced with
    /// `EXISTS` before the tagged response.
    pub async fn append_finish(
        &mut self,
        target: AppendTarget,
        flags: Vec<Flag>,
        date: Option<DateTime<FixedOffset>>,
        body: Vec<u8>,
        sender: &SendResponse,
    ) -> s::Response {
        self.metrics.command_processed("APPEND");
        match self.append_message(target, flags, date, body).await {
            Ok(response) => {
                if let Err(e) = self.poll(sender, true, false).await {
                    error!("{} Poll failed: {}", self.log_prefix, e);
                }
                response
            },
            Err(response) => response,
        }
    }

    async fn append_message(
        &mut self,
        target: AppendTarget,
        flags: Vec<Flag>,
        date: Option<DateTime<FixedOffset>>,
        body: Vec<u8>,
    ) -> CmdResult {
        let AppendTarget { folder, name } = target;
        let message = repo!(
            self,
            append_message(
                &folder.id,
                NewMessage {
                    flags,
                    internal_date: date,
                    body,
                }
            )
        )
        .map_err(map_error! {
            self,
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
        })?;

        match repo!(self, refresh_folder_counts(&folder.id)) {
            Ok(fresh) => {
                self.notify(&fresh, Event::Exists(fresh.message_count));
                self.notify(&fresh, Event::Recent(1));
            },
            Err(e) => {
                warn!("{} Failed to refresh counts: {}", self.log_prefix, e)
            },
        }

        if let Some(selected) = self.selected.as_mut() {
            if selected.folder.id == folder.id {
                selected.pending_resync = true;
            }
        }

        info!(
            "{} Appended UID {} to {:?}",
            self.log_prefix, message.uid, name
        );
        Ok(s::Response::cond(
            s::RespCondType::Ok,
            Some(s::RespTextCode::AppendUid(folder.uid_validity, message.uid)),
            "APPEND completed",
        ))
    }
}

pub(super) fn over_quota() -> s::Response {
    s::Response::cond(
        s::RespCondType::No,
        Some(s::RespTextCode::OverQuota),
        "Quota exceeded",
    )
}

fn status_atts(folder: &Folder, atts: &[StatusAtt]) -> Vec<(StatusAtt, u64)> {
    atts.iter()
        .map(|&att| {
            let value = match att {
                StatusAtt::Messages => u64::from(folder.message_count),
                StatusAtt::Recent => u64::from(folder.recent_count),
                StatusAtt::UidNext => u64::from(folder.uid_next),
                StatusAtt::UidValidity => u64::from(folder.uid_validity),
                StatusAtt::Unseen => u64::from(folder.unseen_count),
                StatusAtt::HighestModseq => folder.highest_modseq,
            };
            (att, value)
        })
        .collect()
}

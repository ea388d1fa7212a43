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

//! RFC 2087/9208 quota commands.
//!
//! Each owned mailbox is its own quota root, named after its domain. The
//! primary mailbox additionally answers to the empty root name.

use std::borrow::Cow;

use log::info;

use super::defs::*;

impl CommandProcessor {
    pub(super) async fn cmd_get_quota(
        &mut self,
        root: String,
        sender: &SendResponse,
    ) -> CmdResult {
        let mailbox = self.quota_mailbox(&root)?;
        let quota = repo!(self, quota(&mailbox.id)).map_err(map_error!(self))?;

        send_response(sender, quota_response(root, &quota)).await;
        success("GETQUOTA completed")
    }

    pub(super) async fn cmd_get_quota_root(
        &mut self,
        mailbox: String,
        sender: &SendResponse,
    ) -> CmdResult {
        let resolved = self.resolve(&mailbox)?;
        if !resolved.access.can_read() {
            return Err(no_permission("No read access to mailbox"));
        }

        let owned = {
            let identity = identity!(self)?;
            identity
                .namespace
                .owned()
                .iter()
                .any(|mb| mb.id == resolved.mailbox.id)
        };

        // Shared mailboxes count against someone else's quota, which this
        // user has no business seeing.
        if !owned {
            send_response(sender, s::Response::QuotaRoot(mailbox, Vec::new()))
                .await;
            return success("GETQUOTAROOT completed");
        }

        let root = resolved.mailbox.domain.name.clone();
        let quota = repo!(self, quota(&resolved.mailbox.id))
            .map_err(map_error!(self))?;

        send_response(
            sender,
            s::Response::QuotaRoot(mailbox, vec![root.clone()]),
        )
        .await;
        send_response(sender, quota_response(root, &quota)).await;
        success("GETQUOTAROOT completed")
    }

    pub(super) async fn cmd_set_quota(
        &mut self,
        root: String,
        limits: Vec<(String, u64)>,
        sender: &SendResponse,
    ) -> CmdResult {
        if Role::Admin != identity!(self)?.user.role {
            return Err(no_permission("Only administrators may set quotas"));
        }

        let mailbox = self.quota_mailbox(&root)?;

        let mut storage_limit = None;
        let mut message_limit = None;
        for (resource, limit) in limits {
            if resource.eq_ignore_ascii_case("STORAGE") {
                storage_limit = Some(limit.saturating_mul(1024));
            } else if resource.eq_ignore_ascii_case("MESSAGE") {
                message_limit = Some(limit);
            } else {
                return Err(s::Response::no(Cow::Owned(format!(
                    "Unsupported quota resource {}",
                    resource
                ))));
            }
        }

        let quota =
            repo!(self, set_quota(&mailbox.id, storage_limit, message_limit))
                .map_err(map_error!(self))?;

        info!(
            "{} Set quota of {} to {:?} bytes, {:?} messages",
            self.log_prefix, mailbox.email, storage_limit, message_limit
        );

        send_response(sender, quota_response(root, &quota)).await;
        success("SETQUOTA completed")
    }

    fn quota_mailbox(&self, root: &str) -> PartialResult<Mailbox> {
        identity!(self)?
            .namespace
            .quota_mailbox(root)
            .cloned()
            .ok_or_else(|| {
                s::Response::cond(
                    s::RespCondType::No,
                    Some(s::RespTextCode::NonExistent),
                    "No such quota root",
                )
            })
    }
}

fn quota_response(root: String, quota: &Quota) -> s::Response {
    let mut resources = vec![(
        "STORAGE",
        quota.storage_used / 1024,
        quota.storage_limit / 1024,
    )];
    if quota.message_limit > 0 {
        resources.push(("MESSAGE", quota.message_count, quota.message_limit));
    }

    s::Response::Quota(s::QuotaResponse { root, resources })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn storage_is_reported_in_kilobytes() {
        let quota = Quota {
            storage_used: 10 * 1024 + 1000,
            storage_limit: 1024 * 1024,
            message_count: 3,
            message_limit: 0,
        };
        assert_eq!(
            s::Response::Quota(s::QuotaResponse {
                root: String::new(),
                resources: vec![("STORAGE", 10, 1024)],
            }),
            quota_response(String::new(), &quota)
        );
    }

    #[test]
    fn message_limit_only_when_set() {
        let quota = Quota {
            storage_used: 0,
            storage_limit: 2048,
            message_count: 3,
            message_limit: 100,
        };
        assert_eq!(
            s::Response::Quota(s::QuotaResponse {
                root: "example.com".to_owned(),
                resources: vec![("STORAGE", 0, 2), ("MESSAGE", 3, 100)],
            }),
            quota_response("example.com".to_owned(), &quota)
        );
    }
}

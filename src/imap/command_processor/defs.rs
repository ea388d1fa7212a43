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
use std::sync::Arc;

use log::error;
use tokio::sync::mpsc;

pub(super) use crate::account::model::*;
pub(super) use crate::account::repository::{Repository, RepositoryError};
pub(super) use crate::account::token::TokenValidator;
pub(super) use crate::imap::namespace::{Access, Namespace, Resolved};
pub(super) use crate::imap::response_writer::{OutputControl, OutputEvent};
pub(super) use crate::imap::sequence::SequenceSet;
pub(super) use crate::notify::{Event, Notification, NotifyHub, Subscription};
pub(super) use crate::support::{
    error::Error, log_prefix::LogPrefix, metrics::Metrics,
    system_config::SystemConfig,
};
pub(super) use crate::imap::response as s;
pub(super) use crate::imap::syntax;

/// The collaborators every session shares.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<SystemConfig>,
    pub repo: Arc<dyn Repository>,
    pub tokens: Arc<dyn TokenValidator>,
    pub hub: Arc<NotifyHub>,
    pub metrics: Arc<dyn Metrics>,
}

/// Receives parsed commands and emits responses in the model defined in the
/// `response` module.
///
/// Besides translating between the protocol and the repository, it owns the
/// session state: who is logged in, which folder is selected, which
/// extensions were enabled, and the session's subscriptions in the hub.
pub struct CommandProcessor {
    pub(super) log_prefix: LogPrefix,
    pub(super) session_id: String,
    pub(super) config: Arc<SystemConfig>,
    pub(super) repo: Arc<dyn Repository>,
    pub(super) tokens: Arc<dyn TokenValidator>,
    pub(super) hub: Arc<NotifyHub>,
    pub(super) metrics: Arc<dyn Metrics>,

    /// Whether the connection is encrypted.
    pub(super) tls_active: bool,
    /// Whether `STARTTLS` can be performed on this connection.
    pub(super) tls_offered: bool,
    pub(super) compressing: bool,

    pub(super) identity: Option<Identity>,
    pub(super) selected: Option<Selected>,
    pub(super) condstore_enabled: bool,
    pub(super) qresync_enabled: bool,

    pub(super) logged_out: bool,
    pub(super) id_exchanged: bool,
}

pub(super) struct Identity {
    pub(super) user: User,
    pub(super) namespace: Namespace,
}

pub(super) struct Selected {
    pub(super) mailbox: Mailbox,
    pub(super) access: Access,
    pub(super) folder: Folder,
    /// The name the client selected it under.
    pub(super) name: String,
    pub(super) read_only: bool,
    /// The UIDs of the messages in sequence number order, as last reported
    /// to the client. Only changes at points where the protocol allows
    /// `EXISTS` and `EXPUNGE` responses.
    pub(super) uids: Vec<u32>,
    pub(super) subscription: Subscription,
    /// Set when the view must be reconciled with the repository at the next
    /// point where that is allowed.
    pub(super) pending_resync: bool,
}

impl Selected {
    pub(super) fn seq_of(&self, uid: u32) -> Option<u32> {
        self.uids
            .binary_search(&uid)
            .ok()
            .map(|ix| ix as u32 + 1)
    }

    pub(super) fn max_uid(&self) -> u32 {
        self.uids.last().copied().unwrap_or(0)
    }

    /// Resolves a sequence set written by the client to the UIDs it covers,
    /// in ascending order.
    ///
    /// Numbers beyond the current view are ignored.
    pub(super) fn resolve(&self, set: &SequenceSet, uid: bool) -> Vec<u32> {
        if uid {
            let range = set.resolve(self.max_uid());
            self.uids
                .iter()
                .copied()
                .filter(|&u| range.contains(u))
                .collect()
        } else {
            let range = set.resolve(self.uids.len() as u32);
            self.uids
                .iter()
                .enumerate()
                .filter(|&(ix, _)| range.contains(ix as u32 + 1))
                .map(|(_, &u)| u)
                .collect()
        }
    }
}

/// Used just for the convenient `?` operator. We mostly don't distinguish `Ok`
/// from `Err` --- the contained value is sent down the wire --- though on
/// `Err` no polling happens.
pub(super) type CmdResult = Result<s::Response, s::Response>;

/// Return value from an operation that can either succeed with a value, or
/// fail with an IMAP response.
pub(super) type PartialResult<T> = Result<T, s::Response>;

/// Channel used to send additional non-tagged responses as they become
/// available.
pub type SendResponse = mpsc::Sender<OutputEvent>;

/// Send an event through the sender, ignoring errors.
pub(super) async fn send_event(sender: &SendResponse, event: OutputEvent) {
    let _ = sender.send(event).await;
}

/// Send an untagged response through `sender`, ignoring errors.
///
/// `OutputControl` is set implicitly by inspecting the response.
pub(super) async fn send_response(sender: &SendResponse, response: s::Response) {
    let ctl = match response.cond_type() {
        Some(s::RespCondType::Bye) => OutputControl::Disconnect,
        _ => OutputControl::Buffer,
    };
    send_event(
        sender,
        OutputEvent::ResponseLine {
            line: s::ResponseLine::untagged(response),
            ctl,
        },
    )
    .await;
}

impl CommandProcessor {
    pub fn new(
        log_prefix: LogPrefix,
        session_id: String,
        services: Services,
        tls_active: bool,
        tls_offered: bool,
    ) -> Self {
        log_prefix.set_session(session_id.clone());
        CommandProcessor {
            log_prefix,
            session_id,
            config: services.config,
            repo: services.repo,
            tokens: services.tokens,
            hub: services.hub,
            metrics: services.metrics,

            tls_active,
            tls_offered: tls_offered && !tls_active,
            compressing: false,

            identity: None,
            selected: None,
            condstore_enabled: false,
            qresync_enabled: false,

            logged_out: false,
            id_exchanged: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn logged_out(&self) -> bool {
        self.logged_out
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Releases everything the session holds in shared structures. Called
    /// once the connection is gone, whatever the reason.
    pub fn close(&mut self) {
        self.selected = None;
        self.identity = None;
        self.hub.unsubscribe_all(&self.session_id);
    }

    /// The capabilities to advertise in the current state of the session.
    pub fn capabilities(&self) -> Vec<String> {
        let imap = &self.config.imap;
        let mut caps = Vec::<String>::new();
        let mut add = |cap: String| {
            if !caps.iter().any(|c| c.eq_ignore_ascii_case(&cap)) {
                caps.push(cap);
            }
        };

        for cap in &imap.capabilities {
            if !imap.literal_plus && cap.eq_ignore_ascii_case("LITERAL+") {
                continue;
            }
            add(cap.clone());
        }

        if self.tls_offered && !self.tls_active {
            add("STARTTLS".to_owned());
        }

        if self.identity.is_none() {
            if self.config.auth.require_encryption && !self.tls_active {
                add("LOGINDISABLED".to_owned());
            } else {
                for method in &self.config.auth.methods {
                    add(format!("AUTH={}", method.to_ascii_uppercase()));
                }
                if self.config.oauth2.enabled {
                    add("AUTH=XOAUTH2".to_owned());
                    add("AUTH=OAUTHBEARER".to_owned());
                }
            }
            add("SASL-IR".to_owned());
        }

        if imap.enable_condstore {
            add("CONDSTORE".to_owned());
        }
        if imap.enable_qresync {
            add("QRESYNC".to_owned());
        }
        if imap.enable_thread {
            add("THREAD=ORDEREDSUBJECT".to_owned());
            add("THREAD=REFERENCES".to_owned());
        }
        if imap.enable_compression && !self.compressing {
            add("COMPRESS=DEFLATE".to_owned());
        }
        add(format!("APPENDLIMIT={}", imap.max_message_size));

        caps
    }

    /// Resolves a client-visible name against the session's namespace.
    pub(super) fn resolve(&self, name: &str) -> PartialResult<Resolved> {
        identity!(self)?.namespace.resolve(name).map_err(|e| {
            s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::NonExistent),
                e.to_string(),
            )
        })
    }

    /// Looks up the folder a resolved name refers to.
    ///
    /// If it does not exist, the response carries `TRYCREATE` if
    /// `try_create` is set, for commands after which the client may want to
    /// create the folder and retry.
    pub(super) async fn folder_for(
        &self,
        resolved: &Resolved,
        try_create: bool,
    ) -> PartialResult<Folder> {
        repo!(self, folder_by_path(&resolved.mailbox.id, &resolved.path))
            .map_err(map_error! {
                self,
                Error::Repository(RepositoryError::NotFound(_)) => (
                    No,
                    Some(if try_create {
                        s::RespTextCode::TryCreate
                    } else {
                        s::RespTextCode::NonExistent
                    }),
                    "No such mailbox",
                ),
            })
    }

    /// Publishes a change to `folder` to other sessions.
    pub(super) fn notify(&self, folder: &Folder, event: Event) {
        self.hub.publish(Notification {
            origin: self.session_id.clone(),
            mailbox_id: folder.mailbox_id.clone(),
            folder_id: folder.id.clone(),
            folder_path: folder.full_path.clone(),
            event,
        });
    }

    /// Drops the current selection, if any, and its subscription.
    pub(super) fn deselect(&mut self) {
        if let Some(selected) = self.selected.take() {
            self.hub
                .unsubscribe(&selected.mailbox.id, &self.session_id);
        }
    }
}

pub(super) fn success(quip: impl Into<Cow<'static, str>>) -> CmdResult {
    Ok(s::Response::ok(quip))
}

pub(super) fn catch_all_error_handling(
    log_prefix: &LogPrefix,
    e: Error,
) -> s::Response {
    error!("{} Unhandled internal error: {}", log_prefix, e);
    s::Response::cond(
        s::RespCondType::No,
        Some(s::RespTextCode::Unavailable),
        "Internal server error",
    )
}

/// The response for a write attempted through a read-only selection.
pub(super) fn read_only_error() -> s::Response {
    s::Response::cond(
        s::RespCondType::No,
        Some(s::RespTextCode::Cannot),
        "Mailbox is read-only",
    )
}

pub(super) fn no_permission(quip: &'static str) -> s::Response {
    s::Response::cond(s::RespCondType::No, Some(s::RespTextCode::NoPerm), quip)
}

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

//! The command table.
//!
//! Every command is classified once into a `CommandKind`, which indexes a
//! static table giving the session states the command is legal in and how
//! it is executed.

use bitflags::bitflags;
use futures::future::{self, BoxFuture};
use log::{error, warn};

use super::defs::*;

bitflags! {
    /// Session states in which a command may be issued.
    pub struct States: u8 {
        const NOT_AUTHENTICATED = 1 << 0;
        const AUTHENTICATED = 1 << 1;
        const SELECTED = 1 << 2;
        const LOGGED_IN = Self::AUTHENTICATED.bits | Self::SELECTED.bits;
        const ANY = Self::NOT_AUTHENTICATED.bits | Self::LOGGED_IN.bits;
    }
}

pub type Handler = for<'a> fn(
    &'a mut CommandProcessor,
    syntax::Command,
    &'a SendResponse,
) -> BoxFuture<'a, CmdResult>;

/// How a command is executed once it is known to be legal.
#[derive(Clone, Copy)]
pub enum Route {
    /// Entirely handled by the command processor.
    Simple(Handler),
    /// Needs control of the connection itself, and so is driven by the
    /// server with help from the processor.
    Session,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum CommandKind {
    Capability,
    Noop,
    Logout,
    StartTls,
    Login,
    Authenticate,
    Id,
    Enable,
    Compress,
    Namespace,
    Select,
    Examine,
    Create,
    Delete,
    Rename,
    Subscribe,
    Unsubscribe,
    List,
    Lsub,
    Status,
    Append,
    GetQuota,
    GetQuotaRoot,
    SetQuota,
    Check,
    Close,
    Unselect,
    Idle,
    Expunge,
    Search,
    Fetch,
    Store,
    Copy,
    Move,
    Thread,
}

pub(super) struct Entry {
    pub(super) kind: CommandKind,
    pub(super) states: States,
    pub(super) route: Route,
}

/// Builds a `Handler` which destructures the command with `$pat` and runs
/// `$body` with the processor bound to `$this` and the response sender
/// bound to `$sender`.
macro_rules! handler {
    ($pat:pat => |$this:ident, $sender:ident| $body:expr) => {{
        #[allow(unused_variables)]
        fn handler<'a>(
            $this: &'a mut CommandProcessor,
            cmd: syntax::Command,
            $sender: &'a SendResponse,
        ) -> BoxFuture<'a, CmdResult> {
            match cmd {
                $pat => Box::pin($body),
                cmd => Box::pin(future::ready(Err(misrouted(&cmd)))),
            }
        }
        handler as Handler
    }};
}

macro_rules! entry {
    ($kind:ident, $states:ident, Session) => {
        Entry {
            kind: CommandKind::$kind,
            states: States::$states,
            route: Route::Session,
        }
    };

    ($kind:ident, $states:ident, $handler:expr) => {
        Entry {
            kind: CommandKind::$kind,
            states: States::$states,
            route: Route::Simple($handler),
        }
    };
}

use crate::imap::syntax::Command as C;

// Entries must be in the same order as `CommandKind`.
static TABLE: &[Entry] = &[
    entry!(
        Capability,
        ANY,
        handler!(C::Capability => |this, sender| this.cmd_capability(sender))
    ),
    entry!(
        Noop,
        ANY,
        handler!(C::Noop => |this, sender| this.cmd_noop("NOOP completed", sender))
    ),
    entry!(
        Logout,
        ANY,
        handler!(C::Logout => |this, sender| this.cmd_logout(sender))
    ),
    entry!(StartTls, NOT_AUTHENTICATED, Session),
    entry!(
        Login,
        NOT_AUTHENTICATED,
        handler!(C::Login { user, password } => |this, sender| {
            this.cmd_login(user, password, sender)
        })
    ),
    entry!(Authenticate, NOT_AUTHENTICATED, Session),
    entry!(
        Id,
        LOGGED_IN,
        handler!(C::Id(params) => |this, sender| this.cmd_id(params, sender))
    ),
    entry!(
        Enable,
        LOGGED_IN,
        handler!(C::Enable(exts) => |this, sender| this.cmd_enable(exts, sender))
    ),
    entry!(Compress, LOGGED_IN, Session),
    entry!(
        Namespace,
        LOGGED_IN,
        handler!(C::Namespace => |this, sender| this.cmd_namespace(sender))
    ),
    entry!(
        Select,
        LOGGED_IN,
        handler!(C::Select { mailbox, condstore } => |this, sender| {
            this.cmd_select(mailbox, condstore, false, sender)
        })
    ),
    entry!(
        Examine,
        LOGGED_IN,
        handler!(C::Examine { mailbox, condstore } => |this, sender| {
            this.cmd_select(mailbox, condstore, true, sender)
        })
    ),
    entry!(
        Create,
        LOGGED_IN,
        handler!(C::Create(name) => |this, sender| this.cmd_create(name, sender))
    ),
    entry!(
        Delete,
        LOGGED_IN,
        handler!(C::Delete(name) => |this, sender| this.cmd_delete(name, sender))
    ),
    entry!(
        Rename,
        LOGGED_IN,
        handler!(C::Rename { src, dst } => |this, sender| {
            this.cmd_rename(src, dst, sender)
        })
    ),
    entry!(
        Subscribe,
        LOGGED_IN,
        handler!(C::Subscribe(name) => |this, sender| {
            this.cmd_subscribe(name, true, sender)
        })
    ),
    entry!(
        Unsubscribe,
        LOGGED_IN,
        handler!(C::Unsubscribe(name) => |this, sender| {
            this.cmd_subscribe(name, false, sender)
        })
    ),
    entry!(
        List,
        LOGGED_IN,
        handler!(C::List(list) => |this, sender| this.cmd_list(list, false, sender))
    ),
    entry!(
        Lsub,
        LOGGED_IN,
        handler!(C::Lsub { reference, pattern } => |this, sender| {
            this.cmd_list(
                syntax::ListCommand {
                    select_subscribed: true,
                    reference,
                    patterns: vec![pattern],
                    ..syntax::ListCommand::default()
                },
                true,
                sender,
            )
        })
    ),
    entry!(
        Status,
        LOGGED_IN,
        handler!(C::Status { mailbox, atts } => |this, sender| {
            this.cmd_status(mailbox, atts, sender)
        })
    ),
    entry!(Append, LOGGED_IN, Session),
    entry!(
        GetQuota,
        LOGGED_IN,
        handler!(C::GetQuota(root) => |this, sender| this.cmd_get_quota(root, sender))
    ),
    entry!(
        GetQuotaRoot,
        LOGGED_IN,
        handler!(C::GetQuotaRoot(mailbox) => |this, sender| {
            this.cmd_get_quota_root(mailbox, sender)
        })
    ),
    entry!(
        SetQuota,
        LOGGED_IN,
        handler!(C::SetQuota { root, limits } => |this, sender| {
            this.cmd_set_quota(root, limits, sender)
        })
    ),
    entry!(
        Check,
        SELECTED,
        handler!(C::Check => |this, sender| this.cmd_noop("CHECK completed", sender))
    ),
    entry!(
        Close,
        SELECTED,
        handler!(C::Close => |this, sender| this.cmd_close(sender))
    ),
    entry!(
        Unselect,
        SELECTED,
        handler!(C::Unselect => |this, sender| this.cmd_unselect(sender))
    ),
    entry!(Idle, SELECTED, Session),
    entry!(
        Expunge,
        SELECTED,
        handler!(C::Expunge { uid, set } => |this, sender| {
            this.cmd_expunge(uid, set, sender)
        })
    ),
    entry!(
        Search,
        SELECTED,
        handler!(C::Search { uid, charset, criteria } => |this, sender| {
            this.cmd_search(uid, charset, criteria, sender)
        })
    ),
    entry!(
        Fetch,
        SELECTED,
        handler!(C::Fetch { uid, set, atts, changed_since } => |this, sender| {
            this.cmd_fetch(uid, set, atts, changed_since, sender)
        })
    ),
    entry!(
        Store,
        SELECTED,
        handler!(C::Store { uid, set, op, silent, flags, unchanged_since } => |this, sender| {
            this.cmd_store(uid, set, op, silent, flags, unchanged_since, sender)
        })
    ),
    entry!(
        Copy,
        SELECTED,
        handler!(C::Copy { uid, set, dst } => |this, sender| {
            this.cmd_copy(uid, set, dst, sender)
        })
    ),
    entry!(
        Move,
        SELECTED,
        handler!(C::Move { uid, set, dst } => |this, sender| {
            this.cmd_move(uid, set, dst, sender)
        })
    ),
    entry!(
        Thread,
        SELECTED,
        handler!(C::Thread { uid, algorithm, charset, criteria } => |this, sender| {
            this.cmd_thread(uid, algorithm, charset, criteria, sender)
        })
    ),
];

fn kind_of(cmd: &syntax::Command) -> CommandKind {
    match *cmd {
        C::Capability => CommandKind::Capability,
        C::Noop => CommandKind::Noop,
        C::Logout => CommandKind::Logout,
        C::StartTls => CommandKind::StartTls,
        C::Login { .. } => CommandKind::Login,
        C::Authenticate { .. } => CommandKind::Authenticate,
        C::Id(..) => CommandKind::Id,
        C::Enable(..) => CommandKind::Enable,
        C::Compress(..) => CommandKind::Compress,
        C::Namespace => CommandKind::Namespace,
        C::Select { .. } => CommandKind::Select,
        C::Examine { .. } => CommandKind::Examine,
        C::Create(..) => CommandKind::Create,
        C::Delete(..) => CommandKind::Delete,
        C::Rename { .. } => CommandKind::Rename,
        C::Subscribe(..) => CommandKind::Subscribe,
        C::Unsubscribe(..) => CommandKind::Unsubscribe,
        C::List(..) => CommandKind::List,
        C::Lsub { .. } => CommandKind::Lsub,
        C::Status { .. } => CommandKind::Status,
        C::GetQuota(..) => CommandKind::GetQuota,
        C::GetQuotaRoot(..) => CommandKind::GetQuotaRoot,
        C::SetQuota { .. } => CommandKind::SetQuota,
        C::Check => CommandKind::Check,
        C::Close => CommandKind::Close,
        C::Unselect => CommandKind::Unselect,
        C::Idle => CommandKind::Idle,
        C::Expunge { .. } => CommandKind::Expunge,
        C::Search { .. } => CommandKind::Search,
        C::Fetch { .. } => CommandKind::Fetch,
        C::Store { .. } => CommandKind::Store,
        C::Copy { .. } => CommandKind::Copy,
        C::Move { .. } => CommandKind::Move,
        C::Thread { .. } => CommandKind::Thread,
    }
}

fn entry(kind: CommandKind) -> &'static Entry {
    &TABLE[kind as usize]
}

fn misrouted(cmd: &syntax::Command) -> s::Response {
    warn!("{} reached the wrong handler", cmd.name());
    s::Response::cond(
        s::RespCondType::No,
        Some(s::RespTextCode::Unavailable),
        "Internal server error",
    )
}

impl CommandProcessor {
    fn current_state(&self) -> States {
        if self.selected.is_some() {
            States::SELECTED
        } else if self.identity.is_some() {
            States::AUTHENTICATED
        } else {
            States::NOT_AUTHENTICATED
        }
    }

    fn check_state(&self, kind: CommandKind) -> PartialResult<&'static Entry> {
        let entry = entry(kind);
        let state = self.current_state();
        if entry.states.contains(state) {
            return Ok(entry);
        }

        Err(s::Response::bad(if States::NOT_AUTHENTICATED == state {
            "Log in first"
        } else if !entry.states.intersects(States::LOGGED_IN) {
            "Already logged in"
        } else {
            "No mailbox selected"
        }))
    }

    /// Determines how `cmd` is to be executed, or the response rejecting it
    /// if it is not legal in the current state.
    pub fn route(&self, cmd: &syntax::Command) -> PartialResult<Route> {
        self.check_state(kind_of(cmd)).map(|entry| entry.route)
    }

    /// Counts a command routed as `Route::Session`, which the server drives
    /// itself.
    pub fn record_session_command(&self, cmd: &syntax::Command) {
        self.metrics.command_processed(cmd.name());
    }

    /// Whether `APPEND` may be issued now; the `Err` is the rejection.
    pub fn check_append(&self) -> PartialResult<()> {
        self.check_state(CommandKind::Append).map(|_| ())
    }

    /// Handles a command routed as `Route::Simple`.
    ///
    /// `sender` is used for untagged responses. Returns the final response,
    /// which is tagged unless the session must be ended with `BYE`.
    pub async fn handle_command(
        &mut self,
        command_line: syntax::CommandLine,
        sender: &SendResponse,
    ) -> s::ResponseLine {
        let syntax::CommandLine { tag, cmd } = command_line;
        self.metrics.command_processed(cmd.name());

        // FETCH, STORE and SEARCH by sequence number may not be followed by
        // EXPUNGE responses, since the client could not tell which numbers
        // they applied to.
        let allow_expunge = !matches!(
            cmd,
            C::Fetch { uid: false, .. }
                | C::Store { uid: false, .. }
                | C::Search { uid: false, .. }
        );

        let result = match self.route(&cmd) {
            Ok(Route::Simple(handler)) => handler(self, cmd, sender).await,
            Ok(Route::Session) => Err(misrouted(&cmd)),
            Err(response) => Err(response),
        };

        match result {
            Ok(response) => {
                if let Err(e) = self.poll(sender, allow_expunge, false).await {
                    error!("{} Poll failed: {}", self.log_prefix, e);
                }
                s::ResponseLine::tagged(tag, response)
            },
            Err(response) => {
                // If the selected folder disappeared, the client would only
                // keep getting confusing errors.
                if !self.selected_folder_exists().await {
                    return s::ResponseLine::untagged(s::Response::bye(
                        "Mailbox renamed or deleted",
                    ));
                }
                s::ResponseLine::tagged(tag, response)
            },
        }
    }

    async fn selected_folder_exists(&self) -> bool {
        let selected = match self.selected.as_ref() {
            Some(selected) => selected,
            None => return true,
        };

        match repo!(
            self,
            folder_by_path(&selected.mailbox.id, &selected.folder.full_path)
        ) {
            Ok(folder) => folder.id == selected.folder.id,
            Err(Error::Repository(RepositoryError::NotFound(_))) => false,
            // Anything else says nothing about the folder.
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_matches_kinds() {
        for (ix, entry) in TABLE.iter().enumerate() {
            assert_eq!(ix, entry.kind as usize, "{:?} out of place", entry.kind);
        }
        assert_eq!(CommandKind::Thread as usize + 1, TABLE.len());
    }

    #[test]
    fn state_sets() {
        assert!(entry(CommandKind::Noop).states.contains(States::SELECTED));
        assert!(entry(CommandKind::Login)
            .states
            .contains(States::NOT_AUTHENTICATED));
        assert!(!entry(CommandKind::Select)
            .states
            .contains(States::NOT_AUTHENTICATED));
        assert!(!entry(CommandKind::Fetch)
            .states
            .contains(States::AUTHENTICATED));
        assert!(entry(CommandKind::Select).states.contains(States::SELECTED));
        assert!(matches!(entry(CommandKind::Idle).route, Route::Session));
    }
}

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

//! Implements the IMAP protocol on top of the repository, the namespace
//! resolver and the notification hub. Only the parts that need the raw
//! connection (`IDLE`'s `DONE` line, SASL continuations, `STARTTLS`,
//! `COMPRESS` and the `APPEND` literal) are driven from `server`.
//!
//! The module is split into several submodules for manageability, but is
//! best thought of as one single module.

macro_rules! map_error {
    ($this:expr) => {{
        let log_prefix = &$this.log_prefix;
        move |e| catch_all_error_handling(log_prefix, e)
    }};

    ($this:expr, $($pat:pat => ($cond:ident, $code:expr, $quip:expr $(,)?),)+) => {{
        let log_prefix = &$this.log_prefix;
        move |e| match e {
            $($pat => s::Response::cond(s::RespCondType::$cond, $code, $quip),)+
            e => catch_all_error_handling(log_prefix, e),
        }
    }};
}

/// Runs a repository call under the configured time bound, yielding a
/// `Result<T, Error>`.
macro_rules! repo {
    ($this:expr, $method:ident($($arg:expr),* $(,)?)) => {
        crate::account::repository::bounded(
            $this.config.server.repository_timeout(),
            $this.repo.$method($($arg),*),
        )
        .await
    };
}

// identity! and selected! are macros instead of methods on CommandProcessor
// since there is no way to express that they borrow only one field --- as a
// method, the returned value is considered to borrow the whole
// `CommandProcessor`.
macro_rules! identity {
    ($this:expr) => {
        $this
            .identity
            .as_ref()
            .ok_or_else(|| s::Response::bad("Not logged in"))
    };
}

macro_rules! selected {
    ($this:expr) => {
        $this
            .selected
            .as_mut()
            .ok_or_else(|| s::Response::bad("No mailbox selected"))
    };
}

mod auth;
mod commands;
mod copy_move;
mod defs;
mod dispatch;
mod fetch;
mod idle;
mod mailboxes;
mod messages;
mod quota;
mod search;
mod thread;

pub use self::auth::{Credentials, SaslExchange, SaslStep};
pub use self::defs::{CommandProcessor, SendResponse, Services};
pub use self::dispatch::Route;
pub use self::idle::{IdleOutcome, IdleState};
pub use self::mailboxes::AppendTarget;

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

//! Cross-session change notification.
//!
//! Sessions which mutate a mailbox publish `Notification`s to the
//! `NotifyHub`; every other session subscribed to that mailbox receives them
//! through its own bounded queue. See `hub` for the delivery rules.

use serde::{Deserialize, Serialize};

pub mod coalesce;
pub mod hub;
pub mod relay;

pub use hub::{NotifyHub, Subscription};

/// A change to one folder of a mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// The session which caused the change. The hub does not deliver a
    /// notification back to its origin.
    pub origin: String,
    pub mailbox_id: String,
    pub folder_id: String,
    /// The path of the folder within its mailbox.
    pub folder_path: String,
    pub event: Event,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// The folder now holds this many messages.
    Exists(u32),
    /// This many messages became `\Recent`.
    Recent(u32),
    /// A message was removed. `seq` is its position in the origin's view.
    Expunge { seq: u32, uid: u32 },
    /// The flags of a message changed to exactly `flags`.
    Flags { seq: u32, uid: u32, flags: Vec<String> },
    /// Counters of a folder changed.
    Status { messages: u32 },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match *self {
            Event::Exists(..) => "EXISTS",
            Event::Recent(..) => "RECENT",
            Event::Expunge { .. } => "EXPUNGE",
            Event::Flags { .. } => "FLAGS",
            Event::Status { .. } => "STATUS",
        }
    }
}

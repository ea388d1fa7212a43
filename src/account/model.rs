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

//! The data the protocol layer sees.
//!
//! These types are snapshots. Nothing here is live; the repository is the
//! only thing that mutates the underlying records.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bitflags::bitflags;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::Member
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub organization_id: String,
    pub role: Role,
    /// The address the user normally logs in with.
    pub email: String,
    /// Every address which identifies this user, including `email`.
    pub emails: Vec<String>,
    pub display_name: String,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub primary: bool,
}

/// How multiple owned mail domains are presented to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceMode {
    /// One flat tree. Folders of non-primary mailboxes appear under a
    /// `domain/` prefix.
    Unified,
    /// Every mailbox is its own top-level `domain/` tree.
    DomainSeparated,
}

impl Default for NamespaceMode {
    fn default() -> Self {
        NamespaceMode::Unified
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mailbox {
    pub id: String,
    pub user_id: String,
    pub domain: Domain,
    pub email: String,
    pub quota_bytes: u64,
    pub storage_used: u64,
    pub primary: bool,
    pub shared: bool,
    pub namespace_mode: Option<NamespaceMode>,
}

bitflags! {
    /// What an identity may do to a mailbox it does not own.
    pub struct Permissions: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const INSERT = 1 << 2;
        const DELETE = 1 << 3;
        const ADMIN = 1 << 4;
        const READ_WRITE = Self::READ.bits | Self::WRITE.bits;
    }
}

impl FromStr for Permissions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Permissions::READ),
            "write" => Ok(Permissions::WRITE),
            "insert" => Ok(Permissions::INSERT),
            "delete" => Ok(Permissions::DELETE),
            "admin" => Ok(Permissions::ADMIN),
            "read-write" | "read_write" => Ok(Permissions::READ_WRITE),
            _ => Err(format!("unknown permission '{}'", s)),
        }
    }
}

/// A mailbox owned by someone else that the identity has been granted
/// access to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedAccess {
    pub mailbox: Mailbox,
    pub permissions: Permissions,
}

impl SharedAccess {
    /// Whether messages may be added to this mailbox.
    pub fn can_insert(&self) -> bool {
        self.permissions
            .intersects(Permissions::WRITE | Permissions::INSERT)
    }
}

/// RFC 6154 special-use markers, plus `\Inbox` and RFC 8457 `\Important`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpecialUse {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Junk,
    Archive,
    Flagged,
    All,
    Important,
}

impl SpecialUse {
    pub fn name(self) -> &'static str {
        match self {
            SpecialUse::Inbox => "\\Inbox",
            SpecialUse::Sent => "\\Sent",
            SpecialUse::Drafts => "\\Drafts",
            SpecialUse::Trash => "\\Trash",
            SpecialUse::Junk => "\\Junk",
            SpecialUse::Archive => "\\Archive",
            SpecialUse::Flagged => "\\Flagged",
            SpecialUse::All => "\\All",
            SpecialUse::Important => "\\Important",
        }
    }
}

impl fmt::Display for SpecialUse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub id: String,
    pub mailbox_id: String,
    /// The last path component.
    pub name: String,
    /// The full path within the mailbox, e.g. `Archive/2020`.
    pub full_path: String,
    pub delimiter: char,
    pub special_use: Option<SpecialUse>,
    pub uid_validity: u32,
    pub uid_next: u32,
    pub highest_modseq: u64,
    pub message_count: u32,
    pub recent_count: u32,
    pub unseen_count: u32,
    /// Sequence number of the first unseen message.
    pub first_unseen: Option<u32>,
    pub subscribed: bool,
    pub selectable: bool,
}

impl Folder {
    pub fn is_inbox(&self) -> bool {
        self.full_path.eq_ignore_ascii_case("INBOX")
    }
}

/// A message flag.
///
/// System flags are represented as top-level enum values. Keywords are in the
/// `Keyword` case.
///
/// The `Display` format of this type is the exact string value that would be
/// sent over the wire. `FromStr` does the reverse conversion, and also
/// understands non-standard casing of the system flags.
///
/// `\Recent` is never stored; it is derived from `Message::recent` when
/// flags are reported.
#[derive(Clone)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
    Recent,
    Keyword(String),
}

impl Flag {
    /// The system flags clients may set, in the order they are advertised.
    pub const SETTABLE: [Flag; 5] = [
        Flag::Seen,
        Flag::Answered,
        Flag::Flagged,
        Flag::Deleted,
        Flag::Draft,
    ];
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Recent => write!(f, "\\Recent"),
            Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if s.eq_ignore_ascii_case("\\recent") {
            Ok(Flag::Recent)
        } else if s.starts_with('\\') {
            Err(format!("unknown system flag {}", s))
        } else if !s.is_empty() && s.bytes().all(is_atom_char) {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(format!("invalid keyword {:?}", s))
        }
    }
}

fn is_atom_char(ch: u8) -> bool {
    !matches!(
        ch,
        0..=b' '
            | 127..=255
            | b'('
            | b')'
            | b'{'
            | b'*'
            | b'%'
            | b'\\'
            | b'"'
            | b']'
    )
}

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        match (self, other) {
            (&Flag::Answered, &Flag::Answered)
            | (&Flag::Deleted, &Flag::Deleted)
            | (&Flag::Draft, &Flag::Draft)
            | (&Flag::Flagged, &Flag::Flagged)
            | (&Flag::Seen, &Flag::Seen)
            | (&Flag::Recent, &Flag::Recent) => true,
            // Keywords are compared ASCII case-insensitively, which is what
            // clients expect even though RFC 3501 does not require it.
            (&Flag::Keyword(ref a), &Flag::Keyword(ref b)) => {
                a.eq_ignore_ascii_case(b)
            },
            _ => false,
        }
    }
}

impl Eq for Flag {}

/// How `update_flags` combines the given flags with the existing set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagOp {
    Add,
    Remove,
    Replace,
}

#[derive(Clone, Debug)]
pub struct Message {
    pub id: String,
    pub folder_id: String,
    pub uid: u32,
    /// Position within the folder as of the listing that produced this value.
    pub seq: u32,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub date: Option<DateTime<FixedOffset>>,
    pub size: u32,
    pub flags: Vec<Flag>,
    pub recent: bool,
    pub modseq: u64,
    pub received_at: DateTime<FixedOffset>,
    pub body: Arc<[u8]>,
}

impl Message {
    pub fn has_flag(&self, flag: &Flag) -> bool {
        if Flag::Recent == *flag {
            self.recent
        } else {
            self.flags.contains(flag)
        }
    }

    /// The flags as reported to the client, including `\Recent`.
    pub fn reported_flags(&self) -> Vec<Flag> {
        let mut flags = self.flags.clone();
        if self.recent {
            flags.push(Flag::Recent);
        }
        flags
    }

    /// The date used for ordering: the `Date` header if present and
    /// parseable, otherwise the internal date.
    pub fn sent_date(&self) -> DateTime<FixedOffset> {
        self.date.unwrap_or(self.received_at)
    }
}

/// A message to be stored by `APPEND`.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub flags: Vec<Flag>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub body: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Quota {
    pub storage_used: u64,
    pub storage_limit: u64,
    pub message_count: u64,
    /// 0 means no message limit.
    pub message_limit: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_parsing() {
        assert_eq!(Flag::Seen, "\\SEEN".parse::<Flag>().unwrap());
        assert_eq!(
            Flag::Keyword("$Junk".to_owned()),
            "$junk".parse::<Flag>().unwrap()
        );
        assert!("\\Bogus".parse::<Flag>().is_err());
        assert!("has space".parse::<Flag>().is_err());
        assert_eq!("\\Draft", Flag::Draft.to_string());
    }

    #[test]
    fn permission_parsing() {
        assert_eq!(
            Permissions::READ | Permissions::WRITE,
            "read-write".parse::<Permissions>().unwrap()
        );
        assert!("fly".parse::<Permissions>().is_err());

        let shared = SharedAccess {
            mailbox: Mailbox {
                id: "mb".to_owned(),
                user_id: "u".to_owned(),
                domain: Domain {
                    name: "example.com".to_owned(),
                    primary: true,
                },
                email: "team@example.com".to_owned(),
                quota_bytes: 0,
                storage_used: 0,
                primary: false,
                shared: true,
                namespace_mode: None,
            },
            permissions: Permissions::READ,
        };
        assert!(!shared.can_insert());
    }
}

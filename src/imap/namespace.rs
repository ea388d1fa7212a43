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

//! Mapping between client-visible mailbox names and `(mailbox, folder path)`
//! pairs.
//!
//! An identity may own several mailboxes (one per domain) and have access to
//! mailboxes shared by others. In `Unified` mode, the folders of the primary
//! mailbox appear at the top level and the folders of every other owned
//! mailbox under a `domain/` prefix. In `DomainSeparated` mode, every owned
//! mailbox is under its `domain/` prefix. Shared mailboxes always appear
//! under `Shared/<email>/`.
//!
//! Resolution distinguishes "no such mailbox" (`ResolveError`) from "the
//! mailbox exists but the folder does not", which the repository reports
//! when the folder is looked up and which may be answered with `TRYCREATE`.

use log::warn;
use thiserror::Error;

use super::response::NamespaceResponse;
use crate::account::model::*;

pub const SHARED_PREFIX: &str = "Shared";
pub const DELIMITER: char = '/';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No mailbox available")]
    NoMailbox,
    #[error("No such shared mailbox")]
    UnknownShared,
}

/// How the identity reaches a mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Owner,
    Shared(Permissions),
}

impl Access {
    pub fn can_read(self) -> bool {
        match self {
            Access::Owner => true,
            Access::Shared(p) => {
                p.intersects(Permissions::READ | Permissions::WRITE)
            },
        }
    }

    pub fn can_write(self) -> bool {
        match self {
            Access::Owner => true,
            Access::Shared(p) => p.contains(Permissions::WRITE),
        }
    }

    pub fn can_insert(self) -> bool {
        match self {
            Access::Owner => true,
            Access::Shared(p) => {
                p.intersects(Permissions::WRITE | Permissions::INSERT)
            },
        }
    }

    pub fn can_delete(self) -> bool {
        match self {
            Access::Owner => true,
            Access::Shared(p) => {
                p.intersects(Permissions::WRITE | Permissions::DELETE)
            },
        }
    }

    /// Whether folders of the mailbox may be created, deleted or renamed.
    pub fn can_admin(self) -> bool {
        match self {
            Access::Owner => true,
            Access::Shared(p) => p.contains(Permissions::ADMIN),
        }
    }
}

/// The result of resolving a client-visible name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub mailbox: Mailbox,
    /// The folder path within `mailbox`, normalised.
    pub path: String,
    pub access: Access,
}

/// One session's view of the mailboxes it can reach.
#[derive(Clone, Debug)]
pub struct Namespace {
    mode: NamespaceMode,
    owned: Vec<Mailbox>,
    shared: Vec<SharedAccess>,
}

impl Namespace {
    pub fn new(
        mode: NamespaceMode,
        owned: Vec<Mailbox>,
        shared: Vec<SharedAccess>,
    ) -> Self {
        Self {
            mode,
            owned,
            shared,
        }
    }

    pub fn mode(&self) -> NamespaceMode {
        self.mode
    }

    pub fn owned(&self) -> &[Mailbox] {
        &self.owned
    }

    pub fn shared(&self) -> &[SharedAccess] {
        &self.shared
    }

    /// The mailbox unprefixed names go to: the primary one, or failing that
    /// the first.
    pub fn primary(&self) -> Option<&Mailbox> {
        self.owned
            .iter()
            .find(|mb| mb.primary)
            .or_else(|| self.owned.first())
    }

    /// Every reachable mailbox with how it is reached, owned first.
    pub fn mailboxes(&self) -> impl Iterator<Item = (&Mailbox, Access)> + '_ {
        self.owned.iter().map(|mb| (mb, Access::Owner)).chain(
            self.shared
                .iter()
                .map(|sa| (&sa.mailbox, Access::Shared(sa.permissions))),
        )
    }

    pub fn mailbox_ids(&self) -> Vec<String> {
        self.mailboxes().map(|(mb, _)| mb.id.clone()).collect()
    }

    pub fn access(&self, mailbox_id: &str) -> Option<Access> {
        self.mailboxes()
            .find(|(mb, _)| mb.id == mailbox_id)
            .map(|(_, access)| access)
    }

    pub fn mailbox(&self, mailbox_id: &str) -> Option<&Mailbox> {
        self.mailboxes()
            .find(|(mb, _)| mb.id == mailbox_id)
            .map(|(mb, _)| mb)
    }

    /// Resolves a client-visible (already UTF-7 decoded) name.
    pub fn resolve(&self, name: &str) -> Result<Resolved, ResolveError> {
        let name = name.trim_matches(DELIMITER);

        if let Some(rest) = strip_component(name, SHARED_PREFIX) {
            let (email, path) = match rest.split_once(DELIMITER) {
                Some((email, path)) => (email, path),
                None => (rest, ""),
            };
            let sa = self
                .shared
                .iter()
                .find(|sa| sa.mailbox.email.eq_ignore_ascii_case(email))
                .ok_or(ResolveError::UnknownShared)?;
            let path = if path.is_empty() {
                "INBOX".to_owned()
            } else {
                normalise_path(path)
            };
            return Ok(Resolved {
                mailbox: sa.mailbox.clone(),
                path,
                access: Access::Shared(sa.permissions),
            });
        }

        if let Some((first, rest)) = name.split_once(DELIMITER) {
            let domain = first
                .strip_prefix('[')
                .and_then(|d| d.strip_suffix(']'))
                .unwrap_or(first);
            if let Some(mb) = self
                .owned
                .iter()
                .find(|mb| mb.domain.name.eq_ignore_ascii_case(domain))
            {
                return Ok(Resolved {
                    mailbox: mb.clone(),
                    path: normalise_path(rest),
                    access: Access::Owner,
                });
            }
        }

        let mb = self.primary().ok_or(ResolveError::NoMailbox)?;
        Ok(Resolved {
            mailbox: mb.clone(),
            path: normalise_path(name),
            access: Access::Owner,
        })
    }

    /// The client-visible name of `path` within `mailbox`.
    pub fn display_name(&self, mailbox: &Mailbox, path: &str) -> String {
        if !self.owned.iter().any(|mb| mb.id == mailbox.id) {
            return format!("{}/{}/{}", SHARED_PREFIX, mailbox.email, path);
        }

        let prefixed = match self.mode {
            NamespaceMode::DomainSeparated => true,
            NamespaceMode::Unified => {
                self.primary().map_or(true, |p| p.id != mailbox.id)
            },
        };

        if prefixed {
            format!("{}/{}", mailbox.domain.name, path)
        } else {
            path.to_owned()
        }
    }

    /// The client-visible name of the root of a shared mailbox.
    pub fn shared_root(&self, mailbox: &Mailbox) -> String {
        format!("{}/{}", SHARED_PREFIX, mailbox.email)
    }

    pub fn namespace_response(&self) -> NamespaceResponse {
        let mut personal = Vec::new();
        let mut other = Vec::new();
        match self.mode {
            NamespaceMode::Unified => {
                personal.push(String::new());
                let primary_id = self.primary().map(|mb| mb.id.as_str());
                for mb in &self.owned {
                    if Some(mb.id.as_str()) != primary_id {
                        other.push(format!("{}/", mb.domain.name));
                    }
                }
            },
            NamespaceMode::DomainSeparated => {
                for mb in &self.owned {
                    personal.push(format!("{}/", mb.domain.name));
                }
            },
        }

        let shared = if self.shared.is_empty() {
            vec![]
        } else {
            vec![format!("{}/", SHARED_PREFIX)]
        };

        NamespaceResponse {
            personal,
            other,
            shared,
        }
    }

    /// Finds the owned mailbox a quota root names.
    ///
    /// Quota roots are domain names; the empty root is the primary mailbox.
    pub fn quota_mailbox(&self, root: &str) -> Option<&Mailbox> {
        if root.is_empty() {
            self.primary()
        } else {
            self.owned
                .iter()
                .find(|mb| mb.domain.name.eq_ignore_ascii_case(root))
        }
    }
}

/// If `name` is `component` or starts with `component/`, returns the rest.
fn strip_component<'a>(name: &'a str, component: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(component)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix(DELIMITER)
    }
}

/// Drops empty segments and canonicalises the case of a leading `INBOX`.
pub fn normalise_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for (ix, part) in path.split(DELIMITER).filter(|s| !s.is_empty()).enumerate()
    {
        if ix > 0 {
            out.push(DELIMITER);
        }
        if 0 == ix && part.eq_ignore_ascii_case("inbox") {
            out.push_str("INBOX");
        } else {
            out.push_str(part);
        }
    }
    out
}

/// Creates a predicate which identifies which names match any element of
/// `patterns`, as per RFC 3501: `*` matches anything, `%` anything but the
/// hierarchy delimiter.
pub fn name_matcher<'a>(
    patterns: impl IntoIterator<Item = &'a str>,
) -> impl Fn(&str) -> bool {
    let mut rx = "^(".to_owned();
    for (pattern_ix, pattern) in patterns.into_iter().enumerate() {
        if pattern_ix > 0 {
            rx.push('|');
        }

        let pattern = normalise_pattern(pattern);
        let mut start = 0;
        for (end, wildcard) in pattern
            .match_indices(|c: char| '%' == c || '*' == c)
            .map(|(ix, s)| (ix, Some(s)))
            .chain(std::iter::once((pattern.len(), None)))
        {
            rx.push_str(&regex::escape(&pattern[start..end]));
            match wildcard {
                Some("*") => rx.push_str(".*"),
                Some(_) => rx.push_str("[^/]*"),
                None => (),
            }
            start = end + 1;
        }
    }
    rx.push_str(")$");

    let rx = match regex::Regex::new(&rx) {
        Ok(rx) => Some(rx),
        Err(e) => {
            warn!("Unusable LIST pattern {:?}: {}", rx, e);
            None
        },
    };
    move |s| rx.as_ref().map_or(false, |rx| rx.is_match(s))
}

/// `normalise_path` for patterns, which keeps a trailing delimiter and
/// wildcard-only segments intact.
fn normalise_pattern(pattern: &str) -> String {
    match pattern.split_once(DELIMITER) {
        Some((first, rest)) if first.eq_ignore_ascii_case("inbox") => {
            format!("INBOX/{}", rest)
        },
        None if pattern.eq_ignore_ascii_case("inbox") => "INBOX".to_owned(),
        _ => pattern.to_owned(),
    }
}

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

//! The in-memory repository.
//!
//! `Directory` holds every user, mailbox, folder and message in process
//! memory behind a single mutex. The binary seeds it from a TOML file; tests
//! build it up with the `add_*` methods.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::prelude::*;
use log::warn;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::header;
use super::model::*;
use super::repository::{Repository, RepositoryError, UidMap};
use crate::support::error::Error;

const DEFAULT_QUOTA: u64 = 1024 * 1024 * 1024;

const DEFAULT_FOLDERS: &[(&str, SpecialUse)] = &[
    ("INBOX", SpecialUse::Inbox),
    ("Sent", SpecialUse::Sent),
    ("Drafts", SpecialUse::Drafts),
    ("Trash", SpecialUse::Trash),
    ("Junk", SpecialUse::Junk),
    ("Archive", SpecialUse::Archive),
];

#[derive(Default)]
pub struct Directory {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    organizations: BTreeMap<String, Organization>,
    users: BTreeMap<String, UserRecord>,
    mailboxes: BTreeMap<String, MailboxRecord>,
    shares: Vec<Share>,
    folders: BTreeMap<String, FolderRecord>,
}

struct UserRecord {
    user: User,
    password_hash: String,
    last_login: Option<DateTime<Utc>>,
}

struct MailboxRecord {
    mailbox: Mailbox,
    message_limit: u64,
}

struct Share {
    mailbox_id: String,
    user_id: String,
    permissions: Permissions,
}

struct FolderRecord {
    folder: Folder,
    messages: BTreeMap<u32, Message>,
}

/// The on-disk format read by `Directory::load`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DirectoryFile {
    #[serde(default)]
    pub organizations: Vec<OrganizationEntry>,
    #[serde(default)]
    pub users: Vec<UserEntry>,
    #[serde(default)]
    pub mailboxes: Vec<MailboxEntry>,
    #[serde(default)]
    pub shares: Vec<ShareEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrganizationEntry {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserEntry {
    pub id: String,
    pub organization: String,
    #[serde(default)]
    pub role: Role,
    pub email: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub display_name: String,
    /// Argon2 encoded hash, as produced by `mailvane hash-password`.
    pub password_hash: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MailboxEntry {
    pub id: String,
    pub owner: String,
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub quota_bytes: Option<u64>,
    #[serde(default)]
    pub message_limit: u64,
    #[serde(default)]
    pub namespace_mode: Option<NamespaceMode>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ShareEntry {
    pub mailbox: String,
    pub user: String,
    pub permissions: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub organizations: usize,
    pub users: usize,
    pub mailboxes: usize,
    pub shares: usize,
}

/// Produces an Argon2 encoded hash of `password` with a random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::Error> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    argon2::hash_encoded(
        password.as_bytes(),
        &salt,
        &argon2::Config::default(),
    )
}

fn domain_of(email: &str) -> &str {
    email.rsplit_once('@').map_or("", |(_, d)| d)
}

fn now() -> DateTime<FixedOffset> {
    Local::now().into()
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a directory file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read(path)?;
        let file: DirectoryFile = toml::from_slice(&text)?;
        Self::from_file(file)
    }

    pub fn from_file(file: DirectoryFile) -> Result<Self, Error> {
        let this = Self::new();
        for org in file.organizations {
            this.add_organization(&org.id, &org.name);
        }

        for u in file.users {
            let mut emails = vec![u.email.clone()];
            emails.extend(u.aliases);
            this.insert_user(
                User {
                    id: u.id,
                    organization_id: u.organization,
                    role: u.role,
                    email: u.email,
                    emails,
                    display_name: u.display_name,
                    active: true,
                },
                u.password_hash,
            );
        }

        for mb in file.mailboxes {
            this.insert_mailbox(
                Mailbox {
                    id: mb.id,
                    user_id: mb.owner,
                    domain: Domain {
                        name: domain_of(&mb.email).to_owned(),
                        primary: mb.primary,
                    },
                    email: mb.email,
                    quota_bytes: mb.quota_bytes.unwrap_or(DEFAULT_QUOTA),
                    storage_used: 0,
                    primary: mb.primary,
                    shared: mb.shared,
                    namespace_mode: mb.namespace_mode,
                },
                mb.message_limit,
            );
        }

        for share in file.shares {
            let mut permissions = Permissions::empty();
            for p in &share.permissions {
                permissions |= p.parse::<Permissions>().map_err(|e| {
                    Error::Repository(RepositoryError::Backend(e))
                })?;
            }
            this.share(&share.mailbox, &share.user, permissions);
        }

        Ok(this)
    }

    /// Counts of what the directory holds, for `check-config`.
    pub fn stats(&self) -> DirectoryStats {
        let state = self.lock();
        DirectoryStats {
            organizations: state.organizations.len(),
            users: state.users.len(),
            mailboxes: state.mailboxes.len(),
            shares: state.shares.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_organization(&self, id: &str, name: &str) {
        self.lock().organizations.insert(
            id.to_owned(),
            Organization {
                id: id.to_owned(),
                name: name.to_owned(),
            },
        );
    }

    /// Creates a user whose password is `password`.
    pub fn add_user(
        &self,
        organization_id: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<User, RepositoryError> {
        let hash = hash_password(password)
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let id = self.lock().new_id("u");
        let user = User {
            id,
            organization_id: organization_id.to_owned(),
            role,
            email: email.to_owned(),
            emails: vec![email.to_owned()],
            display_name: String::new(),
            active: true,
        };
        self.insert_user(user.clone(), hash);
        Ok(user)
    }

    /// Adds another address by which the user may log in.
    pub fn add_alias(&self, user_id: &str, email: &str) {
        if let Some(rec) = self.lock().users.get_mut(user_id) {
            rec.user.emails.push(email.to_owned());
        }
    }

    fn insert_user(&self, user: User, password_hash: String) {
        self.lock().users.insert(
            user.id.clone(),
            UserRecord {
                user,
                password_hash,
                last_login: None,
            },
        );
    }

    /// Creates a mailbox with the default folder set.
    pub fn add_mailbox(
        &self,
        user_id: &str,
        email: &str,
        primary: bool,
    ) -> Mailbox {
        let id = self.lock().new_id("mb");
        let mailbox = Mailbox {
            id,
            user_id: user_id.to_owned(),
            domain: Domain {
                name: domain_of(email).to_owned(),
                primary,
            },
            email: email.to_owned(),
            quota_bytes: DEFAULT_QUOTA,
            storage_used: 0,
            primary,
            shared: false,
            namespace_mode: None,
        };
        self.insert_mailbox(mailbox.clone(), 0);
        mailbox
    }

    fn insert_mailbox(&self, mailbox: Mailbox, message_limit: u64) {
        let mut state = self.lock();
        for &(path, special_use) in DEFAULT_FOLDERS {
            state.insert_folder(&mailbox.id, path, Some(special_use));
        }
        state.mailboxes.insert(
            mailbox.id.clone(),
            MailboxRecord {
                mailbox,
                message_limit,
            },
        );
    }

    /// Grants `user_id` access to a mailbox it does not own, marking the
    /// mailbox as shared.
    pub fn share(
        &self,
        mailbox_id: &str,
        user_id: &str,
        permissions: Permissions,
    ) {
        let mut state = self.lock();
        if let Some(rec) = state.mailboxes.get_mut(mailbox_id) {
            rec.mailbox.shared = true;
        }
        state.shares.push(Share {
            mailbox_id: mailbox_id.to_owned(),
            user_id: user_id.to_owned(),
            permissions,
        });
    }

    pub fn set_namespace_mode(&self, mailbox_id: &str, mode: NamespaceMode) {
        if let Some(rec) = self.lock().mailboxes.get_mut(mailbox_id) {
            rec.mailbox.namespace_mode = Some(mode);
        }
    }

    /// Delivers a message directly, bypassing the protocol.
    pub fn deliver(
        &self,
        mailbox_id: &str,
        path: &str,
        raw: &[u8],
    ) -> Result<Message, RepositoryError> {
        let mut state = self.lock();
        let folder_id = state.find_folder(mailbox_id, path)?.folder.id.clone();
        state.append(
            &folder_id,
            NewMessage {
                flags: Vec::new(),
                internal_date: None,
                body: raw.to_vec(),
            },
        )
    }

    /// The last successful login of the user, if any.
    pub fn last_login(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.lock().users.get(user_id).and_then(|u| u.last_login)
    }
}

impl State {
    fn new_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn insert_folder(
        &mut self,
        mailbox_id: &str,
        path: &str,
        special_use: Option<SpecialUse>,
    ) -> Folder {
        let id = self.new_id("f");
        let folder = Folder {
            id: id.clone(),
            mailbox_id: mailbox_id.to_owned(),
            name: path.rsplit('/').next().unwrap_or(path).to_owned(),
            full_path: path.to_owned(),
            delimiter: '/',
            special_use,
            uid_validity: Utc::now().timestamp() as u32,
            uid_next: 1,
            highest_modseq: 0,
            message_count: 0,
            recent_count: 0,
            unseen_count: 0,
            first_unseen: None,
            subscribed: true,
            selectable: true,
        };
        self.folders.insert(
            id,
            FolderRecord {
                folder: folder.clone(),
                messages: BTreeMap::new(),
            },
        );
        folder
    }

    fn find_folder(
        &self,
        mailbox_id: &str,
        path: &str,
    ) -> Result<&FolderRecord, RepositoryError> {
        self.folders
            .values()
            .find(|f| {
                f.folder.mailbox_id == mailbox_id
                    && (f.folder.full_path == path
                        || (f.folder.is_inbox()
                            && path.eq_ignore_ascii_case("INBOX")))
            })
            .ok_or_else(|| RepositoryError::NotFound(path.to_owned()))
    }

    fn folder(&self, id: &str) -> Result<&FolderRecord, RepositoryError> {
        self.folders
            .get(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))
    }

    fn folder_mut(
        &mut self,
        id: &str,
    ) -> Result<&mut FolderRecord, RepositoryError> {
        self.folders
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))
    }

    fn quota(&self, mailbox_id: &str) -> Result<Quota, RepositoryError> {
        let rec = self
            .mailboxes
            .get(mailbox_id)
            .ok_or_else(|| RepositoryError::NotFound(mailbox_id.to_owned()))?;
        let mut quota = Quota {
            storage_used: 0,
            storage_limit: rec.mailbox.quota_bytes,
            message_count: 0,
            message_limit: rec.message_limit,
        };
        for f in self.folders.values() {
            if f.folder.mailbox_id == mailbox_id {
                quota.message_count += f.messages.len() as u64;
                quota.storage_used += f
                    .messages
                    .values()
                    .map(|m| u64::from(m.size))
                    .sum::<u64>();
            }
        }
        Ok(quota)
    }

    fn check_quota(
        &self,
        mailbox_id: &str,
        added_bytes: u64,
        added_messages: u64,
    ) -> Result<(), RepositoryError> {
        let quota = self.quota(mailbox_id)?;
        if (quota.storage_limit > 0
            && quota.storage_used + added_bytes > quota.storage_limit)
            || (quota.message_limit > 0
                && quota.message_count + added_messages > quota.message_limit)
        {
            Err(RepositoryError::QuotaExceeded)
        } else {
            Ok(())
        }
    }

    fn append(
        &mut self,
        folder_id: &str,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        let mailbox_id = self.folder(folder_id)?.folder.mailbox_id.clone();
        self.check_quota(&mailbox_id, message.body.len() as u64, 1)?;
        let id = self.new_id("m");

        let headers = header::parse(&message.body);
        let rec = self.folder_mut(folder_id)?;
        let uid = rec.folder.uid_next;
        rec.folder.uid_next += 1;
        rec.folder.highest_modseq += 1;

        let mut flags = Vec::<Flag>::new();
        for flag in message.flags {
            if Flag::Recent != flag && !flags.contains(&flag) {
                flags.push(flag);
            }
        }

        let stored = Message {
            id,
            folder_id: folder_id.to_owned(),
            uid,
            seq: 0,
            message_id: headers.message_id,
            in_reply_to: headers.in_reply_to,
            references: headers.references,
            subject: headers.subject,
            from: headers.from,
            to: headers.to,
            cc: headers.cc,
            date: headers.date,
            size: message.body.len() as u32,
            flags,
            recent: true,
            modseq: rec.folder.highest_modseq,
            received_at: message.internal_date.unwrap_or_else(now),
            body: Arc::from(message.body),
        };
        rec.messages.insert(uid, stored);
        rec.recount();

        let seq = rec.messages.range(..=uid).count() as u32;
        let mut ret = rec.messages[&uid].clone();
        ret.seq = seq;
        Ok(ret)
    }

    fn copy(
        &mut self,
        src_folder_id: &str,
        uids: &[u32],
        dst_folder_id: &str,
        remove: bool,
    ) -> Result<UidMap, RepositoryError> {
        let src = self.folder(src_folder_id)?;
        let originals = uids
            .iter()
            .filter_map(|uid| src.messages.get(uid).cloned())
            .collect::<Vec<_>>();

        let dst_mailbox = self.folder(dst_folder_id)?.folder.mailbox_id.clone();
        let src_mailbox = src.folder.mailbox_id.clone();
        if !remove || src_mailbox != dst_mailbox {
            self.check_quota(
                &dst_mailbox,
                originals.iter().map(|m| u64::from(m.size)).sum(),
                originals.len() as u64,
            )?;
        }

        let mut ids = Vec::with_capacity(originals.len());
        for _ in &originals {
            ids.push(self.new_id("m"));
        }

        let dst = self.folder_mut(dst_folder_id)?;
        let mut map = UidMap::with_capacity(originals.len());
        for (orig, id) in originals.into_iter().zip(ids) {
            let new_uid = dst.folder.uid_next;
            dst.folder.uid_next += 1;
            dst.folder.highest_modseq += 1;
            map.push((orig.uid, new_uid));
            dst.messages.insert(
                new_uid,
                Message {
                    id,
                    folder_id: dst_folder_id.to_owned(),
                    uid: new_uid,
                    recent: true,
                    modseq: dst.folder.highest_modseq,
                    ..orig
                },
            );
        }
        dst.recount();

        if remove {
            let src = self.folder_mut(src_folder_id)?;
            for &(uid, _) in &map {
                src.messages.remove(&uid);
            }
            src.folder.highest_modseq += 1;
            src.recount();
        }

        Ok(map)
    }
}

impl FolderRecord {
    fn recount(&mut self) {
        let f = &mut self.folder;
        f.message_count = self.messages.len() as u32;
        f.recent_count = self.messages.values().filter(|m| m.recent).count()
            as u32;
        f.unseen_count = self
            .messages
            .values()
            .filter(|m| !m.flags.contains(&Flag::Seen))
            .count() as u32;
        f.first_unseen = self
            .messages
            .values()
            .position(|m| !m.flags.contains(&Flag::Seen))
            .map(|ix| ix as u32 + 1);
    }

    fn listing(&self) -> Vec<Message> {
        self.messages
            .values()
            .enumerate()
            .map(|(ix, m)| Message {
                seq: ix as u32 + 1,
                ..m.clone()
            })
            .collect()
    }
}

#[async_trait]
impl Repository for Directory {
    async fn user_by_email(&self, email: &str) -> Result<User, RepositoryError> {
        self.lock()
            .users
            .values()
            .map(|u| &u.user)
            .find(|u| u.active && u.emails.iter().any(|e| e.eq_ignore_ascii_case(email)))
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(email.to_owned()))
    }

    async fn organization(
        &self,
        id: &str,
    ) -> Result<Organization, RepositoryError> {
        self.lock()
            .organizations
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))
    }

    async fn user_mailboxes(
        &self,
        user_id: &str,
    ) -> Result<Vec<Mailbox>, RepositoryError> {
        let state = self.lock();
        let mut mailboxes = state
            .mailboxes
            .values()
            .filter(|rec| rec.mailbox.user_id == user_id)
            .map(|rec| {
                let mut mb = rec.mailbox.clone();
                mb.storage_used =
                    state.quota(&mb.id).map_or(0, |q| q.storage_used);
                mb
            })
            .collect::<Vec<_>>();
        // Primary first, then by address, so "first mailbox" is stable.
        mailboxes.sort_by(|a, b| {
            b.primary.cmp(&a.primary).then_with(|| a.email.cmp(&b.email))
        });
        Ok(mailboxes)
    }

    async fn shared_mailboxes(
        &self,
        user_id: &str,
    ) -> Result<Vec<SharedAccess>, RepositoryError> {
        let state = self.lock();
        Ok(state
            .shares
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter_map(|s| {
                state.mailboxes.get(&s.mailbox_id).map(|rec| SharedAccess {
                    mailbox: rec.mailbox.clone(),
                    permissions: s.permissions,
                })
            })
            .collect())
    }

    async fn verify_password(
        &self,
        user: &User,
        password: &str,
    ) -> Result<bool, RepositoryError> {
        let hash = self
            .lock()
            .users
            .get(&user.id)
            .map(|u| u.password_hash.clone())
            .ok_or_else(|| RepositoryError::NotFound(user.id.clone()))?;
        let password = password.to_owned();

        // Argon2 is deliberately slow; keep it off the reactor.
        let result = tokio::task::spawn_blocking(move || {
            argon2::verify_encoded(&hash, password.as_bytes())
        })
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        match result {
            Ok(matches) => Ok(matches),
            Err(e) => {
                warn!("Unusable password hash for user {}: {}", user.id, e);
                Ok(false)
            },
        }
    }

    async fn record_login(&self, user_id: &str) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let rec = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| RepositoryError::NotFound(user_id.to_owned()))?;
        rec.last_login = Some(Utc::now());
        Ok(())
    }

    async fn folders(
        &self,
        mailbox_id: &str,
    ) -> Result<Vec<Folder>, RepositoryError> {
        let mut folders = self
            .lock()
            .folders
            .values()
            .filter(|f| f.folder.mailbox_id == mailbox_id)
            .map(|f| f.folder.clone())
            .collect::<Vec<_>>();
        folders.sort_by(|a, b| {
            b.is_inbox()
                .cmp(&a.is_inbox())
                .then_with(|| a.full_path.cmp(&b.full_path))
        });
        Ok(folders)
    }

    async fn folder_by_path(
        &self,
        mailbox_id: &str,
        path: &str,
    ) -> Result<Folder, RepositoryError> {
        Ok(self.lock().find_folder(mailbox_id, path)?.folder.clone())
    }

    async fn create_folder(
        &self,
        mailbox_id: &str,
        path: &str,
    ) -> Result<Folder, RepositoryError> {
        let mut state = self.lock();
        if !state.mailboxes.contains_key(mailbox_id) {
            return Err(RepositoryError::NotFound(mailbox_id.to_owned()));
        }
        if state.find_folder(mailbox_id, path).is_ok() {
            return Err(RepositoryError::AlreadyExists(path.to_owned()));
        }

        // Create any missing superiors so the hierarchy stays navigable.
        let mut end = 0;
        while let Some(slash) = path[end..].find('/') {
            let parent = &path[..end + slash];
            if !parent.is_empty() && state.find_folder(mailbox_id, parent).is_err()
            {
                state.insert_folder(mailbox_id, parent, None);
            }
            end += slash + 1;
        }

        Ok(state.insert_folder(mailbox_id, path, None))
    }

    async fn delete_folder(
        &self,
        folder_id: &str,
    ) -> Result<(), RepositoryError> {
        self.lock()
            .folders
            .remove(folder_id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(folder_id.to_owned()))
    }

    async fn rename_folder(
        &self,
        folder_id: &str,
        new_path: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let (mailbox_id, old_path) = {
            let f = &state.folder(folder_id)?.folder;
            (f.mailbox_id.clone(), f.full_path.clone())
        };
        if state.find_folder(&mailbox_id, new_path).is_ok() {
            return Err(RepositoryError::AlreadyExists(new_path.to_owned()));
        }

        let child_prefix = format!("{}/", old_path);
        for rec in state.folders.values_mut() {
            let f = &mut rec.folder;
            if f.mailbox_id != mailbox_id {
                continue;
            }

            let renamed = if f.full_path == old_path {
                new_path.to_owned()
            } else if let Some(rest) = f.full_path.strip_prefix(&child_prefix)
            {
                format!("{}/{}", new_path, rest)
            } else {
                continue;
            };

            f.name = renamed.rsplit('/').next().unwrap_or(&renamed).to_owned();
            f.full_path = renamed;
        }

        Ok(())
    }

    async fn set_subscribed(
        &self,
        folder_id: &str,
        subscribed: bool,
    ) -> Result<(), RepositoryError> {
        self.lock().folder_mut(folder_id)?.folder.subscribed = subscribed;
        Ok(())
    }

    async fn messages(
        &self,
        folder_id: &str,
    ) -> Result<Vec<Message>, RepositoryError> {
        Ok(self.lock().folder(folder_id)?.listing())
    }

    async fn append_message(
        &self,
        folder_id: &str,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        self.lock().append(folder_id, message)
    }

    async fn update_flags(
        &self,
        folder_id: &str,
        uid: u32,
        op: FlagOp,
        flags: &[Flag],
    ) -> Result<(Vec<Flag>, u64), RepositoryError> {
        let mut state = self.lock();
        let rec = state.folder_mut(folder_id)?;
        rec.folder.highest_modseq += 1;
        let modseq = rec.folder.highest_modseq;

        let message = rec
            .messages
            .get_mut(&uid)
            .ok_or_else(|| RepositoryError::NotFound(format!("uid {}", uid)))?;
        let requested = flags.iter().filter(|&f| Flag::Recent != *f);
        match op {
            FlagOp::Add => {
                for flag in requested {
                    if !message.flags.contains(flag) {
                        message.flags.push(flag.clone());
                    }
                }
            },
            FlagOp::Remove => {
                message.flags.retain(|f| !flags.contains(f));
            },
            FlagOp::Replace => {
                message.flags.clear();
                for flag in requested {
                    if !message.flags.contains(flag) {
                        message.flags.push(flag.clone());
                    }
                }
            },
        }
        message.modseq = modseq;
        let result = message.flags.clone();
        rec.recount();
        Ok((result, modseq))
    }

    async fn expunge(
        &self,
        folder_id: &str,
        uids: &[u32],
    ) -> Result<Vec<u32>, RepositoryError> {
        let mut state = self.lock();
        let rec = state.folder_mut(folder_id)?;
        let removed = uids
            .iter()
            .copied()
            .filter(|uid| rec.messages.remove(uid).is_some())
            .collect::<Vec<_>>();
        if !removed.is_empty() {
            rec.folder.highest_modseq += 1;
        }
        rec.recount();
        Ok(removed)
    }

    async fn copy_messages(
        &self,
        src_folder_id: &str,
        uids: &[u32],
        dst_folder_id: &str,
    ) -> Result<UidMap, RepositoryError> {
        self.lock().copy(src_folder_id, uids, dst_folder_id, false)
    }

    async fn move_messages(
        &self,
        src_folder_id: &str,
        uids: &[u32],
        dst_folder_id: &str,
    ) -> Result<UidMap, RepositoryError> {
        self.lock().copy(src_folder_id, uids, dst_folder_id, true)
    }

    async fn refresh_folder_counts(
        &self,
        folder_id: &str,
    ) -> Result<Folder, RepositoryError> {
        let mut state = self.lock();
        let rec = state.folder_mut(folder_id)?;
        rec.recount();
        Ok(rec.folder.clone())
    }

    async fn quota(&self, mailbox_id: &str) -> Result<Quota, RepositoryError> {
        self.lock().quota(mailbox_id)
    }

    async fn set_quota(
        &self,
        mailbox_id: &str,
        storage_limit: Option<u64>,
        message_limit: Option<u64>,
    ) -> Result<Quota, RepositoryError> {
        let mut state = self.lock();
        let rec = state
            .mailboxes
            .get_mut(mailbox_id)
            .ok_or_else(|| RepositoryError::NotFound(mailbox_id.to_owned()))?;
        if let Some(storage_limit) = storage_limit {
            rec.mailbox.quota_bytes = storage_limit;
        }
        if let Some(message_limit) = message_limit {
            rec.message_limit = message_limit;
        }
        state.quota(mailbox_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixture() -> (Directory, User, Mailbox) {
        let dir = Directory::new();
        dir.add_organization("org", "Example");
        let user = dir
            .add_user("org", "alice@example.com", "hunter2", Role::Member)
            .unwrap();
        let mailbox = dir.add_mailbox(&user.id, "alice@example.com", true);
        (dir, user, mailbox)
    }

    #[test]
    fn stats_count_entries() {
        let (dir, _, _) = fixture();
        assert_eq!(
            DirectoryStats {
                organizations: 1,
                users: 1,
                mailboxes: 1,
                shares: 0,
            },
            dir.stats()
        );
    }

    #[tokio::test]
    async fn users_and_passwords() {
        let (dir, user, _) = fixture();
        dir.add_alias(&user.id, "a@example.org");

        let found = dir.user_by_email("A@EXAMPLE.ORG").await.unwrap();
        assert_eq!(user.id, found.id);
        assert!(dir.verify_password(&found, "hunter2").await.unwrap());
        assert!(!dir.verify_password(&found, "hunter3").await.unwrap());
        assert_matches!(
            Err(RepositoryError::NotFound(_)),
            dir.user_by_email("nobody@example.com").await
        );

        assert!(dir.last_login(&user.id).is_none());
        dir.record_login(&user.id).await.unwrap();
        assert!(dir.last_login(&user.id).is_some());
    }

    #[tokio::test]
    async fn default_folders_and_hierarchy() {
        let (dir, _, mailbox) = fixture();
        let folders = dir.folders(&mailbox.id).await.unwrap();
        assert_eq!("INBOX", folders[0].full_path);
        assert_eq!(6, folders.len());

        dir.create_folder(&mailbox.id, "Projects/2020/Q1")
            .await
            .unwrap();
        assert!(dir.folder_by_path(&mailbox.id, "Projects").await.is_ok());
        assert_matches!(
            Err(RepositoryError::AlreadyExists(_)),
            dir.create_folder(&mailbox.id, "Projects/2020").await
        );

        let projects = dir.folder_by_path(&mailbox.id, "Projects").await.unwrap();
        dir.rename_folder(&projects.id, "Work").await.unwrap();
        assert!(dir.folder_by_path(&mailbox.id, "Work/2020/Q1").await.is_ok());
        assert!(dir.folder_by_path(&mailbox.id, "Projects/2020").await.is_err());
        assert!(dir.folder_by_path(&mailbox.id, "inbox").await.is_ok());
    }

    #[tokio::test]
    async fn append_flags_and_expunge() {
        let (dir, _, mailbox) = fixture();
        let inbox = dir.folder_by_path(&mailbox.id, "INBOX").await.unwrap();

        let m1 = dir
            .deliver(&mailbox.id, "INBOX", b"Subject: one\r\n\r\nbody")
            .unwrap();
        let m2 = dir
            .append_message(
                &inbox.id,
                NewMessage {
                    flags: vec![Flag::Seen, Flag::Recent],
                    internal_date: None,
                    body: b"Subject: two\r\n\r\nbody".to_vec(),
                },
            )
            .await
            .unwrap();
        assert_eq!(1, m1.uid);
        assert_eq!(2, m2.uid);
        assert_eq!(2, m2.seq);
        assert_eq!("two", m2.subject);
        assert_eq!(vec![Flag::Seen], m2.flags);

        let folder = dir.refresh_folder_counts(&inbox.id).await.unwrap();
        assert_eq!(2, folder.message_count);
        assert_eq!(1, folder.unseen_count);
        assert_eq!(Some(1), folder.first_unseen);
        assert_eq!(3, folder.uid_next);

        let (flags, modseq) = dir
            .update_flags(&inbox.id, 1, FlagOp::Add, &[Flag::Deleted])
            .await
            .unwrap();
        assert_eq!(vec![Flag::Deleted], flags);
        assert!(modseq > m2.modseq);

        assert_eq!(vec![1], dir.expunge(&inbox.id, &[1, 99]).await.unwrap());
        let listing = dir.messages(&inbox.id).await.unwrap();
        assert_eq!(1, listing.len());
        assert_eq!(2, listing[0].uid);
        assert_eq!(1, listing[0].seq);
    }

    #[tokio::test]
    async fn copy_move_and_quota() {
        let (dir, _, mailbox) = fixture();
        let inbox = dir.folder_by_path(&mailbox.id, "INBOX").await.unwrap();
        let trash = dir.folder_by_path(&mailbox.id, "Trash").await.unwrap();
        for _ in 0..3 {
            dir.deliver(&mailbox.id, "INBOX", b"Subject: x\r\n\r\n12345")
                .unwrap();
        }

        let map = dir.copy_messages(&inbox.id, &[1, 3], &trash.id).await.unwrap();
        assert_eq!(vec![(1, 1), (3, 2)], map);

        let map = dir.move_messages(&inbox.id, &[2, 3], &trash.id).await.unwrap();
        assert_eq!(vec![(2, 3), (3, 4)], map);
        assert_eq!(1, dir.messages(&inbox.id).await.unwrap().len());
        assert_eq!(4, dir.messages(&trash.id).await.unwrap().len());

        let quota = dir.quota(&mailbox.id).await.unwrap();
        assert_eq!(5, quota.message_count);

        dir.set_quota(&mailbox.id, Some(quota.storage_used), None)
            .await
            .unwrap();
        assert_matches!(
            Err(RepositoryError::QuotaExceeded),
            dir.deliver(&mailbox.id, "INBOX", b"more")
        );
        // Moving within the mailbox does not grow it.
        assert!(dir.move_messages(&trash.id, &[1], &inbox.id).await.is_ok());
        assert_matches!(
            Err(RepositoryError::QuotaExceeded),
            dir.copy_messages(&trash.id, &[2], &inbox.id).await
        );
    }

    #[test]
    fn load_file() {
        let file: DirectoryFile = toml::from_str(
            r#"
[[organizations]]
id = "org"
name = "Example"

[[users]]
id = "u1"
organization = "org"
role = "admin"
email = "alice@example.com"
aliases = ["alice@example.org"]
password_hash = "x"

[[mailboxes]]
id = "mb1"
owner = "u1"
email = "alice@example.com"
primary = true

[[mailboxes]]
id = "team"
owner = "u1"
email = "team@example.com"
namespace_mode = "domain_separated"

[[shares]]
mailbox = "team"
user = "u2"
permissions = ["read", "insert"]
"#,
        )
        .unwrap();

        let dir = Directory::from_file(file).unwrap();
        let state = dir.lock();
        assert_eq!(Role::Admin, state.users["u1"].user.role);
        assert_eq!(2, state.users["u1"].user.emails.len());
        assert!(state.mailboxes["team"].mailbox.shared);
        assert_eq!(
            Permissions::READ | Permissions::INSERT,
            state.shares[0].permissions
        );
        assert_eq!(12, state.folders.len());
    }
}

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

//! The storage contract consumed by the protocol layer.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::model::*;
use crate::support::error::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Quota exceeded")]
    QuotaExceeded,
    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Source UID to destination UID, one entry per message copied.
pub type UidMap = Vec<(u32, u32)>;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Looks up the user owning any of their addresses.
    async fn user_by_email(&self, email: &str) -> Result<User, RepositoryError>;
    async fn organization(
        &self,
        id: &str,
    ) -> Result<Organization, RepositoryError>;
    /// The mailboxes the user owns.
    async fn user_mailboxes(
        &self,
        user_id: &str,
    ) -> Result<Vec<Mailbox>, RepositoryError>;
    /// The mailboxes other identities have granted this user access to.
    async fn shared_mailboxes(
        &self,
        user_id: &str,
    ) -> Result<Vec<SharedAccess>, RepositoryError>;
    /// Checks a password against the stored credential.
    async fn verify_password(
        &self,
        user: &User,
        password: &str,
    ) -> Result<bool, RepositoryError>;
    async fn record_login(&self, user_id: &str) -> Result<(), RepositoryError>;

    /// All folders of the mailbox, ordered by path.
    async fn folders(
        &self,
        mailbox_id: &str,
    ) -> Result<Vec<Folder>, RepositoryError>;
    async fn folder_by_path(
        &self,
        mailbox_id: &str,
        path: &str,
    ) -> Result<Folder, RepositoryError>;
    async fn create_folder(
        &self,
        mailbox_id: &str,
        path: &str,
    ) -> Result<Folder, RepositoryError>;
    async fn delete_folder(&self, folder_id: &str)
        -> Result<(), RepositoryError>;
    /// Renames the folder and every folder beneath it.
    async fn rename_folder(
        &self,
        folder_id: &str,
        new_path: &str,
    ) -> Result<(), RepositoryError>;
    async fn set_subscribed(
        &self,
        folder_id: &str,
        subscribed: bool,
    ) -> Result<(), RepositoryError>;

    /// Every message of the folder, ordered by UID, with sequence numbers
    /// assigned.
    async fn messages(
        &self,
        folder_id: &str,
    ) -> Result<Vec<Message>, RepositoryError>;
    async fn append_message(
        &self,
        folder_id: &str,
        message: NewMessage,
    ) -> Result<Message, RepositoryError>;
    /// Returns the resulting flag set and the new modseq.
    async fn update_flags(
        &self,
        folder_id: &str,
        uid: u32,
        op: FlagOp,
        flags: &[Flag],
    ) -> Result<(Vec<Flag>, u64), RepositoryError>;
    /// Removes the given messages, returning the UIDs actually removed.
    async fn expunge(
        &self,
        folder_id: &str,
        uids: &[u32],
    ) -> Result<Vec<u32>, RepositoryError>;
    async fn copy_messages(
        &self,
        src_folder_id: &str,
        uids: &[u32],
        dst_folder_id: &str,
    ) -> Result<UidMap, RepositoryError>;
    /// Like `copy_messages`, but the originals are removed in the same
    /// operation.
    async fn move_messages(
        &self,
        src_folder_id: &str,
        uids: &[u32],
        dst_folder_id: &str,
    ) -> Result<UidMap, RepositoryError>;
    /// Recomputes the folder counters and returns the fresh folder.
    async fn refresh_folder_counts(
        &self,
        folder_id: &str,
    ) -> Result<Folder, RepositoryError>;

    async fn quota(&self, mailbox_id: &str) -> Result<Quota, RepositoryError>;
    async fn set_quota(
        &self,
        mailbox_id: &str,
        storage_limit: Option<u64>,
        message_limit: Option<u64>,
    ) -> Result<Quota, RepositoryError>;
}

/// Runs a repository call with an upper bound on its duration.
pub async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, RepositoryError>>,
) -> Result<T, Error> {
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r.map_err(Error::Repository),
        Err(_) => Err(Error::RepositoryTimeout),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn bounded_times_out() {
        let r: Result<(), Error> = bounded(
            Duration::from_millis(10),
            futures::future::pending::<Result<(), RepositoryError>>(),
        )
        .await;
        assert_matches!(Err(Error::RepositoryTimeout), r);

        let r = bounded(Duration::from_secs(1), async {
            Err::<(), _>(RepositoryError::QuotaExceeded)
        })
        .await;
        assert_matches!(
            Err(Error::Repository(RepositoryError::QuotaExceeded)),
            r
        );
    }
}

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

//! RFC 2177 `IDLE`.
//!
//! The server drives the protocol flow: it calls `idle_start`, sends the
//! continuation line, then calls `idle_wait` with a future that resolves
//! when the client sends `DONE`, and finally `idle_end`.
//!
//! While idling, the session listens to every mailbox it can see, not just
//! the selected one, so that changes elsewhere can be pushed as `STATUS`.

use std::future::Future;

use futures::future;
use log::{info, warn};

use super::defs::*;

/// How `idle_wait` ended.
#[derive(Debug)]
pub enum IdleOutcome<T> {
    /// The client ended the `IDLE`; this is what the `done` future returned.
    Done(T),
    /// The client was silent for longer than the idle timeout.
    Timeout,
    /// The session cannot continue. The response is an untagged `BYE`.
    Error(s::Response),
}

/// The extra subscriptions held for the duration of one `IDLE`.
pub struct IdleState {
    mailbox_ids: Vec<String>,
    subscriptions: Vec<Subscription>,
}

enum Wake<T> {
    Done(T),
    Timeout,
    /// Which subscription woke us, and what it yielded.
    Notified(usize, Option<Notification>),
}

/// Waits for the next notification on any of `subscriptions` still marked
/// in `open`. A subscription which has been closed yields `None`. Never
/// resolves if none is open.
async fn next_notification(
    subscriptions: Vec<&mut Subscription>,
    open: &[bool],
) -> (usize, Option<Notification>) {
    let receivers = subscriptions
        .into_iter()
        .enumerate()
        .filter(|&(ix, _)| open.get(ix).copied().unwrap_or(false))
        .map(|(ix, sub)| Box::pin(async move { (ix, sub.recv().await) }))
        .collect::<Vec<_>>();

    if receivers.is_empty() {
        return future::pending().await;
    }
    future::select_all(receivers).await.0
}

impl CommandProcessor {
    /// Subscribes to the mailboxes other than the selected one.
    ///
    /// Fails if `IDLE` cannot be started, in which case the response is the
    /// tagged response to send.
    pub fn idle_start(&mut self) -> PartialResult<IdleState> {
        let selected_mailbox = selected!(self)?.mailbox.id.clone();
        let mailbox_ids = identity!(self)?
            .namespace
            .mailbox_ids()
            .into_iter()
            .filter(|id| *id != selected_mailbox)
            .collect::<Vec<_>>();

        let subscriptions =
            self.hub.subscribe_many(&mailbox_ids, &self.session_id);
        info!(
            "{} Idling on {} mailbox(es)",
            self.log_prefix,
            mailbox_ids.len() + 1
        );

        Ok(IdleState {
            mailbox_ids,
            subscriptions,
        })
    }

    /// Pushes changes to the client until `done` resolves or the idle
    /// timeout expires.
    pub async fn idle_wait<F: Future + Unpin>(
        &mut self,
        state: &mut IdleState,
        done: &mut F,
        sender: &SendResponse,
    ) -> IdleOutcome<F::Output> {
        // Anything that arrived between the last command and now.
        if let Err(e) = self.poll(sender, true, true).await {
            return IdleOutcome::Error(self.idle_failure(e));
        }
        send_event(sender, OutputEvent::Flush).await;

        let deadline = tokio::time::sleep(self.config.imap.idle_timeout());
        tokio::pin!(deadline);
        // The selected folder's queue comes last.
        let selected_ix = state.subscriptions.len();
        let mut open = vec![true; selected_ix + 1];

        loop {
            let wake = {
                let selected =
                    self.selected.as_mut().map(|s| &mut s.subscription);
                let subscriptions = state
                    .subscriptions
                    .iter_mut()
                    .chain(selected)
                    .collect::<Vec<_>>();

                tokio::select! {
                    r = &mut *done => Wake::Done(r),
                    _ = &mut deadline => Wake::Timeout,
                    (ix, n) = next_notification(subscriptions, &open) => {
                        Wake::Notified(ix, n)
                    },
                }
            };

            let notifications = match wake {
                Wake::Done(r) => return IdleOutcome::Done(r),
                Wake::Timeout => {
                    info!("{} IDLE timed out", self.log_prefix);
                    return IdleOutcome::Timeout;
                },
                Wake::Notified(_, Some(n)) => {
                    let mut notifications = vec![n];
                    let selected =
                        self.selected.as_mut().map(|s| &mut s.subscription);
                    for sub in state.subscriptions.iter_mut().chain(selected) {
                        while let Some(n) = sub.try_recv() {
                            notifications.push(n);
                        }
                    }
                    notifications
                },
                Wake::Notified(ix, None) => {
                    // The hub gave up on this queue, so events may have been
                    // lost. The others keep going. A resync of the selected
                    // folder still catches up on it; another mailbox goes
                    // quiet.
                    open[ix] = false;
                    let mailbox_id = if ix == selected_ix {
                        match self.selected.as_mut() {
                            Some(selected) => {
                                selected.pending_resync = true;
                                selected.mailbox.id.clone()
                            },
                            None => String::new(),
                        }
                    } else {
                        state.subscriptions[ix].mailbox_id.clone()
                    };
                    warn!(
                        "{} Notification queue for {} closed during IDLE",
                        self.log_prefix, mailbox_id
                    );
                    Vec::new()
                },
            };

            if let Err(e) = self
                .apply_notifications(notifications, sender, true, true)
                .await
            {
                return IdleOutcome::Error(self.idle_failure(e));
            }
            send_event(sender, OutputEvent::Flush).await;
        }
    }

    /// Drops the subscriptions taken by `idle_start`.
    pub fn idle_end(&mut self, state: IdleState) {
        self.hub
            .unsubscribe_many(&state.mailbox_ids, &self.session_id);
    }

    fn idle_failure(&self, e: Error) -> s::Response {
        warn!("{} IDLE failed: {}", self.log_prefix, e);
        s::Response::bye("Internal error during IDLE")
    }
}

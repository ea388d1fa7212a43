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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::coalesce::coalesce;
use super::relay::{self, Broker};
use super::Notification;
use crate::support::metrics::Metrics;
use crate::support::system_config::NotifyConfig;

/// The registry of every session's interest in every mailbox.
///
/// Publishing never blocks. Each subscriber has a bounded queue; when it is
/// full, the notification is parked in a pending buffer which is coalesced
/// and retried after `coalesce_delay`, until it is empty. While anything is
/// pending, new notifications queue up behind it so order is preserved. The
/// pending buffer holds at most `pending_capacity` notifications, coalescing
/// when it fills up; what still does not fit is counted as dropped.
pub struct NotifyHub {
    instance_id: String,
    config: NotifyConfig,
    metrics: Arc<dyn Metrics>,
    broker: Option<Arc<dyn Broker>>,
    /// mailbox id -> session id -> subscriber
    registry: RwLock<HashMap<String, HashMap<String, Arc<Subscriber>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The receiving end of one session's subscription to one mailbox.
#[derive(Debug)]
pub struct Subscription {
    pub mailbox_id: String,
    receiver: mpsc::Receiver<Notification>,
}

impl Subscription {
    /// Waits for the next notification. Returns `None` once the subscription
    /// has been removed from the hub.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    session_id: String,
    mailbox_id: String,
    state: Mutex<SubscriberState>,
}

struct SubscriberState {
    /// `None` once unsubscribed, which closes the session's queue.
    sender: Option<mpsc::Sender<Notification>>,
    last_activity: Instant,
    dropped: u64,
    pending: Vec<Notification>,
    timer: Option<JoinHandle<()>>,
}

impl Subscriber {
    fn lock(&self) -> MutexGuard<'_, SubscriberState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) -> u64 {
        let mut state = self.lock();
        state.sender = None;
        state.pending.clear();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.dropped
    }
}

impl NotifyHub {
    pub fn new(config: NotifyConfig, metrics: Arc<dyn Metrics>) -> Arc<Self> {
        Arc::new(Self::build(config, metrics, None))
    }

    /// Creates a hub which also relays notifications through `broker`.
    pub fn with_broker(
        config: NotifyConfig,
        metrics: Arc<dyn Metrics>,
        broker: Arc<dyn Broker>,
    ) -> Arc<Self> {
        Arc::new(Self::build(config, metrics, Some(broker)))
    }

    fn build(
        config: NotifyConfig,
        metrics: Arc<dyn Metrics>,
        broker: Option<Arc<dyn Broker>>,
    ) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            instance_id: format!("imap-{}-{}", nanos, rand::random::<u32>()),
            config,
            metrics,
            broker,
            registry: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Starts the watchdog and, if there is a broker, the inbound relay.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        let hub = Arc::downgrade(self);
        let interval = self.config.watchdog_interval();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match hub.upgrade() {
                    Some(hub) => {
                        hub.check_stuck();
                    },
                    None => return,
                }
            }
        }));

        if let Some(ref broker) = self.broker {
            let messages =
                broker.subscribe(&format!("{}*", relay::CHANNEL_PREFIX));
            tasks.push(tokio::spawn(relay::run_inbound(
                Arc::downgrade(self),
                self.instance_id.clone(),
                messages,
            )));
        }

        info!(
            "Notification hub {} started (relay {})",
            self.instance_id,
            if self.broker.is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );
    }

    /// Stops the background tasks and closes every subscription.
    pub fn shutdown(&self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }

        let registry = std::mem::take(&mut *self.write_registry());
        for (mailbox_id, subs) in registry {
            for sub in subs.values() {
                sub.close();
                self.metrics.subscription_removed(&mailbox_id);
            }
        }
    }

    fn read_registry(
        &self,
    ) -> std::sync::RwLockReadGuard<
        '_,
        HashMap<String, HashMap<String, Arc<Subscriber>>>,
    > {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(
        &self,
    ) -> std::sync::RwLockWriteGuard<
        '_,
        HashMap<String, HashMap<String, Arc<Subscriber>>>,
    > {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `session_id` for notifications about `mailbox_id`.
    ///
    /// An existing subscription of the same session to the same mailbox is
    /// replaced and its queue closed.
    pub fn subscribe(&self, mailbox_id: &str, session_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let sub = Arc::new(Subscriber {
            session_id: session_id.to_owned(),
            mailbox_id: mailbox_id.to_owned(),
            state: Mutex::new(SubscriberState {
                sender: Some(sender),
                last_activity: Instant::now(),
                dropped: 0,
                pending: Vec::new(),
                timer: None,
            }),
        });

        let replaced = self
            .write_registry()
            .entry(mailbox_id.to_owned())
            .or_default()
            .insert(session_id.to_owned(), sub);
        match replaced {
            Some(old) => {
                old.close();
            },
            None => self.metrics.subscription_added(mailbox_id),
        }

        debug!("{} subscribed to {}", session_id, mailbox_id);

        Subscription {
            mailbox_id: mailbox_id.to_owned(),
            receiver,
        }
    }

    pub fn subscribe_many(
        &self,
        mailbox_ids: &[String],
        session_id: &str,
    ) -> Vec<Subscription> {
        mailbox_ids
            .iter()
            .map(|id| self.subscribe(id, session_id))
            .collect()
    }

    /// Removes one subscription. Does nothing if it does not exist.
    pub fn unsubscribe(&self, mailbox_id: &str, session_id: &str) {
        let removed = {
            let mut registry = self.write_registry();
            let removed = registry
                .get_mut(mailbox_id)
                .and_then(|subs| subs.remove(session_id));
            if registry.get(mailbox_id).map_or(false, HashMap::is_empty) {
                registry.remove(mailbox_id);
            }
            removed
        };

        if let Some(sub) = removed {
            self.retire(&sub);
        }
    }

    pub fn unsubscribe_many(&self, mailbox_ids: &[String], session_id: &str) {
        for id in mailbox_ids {
            self.unsubscribe(id, session_id);
        }
    }

    /// Removes every subscription of the session.
    pub fn unsubscribe_all(&self, session_id: &str) {
        let mut removed = Vec::new();
        {
            let mut registry = self.write_registry();
            registry.retain(|_, subs| {
                removed.extend(subs.remove(session_id));
                !subs.is_empty()
            });
        }

        for sub in removed {
            self.retire(&sub);
        }
    }

    fn retire(&self, sub: &Subscriber) {
        let dropped = sub.close();
        if dropped > 0 {
            warn!(
                "{} lost {} notifications for {} while subscribed",
                sub.session_id, dropped, sub.mailbox_id
            );
        }
        self.metrics.subscription_removed(&sub.mailbox_id);
        debug!("{} unsubscribed from {}", sub.session_id, sub.mailbox_id);
    }

    /// The mailboxes `session_id` is currently subscribed to, sorted.
    pub fn subscribed_mailboxes(&self, session_id: &str) -> Vec<String> {
        let mut ids = self
            .read_registry()
            .iter()
            .filter(|(_, subs)| subs.contains_key(session_id))
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn subscriber_count(&self, mailbox_id: &str) -> usize {
        self.read_registry().get(mailbox_id).map_or(0, HashMap::len)
    }

    /// How many notifications the given subscription has lost.
    pub fn dropped(&self, mailbox_id: &str, session_id: &str) -> Option<u64> {
        self.read_registry()
            .get(mailbox_id)
            .and_then(|subs| subs.get(session_id))
            .map(|sub| sub.lock().dropped)
    }

    /// Delivers `notification` to every subscriber of its mailbox except its
    /// origin, and hands it to the broker if there is one.
    pub fn publish(&self, notification: Notification) {
        self.deliver_local(&notification);
        if let Some(ref broker) = self.broker {
            relay::forward(Arc::clone(broker), &self.instance_id, &notification);
        }
    }

    /// Publishes a copy of `notification` to each of `mailbox_ids`.
    pub fn publish_many(&self, mailbox_ids: &[String], notification: Notification) {
        for id in mailbox_ids {
            let mut n = notification.clone();
            n.mailbox_id = id.clone();
            self.publish(n);
        }
    }

    pub(super) fn deliver_local(&self, notification: &Notification) {
        // Take a snapshot so the lock is not held while sending.
        let subs = match self.read_registry().get(&notification.mailbox_id) {
            Some(subs) => subs.values().cloned().collect::<Vec<_>>(),
            None => return,
        };

        for sub in subs {
            if sub.session_id != notification.origin {
                self.offer(&sub, notification.clone());
            }
        }
    }

    fn offer(&self, sub: &Arc<Subscriber>, notification: Notification) {
        let mut state = sub.lock();
        let sender = match state.sender {
            Some(ref sender) => sender.clone(),
            None => return,
        };

        let notification = if state.pending.is_empty() {
            match sender.try_send(notification) {
                Ok(()) => {
                    state.last_activity = Instant::now();
                    self.metrics.notification_sent(&sub.mailbox_id);
                    return;
                },
                Err(TrySendError::Closed(_)) => return,
                Err(TrySendError::Full(notification)) => notification,
            }
        } else {
            notification
        };

        let limits = self.flush_limits();
        if state.pending.len() >= limits.max_pending {
            let pending = std::mem::take(&mut state.pending);
            state.pending = coalesce(pending);
        }
        if state.pending.len() >= limits.max_pending {
            record_drop(sub, &mut state, &*self.metrics, limits.warn_interval);
        } else {
            state.pending.push(notification);
        }

        if state.timer.is_none() {
            schedule_flush(sub, &mut state, Arc::clone(&self.metrics), limits);
        }
    }

    fn flush_limits(&self) -> FlushLimits {
        FlushLimits {
            delay: self.config.coalesce_delay(),
            max_pending: self.config.pending_capacity.max(1),
            warn_interval: self.config.drop_warning_interval.max(1),
        }
    }

    /// Reports every subscriber which has notifications waiting and has had
    /// no successful delivery for longer than the stuck threshold. Returns
    /// how many were found.
    ///
    /// A subscriber with nothing waiting is merely quiet.
    pub fn check_stuck(&self) -> usize {
        let threshold = self.config.stuck_threshold();
        let registry = self.read_registry();
        let mut stuck = 0;
        for (mailbox_id, subs) in registry.iter() {
            for (session_id, sub) in subs {
                let state = sub.lock();
                if state.pending.is_empty() {
                    continue;
                }

                let idle = state.last_activity.elapsed();
                if idle > threshold {
                    warn!(
                        "Possibly stuck subscriber {} on {}: idle {}s, \
                         {} pending, {} dropped",
                        session_id,
                        mailbox_id,
                        idle.as_secs(),
                        state.pending.len(),
                        state.dropped
                    );
                    self.metrics.stuck_connection(mailbox_id);
                    stuck += 1;
                }
            }
        }
        stuck
    }
}

#[derive(Clone, Copy)]
struct FlushLimits {
    delay: Duration,
    max_pending: usize,
    warn_interval: u64,
}

fn schedule_flush(
    sub: &Arc<Subscriber>,
    state: &mut SubscriberState,
    metrics: Arc<dyn Metrics>,
    limits: FlushLimits,
) {
    let sub = Arc::clone(sub);
    state.timer = Some(tokio::spawn(async move {
        tokio::time::sleep(limits.delay).await;
        flush_pending(&sub, metrics, limits);
    }));
}

/// Moves as much of the pending buffer into the queue as fits. Whatever does
/// not fit stays pending, in order, and is retried after another delay.
fn flush_pending(
    sub: &Arc<Subscriber>,
    metrics: Arc<dyn Metrics>,
    limits: FlushLimits,
) {
    let mut state = sub.lock();
    state.timer = None;
    let sender = match state.sender {
        Some(ref sender) => sender.clone(),
        None => {
            state.pending.clear();
            return;
        },
    };

    let mut backlog = coalesce(std::mem::take(&mut state.pending)).into_iter();
    while let Some(notification) = backlog.next() {
        match sender.try_send(notification) {
            Ok(()) => {
                state.last_activity = Instant::now();
                metrics.notification_sent(&sub.mailbox_id);
            },
            Err(TrySendError::Closed(_)) => return,
            Err(TrySendError::Full(notification)) => {
                state.pending.push(notification);
                state.pending.extend(backlog);
                break;
            },
        }
    }

    if !state.pending.is_empty() {
        schedule_flush(sub, &mut state, metrics, limits);
    }
}

fn record_drop(
    sub: &Subscriber,
    state: &mut SubscriberState,
    metrics: &dyn Metrics,
    warn_interval: u64,
) {
    state.dropped += 1;
    metrics.notification_dropped(&sub.mailbox_id);
    if 0 == state.dropped % warn_interval {
        warn!(
            "{} has dropped {} notifications for {}",
            sub.session_id, state.dropped, sub.mailbox_id
        );
    }
}

impl Drop for NotifyHub {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

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

//! The observability seam.
//!
//! Everything that counts something goes through `Metrics`; the server never
//! depends on a particular exporter.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use log::debug;

pub trait Metrics: Send + Sync {
    fn connection_opened(&self);
    fn connection_closed(&self);
    fn command_processed(&self, command: &str);
    fn auth_attempt(&self, mechanism: &str, outcome: &str);
    fn notification_sent(&self, mailbox_id: &str);
    fn notification_dropped(&self, mailbox_id: &str);
    fn subscription_added(&self, mailbox_id: &str);
    fn subscription_removed(&self, mailbox_id: &str);
    fn stuck_connection(&self, mailbox_id: &str);
}

/// In-memory counters, keyed by `name{label}`.
///
/// Gauges (active connections, active subscriptions) go up and down; all
/// other keys only increase.
#[derive(Debug, Default)]
pub struct Counters {
    values: Mutex<BTreeMap<String, i64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> i64 {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn add(&self, key: String, delta: i64) {
        *self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(0) += delta;
    }
}

impl Metrics for Counters {
    fn connection_opened(&self) {
        self.add("connections_total".to_owned(), 1);
        self.add("connections_active".to_owned(), 1);
    }

    fn connection_closed(&self) {
        self.add("connections_active".to_owned(), -1);
    }

    fn command_processed(&self, command: &str) {
        self.add(format!("commands_processed{{{command}}}"), 1);
    }

    fn auth_attempt(&self, mechanism: &str, outcome: &str) {
        self.add(format!("auth_attempts{{{mechanism},{outcome}}}"), 1);
    }

    fn notification_sent(&self, mailbox_id: &str) {
        self.add(format!("notifications_sent{{{mailbox_id}}}"), 1);
    }

    fn notification_dropped(&self, mailbox_id: &str) {
        self.add(format!("notifications_dropped{{{mailbox_id}}}"), 1);
    }

    fn subscription_added(&self, mailbox_id: &str) {
        self.add(format!("subscriptions_active{{{mailbox_id}}}"), 1);
    }

    fn subscription_removed(&self, mailbox_id: &str) {
        self.add(format!("subscriptions_active{{{mailbox_id}}}"), -1);
    }

    fn stuck_connection(&self, mailbox_id: &str) {
        self.add(format!("stuck_connections{{{mailbox_id}}}"), 1);
    }
}

/// Emits every metric event as a `debug!` line.
///
/// Used by the binary when no exporter is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMetrics;

impl Metrics for LogMetrics {
    fn connection_opened(&self) {
        debug!("metric connections_opened");
    }

    fn connection_closed(&self) {
        debug!("metric connections_closed");
    }

    fn command_processed(&self, command: &str) {
        debug!("metric commands_processed command={}", command);
    }

    fn auth_attempt(&self, mechanism: &str, outcome: &str) {
        debug!(
            "metric auth_attempts mechanism={} outcome={}",
            mechanism, outcome
        );
    }

    fn notification_sent(&self, mailbox_id: &str) {
        debug!("metric notifications_sent mailbox={}", mailbox_id);
    }

    fn notification_dropped(&self, mailbox_id: &str) {
        debug!("metric notifications_dropped mailbox={}", mailbox_id);
    }

    fn subscription_added(&self, mailbox_id: &str) {
        debug!("metric subscriptions_active+1 mailbox={}", mailbox_id);
    }

    fn subscription_removed(&self, mailbox_id: &str) {
        debug!("metric subscriptions_active-1 mailbox={}", mailbox_id);
    }

    fn stuck_connection(&self, mailbox_id: &str) {
        debug!("metric stuck_connections mailbox={}", mailbox_id);
    }
}

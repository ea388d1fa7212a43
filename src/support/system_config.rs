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

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::account::model::NamespaceMode;
use crate::account::token::{Issuer, StaticToken};

/// The system-wide configuration for Mailvane.
///
/// This is stored in a TOML file, typically `/etc/mailvane/mailvane.toml`,
/// whose path is passed on the command line. Every section may be omitted.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Listener and session limits.
    #[serde(default)]
    pub server: ServerConfig,

    /// Configuration for TLS.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Which authentication mechanisms are offered, and under what
    /// conditions.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Protocol feature toggles.
    #[serde(default)]
    pub imap: ImapConfig,

    /// Bearer token authentication.
    #[serde(default)]
    pub oauth2: OAuth2Config,

    /// Tuning for the notification hub.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Extra values to report in the ID command.
    /// The main useful value here is `support-url`.
    #[serde(default)]
    pub identification: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address to bind the listeners to.
    pub host: String,
    /// The plaintext port.
    pub port: u16,
    /// The implicit TLS port, only used if `tls.implicit` is set.
    pub tls_port: u16,
    /// The maximum number of concurrent connections across both listeners.
    /// Further connections are greeted with `BYE` and closed.
    pub max_connections: usize,
    /// How long a client may stay silent between commands.
    pub read_timeout_secs: u64,
    /// The upper bound on any single repository call.
    pub repository_timeout_secs: u64,
    /// The name reported in the greeting.
    pub server_name: String,
    /// Path to the TOML directory file that seeds the in-memory repository.
    ///
    /// Relative paths are resolved against the directory containing the
    /// configuration file.
    pub directory: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 143,
            tls_port: 993,
            max_connections: 10_000,
            read_timeout_secs: 1800,
            repository_timeout_secs: 30,
            server_name: "Mailvane IMAP".to_owned(),
            directory: PathBuf::from("directory.toml"),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn repository_timeout(&self) -> Duration {
        Duration::from_secs(self.repository_timeout_secs)
    }
}

// The Default implementation of TlsConfig is not useful in the real world, but
// is helpful for tests.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Whether TLS is available at all.
    pub enabled: bool,
    /// The path to the TLS private key, which must be in PEM format.
    pub private_key: PathBuf,
    /// The path to the TLS certificate chain, which must be in PEM format.
    pub certificate_chain: PathBuf,
    /// Whether STARTTLS is offered on the plaintext port.
    pub starttls: bool,
    /// Whether to listen on `server.tls_port` with implicit TLS.
    pub implicit: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// SASL mechanisms offered in addition to the bearer mechanisms, which
    /// are controlled by `oauth2.enabled`.
    pub methods: Vec<String>,
    /// If true, LOGIN and AUTHENTICATE are refused until TLS is active.
    pub require_encryption: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            methods: vec!["PLAIN".to_owned(), "LOGIN".to_owned()],
            require_encryption: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ImapConfig {
    /// The base capability list.
    pub capabilities: Vec<String>,
    /// Whether `{n+}` literals are accepted without a continuation.
    pub literal_plus: bool,
    /// The namespace mode for identities whose mailboxes do not specify one.
    pub default_namespace_mode: NamespaceMode,
    /// The largest message APPEND accepts, in bytes.
    pub max_message_size: u64,
    pub enable_compression: bool,
    pub enable_qresync: bool,
    pub enable_condstore: bool,
    pub enable_thread: bool,
    /// The IDLE ceiling. Kept under the 30 minutes RFC 2177 allows clients
    /// to assume.
    pub idle_timeout_secs: u64,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            capabilities: [
                "IMAP4rev1",
                "NAMESPACE",
                "QUOTA",
                "IDLE",
                "SPECIAL-USE",
                "MOVE",
                "LITERAL+",
                "UIDPLUS",
                "UNSELECT",
                "CHILDREN",
                "LIST-EXTENDED",
                "LIST-STATUS",
                "ID",
                "ENABLE",
            ]
            .iter()
            .map(|&s| s.to_owned())
            .collect(),
            literal_plus: true,
            default_namespace_mode: NamespaceMode::Unified,
            max_message_size: 50 * 1024 * 1024,
            enable_compression: true,
            enable_qresync: true,
            enable_condstore: true,
            enable_thread: true,
            idle_timeout_secs: 29 * 60,
        }
    }
}

impl ImapConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OAuth2Config {
    /// Whether XOAUTH2 and OAUTHBEARER are offered.
    pub enabled: bool,
    /// Maps issuer identifiers to the validator class responsible for them.
    pub trusted_issuers: BTreeMap<String, Issuer>,
    /// Bearer tokens accepted by the built-in validator, keyed by the token
    /// itself.
    pub static_tokens: BTreeMap<String, StaticToken>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Capacity of each subscriber's event queue.
    pub queue_capacity: usize,
    /// How many notifications may wait for room in a full queue.
    pub pending_capacity: usize,
    /// How long the hub waits before retrying a full queue.
    pub coalesce_delay_ms: u64,
    pub watchdog_interval_secs: u64,
    /// Subscribers with notifications waiting and no successful delivery for
    /// this long are reported as stuck.
    pub stuck_threshold_secs: u64,
    /// A warning is logged every this many drops for a single subscriber.
    pub drop_warning_interval: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            pending_capacity: 1000,
            coalesce_delay_ms: 100,
            watchdog_interval_secs: 30,
            stuck_threshold_secs: 30 * 60,
            drop_warning_interval: 10,
        }
    }
}

impl NotifyConfig {
    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: SystemConfig = toml::from_str("").unwrap();
        assert_eq!(143, config.server.port);
        assert_eq!(1800, config.server.read_timeout_secs);
        assert_eq!(100, config.notify.queue_capacity);
        assert_eq!(29 * 60, config.imap.idle_timeout_secs);
        assert!(!config.tls.enabled);
        assert!(config.imap.capabilities.contains(&"IDLE".to_owned()));
    }

    #[test]
    fn partial_sections() {
        let config: SystemConfig = toml::from_str(
            r#"
[server]
port = 1143

[imap]
default_namespace_mode = "domain_separated"
enable_thread = false

[oauth2]
enabled = true

[oauth2.trusted_issuers]
"https://accounts.example.com" = "primary"

[identification]
support-url = "mailto:postmaster@example.com"
"#,
        )
        .unwrap();

        assert_eq!(1143, config.server.port);
        assert_eq!(993, config.server.tls_port);
        assert_eq!(
            NamespaceMode::DomainSeparated,
            config.imap.default_namespace_mode
        );
        assert!(!config.imap.enable_thread);
        assert!(config.imap.enable_qresync);
        assert_eq!(
            Some(&Issuer::Primary),
            config
                .oauth2
                .trusted_issuers
                .get("https://accounts.example.com")
        );
        assert_eq!(1, config.identification.len());
    }
}

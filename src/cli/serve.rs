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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};

use crate::account::directory::Directory;
use crate::account::token::StaticTokens;
use crate::imap::command_processor::Services;
use crate::imap::server::{OpenSslUpgrader, Server, TlsUpgrader};
use crate::notify::NotifyHub;
use crate::support::metrics::{LogMetrics, Metrics};
use crate::support::system_config::SystemConfig;

// Need to use a this and not die! so that errors go to syslog/etc
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

pub fn serve(mut system_config: SystemConfig, system_root: PathBuf) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => fatal!(EX_OSERR, "Failed to start async runtime: {}", e),
    };

    let directory_path = system_root.join(&system_config.server.directory);
    let directory = match Directory::load(&directory_path) {
        Ok(d) => d,
        Err(e) => fatal!(
            EX_CONFIG,
            "Unable to load directory from '{}': {}",
            directory_path.display(),
            e
        ),
    };

    let tls = if system_config.tls.enabled {
        Some(create_tls_upgrader(&mut system_config, &system_root))
    } else {
        None
    };

    let system_config = Arc::new(system_config);
    let metrics: Arc<dyn Metrics> = Arc::new(LogMetrics);
    let tokens = StaticTokens::new(system_config.oauth2.static_tokens.clone());

    let result = runtime.block_on(async move {
        let hub = NotifyHub::new(system_config.notify.clone(), metrics.clone());
        hub.start();

        let services = Services {
            config: Arc::clone(&system_config),
            repo: Arc::new(directory),
            tokens: Arc::new(tokens),
            hub: Arc::clone(&hub),
            metrics,
        };

        info!("{} starting", system_config.server.server_name);
        let result = Server::new(services, tls).run().await;
        hub.shutdown();
        result
    });

    if let Err(e) = result {
        fatal!(EX_OSERR, "Server failed: {}", e);
    }
}

fn create_tls_upgrader(
    system_config: &mut SystemConfig,
    system_root: &Path,
) -> Arc<dyn TlsUpgrader> {
    let tls = &mut system_config.tls;
    tls.private_key = system_root.join(&tls.private_key);
    tls.certificate_chain = system_root.join(&tls.certificate_chain);

    match OpenSslUpgrader::new(tls) {
        Ok(upgrader) => Arc::new(upgrader),
        Err(e) => fatal!(
            EX_CONFIG,
            "Unable to load TLS key '{}' and certificate chain '{}': {}",
            tls.private_key.display(),
            tls.certificate_chain.display(),
            e
        ),
    }
}

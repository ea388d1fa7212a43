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

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use structopt::clap;
use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Run the IMAP server.
    ///
    /// This listens on the configured plaintext port, and additionally on the
    /// implicit TLS port if `tls.implicit` is set. All connections are handled
    /// in this one process.
    Serve(ConfigOptions),
    /// Validate the configuration and directory files, then exit.
    ///
    /// Prints a short summary of what was loaded. Exits with EX_CONFIG if
    /// anything is wrong.
    CheckConfig(ConfigOptions),
    /// Prompt for a password and print its Argon2 hash.
    ///
    /// The output is suitable for the `password_hash` field of a user in the
    /// directory file.
    HashPassword,
}

#[derive(StructOpt, Default)]
pub(super) struct ConfigOptions {
    /// The path to `mailvane.toml`. Relative paths inside it are resolved
    /// against its directory.
    /// [default: /etc/mailvane/mailvane.toml or
    /// /usr/local/etc/mailvane/mailvane.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    match cmd {
        Command::Serve(options) => {
            let (root, config) = load_config(options);
            init_log(&root);
            super::serve::serve(config, root);
        }
        Command::CheckConfig(options) => {
            let (root, config) = load_config(options);
            super::admin::check_config(&config, &root);
        }
        Command::HashPassword => super::admin::hash_password(),
    }
}

/// Reads the system configuration, returning it along with the directory it
/// lives in.
fn load_config(options: ConfigOptions) -> (PathBuf, SystemConfig) {
    let config_path = options.config.unwrap_or_else(|| {
        if Path::new("/etc/mailvane/mailvane.toml").is_file() {
            "/etc/mailvane/mailvane.toml".to_owned().into()
        } else if Path::new("/usr/local/etc/mailvane/mailvane.toml").is_file()
        {
            "/usr/local/etc/mailvane/mailvane.toml".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/mailvane/mailvane.toml nor \
                 /usr/local/etc/mailvane/mailvane.toml\n\
                 exists; use --config=/path/to/mailvane.toml if your\n\
                 installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let mut config_toml = Vec::new();
    if let Err(e) = fs::File::open(&config_path)
        .and_then(|mut f| f.read_to_end(&mut config_toml))
    {
        eprintln!("Error reading '{}': {}", config_path.display(), e);
        EX_CONFIG.exit();
    }

    let config: SystemConfig = match toml::from_slice(&config_toml) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Error in config file at '{}': {}",
                config_path.display(),
                e
            );
            EX_CONFIG.exit()
        }
    };

    let root = config_path
        .parent()
        .map(Path::to_owned)
        .unwrap_or_else(|| PathBuf::from("."));
    (root, config)
}

fn init_log(root: &Path) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    // log4rs *or* syslog, since log4rs has no syslog appender of its own.
    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
            EX_CONFIG.exit();
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let logger = match syslog::unix(formatter) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("Failed to connect to syslog: {}", e);
                EX_OSERR.exit()
            }
        };

        if let Err(e) =
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|_| log::set_max_level(log::LevelFilter::Info))
        {
            eprintln!("Failed to initialise logging: {}", e);
            EX_SOFTWARE.exit();
        }
    }
}

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

use std::path::Path;

use crate::account::directory::{self, Directory};
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

macro_rules! die {
    ($ex:ident, $($stuff:tt)*) => {{
        eprintln!($($stuff)*);
        $ex.exit()
    }}
}

pub fn check_config(system_config: &SystemConfig, system_root: &Path) {
    let directory_path = system_root.join(&system_config.server.directory);
    let stats = match Directory::load(&directory_path) {
        Ok(d) => d.stats(),
        Err(e) => die!(
            EX_CONFIG,
            "Error in directory file at '{}': {}",
            directory_path.display(),
            e
        ),
    };

    if system_config.tls.enabled {
        for path in &[
            &system_config.tls.private_key,
            &system_config.tls.certificate_chain,
        ] {
            let path = system_root.join(path);
            if !path.is_file() {
                die!(EX_CONFIG, "TLS file '{}' does not exist", path.display());
            }
        }
    } else if system_config.tls.implicit {
        die!(EX_CONFIG, "tls.implicit is set but TLS is not enabled");
    }

    if 0 == system_config.server.max_connections {
        die!(EX_CONFIG, "server.max_connections must be at least 1");
    }

    println!(
        "Listening on {}:{}{}",
        system_config.server.host,
        system_config.server.port,
        if system_config.tls.implicit {
            format!(" and {} (TLS)", system_config.server.tls_port)
        } else {
            String::new()
        }
    );
    println!(
        "Directory '{}': {} organisation(s), {} user(s), \
         {} mailbox(es), {} share(s)",
        directory_path.display(),
        stats.organizations,
        stats.users,
        stats.mailboxes,
        stats.shares
    );
    println!(
        "Authentication: {}",
        system_config.auth.methods.join(", ")
    );
}

pub fn hash_password() {
    let password = match rpassword::read_password_from_tty(Some("Password: "))
        .and_then(|a| {
            rpassword::read_password_from_tty(Some("Confirm: ")).map(|b| (a, b))
        }) {
        Err(e) => die!(EX_NOINPUT, "Failed to read password: {}", e),
        Ok((a, b)) if a != b => die!(EX_DATAERR, "Passwords don't match"),
        Ok((a, _)) if a.is_empty() => die!(EX_NOINPUT, "No password given"),
        Ok((a, _)) => a,
    };

    match directory::hash_password(&password) {
        Ok(hash) => println!("{}", hash),
        Err(e) => die!(EX_SOFTWARE, "Failed to hash password: {}", e),
    }
}

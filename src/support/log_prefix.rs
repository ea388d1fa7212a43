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

//! Per-connection context for log lines.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Longest value, in characters, kept for any client-supplied part.
const MAX_PART: usize = 64;

/// The text put in front of every log line about a connection, e.g.
/// `imap:10.0.0.7/conn-1760000000-3[alice@example.com agent=K-9/6.4]`.
///
/// Clones share state, so details learnt later in the session (the user, the
/// client's `ID`) show up everywhere the prefix was handed out.
#[derive(Clone)]
pub struct LogPrefix(Arc<Mutex<Parts>>);

#[derive(Default)]
struct Parts {
    protocol: String,
    session: Option<String>,
    user: Option<String>,
    /// Client name and version from `ID`; either may be missing.
    agent: Option<(Option<String>, Option<String>)>,
}

impl LogPrefix {
    pub fn new(protocol: String) -> Self {
        LogPrefix(Arc::new(Mutex::new(Parts {
            protocol,
            ..Parts::default()
        })))
    }

    fn parts(&self) -> MutexGuard<'_, Parts> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_session(&self, session: String) {
        self.parts().session = Some(clean(session));
    }

    pub fn set_user(&self, user: String) {
        self.parts().user = Some(clean(user));
    }

    pub fn set_user_agent(
        &self,
        name: Option<String>,
        version: Option<String>,
    ) {
        self.parts().agent = if name.is_none() && version.is_none() {
            None
        } else {
            Some((name.map(clean), version.map(clean)))
        };
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts = self.parts();
        f.write_str(&parts.protocol)?;
        if let Some(ref session) = parts.session {
            write!(f, "/{}", session)?;
        }

        let mut tags = Vec::new();
        if let Some(ref user) = parts.user {
            tags.push(user.clone());
        }
        if let Some((ref name, ref version)) = parts.agent {
            tags.push(format!(
                "agent={}/{}",
                name.as_deref().unwrap_or("unknown"),
                version.as_deref().unwrap_or("unknown"),
            ));
        }

        if !tags.is_empty() {
            write!(f, "[{}]", tags.join(" "))?;
        }
        Ok(())
    }
}

/// Strips control characters, which could forge log lines, and caps the
/// length.
fn clean(s: String) -> String {
    s.chars()
        .filter(|c| !c.is_control())
        .take(MAX_PART)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formatting() {
        let prefix = LogPrefix::new("imap:127.0.0.1".to_owned());
        assert_eq!("imap:127.0.0.1", prefix.to_string());

        prefix.set_session("conn-1-1".to_owned());
        prefix.set_user("alice@example.com".to_owned());
        assert_eq!(
            "imap:127.0.0.1/conn-1-1[alice@example.com]",
            prefix.to_string()
        );

        let clone = prefix.clone();
        clone.set_user_agent(Some("Thunder\nbird".to_owned()), None);
        assert_eq!(
            "imap:127.0.0.1/conn-1-1[alice@example.com \
             agent=Thunderbird/unknown]",
            prefix.to_string()
        );
    }

    #[test]
    fn client_text_is_capped() {
        let long = "x".repeat(100);
        assert_eq!(MAX_PART, clean(long).len());
        assert_eq!("ab", clean("a\r\nb".to_owned()));
    }
}

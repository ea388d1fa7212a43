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

use std::borrow::Cow;
use std::fmt;

use lazy_static::lazy_static;
use log::{debug, info, warn};

use super::defs::*;

lazy_static! {
    /// Verified against when the user doesn't exist, so that unknown and
    /// known users cost the same amount of Argon2 work.
    static ref DUMMY_PASSWORD_HASH: String = argon2::hash_encoded(
        b"",
        b"mailvane-unknown-user",
        &argon2::Config::default(),
    )
    .unwrap_or_default();
}

async fn burn_password_check(password: &str) {
    let password = password.to_owned();
    let _ = tokio::task::spawn_blocking(move || {
        argon2::verify_encoded(&DUMMY_PASSWORD_HASH, password.as_bytes())
    })
    .await;
}

/// What a SASL exchange produced once the client has said everything.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password {
        /// The identity to act as. Empty if the same as `user`.
        authzid: String,
        user: String,
        password: String,
    },
    Bearer {
        /// The user named in the envelope, if any. Must match the token.
        user: Option<String>,
        token: String,
    },
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Credentials::Password {
                ref authzid,
                ref user,
                ..
            } => write!(f, "Password({:?}, {:?}, <redacted>)", authzid, user),
            Credentials::Bearer { ref user, .. } => {
                write!(f, "Bearer({:?}, <redacted>)", user)
            },
        }
    }
}

/// The result of feeding one client line into a `SaslExchange`.
#[derive(Debug, PartialEq)]
pub enum SaslStep {
    /// Send a continuation with this (already base64-encoded) challenge and
    /// feed the client's next line to `SaslExchange::step`.
    Challenge(&'static str),
    Complete(Credentials),
    /// The exchange is over; this is the tagged response.
    Failed(s::Response),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mechanism {
    Plain,
    Login,
    XOAuth2,
    OAuthBearer,
}

/// The state of one `AUTHENTICATE` command.
pub struct SaslExchange {
    mechanism: Mechanism,
    login_user: Option<String>,
}

// "Username:" and "Password:", which is what every client expects to see in
// the LOGIN mechanism even though it is not standardised.
const LOGIN_USER_PROMPT: &str = "VXNlcm5hbWU6";
const LOGIN_PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6";

impl SaslExchange {
    pub fn new(mechanism: &str) -> Option<Self> {
        let mechanism = match mechanism.to_ascii_uppercase().as_str() {
            "PLAIN" => Mechanism::Plain,
            "LOGIN" => Mechanism::Login,
            "XOAUTH2" => Mechanism::XOAuth2,
            "OAUTHBEARER" => Mechanism::OAuthBearer,
            _ => return None,
        };

        Some(SaslExchange {
            mechanism,
            login_user: None,
        })
    }

    pub fn mechanism(&self) -> &'static str {
        match self.mechanism {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
            Mechanism::XOAuth2 => "XOAUTH2",
            Mechanism::OAuthBearer => "OAUTHBEARER",
        }
    }

    /// Begins the exchange, with the SASL-IR initial response if the client
    /// sent one.
    pub fn start(&mut self, initial: Option<&str>) -> SaslStep {
        match initial {
            Some(initial) => self.step(initial),
            None if Mechanism::Login == self.mechanism => {
                SaslStep::Challenge(LOGIN_USER_PROMPT)
            },
            None => SaslStep::Challenge(""),
        }
    }

    /// Handles one line from the client.
    pub fn step(&mut self, line: &str) -> SaslStep {
        let line = line.trim();
        if "*" == line {
            return SaslStep::Failed(s::Response::bad("AUTHENTICATE aborted"));
        }

        // RFC 4959 uses a lone = for an empty initial response.
        let data = if "=" == line {
            Vec::new()
        } else {
            match base64::decode(line) {
                Ok(data) => data,
                Err(_) => return SaslStep::Failed(malformed("Bad base64")),
            }
        };

        let data = match String::from_utf8(data) {
            Ok(data) => data,
            Err(_) => return SaslStep::Failed(malformed("Bad UTF-8")),
        };

        match self.mechanism {
            Mechanism::Plain => parse_plain(&data),
            Mechanism::Login => match self.login_user.take() {
                None => {
                    self.login_user = Some(data);
                    SaslStep::Challenge(LOGIN_PASSWORD_PROMPT)
                },
                Some(user) => SaslStep::Complete(Credentials::Password {
                    authzid: String::new(),
                    user,
                    password: data,
                }),
            },
            Mechanism::XOAuth2 => parse_xoauth2(&data),
            Mechanism::OAuthBearer => parse_oauthbearer(&data),
        }
    }
}

fn malformed(quip: &'static str) -> s::Response {
    s::Response::cond(s::RespCondType::Bad, Some(s::RespTextCode::Parse), quip)
}

// RFC 4616: [authzid] NUL authcid NUL passwd
fn parse_plain(data: &str) -> SaslStep {
    let mut parts = data.split('\x00');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(authzid), Some(user), Some(password), None) => {
            SaslStep::Complete(Credentials::Password {
                authzid: authzid.to_owned(),
                user: user.to_owned(),
                password: password.to_owned(),
            })
        },
        _ => SaslStep::Failed(malformed("Malformed AUTHENTICATE PLAIN string")),
    }
}

// user=<email> ^A auth=Bearer <token> ^A ^A
fn parse_xoauth2(data: &str) -> SaslStep {
    let mut user = None;
    let mut token = None;
    for field in data.split('\x01').filter(|f| !f.is_empty()) {
        if let Some(u) = field.strip_prefix("user=") {
            user = Some(u.to_owned());
        } else if let Some(auth) = field.strip_prefix("auth=") {
            token = strip_bearer(auth);
        }
    }

    match token {
        Some(token) => SaslStep::Complete(Credentials::Bearer { user, token }),
        None => SaslStep::Failed(malformed("Malformed XOAUTH2 response")),
    }
}

// RFC 7628: gs2-header ^A *(key=value ^A) ^A
// where the gs2-header is like `n,a=user@example.com,`.
fn parse_oauthbearer(data: &str) -> SaslStep {
    let mut fields = data.split('\x01');
    let gs2_header = fields.next().unwrap_or("");
    let user = gs2_header
        .split(',')
        .find_map(|f| f.strip_prefix("a="))
        .filter(|u| !u.is_empty())
        .map(|u| u.replace("=2C", ",").replace("=3D", "="));

    let token = fields
        .filter_map(|f| f.strip_prefix("auth="))
        .find_map(strip_bearer);

    match token {
        Some(token) => SaslStep::Complete(Credentials::Bearer { user, token }),
        None => SaslStep::Failed(malformed("Malformed OAUTHBEARER response")),
    }
}

fn strip_bearer(auth: &str) -> Option<String> {
    let (scheme, token) = auth.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim().to_owned())
    } else {
        None
    }
}

fn auth_failed() -> s::Response {
    s::Response::cond(
        s::RespCondType::No,
        Some(s::RespTextCode::AuthenticationFailed),
        "Bad user id or password",
    )
}

impl CommandProcessor {
    fn privacy_check(&self) -> PartialResult<()> {
        if self.config.auth.require_encryption && !self.tls_active {
            Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::PrivacyRequired),
                "TLS required for authentication",
            ))
        } else {
            Ok(())
        }
    }

    /// Called when a line initiating an `AUTHENTICATE` is received.
    ///
    /// On success, the server drives the returned exchange, starting with
    /// the initial response if any, and passes the credentials it yields to
    /// `authenticate_finish`.
    pub fn authenticate_start(
        &self,
        mechanism: &str,
    ) -> PartialResult<SaslExchange> {
        let mechanism = mechanism.to_ascii_uppercase();
        // Bearer tokens are credentials too.
        self.privacy_check()?;

        let advertised = format!("AUTH={}", mechanism);
        if !self.capabilities().iter().any(|c| *c == advertised) {
            self.metrics.auth_attempt(&mechanism, "unsupported");
            return Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "Unsupported AUTHENTICATE mechanism",
            ));
        }

        SaslExchange::new(&mechanism).ok_or_else(|| {
            s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::Cannot),
                "Unsupported AUTHENTICATE mechanism",
            )
        })
    }

    /// Completes `AUTHENTICATE` with what the exchange produced. Returns the
    /// tagged response.
    pub async fn authenticate_finish(
        &mut self,
        mechanism: &'static str,
        credentials: Credentials,
    ) -> s::Response {
        let result = match credentials {
            Credentials::Password {
                authzid,
                user,
                password,
            } => {
                if !authzid.is_empty() && authzid != user {
                    Err(s::Response::cond(
                        s::RespCondType::No,
                        Some(s::RespTextCode::Cannot),
                        "Acting as a different user is not supported",
                    ))
                } else {
                    self.log_in_with_password(mechanism, &user, &password)
                        .await
                }
            },
            Credentials::Bearer { user, token } => {
                self.log_in_with_token(mechanism, user, &token).await
            },
        };

        result.unwrap_or_else(|r| r)
    }

    pub(super) async fn cmd_login(
        &mut self,
        user: String,
        password: String,
        _sender: &SendResponse,
    ) -> CmdResult {
        self.privacy_check()?;
        self.log_in_with_password("LOGIN", &user, &password).await
    }

    async fn log_in_with_password(
        &mut self,
        mechanism: &str,
        user: &str,
        password: &str,
    ) -> CmdResult {
        let found = match repo!(self, user_by_email(user)) {
            Ok(found) => Some(found),
            Err(Error::Repository(RepositoryError::NotFound(_))) => None,
            Err(e) => return Err(catch_all_error_handling(&self.log_prefix, e)),
        };

        let found = match found {
            Some(found) if found.active => found,
            Some(_) => {
                burn_password_check(password).await;
                return Err(self.reject(mechanism, user, "account inactive"));
            },
            None => {
                burn_password_check(password).await;
                return Err(self.reject(mechanism, user, "unknown user"));
            },
        };

        let verified = repo!(self, verify_password(&found, password))
            .map_err(map_error!(self))?;
        if !verified {
            // Only log a warning if a password was actually provided. Login
            // attempts with no password aren't generally remarkable, but
            // importantly, they can occur if the user accidentally inputs
            // their password in the username field.
            if !password.is_empty() && password != user {
                warn!("{} Rejected login for user '{}'", self.log_prefix, user);
            }
            return Err(self.reject(mechanism, user, "wrong password"));
        }

        self.establish(mechanism, found).await
    }

    async fn log_in_with_token(
        &mut self,
        mechanism: &str,
        user: Option<String>,
        token: &str,
    ) -> CmdResult {
        let display_user = user.as_deref().unwrap_or("(bearer)");
        if !self.config.oauth2.enabled {
            return Err(self.reject(mechanism, display_user, "OAuth2 off"));
        }

        let issuer = match self.tokens.issuer_of(token) {
            Ok(issuer) => issuer,
            Err(e) => {
                return Err(self.reject(mechanism, display_user, &e.to_string()))
            },
        };
        let class = match self.config.oauth2.trusted_issuers.get(&issuer) {
            Some(&class) => class,
            None => {
                warn!(
                    "{} Bearer token from untrusted issuer {:?}",
                    self.log_prefix, issuer
                );
                return Err(self.reject(
                    mechanism,
                    display_user,
                    "untrusted issuer",
                ));
            },
        };

        let claims = match tokio::time::timeout(
            self.config.server.repository_timeout(),
            self.tokens.validate(token, class),
        )
        .await
        {
            Ok(Ok(claims)) => claims,
            Ok(Err(e)) => {
                return Err(self.reject(mechanism, display_user, &e.to_string()))
            },
            Err(_) => {
                warn!("{} Token validation timed out", self.log_prefix);
                return Err(self.reject(mechanism, display_user, "timeout"));
            },
        };

        if let Some(ref user) = user {
            if !user.eq_ignore_ascii_case(&claims.email) {
                return Err(self.reject(
                    mechanism,
                    user,
                    "token issued to someone else",
                ));
            }
        }

        let found = match repo!(self, user_by_email(&claims.email)) {
            Ok(found) if found.active => found,
            Ok(_) | Err(Error::Repository(RepositoryError::NotFound(_))) => {
                return Err(self.reject(
                    mechanism,
                    &claims.email,
                    "no such active user",
                ))
            },
            Err(e) => return Err(catch_all_error_handling(&self.log_prefix, e)),
        };

        self.establish(mechanism, found).await
    }

    /// Records a failed authentication and produces the response for it.
    ///
    /// `reason` is only logged; the client always sees the same thing.
    fn reject(&self, mechanism: &str, user: &str, reason: &str) -> s::Response {
        debug!(
            "{} {} authentication for {:?} failed: {}",
            self.log_prefix, mechanism, user, reason
        );
        self.metrics.auth_attempt(mechanism, "failure");
        auth_failed()
    }

    /// Sets up the session for `user` after their credentials have been
    /// verified.
    async fn establish(&mut self, mechanism: &str, user: User) -> CmdResult {
        let owned = repo!(self, user_mailboxes(&user.id))
            .map_err(map_error!(self))?;
        let shared = repo!(self, shared_mailboxes(&user.id))
            .map_err(map_error!(self))?;

        let mode = owned
            .iter()
            .find(|mb| mb.primary)
            .or_else(|| owned.first())
            .and_then(|mb| mb.namespace_mode)
            .unwrap_or(self.config.imap.default_namespace_mode);

        if let Err(e) = repo!(self, record_login(&user.id)) {
            warn!("{} Failed to record login: {}", self.log_prefix, e);
        }

        self.log_prefix.set_user(user.email.clone());
        info!("{} Login successful via {}", self.log_prefix, mechanism);
        self.metrics.auth_attempt(mechanism, "success");

        self.identity = Some(Identity {
            user,
            namespace: Namespace::new(mode, owned, shared),
        });

        Ok(s::Response::cond(
            s::RespCondType::Ok,
            Some(s::RespTextCode::Capability(self.capabilities())),
            Cow::Borrowed("Login completed"),
        ))
    }
}

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

//! Bearer token validation for the OAuth2 SASL mechanisms.
//!
//! The session never verifies tokens itself; it asks a `TokenValidator`
//! which issuer produced the token, checks that the issuer is trusted, and
//! then asks the validator for the verified claims.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The classes of identity provider a token may come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Issuer {
    Internal,
    Primary,
    Secondary,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Token malformed")]
    Malformed,
    #[error("Token issuer not trusted")]
    UntrustedIssuer,
}

/// The verified content of a bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    pub email: String,
    pub subject: String,
    pub issuer: Issuer,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Returns the issuer identifier the token claims, without verifying
    /// anything.
    fn issuer_of(&self, token: &str) -> Result<String, TokenError>;

    /// Verifies the token against the given issuer class.
    async fn validate(
        &self,
        token: &str,
        issuer: Issuer,
    ) -> Result<Claims, TokenError>;
}

/// A token accepted by `StaticTokens`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticToken {
    pub email: String,
    pub issuer: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A validator backed by a fixed table of tokens.
#[derive(Clone, Debug, Default)]
pub struct StaticTokens {
    tokens: BTreeMap<String, StaticToken>,
}

impl StaticTokens {
    pub fn new(tokens: BTreeMap<String, StaticToken>) -> Self {
        Self { tokens }
    }

    pub fn insert(&mut self, token: String, entry: StaticToken) {
        self.tokens.insert(token, entry);
    }
}

#[async_trait]
impl TokenValidator for StaticTokens {
    fn issuer_of(&self, token: &str) -> Result<String, TokenError> {
        self.tokens
            .get(token)
            .map(|t| t.issuer.clone())
            .ok_or(TokenError::Malformed)
    }

    async fn validate(
        &self,
        token: &str,
        issuer: Issuer,
    ) -> Result<Claims, TokenError> {
        let entry = self.tokens.get(token).ok_or(TokenError::Malformed)?;
        if entry.expires_at.map_or(false, |exp| exp <= Utc::now()) {
            return Err(TokenError::Expired);
        }

        Ok(Claims {
            email: entry.email.clone(),
            subject: entry.email.clone(),
            issuer,
            expires_at: entry.expires_at,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn static_validation() {
        let mut tokens = StaticTokens::default();
        tokens.insert(
            "good".to_owned(),
            StaticToken {
                email: "alice@example.com".to_owned(),
                issuer: "https://id.example.com".to_owned(),
                expires_at: None,
            },
        );
        tokens.insert(
            "old".to_owned(),
            StaticToken {
                email: "alice@example.com".to_owned(),
                issuer: "https://id.example.com".to_owned(),
                expires_at: Some(Utc.ymd(2001, 1, 1).and_hms(0, 0, 0)),
            },
        );

        assert_eq!(
            "https://id.example.com",
            tokens.issuer_of("good").unwrap()
        );
        assert_eq!(Err(TokenError::Malformed), tokens.issuer_of("bogus"));

        let claims = tokens.validate("good", Issuer::Primary).await.unwrap();
        assert_eq!("alice@example.com", claims.email);
        assert_eq!(Issuer::Primary, claims.issuer);

        assert_eq!(
            Err(TokenError::Expired),
            tokens.validate("old", Issuer::Primary).await
        );
    }
}

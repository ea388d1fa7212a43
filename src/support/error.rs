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

use std::io;

use thiserror::Error;

use crate::account::repository::RepositoryError;
use crate::account::token::TokenError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Command line too long")]
    Overlong,
    #[error("Connection limit reached")]
    ConnectionLimit,
    #[error("Repository operation timed out")]
    RepositoryTimeout,
    #[error("TLS is not configured")]
    TlsUnavailable,
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
}

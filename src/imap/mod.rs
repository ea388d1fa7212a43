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

//! The IMAP4rev1 protocol front end.
//!
//! Bytes come in through `request_reader`, are parsed by `syntax` into
//! commands, executed by `command_processor` against the account repository,
//! and the resulting `response` model is serialised by `response_writer`.
//! `server` ties these together per connection.

pub mod command_processor;
pub mod lex;
pub mod namespace;
pub mod request_reader;
pub mod response;
pub mod response_writer;
pub mod sequence;
pub mod server;
pub mod syntax;
pub mod threading;
pub mod utf7;

#[cfg(test)]
mod integration_tests;

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

//! Just enough RFC 5322 header handling to populate message metadata.
//!
//! Bodies are never interpreted. Anything that cannot be parsed is left
//! empty rather than failing the delivery.

use chrono::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MSG_ID: Regex = Regex::new(r"<[^<>\s]+>").unwrap();
}

/// The header fields the server cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub sender: String,
    pub reply_to: String,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub date: Option<DateTime<FixedOffset>>,
}

/// Returns the offset of the first byte of the body, i.e., just past the
/// blank line terminating the header block. If there is no blank line, the
/// whole message is header.
pub fn body_offset(message: &[u8]) -> usize {
    let mut line_start = 0;
    while line_start < message.len() {
        let line_end = memchr::memchr(b'\n', &message[line_start..])
            .map_or(message.len(), |p| line_start + p + 1);
        let line = &message[line_start..line_end];
        if line == b"\n" || line == b"\r\n" {
            return line_end;
        }
        line_start = line_end;
    }

    message.len()
}

/// Iterates the unfolded `(name, value)` pairs of the header block.
pub fn fields(message: &[u8]) -> Vec<(String, String)> {
    let header = String::from_utf8_lossy(&message[..body_offset(message)]);
    let mut out: Vec<(String, String)> = Vec::new();

    for line in header.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(&mut (_, ref mut value)) = out.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = line.split_once(':') {
            out.push((name.trim().to_owned(), value.trim().to_owned()));
        }
    }

    out
}

pub fn parse(message: &[u8]) -> ParsedHeaders {
    let mut parsed = ParsedHeaders::default();
    for (name, value) in fields(message) {
        match name.to_ascii_lowercase().as_str() {
            "subject" => parsed.subject = value,
            "from" => parsed.from = value,
            "to" => parsed.to = value,
            "cc" => parsed.cc = value,
            "bcc" => parsed.bcc = value,
            "sender" => parsed.sender = value,
            "reply-to" => parsed.reply_to = value,
            "message-id" => parsed.message_id = first_msg_id(&value),
            "in-reply-to" => parsed.in_reply_to = first_msg_id(&value),
            "references" => parsed.references = msg_ids(&value),
            "date" => {
                parsed.date = DateTime::parse_from_rfc2822(&value).ok()
            },
            _ => {},
        }
    }

    parsed
}

fn first_msg_id(s: &str) -> Option<String> {
    MSG_ID.find(s).map(|m| m.as_str().to_owned())
}

fn msg_ids(s: &str) -> Vec<String> {
    MSG_ID.find_iter(s).map(|m| m.as_str().to_owned()).collect()
}

/// A single mailbox from an address list, split the way `ENVELOPE` wants
/// it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub local: String,
    pub domain: String,
}

/// Splits an address list on top-level commas and extracts each mailbox.
///
/// Groups and comments are not understood; entries without an `@` are
/// dropped.
pub fn parse_address_list(s: &str) -> Vec<Address> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut in_angle = false;
    for ch in s.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            '<' if !in_quote => in_angle = true,
            '>' if !in_quote => in_angle = false,
            ',' if !in_quote && !in_angle => {
                parts.push(std::mem::take(&mut current));
                continue;
            },
            _ => {},
        }
        current.push(ch);
    }
    parts.push(current);

    parts.iter().filter_map(|p| parse_address(p.trim())).collect()
}

fn parse_address(s: &str) -> Option<Address> {
    let (name, spec) = match (s.find('<'), s.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            let name = s[..open].trim().trim_matches('"').trim();
            (
                Some(name.to_owned()).filter(|n| !n.is_empty()),
                &s[open + 1..close],
            )
        },
        _ => (None, s),
    };

    let (local, domain) = spec.trim().rsplit_once('@')?;
    Some(Address {
        name,
        local: local.to_owned(),
        domain: domain.to_owned(),
    })
}

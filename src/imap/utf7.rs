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

//! IMAP's modified UTF-7 for mailbox names (RFC 3501 section 5.1.3).
//!
//! Printable ASCII other than `&` stands for itself. Everything else is
//! written as UTF-16BE, base64-encoded with `,` in place of `/` and no
//! padding, between `&` and `-`. A literal `&` is `&-`.

use std::borrow::Cow;

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utf7Error {
    #[error("Unterminated shift sequence")]
    Unterminated,
    #[error("Invalid base64 in shift sequence")]
    BadBase64,
    #[error("Shift sequence does not contain valid UTF-16")]
    BadUtf16,
}

fn is_direct(ch: char) -> bool {
    (' '..='~').contains(&ch) && '&' != ch
}

fn is_base64(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b'+' == b || b',' == b
}

/// Encodes a mailbox name for the wire.
pub fn encode(s: &str) -> Cow<'_, str> {
    if s.chars().all(is_direct) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 8);
    let mut pending = Vec::<u16>::new();
    for ch in s.chars() {
        if is_direct(ch) {
            flush_shifted(&mut out, &mut pending);
            out.push(ch);
        } else if '&' == ch {
            flush_shifted(&mut out, &mut pending);
            out.push_str("&-");
        } else {
            let mut units = [0u16; 2];
            pending.extend_from_slice(ch.encode_utf16(&mut units));
        }
    }
    flush_shifted(&mut out, &mut pending);

    Cow::Owned(out)
}

fn flush_shifted(out: &mut String, pending: &mut Vec<u16>) {
    if pending.is_empty() {
        return;
    }

    let bytes = pending
        .drain(..)
        .flat_map(|u| u.to_be_bytes())
        .collect::<Vec<u8>>();
    out.push('&');
    out.push_str(&base64::encode_config(&bytes, base64::IMAP_MUTF7));
    out.push('-');
}

/// Decodes a mailbox name received from the client.
///
/// Raw UTF-8 is passed through unchanged, since some clients send it
/// regardless of what was negotiated.
pub fn decode(s: &str) -> Result<Cow<'_, str>, Utf7Error> {
    if !s.contains('&') {
        return Ok(Cow::Borrowed(s));
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let end = after
            .bytes()
            .position(|b| !is_base64(b))
            .ok_or(Utf7Error::Unterminated)?;
        if b'-' != after.as_bytes()[end] {
            return Err(Utf7Error::Unterminated);
        }

        let encoded = &after[..end];
        if encoded.is_empty() {
            out.push('&');
        } else {
            let bytes = base64::decode_config(
                encoded,
                base64::IMAP_MUTF7.decode_allow_trailing_bits(true),
            )
            .map_err(|_| Utf7Error::BadBase64)?;
            if 0 != bytes.len() % 2 {
                return Err(Utf7Error::BadUtf16);
            }

            let units = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect::<Vec<_>>();
            out.push_str(
                &String::from_utf16(&units)
                    .map_err(|_| Utf7Error::BadUtf16)?,
            );
        }

        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(Cow::Owned(out))
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encoding() {
        assert_eq!("INBOX", encode("INBOX"));
        assert_eq!("Lost &- Found", encode("Lost & Found"));
        assert_eq!(
            "~peter/mail/&U,BTFw-/&ZeVnLIqe-",
            encode("~peter/mail/台北/日本語")
        );
        assert_eq!("&Jjo-!", encode("☺!"));
        // Supplementary plane characters use surrogate pairs.
        assert_eq!("&2D3eAA-", encode("\u{1F600}"));
    }

    #[test]
    fn decoding() {
        assert_eq!("INBOX", decode("INBOX").unwrap());
        assert_eq!("Lost & Found", decode("Lost &- Found").unwrap());
        assert_eq!(
            "~peter/mail/台北/日本語",
            decode("~peter/mail/&U,BTFw-/&ZeVnLIqe-").unwrap()
        );
        assert_eq!("\u{1F600}", decode("&2D3eAA-").unwrap());
        assert_eq!("Entwürfe", decode("Entwürfe").unwrap());
    }

    #[test]
    fn decoding_errors() {
        assert_eq!(Err(Utf7Error::Unterminated), decode("&Jjo"));
        assert_eq!(Err(Utf7Error::Unterminated), decode("&Jjo!"));
        // A lone high surrogate
        assert_eq!(Err(Utf7Error::BadUtf16), decode("&2D0-"));
    }

    proptest! {
        #[test]
        fn round_trip(s in "\\PC*") {
            let encoded = encode(&s);
            prop_assert!(encoded.is_ascii());
            prop_assert_eq!(&s, &decode(&encoded).unwrap());
        }

        #[test]
        fn round_trip_with_ampersands(s in "[&a-z\u{e9}\u{1F600}-\u{1F64F}]*") {
            let encoded = encode(&s);
            prop_assert_eq!(&s, &decode(&encoded).unwrap());
        }
    }
}

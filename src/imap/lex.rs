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

//! Utilities for *writing* values under IMAP's "lexical rules".
//!
//! This is write-only since IMAP's lexical syntax is not separable from its
//! grammar; the parser lives in `syntax`.
//!
//! # Encoding Decisions
//!
//! We're generally pretty conservative here.
//!
//! Given the choice between encoding a string as an atom-like value or some
//! other form, we only use atom if all characters are in the set
//! `a-zA-Z0-9?=+/_.-` and the string is not "NIL".
//!
//! Given the choice between encoding a string as a quoted string or a literal,
//! we only choose the quoted string if it contains no controls, backslash,
//! double-quote or non-ASCII, and is less than 100 bytes long.
//!
//! Mailbox names are always sent in modified UTF-7. Free text that is not
//! ASCII (subjects, display names) is sent as a literal rather than being
//! censored.

use std::io::{self, Write};

use chrono::prelude::*;

use super::utf7;
use crate::account::model::Flag;

#[derive(Debug)]
pub struct LexWriter<W> {
    writer: W,
}

impl<W: Write> LexWriter<W> {
    pub fn new(writer: W) -> Self {
        LexWriter { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn verbatim(&mut self, s: &str) -> io::Result<()> {
        self.writer.write_all(s.as_bytes())
    }

    pub fn verbatim_bytes(&mut self, s: &[u8]) -> io::Result<()> {
        self.writer.write_all(s)
    }

    pub fn nil(&mut self) -> io::Result<()> {
        self.verbatim("NIL")
    }

    pub fn astring(&mut self, s: &str) -> io::Result<()> {
        if is_conservative_atom(s) {
            self.verbatim(s)
        } else {
            self.string(s)
        }
    }

    pub fn string(&mut self, s: &str) -> io::Result<()> {
        if is_quotable(s) {
            write!(self.writer, "\"{}\"", s)
        } else {
            self.literal(s.as_bytes())
        }
    }

    pub fn nstring(&mut self, s: Option<&str>) -> io::Result<()> {
        match s {
            None => self.nil(),
            Some(s) => self.string(s),
        }
    }

    /// Writes a mailbox name, encoding it to modified UTF-7.
    pub fn mailbox(&mut self, name: &str) -> io::Result<()> {
        let encoded = utf7::encode(name);
        if encoded.eq_ignore_ascii_case("INBOX") {
            self.verbatim("INBOX")
        } else {
            self.astring(&encoded)
        }
    }

    pub fn literal(&mut self, data: &[u8]) -> io::Result<()> {
        write!(self.writer, "{{{}}}\r\n", data.len())?;
        self.writer.write_all(data)
    }

    pub fn flag(&mut self, flag: &Flag) -> io::Result<()> {
        write!(self.writer, "{}", flag)
    }

    pub fn flag_list(&mut self, flags: &[Flag]) -> io::Result<()> {
        self.verbatim("(")?;
        for (ix, flag) in flags.iter().enumerate() {
            if ix > 0 {
                self.verbatim(" ")?;
            }
            self.flag(flag)?;
        }
        self.verbatim(")")
    }

    pub fn datetime(
        &mut self,
        datetime: &DateTime<FixedOffset>,
    ) -> io::Result<()> {
        write!(
            self.writer,
            "\"{}\"",
            datetime.format("%d-%b-%Y %H:%M:%S %z")
        )
    }

    pub fn num_u32(&mut self, value: u32) -> io::Result<()> {
        write!(self.writer, "{}", value)
    }

    pub fn num_u64(&mut self, value: u64) -> io::Result<()> {
        write!(self.writer, "{}", value)
    }
}

fn is_conservative_atom(s: &str) -> bool {
    !"nil".eq_ignore_ascii_case(s)
        && !s.is_empty()
        && s.bytes().all(|b| {
            matches!(
                b,
                b'a'..=b'z'
                    | b'A'..=b'Z'
                    | b'0'..=b'9'
                    | b'='
                    | b'?'
                    | b'/'
                    | b'+'
                    | b'_'
                    | b'.'
                    | b'-'
            )
        })
}

fn is_quotable(s: &str) -> bool {
    s.len() < 100
        && s.bytes()
            .all(|b| !matches!(b, 0..=31 | 127..=255 | b'\\' | b'"'))
}

#[cfg(test)]
mod test {
    use super::*;

    fn written(f: impl FnOnce(&mut LexWriter<Vec<u8>>) -> io::Result<()>) -> String {
        let mut l = LexWriter::new(Vec::<u8>::new());
        f(&mut l).unwrap();
        String::from_utf8(l.into_inner()).unwrap()
    }

    #[test]
    fn strings() {
        assert_eq!("foo", written(|l| l.astring("foo")));
        assert_eq!("\"NIL\"", written(|l| l.astring("NIL")));
        assert_eq!("\"\"", written(|l| l.astring("")));
        assert_eq!("\"foo bar\"", written(|l| l.astring("foo bar")));
        assert_eq!("{7}\r\nfoo\"bar", written(|l| l.string("foo\"bar")));
        assert_eq!("{4}\r\nf\u{f6}o", written(|l| l.string("f\u{f6}o")));
        assert_eq!("NIL", written(|l| l.nstring(None)));
    }

    #[test]
    fn mailboxes() {
        assert_eq!("INBOX", written(|l| l.mailbox("inbox")));
        assert_eq!("Archive/2020", written(|l| l.mailbox("Archive/2020")));
        assert_eq!(
            "\"Lost &- Found\"",
            written(|l| l.mailbox("Lost & Found"))
        );
        assert_eq!("\"&Jjo-!\"", written(|l| l.mailbox("\u{263a}!")));
    }

    #[test]
    fn flags_and_dates() {
        assert_eq!(
            "(\\Seen $Junk)",
            written(|l| l
                .flag_list(&[Flag::Seen, Flag::Keyword("$Junk".to_owned())]))
        );
        let dt = FixedOffset::east(3600)
            .ymd(2020, 7, 4)
            .and_hms(6, 31, 0);
        assert_eq!(
            "\"04-Jul-2020 06:31:00 +0100\"",
            written(|l| l.datetime(&dt))
        );
    }
}

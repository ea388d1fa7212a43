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

//! Framing of client input.
//!
//! Commands are assembled line by line in a bounded buffer. A line ending in
//! a literal announcement (`{n}` or `{n+}`) pulls the literal into the same
//! buffer and keeps going, so the parser always sees a whole command. The
//! exception is `APPEND`, whose message literal is handed to the caller as a
//! stream instead.

use std::io;
use std::ops::Range;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::poll_fn;
use futures::ready;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;

use super::response_writer::OutputEvent;
use super::syntax::{self as s, ParsedLine};

/// Upper bound on a command line, literals included.
const LINE_CAPACITY: usize = 65536;
/// How much of an overlong line is kept while searching for its end, so a
/// literal announcement split across reads is still recognised.
const OVERLONG_TAIL: usize = 32;

pub struct RequestReader<R> {
    io: R,
    /// Fixed-size input buffer. `buf[..filled]` holds data read (and
    /// inflated) from `io`; `buf[..pos]` is the part already consumed by the
    /// command being assembled.
    buf: Vec<u8>,
    filled: usize,
    pos: usize,
    inflate: Option<Inflater>,
}

/// What `read_command_start` found.
#[derive(Debug)]
pub enum CommandStart {
    /// A line with no recognisable tag.
    Incomprehensible,
    /// A tagged line naming a command that does not exist.
    Unknown(String),
    /// A known command whose arguments did not parse.
    Bad(String),
    /// The command was too long and has been skipped.
    TooLongRecovered(String),
    /// The command was too long and the stream could not be resynchronised.
    TooLongFatal(String),
    Command(s::CommandLine),
    /// An `APPEND` up to its message literal.
    ///
    /// Nothing has been sent to the client. The caller either accepts it
    /// (continuation line if `!literal_plus`, read the literal with
    /// `read_append_literal`, then `continue_append`) or refuses it with
    /// `abort_append` before touching the literal.
    AppendStart {
        append: s::AppendStart,
        size: u32,
        literal_plus: bool,
    },
    /// A continuation line was needed but the output side has gone away.
    OutputDisconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendContinuation {
    Done,
    /// The literal was followed by something other than the end of the line.
    /// The rest of the command has been skipped.
    SyntaxError,
    TooLong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionStatus {
    Started,
    AlreadyActive,
    /// The client pipelined data after `COMPRESS`, which would be ambiguous.
    InvalidPipelinedData,
}

#[derive(Clone, Copy, Debug)]
enum Skip {
    /// The buffer is full of one line without a line feed.
    Line,
    /// A `{n+}` literal of this size is next in the stream.
    Literal(u32),
}

impl<R: AsyncRead + Unpin> RequestReader<R> {
    pub fn new(io: R) -> Self {
        Self {
            io,
            buf: vec![0u8; LINE_CAPACITY],
            filled: 0,
            pos: 0,
            inflate: None,
        }
    }

    pub fn has_pipelined_data(&self) -> bool {
        self.pos < self.filled
    }

    pub fn is_compressing(&self) -> bool {
        self.inflate.is_some()
    }

    /// Releases the underlying stream. Buffered input is discarded.
    pub fn into_inner(self) -> R {
        self.io
    }

    /// Reads the next command.
    ///
    /// Continuation requests for synchronising literals go out through
    /// `output`. When `recover_overlong` is false, a command line that does
    /// not fit is fatal instead of being skipped; refusing an oversized
    /// synchronising literal is always possible.
    pub async fn read_command_start(
        &mut self,
        output: &mpsc::Sender<OutputEvent>,
        recover_overlong: bool,
    ) -> io::Result<CommandStart> {
        self.compact();

        loop {
            if self.next_line().await?.is_none() {
                return self.overlong(Skip::Line, recover_overlong).await;
            }

            let Some((head_end, size, literal_plus)) = self.pending_literal()
            else {
                break;
            };

            if let Some(append) = s::parse_append_start(&self.buf[..head_end])
            {
                return Ok(CommandStart::AppendStart {
                    append,
                    size,
                    literal_plus,
                });
            }

            if self.pos + size as usize <= LINE_CAPACITY {
                if !literal_plus {
                    let go = OutputEvent::ContinuationLine { prompt: "go" };
                    if output.send(go).await.is_err() {
                        return Ok(CommandStart::OutputDisconnected);
                    }
                }
                self.take_exact(size as usize).await?;
            } else if literal_plus {
                return self
                    .overlong(Skip::Literal(size), recover_overlong)
                    .await;
            } else if let Some(tag) = s::parse_tag(&self.buf[..head_end]) {
                // The client waits for our go-ahead, so simply refusing keeps
                // the stream in sync.
                return Ok(CommandStart::TooLongRecovered(tag));
            }
        }

        let line = trim_eol(&self.buf[..self.pos]);
        Ok(match s::parse_command_line(line) {
            ParsedLine::Command(command) => CommandStart::Command(command),
            ParsedLine::Unknown(tag) => CommandStart::Unknown(tag),
            ParsedLine::Bad(tag) => CommandStart::Bad(tag),
            ParsedLine::Incomprehensible => CommandStart::Incomprehensible,
        })
    }

    /// Reads one line as-is, without its line ending. `None` if it does not
    /// fit in the buffer.
    pub async fn read_raw_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.compact();
        Ok(self.next_line().await?.map(<[u8]>::to_vec))
    }

    /// The `APPEND` literal of `len` bytes. It must be read to the end.
    pub fn read_append_literal(
        &mut self,
        len: u32,
    ) -> impl AsyncRead + Unpin + '_ {
        self.take(u64::from(len))
    }

    /// Refuses an `APPEND` whose literal has not been read.
    ///
    /// A synchronising literal was never sent, so there is nothing to do; a
    /// `LITERAL+` one is on its way and must be discarded.
    pub async fn abort_append(
        &mut self,
        len: u32,
        literal_plus: bool,
    ) -> io::Result<()> {
        if literal_plus {
            self.skip(Skip::Literal(len)).await
        } else {
            Ok(())
        }
    }

    /// Reads what follows the `APPEND` literal, which must be the end of the
    /// line since only one message per `APPEND` is accepted.
    pub async fn continue_append(&mut self) -> io::Result<AppendContinuation> {
        self.compact();
        let rest_is_empty = match self.next_line().await? {
            Some(rest) => rest.is_empty(),
            None => {
                self.skip(Skip::Line).await?;
                return Ok(AppendContinuation::TooLong);
            },
        };

        if rest_is_empty {
            return Ok(AppendContinuation::Done);
        }

        if let Some((_, size, true)) = self.pending_literal() {
            self.skip(Skip::Literal(size)).await?;
        }
        Ok(AppendContinuation::SyntaxError)
    }

    /// Starts inflating input (`COMPRESS DEFLATE`).
    pub fn start_compression(&mut self) -> CompressionStatus {
        if self.inflate.is_some() {
            CompressionStatus::AlreadyActive
        } else if self.has_pipelined_data() {
            CompressionStatus::InvalidPipelinedData
        } else {
            self.inflate = Some(Inflater::new());
            CompressionStatus::Started
        }
    }

    /// The literal announced at the end of the consumed text, if any, as
    /// (end of the text before it, size, LITERAL+).
    fn pending_literal(&self) -> Option<(usize, u32, bool)> {
        literal_at_end(&self.buf[..self.pos])
    }

    async fn overlong(
        &mut self,
        skip: Skip,
        recover: bool,
    ) -> io::Result<CommandStart> {
        // After an unterminated line the tag may be anywhere in the buffer.
        // After a literal announcement only the consumed part is meaningful.
        let searched = match skip {
            Skip::Line => self.filled,
            Skip::Literal(_) => self.pos,
        };

        let tag = match s::parse_tag(&self.buf[..searched]) {
            Some(tag) if recover => tag,
            Some(tag) => {
                self.reset();
                return Ok(CommandStart::TooLongFatal(tag));
            },
            None => {
                self.reset();
                return Ok(CommandStart::Incomprehensible);
            },
        };

        self.skip(skip).await?;
        Ok(CommandStart::TooLongRecovered(tag))
    }

    /// Discards input up to the end of the current command.
    ///
    /// Stops early at a synchronising literal announcement, since the client
    /// will not send that literal without a go-ahead.
    async fn skip(&mut self, mut skip: Skip) -> io::Result<()> {
        loop {
            match skip {
                Skip::Line => self.pos = self.filled - OVERLONG_TAIL,
                Skip::Literal(len) => {
                    tokio::io::copy(
                        &mut self.take(u64::from(len)),
                        &mut tokio::io::sink(),
                    )
                    .await?;
                },
            }
            self.compact();

            if self.next_line().await?.is_none() {
                skip = Skip::Line;
                continue;
            }

            match self.pending_literal() {
                Some((_, len, true)) => skip = Skip::Literal(len),
                Some((_, _, false)) | None => return Ok(()),
            }
        }
    }

    /// Consumes through the next line feed and returns the line without its
    /// ending, or `None` if the buffer fills up first (nothing is consumed
    /// then).
    async fn next_line(&mut self) -> io::Result<Option<&[u8]>> {
        let start = self.pos;
        let mut scanned = start;

        let lf = loop {
            if let Some(i) =
                memchr::memchr(b'\n', &self.buf[scanned..self.filled])
            {
                break scanned + i;
            }

            if LINE_CAPACITY == self.filled {
                return Ok(None);
            }
            scanned = self.filled;
            self.fill().await?;
        };

        self.pos = lf + 1;
        Ok(Some(trim_eol(&self.buf[start..self.pos])))
    }

    /// Consumes exactly `n` more bytes, which must fit in the buffer.
    async fn take_exact(&mut self, n: usize) -> io::Result<()> {
        let end = self.pos + n;
        debug_assert!(end <= LINE_CAPACITY);
        while self.filled < end {
            self.fill().await?;
        }
        self.pos = end;
        Ok(())
    }

    /// Moves unconsumed input to the front of the buffer.
    fn compact(&mut self) {
        self.buf.copy_within(self.pos..self.filled, 0);
        self.filled -= self.pos;
        self.pos = 0;
    }

    fn reset(&mut self) {
        self.filled = 0;
        self.pos = 0;
    }

    /// Reads at least one more byte into the buffer. EOF is an error here,
    /// since it always interrupts a command.
    async fn fill(&mut self) -> io::Result<()> {
        let n = poll_fn(|cx: &mut Context<'_>| -> Poll<io::Result<usize>> {
            let Self {
                ref mut io,
                ref mut buf,
                filled,
                ref mut inflate,
                ..
            } = *self;
            let mut dst = ReadBuf::new(&mut buf[filled..]);
            match *inflate {
                Some(ref mut inflate) => {
                    ready!(inflate.poll_inflate(cx, io, &mut dst))?
                },
                None => ready!(Pin::new(io).poll_read(cx, &mut dst))?,
            }
            Poll::Ready(Ok(dst.filled().len()))
        })
        .await?;

        if 0 == n {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.filled += n;
        Ok(())
    }
}

/// Reading from the `RequestReader` itself yields the raw byte stream:
/// buffered input first, then the (inflated) connection.
impl<R: AsyncRead + Unpin> AsyncRead for RequestReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.has_pipelined_data() {
            let n = dst.remaining().min(this.filled - this.pos);
            dst.put_slice(&this.buf[this.pos..this.pos + n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }

        match this.inflate {
            Some(ref mut inflate) => {
                inflate.poll_inflate(cx, &mut this.io, dst)
            },
            None => Pin::new(&mut this.io).poll_read(cx, dst),
        }
    }
}

/// Raw DEFLATE decoding of the input stream.
struct Inflater {
    state: flate2::Decompress,
    /// Compressed bytes read from the connection; `unread` is the part the
    /// decompressor has not taken yet.
    staging: Vec<u8>,
    unread: Range<usize>,
    eof: bool,
}

impl Inflater {
    fn new() -> Self {
        Self {
            state: flate2::Decompress::new(false),
            staging: vec![0u8; 4096],
            unread: 0..0,
            eof: false,
        }
    }

    fn poll_inflate<R: AsyncRead + Unpin>(
        &mut self,
        cx: &mut Context<'_>,
        src: &mut R,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            // The decompressor may still hold output even with no new input.
            let (in_before, out_before) =
                (self.state.total_in(), self.state.total_out());
            let flush = if self.eof {
                flate2::FlushDecompress::Finish
            } else {
                flate2::FlushDecompress::Sync
            };
            self.state
                .decompress(
                    &self.staging[self.unread.clone()],
                    dst.initialize_unfilled(),
                    flush,
                )
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            self.unread.start += (self.state.total_in() - in_before) as usize;
            let produced = (self.state.total_out() - out_before) as usize;
            if produced > 0 || self.eof {
                dst.advance(produced);
                return Poll::Ready(Ok(()));
            }

            if self.unread.is_empty() {
                let mut staging = ReadBuf::new(&mut self.staging);
                ready!(Pin::new(&mut *src).poll_read(cx, &mut staging))?;
                let n = staging.filled().len();
                self.unread = 0..n;
                self.eof = 0 == n;
            }
        }
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Recognises `~{n}` / `{n+}` and friends at the very end of `text`, which
/// must include the line ending.
fn literal_at_end(text: &[u8]) -> Option<(usize, u32, bool)> {
    let body = text.strip_suffix(b"\n")?;
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    let body = body.strip_suffix(b"}")?;
    let (body, literal_plus) = match body.strip_suffix(b"+") {
        Some(b) => (b, true),
        None => (body, false),
    };

    let digits_start = body
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map_or(0, |i| i + 1);
    let digits = &body[digits_start..];
    if digits.is_empty() || b'{' != *body[..digits_start].last()? {
        return None;
    }

    let size = std::str::from_utf8(digits).ok()?.parse::<u32>().ok()?;
    let mut head_end = digits_start - 1;
    if head_end > 0 && b'~' == body[head_end - 1] {
        head_end -= 1;
    }

    Some((head_end, size, literal_plus))
}

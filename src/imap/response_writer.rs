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

//! The output half of a connection.
//!
//! Sessions never write to the socket directly. They queue `OutputEvent`s on
//! a channel drained by `write_responses`, which runs as its own task so
//! that notification pushes are not held up by a slow reader.

use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt as _};

use super::lex::LexWriter;
use super::response::ResponseLine;

/// Something to send to the client.
#[derive(Debug)]
pub enum OutputEvent {
    ResponseLine {
        line: ResponseLine,
        ctl: OutputControl,
    },
    /// `+ <prompt>`, always flushed.
    ContinuationLine { prompt: &'static str },
    /// Push out whatever is buffered.
    Flush,
}

/// What to do after writing a response line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputControl {
    /// Nothing; the line may sit in the buffer.
    Buffer,
    Flush,
    /// Flush, then compress everything written afterwards.
    EnableCompression,
    /// Flush and close the connection.
    Disconnect,
    /// Flush, then stop and return the stream to the caller (`STARTTLS`).
    Surrender,
}

/// Why `write_responses` stopped.
#[derive(Debug)]
pub enum OutputDisconnect<W> {
    /// An `OutputControl::Disconnect` line was written.
    ByControl,
    /// Every sender was dropped.
    InputClosed,
    /// An `OutputControl::Surrender` line was written; here is the stream.
    Surrendered(W),
}

/// Buffered output is written once it reaches this size.
const HIGH_WATER: usize = 4096;
/// Buffered output is not held back for longer than this, since a slow
/// command may produce its lines far apart.
const MAX_LINGER: Duration = Duration::from_secs(3);

/// Writes everything received on `events` to `io`, batching lines until a
/// flush is asked for or the buffer grows.
///
/// Returns once the channel closes, after a `Disconnect` line (the stream is
/// shut down) or after a `Surrender` line (the stream is returned), or on the
/// first I/O error.
pub async fn write_responses<W: AsyncWrite + Unpin>(
    mut io: W,
    mut events: tokio::sync::mpsc::Receiver<OutputEvent>,
) -> io::Result<OutputDisconnect<W>> {
    let mut outbox = Outbox::default();

    while let Some(event) = events.recv().await {
        let ctl = outbox.push(event)?;

        match ctl {
            OutputControl::Buffer => {
                if outbox.pending.len() >= HIGH_WATER {
                    outbox.send(&mut io, Flush::No).await?;
                } else if outbox.lingered() {
                    outbox.send(&mut io, Flush::Sync).await?;
                }
            },
            OutputControl::Flush => outbox.send(&mut io, Flush::Sync).await?,
            OutputControl::EnableCompression => {
                // The line announcing compression goes out in the clear.
                outbox.send(&mut io, Flush::Sync).await?;
                outbox.deflate.get_or_insert_with(Deflater::new);
            },
            OutputControl::Disconnect => {
                outbox.send(&mut io, Flush::Finish).await?;
                io.shutdown().await?;
                return Ok(OutputDisconnect::ByControl);
            },
            OutputControl::Surrender => {
                outbox.send(&mut io, Flush::Sync).await?;
                return Ok(OutputDisconnect::Surrendered(io));
            },
        }
    }

    outbox.send(&mut io, Flush::Finish).await?;
    Ok(OutputDisconnect::InputClosed)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flush {
    /// Write what is buffered but let the transport hold on to it.
    No,
    /// Make everything so far readable by the client.
    Sync,
    /// As `Sync`, and terminate the compressed stream if there is one.
    Finish,
}

struct Outbox {
    /// Serialised lines not yet handed to the transport.
    pending: Vec<u8>,
    deflate: Option<Deflater>,
    /// When the oldest line in `pending` could have gone out.
    since: Instant,
}

impl Default for Outbox {
    fn default() -> Self {
        Self {
            pending: Vec::with_capacity(HIGH_WATER + HIGH_WATER / 4),
            deflate: None,
            since: Instant::now(),
        }
    }
}

impl Outbox {
    /// Serialises `event` into `pending`, returning how the caller should
    /// treat it.
    fn push(&mut self, event: OutputEvent) -> io::Result<OutputControl> {
        if self.pending.is_empty() {
            self.since = Instant::now();
        }

        Ok(match event {
            OutputEvent::ResponseLine { line, ctl } => {
                line.write_to(&mut LexWriter::new(&mut self.pending))?;
                self.pending.extend_from_slice(b"\r\n");
                ctl
            },
            OutputEvent::ContinuationLine { prompt } => {
                self.pending.extend_from_slice(b"+ ");
                self.pending.extend_from_slice(prompt.as_bytes());
                self.pending.extend_from_slice(b"\r\n");
                OutputControl::Flush
            },
            OutputEvent::Flush => OutputControl::Flush,
        })
    }

    fn lingered(&self) -> bool {
        self.since.elapsed() >= MAX_LINGER
    }

    async fn send<W: AsyncWrite + Unpin>(
        &mut self,
        io: &mut W,
        flush: Flush,
    ) -> io::Result<()> {
        match self.deflate {
            Some(ref mut deflate) => {
                deflate.write(io, &self.pending, flush).await?
            },
            None => io.write_all(&self.pending).await?,
        }

        if Flush::No != flush {
            io.flush().await?;
        }

        self.pending.clear();
        self.since = Instant::now();
        Ok(())
    }
}

/// Raw DEFLATE encoding of the output stream (`COMPRESS DEFLATE`).
struct Deflater {
    state: flate2::Compress,
    chunk: Vec<u8>,
}

impl Deflater {
    fn new() -> Self {
        Self {
            state: flate2::Compress::new(flate2::Compression::new(3), false),
            chunk: vec![0u8; HIGH_WATER],
        }
    }

    async fn write<W: AsyncWrite + Unpin>(
        &mut self,
        io: &mut W,
        mut data: &[u8],
        flush: Flush,
    ) -> io::Result<()> {
        while !data.is_empty() {
            let (consumed, produced) =
                self.step(data, flate2::FlushCompress::None)?;
            data = &data[consumed..];
            io.write_all(&self.chunk[..produced]).await?;
        }

        let mode = match flush {
            Flush::No => return Ok(()),
            Flush::Sync => flate2::FlushCompress::Sync,
            Flush::Finish => flate2::FlushCompress::Finish,
        };

        // Drain until the compressor has nothing more to say.
        loop {
            let (_, produced) = self.step(&[], mode)?;
            if 0 == produced {
                return Ok(());
            }
            io.write_all(&self.chunk[..produced]).await?;
        }
    }

    /// Runs the compressor once, returning (bytes consumed, bytes produced
    /// into `chunk`).
    fn step(
        &mut self,
        input: &[u8],
        mode: flate2::FlushCompress,
    ) -> io::Result<(usize, usize)> {
        let (in_before, out_before) =
            (self.state.total_in(), self.state.total_out());
        self.state
            .compress(input, &mut self.chunk, mode)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok((
            (self.state.total_in() - in_before) as usize,
            (self.state.total_out() - out_before) as usize,
        ))
    }
}

#[cfg(test)]
mod test {
    use std::io::Read as _;

    use tokio::io::AsyncReadExt as _;

    use super::*;
    use crate::imap::response::Response;

    fn line(tag: &str, quip: &'static str) -> OutputEvent {
        OutputEvent::ResponseLine {
            line: ResponseLine::tagged(tag, Response::ok(quip)),
            ctl: OutputControl::Buffer,
        }
    }

    #[tokio::test]
    async fn buffers_until_flush_or_close() {
        let (client, server) = tokio::io::duplex(65536);
        let (sender, receiver) = tokio::sync::mpsc::channel(16);
        let writer = tokio::spawn(write_responses(server, receiver));

        sender.send(line("a", "one")).await.unwrap();
        sender
            .send(OutputEvent::ContinuationLine { prompt: "go" })
            .await
            .unwrap();
        sender.send(line("b", "two")).await.unwrap();
        drop(sender);

        assert_matches!(
            Ok(Ok(OutputDisconnect::InputClosed)),
            writer.await
        );

        let mut client = client;
        let mut text = String::new();
        client.read_to_string(&mut text).await.unwrap();
        assert_eq!("a OK one\r\n+ go\r\nb OK two\r\n", text);
    }

    #[tokio::test]
    async fn surrender_returns_writer() {
        let (mut client, server) = tokio::io::duplex(65536);
        let (sender, receiver) = tokio::sync::mpsc::channel(16);
        let writer = tokio::spawn(write_responses(server, receiver));

        sender
            .send(OutputEvent::ResponseLine {
                line: ResponseLine::tagged("a", Response::ok("Begin TLS")),
                ctl: OutputControl::Surrender,
            })
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(b"a OK Begin TLS\r\n", &buf);

        match writer.await.unwrap().unwrap() {
            OutputDisconnect::Surrendered(_) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn compression() {
        let (mut client, server) = tokio::io::duplex(65536);
        let (sender, receiver) = tokio::sync::mpsc::channel(16);
        let writer = tokio::spawn(write_responses(server, receiver));

        sender
            .send(OutputEvent::ResponseLine {
                line: ResponseLine::tagged("a", Response::ok("DEFLATE active")),
                ctl: OutputControl::EnableCompression,
            })
            .await
            .unwrap();
        sender.send(line("b", "compressed")).await.unwrap();
        drop(sender);
        writer.await.unwrap().unwrap();

        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        let plain = b"a OK DEFLATE active\r\n";
        assert_eq!(&plain[..], &raw[..plain.len()]);

        let mut inflated = String::new();
        flate2::read::DeflateDecoder::new(&raw[plain.len()..])
            .read_to_string(&mut inflated)
            .unwrap();
        assert_eq!("b OK compressed\r\n", inflated);
    }
}

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

//! Connection handling.
//!
//! `Server` owns the listeners and the connection limit. Each accepted
//! connection gets a `Session`, which runs the read loop on its own task and
//! hands complete commands to a `CommandProcessor`. Responses flow through a
//! channel to a separate writer task (see `response_writer`), so that pushed
//! notifications never wait on the reader.
//!
//! The few commands that need control of the connection itself (`APPEND`,
//! `AUTHENTICATE`, `STARTTLS`, `COMPRESS`, `IDLE`) are driven here with help
//! from the processor.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::prelude::*;
use futures::future;
use log::{debug, error, info, warn};
use openssl::ssl::{Ssl, SslAcceptor, SslFiletype, SslMethod};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_openssl::SslStream;

use super::command_processor::{
    CommandProcessor, IdleOutcome, Route, SaslStep, SendResponse, Services,
};
use super::lex::LexWriter;
use super::request_reader::{
    AppendContinuation, CommandStart, CompressionStatus, RequestReader,
};
use super::response as s;
use super::response_writer::{
    write_responses, OutputControl, OutputDisconnect, OutputEvent,
};
use super::syntax::{AppendStart, Command, CommandLine};
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::TlsConfig;

/// How many output events may queue up before handlers wait for the
/// writer.
const OUTPUT_BUFFER: usize = 64;

/// A bidirectional byte stream a session can run over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxStream = Box<dyn Stream>;

type Reader = RequestReader<ReadHalf<BoxStream>>;
type Writer = JoinHandle<io::Result<OutputDisconnect<WriteHalf<BoxStream>>>>;

/// Performs the server side of a TLS handshake, for implicit TLS and for
/// `STARTTLS`.
#[async_trait]
pub trait TlsUpgrader: Send + Sync {
    async fn upgrade(&self, stream: BoxStream) -> Result<BoxStream, Error>;
}

/// The OpenSSL-backed `TlsUpgrader`, using Mozilla's "intermediate"
/// compatibility profile.
pub struct OpenSslUpgrader {
    acceptor: SslAcceptor,
}

impl OpenSslUpgrader {
    pub fn new(config: &TlsConfig) -> Result<Self, Error> {
        let mut acceptor =
            SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
        acceptor.set_private_key_file(&config.private_key, SslFiletype::PEM)?;
        acceptor.set_certificate_chain_file(&config.certificate_chain)?;
        acceptor.check_private_key()?;

        Ok(Self {
            acceptor: acceptor.build(),
        })
    }
}

#[async_trait]
impl TlsUpgrader for OpenSslUpgrader {
    async fn upgrade(&self, stream: BoxStream) -> Result<BoxStream, Error> {
        let ssl = Ssl::new(self.acceptor.context())?;
        let mut stream = SslStream::new(ssl, stream)?;
        std::pin::Pin::new(&mut stream)
            .accept()
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;
        Ok(Box::new(stream))
    }
}

pub struct Server {
    services: Services,
    tls: Option<Arc<dyn TlsUpgrader>>,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl Server {
    pub fn new(
        services: Services,
        tls: Option<Arc<dyn TlsUpgrader>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            services,
            tls,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(0),
        })
    }

    /// The number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Binds the configured listeners and serves connections until a
    /// listener fails to bind.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let config = &self.services.config;
        let plain =
            TcpListener::bind((config.server.host.as_str(), config.server.port))
                .await?;
        info!("Listening on {}", plain.local_addr()?);

        let implicit = if config.tls.implicit {
            if self.tls.is_none() {
                return Err(Error::TlsUnavailable);
            }

            let listener = TcpListener::bind((
                config.server.host.as_str(),
                config.server.tls_port,
            ))
            .await?;
            info!("Listening with implicit TLS on {}", listener.local_addr()?);
            Some(listener)
        } else {
            None
        };

        loop {
            let (accepted, implicit_tls) = tokio::select! {
                r = plain.accept() => (r, false),
                r = accept_optional(implicit.as_ref()) => (r, true),
            };

            let (socket, peer) = match accepted {
                Ok(a) => a,
                Err(e) => {
                    // Usually a transient condition like running out of file
                    // descriptors; keep accepting.
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                },
            };

            if let Err(e) = socket.set_nodelay(true) {
                debug!("{} Unable to set TCP_NODELAY: {}", peer, e);
            }

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.serve(Box::new(socket), peer.to_string(), implicit_tls)
                    .await;
            });
        }
    }

    /// Serves one connection to completion.
    pub async fn serve(
        &self,
        stream: BoxStream,
        peer: String,
        implicit_tls: bool,
    ) {
        let config = &self.services.config;
        let max = config.server.max_connections;
        let slot = match ConnectionSlot::acquire(&self.active, max) {
            Some(slot) => slot,
            None => {
                warn!("imap:{} Rejected; connection limit reached", peer);
                if let Err(e) = reject_busy(stream).await {
                    debug!("imap:{} Failed to send BYE: {}", peer, e);
                }
                return;
            },
        };

        let session_id = format!(
            "conn-{}-{}",
            Utc::now().timestamp(),
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let log_prefix = LogPrefix::new(format!("imap:{}", peer));
        self.services.metrics.connection_opened();
        info!("{} Connection established as {}", log_prefix, session_id);

        let stream = if implicit_tls {
            match self.upgrade(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("{} TLS handshake failed: {}", log_prefix, e);
                    self.services.metrics.connection_closed();
                    return;
                },
            }
        } else {
            stream
        };

        let tls_offered =
            !implicit_tls && self.tls.is_some() && config.tls.starttls;
        let processor = CommandProcessor::new(
            log_prefix.clone(),
            session_id,
            self.services.clone(),
            implicit_tls,
            tls_offered,
        );

        let mut session = Session::new(
            processor,
            self.tls.clone(),
            config.server.read_timeout(),
        );
        match session.run(stream).await {
            Ok(()) => info!("{} Normal client disconnect", log_prefix),
            Err(e) => warn!("{} Abnormal client disconnect: {}", log_prefix, e),
        }
        session.processor.close();

        self.services.metrics.connection_closed();
        drop(slot);
    }

    async fn upgrade(&self, stream: BoxStream) -> Result<BoxStream, Error> {
        match self.tls {
            Some(ref tls) => tls.upgrade(stream).await,
            None => Err(Error::TlsUnavailable),
        }
    }
}

async fn accept_optional(
    listener: Option<&TcpListener>,
) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => future::pending().await,
    }
}

/// Counts one connection against the limit for as long as it lives.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        if active.fetch_add(1, Ordering::SeqCst) >= max {
            active.fetch_sub(1, Ordering::SeqCst);
            None
        } else {
            Some(Self(Arc::clone(active)))
        }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn reject_busy(mut stream: BoxStream) -> io::Result<()> {
    let mut text = Vec::new();
    s::ResponseLine::untagged(s::Response::bye("Server busy, try again later"))
        .write_to(&mut LexWriter::new(&mut text))?;
    text.extend_from_slice(b"\r\n");
    stream.write_all(&text).await?;
    stream.shutdown().await
}

/// What the read loop does after a command.
enum Next {
    Continue,
    Stop,
}

struct Session {
    processor: CommandProcessor,
    tls: Option<Arc<dyn TlsUpgrader>>,
    read_timeout: Duration,
    sender: SendResponse,
    writer: Option<Writer>,
}

impl Session {
    fn new(
        processor: CommandProcessor,
        tls: Option<Arc<dyn TlsUpgrader>>,
        read_timeout: Duration,
    ) -> Self {
        // Replaced as soon as the stream is known.
        let (sender, _) = mpsc::channel(1);
        Self {
            processor,
            tls,
            read_timeout,
            sender,
            writer: None,
        }
    }

    /// Splits `stream`, starting the writer task on one half and returning
    /// a reader over the other.
    fn attach(&mut self, stream: BoxStream) -> Reader {
        let (read, write) = tokio::io::split(stream);
        let (sender, receiver) = mpsc::channel(OUTPUT_BUFFER);
        self.sender = sender;
        self.writer = Some(tokio::spawn(write_responses(write, receiver)));
        RequestReader::new(read)
    }

    async fn run(&mut self, stream: BoxStream) -> Result<(), Error> {
        let mut reader = self.attach(stream);
        self.send(self.processor.greet(), OutputControl::Flush).await;

        let result = self.read_loop(&mut reader).await;
        let finished = self.finish().await;
        result.and(finished)
    }

    async fn read_loop(&mut self, reader: &mut Reader) -> Result<(), Error> {
        while !self.processor.logged_out() && !self.sender.is_closed() {
            let start = match tokio::time::timeout(
                self.read_timeout,
                reader.read_command_start(&self.sender, true),
            )
            .await
            {
                Ok(start) => start?,
                Err(_) => {
                    info!("{} Read timeout", self.processor.log_prefix());
                    self.bye("Autologout; idle for too long").await;
                    return Ok(());
                },
            };

            let next = match start {
                CommandStart::Command(command_line) => {
                    self.command(reader, command_line).await?
                },

                CommandStart::AppendStart {
                    append,
                    size,
                    literal_plus,
                } => self.append(reader, append, size, literal_plus).await?,

                CommandStart::Unknown(tag) => {
                    self.tagged(tag, s::Response::bad("Unknown command"))
                        .await
                },

                CommandStart::Bad(tag) => {
                    self.tagged(
                        tag,
                        s::Response::cond(
                            s::RespCondType::Bad,
                            Some(s::RespTextCode::Parse),
                            "Unrecognised command syntax",
                        ),
                    )
                    .await
                },

                CommandStart::Incomprehensible => {
                    self.send(
                        s::ResponseLine::untagged(s::Response::bad(
                            "That doesn't look anything like an IMAP command!",
                        )),
                        OutputControl::Flush,
                    )
                    .await;
                    Next::Continue
                },

                CommandStart::TooLongRecovered(tag) => {
                    self.tagged(tag, s::Response::no("Command line too long"))
                        .await
                },

                CommandStart::TooLongFatal(_) => {
                    self.bye("Command line too long").await;
                    return Err(Error::Overlong);
                },

                CommandStart::OutputDisconnected => return Ok(()),
            };

            match next {
                Next::Continue => (),
                Next::Stop => return Ok(()),
            }
        }

        Ok(())
    }

    async fn command(
        &mut self,
        reader: &mut Reader,
        command_line: CommandLine,
    ) -> Result<Next, Error> {
        match self.processor.route(&command_line.cmd) {
            Ok(Route::Session) => (),
            // Simple commands and rejections are both the processor's
            // business.
            Ok(Route::Simple(_)) | Err(_) => {
                let line = self
                    .processor
                    .handle_command(command_line, &self.sender)
                    .await;
                return Ok(self.send_final(line).await);
            },
        }

        self.processor.record_session_command(&command_line.cmd);
        let CommandLine { tag, cmd } = command_line;
        match cmd {
            Command::Authenticate { mechanism, initial } => {
                self.authenticate(reader, tag, &mechanism, initial).await
            },
            Command::StartTls => self.start_tls(reader, tag).await,
            Command::Compress(mechanism) => {
                Ok(self.compress(reader, tag, &mechanism).await)
            },
            Command::Idle => self.idle(reader, tag).await,
            cmd => {
                error!(
                    "{} {} routed to the session but not handled there",
                    self.processor.log_prefix(),
                    cmd.name()
                );
                Ok(self
                    .tagged(
                        tag,
                        s::Response::cond(
                            s::RespCondType::No,
                            Some(s::RespTextCode::Unavailable),
                            "Internal server error",
                        ),
                    )
                    .await)
            },
        }
    }

    async fn append(
        &mut self,
        reader: &mut Reader,
        append: AppendStart,
        size: u32,
        literal_plus: bool,
    ) -> Result<Next, Error> {
        let target = match self.processor.check_append() {
            Ok(()) => self.processor.append_start(&append.mailbox, size).await,
            Err(response) => Err(response),
        };

        let target = match target {
            Ok(target) => target,
            Err(response) => {
                // Without LITERAL+, the client waits for the continuation
                // line, which it will never get; with it, the literal is on
                // its way and must be skipped.
                reader.abort_append(size, literal_plus).await?;
                return Ok(self.tagged(append.tag, response).await);
            },
        };

        if !literal_plus {
            send_event(
                &self.sender,
                OutputEvent::ContinuationLine {
                    prompt: "Ready for literal data",
                },
            )
            .await;
        }

        let mut body = Vec::with_capacity(size as usize);
        let nread = tokio::time::timeout(
            self.read_timeout,
            reader.read_append_literal(size).read_to_end(&mut body),
        )
        .await
        .map_err(|_| {
            io::Error::new(io::ErrorKind::TimedOut, "Timed out reading literal")
        })??;
        if nread != size as usize {
            return Err(Error::Io(io::ErrorKind::UnexpectedEof.into()));
        }

        let response = match reader.continue_append().await? {
            AppendContinuation::Done => {
                self.processor
                    .append_finish(
                        target,
                        append.flags,
                        append.date,
                        body,
                        &self.sender,
                    )
                    .await
            },
            AppendContinuation::SyntaxError => s::Response::cond(
                s::RespCondType::Bad,
                Some(s::RespTextCode::Parse),
                "Unexpected data after APPEND literal",
            ),
            AppendContinuation::TooLong => {
                s::Response::bad("Command line too long")
            },
        };

        Ok(self.tagged(append.tag, response).await)
    }

    async fn authenticate(
        &mut self,
        reader: &mut Reader,
        tag: String,
        mechanism: &str,
        initial: Option<String>,
    ) -> Result<Next, Error> {
        let mut exchange = match self.processor.authenticate_start(mechanism) {
            Ok(exchange) => exchange,
            Err(response) => return Ok(self.tagged(tag, response).await),
        };

        let mut step = exchange.start(initial.as_deref());
        loop {
            match step {
                SaslStep::Challenge(prompt) => {
                    send_event(
                        &self.sender,
                        OutputEvent::ContinuationLine { prompt },
                    )
                    .await;

                    let line = match tokio::time::timeout(
                        self.read_timeout,
                        reader.read_raw_line(),
                    )
                    .await
                    {
                        Ok(line) => line?,
                        Err(_) => {
                            self.bye("Autologout; idle for too long").await;
                            return Ok(Next::Stop);
                        },
                    };

                    let line = match line {
                        Some(line) => line,
                        None => {
                            self.bye("AUTHENTICATE response too long").await;
                            return Err(Error::Overlong);
                        },
                    };

                    step = exchange.step(&String::from_utf8_lossy(&line));
                },

                SaslStep::Complete(credentials) => {
                    let response = self
                        .processor
                        .authenticate_finish(exchange.mechanism(), credentials)
                        .await;
                    return Ok(self.tagged(tag, response).await);
                },

                SaslStep::Failed(response) => {
                    return Ok(self.tagged(tag, response).await);
                },
            }
        }
    }

    async fn start_tls(
        &mut self,
        reader: &mut Reader,
        tag: String,
    ) -> Result<Next, Error> {
        if let Err(response) = self.processor.start_tls_check() {
            return Ok(self.tagged(tag, response).await);
        }

        let tls = match self.tls.clone() {
            Some(tls) => tls,
            None => {
                return Ok(self
                    .tagged(tag, s::Response::bad("STARTTLS not available"))
                    .await)
            },
        };

        // Anything the client sent after STARTTLS would be interpreted as
        // cleartext and then lost in the handshake.
        if reader.has_pipelined_data() {
            self.bye("Pipelined data after STARTTLS").await;
            return Ok(Next::Stop);
        }

        self.send(
            s::ResponseLine::tagged(
                tag,
                s::Response::ok("Begin TLS negotiation now"),
            ),
            OutputControl::Surrender,
        )
        .await;

        let write = match self.writer.take() {
            Some(writer) => match writer.await {
                Ok(Ok(OutputDisconnect::Surrendered(write))) => write,
                Ok(Ok(_)) => return Ok(Next::Stop),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(e) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::Other,
                        e.to_string(),
                    )))
                },
            },
            None => return Ok(Next::Stop),
        };

        let placeholder = RequestReader::new(tokio::io::split(empty_stream()).0);
        let read = std::mem::replace(reader, placeholder).into_inner();
        let stream = tls.upgrade(read.unsplit(write)).await?;

        *reader = self.attach(stream);
        self.processor.tls_started();
        Ok(Next::Continue)
    }

    async fn compress(
        &mut self,
        reader: &mut Reader,
        tag: String,
        mechanism: &str,
    ) -> Next {
        if let Err(response) = self.processor.compress_check(mechanism) {
            return self.tagged(tag, response).await;
        }

        match reader.start_compression() {
            CompressionStatus::Started => {
                self.processor.compression_started();
                self.send(
                    s::ResponseLine::tagged(
                        tag,
                        s::Response::ok("DEFLATE active"),
                    ),
                    OutputControl::EnableCompression,
                )
                .await;
                Next::Continue
            },

            CompressionStatus::AlreadyActive => {
                self.tagged(
                    tag,
                    s::Response::cond(
                        s::RespCondType::No,
                        Some(s::RespTextCode::CompressionActive),
                        "Compression already active",
                    ),
                )
                .await
            },

            // There is no way to tell whether what follows was meant to be
            // compressed.
            CompressionStatus::InvalidPipelinedData => {
                self.bye("Pipelined data after COMPRESS").await;
                Next::Stop
            },
        }
    }

    async fn idle(
        &mut self,
        reader: &mut Reader,
        tag: String,
    ) -> Result<Next, Error> {
        let mut state = match self.processor.idle_start() {
            Ok(state) => state,
            Err(response) => return Ok(self.tagged(tag, response).await),
        };

        send_event(
            &self.sender,
            OutputEvent::ContinuationLine { prompt: "idling" },
        )
        .await;

        // The DONE line is read on its own task so that waiting for it does
        // not stand in the way of pushing notifications.
        let placeholder = RequestReader::new(tokio::io::split(empty_stream()).0);
        let mut idle_reader = std::mem::replace(reader, placeholder);
        let mut done = tokio::spawn(async move {
            let line = idle_reader.read_raw_line().await;
            (idle_reader, line)
        });

        let outcome = self
            .processor
            .idle_wait(&mut state, &mut done, &self.sender)
            .await;
        self.processor.idle_end(state);

        match outcome {
            IdleOutcome::Done(Ok((idle_reader, line))) => {
                *reader = idle_reader;
                match line? {
                    Some(line) if line.eq_ignore_ascii_case(b"DONE") => Ok(self
                        .tagged(tag, s::Response::ok("IDLE done"))
                        .await),
                    Some(_) => Ok(self
                        .tagged(tag, s::Response::bad("Expected DONE"))
                        .await),
                    None => {
                        self.bye("Line too long").await;
                        Err(Error::Overlong)
                    },
                }
            },

            IdleOutcome::Done(Err(e)) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                e.to_string(),
            ))),

            IdleOutcome::Timeout => {
                done.abort();
                self.bye("IDLE timed out").await;
                Ok(Next::Stop)
            },

            IdleOutcome::Error(response) => {
                done.abort();
                self.send(
                    s::ResponseLine::untagged(response),
                    OutputControl::Disconnect,
                )
                .await;
                Ok(Next::Stop)
            },
        }
    }

    async fn send(&self, line: s::ResponseLine, ctl: OutputControl) {
        send_event(&self.sender, OutputEvent::ResponseLine { line, ctl }).await;
    }

    async fn tagged(&self, tag: String, response: s::Response) -> Next {
        self.send_final(s::ResponseLine::tagged(tag, response)).await
    }

    /// Sends the final response of a command, ending the session if it is a
    /// `BYE`.
    async fn send_final(&self, line: s::ResponseLine) -> Next {
        if Some(s::RespCondType::Bye) == line.response.cond_type() {
            self.send(line, OutputControl::Disconnect).await;
            Next::Stop
        } else {
            self.send(line, OutputControl::Flush).await;
            Next::Continue
        }
    }

    async fn bye(&self, quip: &'static str) {
        self.send(
            s::ResponseLine::untagged(s::Response::bye(quip)),
            OutputControl::Disconnect,
        )
        .await;
    }

    /// Closes the output channel and waits for the writer to drain it.
    async fn finish(&mut self) -> Result<(), Error> {
        let (closed, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.sender, closed));

        match self.writer.take() {
            Some(writer) => match writer.await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(e) => Err(Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    e.to_string(),
                ))),
            },
            None => Ok(()),
        }
    }
}

async fn send_event(sender: &SendResponse, event: OutputEvent) {
    let _ = sender.send(event).await;
}

/// A stream with nothing in it, standing in for the real one while it is
/// elsewhere.
fn empty_stream() -> BoxStream {
    Box::new(tokio::io::duplex(1).0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connection_slots_are_bounded_and_released() {
        let active = Arc::new(AtomicUsize::new(0));
        let a = ConnectionSlot::acquire(&active, 2);
        let b = ConnectionSlot::acquire(&active, 2);
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(ConnectionSlot::acquire(&active, 2).is_none());
        assert_eq!(2, active.load(Ordering::SeqCst));

        drop(a);
        assert_eq!(1, active.load(Ordering::SeqCst));
        assert!(ConnectionSlot::acquire(&active, 2).is_some());
        assert_eq!(1, active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn busy_connections_get_bye() {
        let (client, server) = tokio::io::duplex(1024);
        reject_busy(Box::new(server)).await.unwrap();

        let mut client = client;
        let mut text = String::new();
        client.read_to_string(&mut text).await.unwrap();
        assert_eq!("* BYE Server busy, try again later\r\n", text);
    }
}

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

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream,
    ReadHalf, WriteHalf,
};

use crate::account::directory::Directory;
use crate::account::model::*;
use crate::account::token::StaticTokens;
use crate::imap::command_processor::Services;
use crate::imap::server::{BoxStream, Server, TlsUpgrader};
use crate::notify::NotifyHub;
use crate::support::error::Error;
use crate::support::metrics::Counters;
use crate::support::system_config::SystemConfig;

pub const USER: &str = "azure@example.com";
pub const PASSWORD: &str = "hunter2";
pub const ADMIN: &str = "root@example.com";

/// How long a test waits for the server before giving up.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `fut`, failing the test instead of hanging if the server never
/// answers.
pub async fn within<F: Future>(what: &str, fut: F) -> F::Output {
    match tokio::time::timeout(RESPONSE_TIMEOUT, fut).await {
        Ok(output) => output,
        Err(_) => panic!("Timed out waiting for {}", what),
    }
}

pub struct Setup {
    pub server: Arc<Server>,
    pub directory: Arc<Directory>,
    pub metrics: Arc<Counters>,
    pub user: User,
    pub mailbox: Mailbox,
}

pub fn set_up() -> Setup {
    set_up_with(SystemConfig::default(), None)
}

/// Builds a server over a fresh directory holding one ordinary user and one
/// administrator in the same organisation.
pub fn set_up_with(
    config: SystemConfig,
    tls: Option<Arc<dyn TlsUpgrader>>,
) -> Setup {
    crate::init_test_log();

    let directory = Arc::new(Directory::new());
    directory.add_organization("org", "Example");
    let user = directory
        .add_user("org", USER, PASSWORD, Role::Member)
        .unwrap();
    let mailbox = directory.add_mailbox(&user.id, USER, true);
    let admin = directory
        .add_user("org", ADMIN, PASSWORD, Role::Admin)
        .unwrap();
    directory.add_mailbox(&admin.id, ADMIN, true);

    let metrics = Arc::new(Counters::new());
    let config = Arc::new(config);
    let services = Services {
        hub: NotifyHub::new(config.notify.clone(), metrics.clone()),
        config,
        repo: directory.clone(),
        tokens: Arc::new(StaticTokens::default()),
        metrics: metrics.clone(),
    };

    Setup {
        server: Server::new(services, tls),
        directory,
        metrics,
        user,
        mailbox,
    }
}

impl Setup {
    /// Opens a connection to a fresh session, served on its own task.
    pub fn connect(&self, name: &str) -> TestClient {
        let (client, server) = tokio::io::duplex(65536);
        let srv = Arc::clone(&self.server);
        let peer = name.to_owned();
        tokio::spawn(async move {
            srv.serve(Box::new(server), peer, false).await;
        });

        let (read, write) = tokio::io::split(client);
        TestClient {
            reader: BufReader::new(read),
            writer: write,
            next_tag: 1,
        }
    }
}

/// A minimal line-oriented client.
pub struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    next_tag: u32,
}

impl TestClient {
    pub async fn write_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Reads one response line, including the text of any literals it
    /// contains, with the final CRLF. Returns an empty string at EOF.
    pub async fn read_line(&mut self) -> String {
        let mut line = Vec::new();
        loop {
            let start = line.len();
            within("a response line", self.reader.read_until(b'\n', &mut line))
                .await
                .unwrap();
            if line.len() == start {
                break;
            }

            match literal_length(&line) {
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    within("a literal", self.reader.read_exact(&mut literal))
                        .await
                        .unwrap();
                    line.extend_from_slice(&literal);
                },
                None => break,
            }
        }

        String::from_utf8(line).unwrap()
    }

    /// Sends `command` with a fresh tag and collects every line up to and
    /// including the tagged response.
    pub async fn command(&mut self, command: &str) -> Vec<String> {
        let tag = format!("T{}", self.next_tag);
        self.next_tag += 1;
        self.write_raw(format!("{} {}\r\n", tag, command).as_bytes())
            .await;
        self.responses_until(&tag).await
    }

    pub async fn responses_until(&mut self, tag: &str) -> Vec<String> {
        let prefix = format!("{} ", tag);
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            assert!(!line.is_empty(), "EOF waiting for {}: {:?}", tag, lines);
            let done = line.starts_with(&prefix);
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    /// Reads lines until one matches `pat`, returning the lines read.
    pub async fn read_until_like(&mut self, pat: &str) -> Vec<String> {
        let re = Regex::new(pat).unwrap();
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            assert!(!line.is_empty(), "EOF waiting for {}: {:?}", pat, lines);
            let done = re.is_match(&line);
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    pub async fn skip_greeting(&mut self) {
        receive_line_like(self, r"^\* OK \[CAPABILITY ").await;
    }

    pub async fn log_in(&mut self) {
        self.log_in_as(USER).await;
    }

    pub async fn log_in_as(&mut self, user: &str) {
        self.skip_greeting().await;
        let responses = self
            .command(&format!("LOGIN {} {}", user, PASSWORD))
            .await;
        assert_tagged_ok(&responses);
    }

    pub async fn ok(&mut self, command: &str) -> Vec<String> {
        let responses = self.command(command).await;
        assert_tagged_ok(&responses);
        responses
    }

    pub async fn select(&mut self, mailbox: &str) -> Vec<String> {
        self.ok(&format!("SELECT {}", mailbox)).await
    }

    /// Appends a small message with the given subject, using LITERAL+.
    pub async fn append(&mut self, mailbox: &str, subject: &str) -> Vec<String> {
        let message = make_message(subject, "Hello world\r\n");
        let mut data = format!(
            "A1 APPEND {} {{{}+}}\r\n",
            mailbox,
            message.len()
        )
        .into_bytes();
        data.extend_from_slice(message.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.write_raw(&data).await;

        let responses = self.responses_until("A1").await;
        assert_tagged_ok(&responses);
        responses
    }
}

pub fn make_message(subject: &str, body: &str) -> String {
    format!(
        "From: Someone <someone@example.net>\r\n\
         To: {}\r\n\
         Subject: {}\r\n\
         Date: Tue, 13 Oct 2026 10:00:00 +0000\r\n\
         Message-ID: <{}@example.net>\r\n\
         \r\n\
         {}",
        USER,
        subject,
        subject.replace(' ', "."),
        body
    )
}

fn literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let open = line.iter().rposition(|&b| b'{' == b)?;
    std::str::from_utf8(&line[open + 1..]).ok()?.parse().ok()
}

pub async fn receive_line_like(client: &mut TestClient, pat: &str) {
    let line = client.read_line().await;
    assert!(
        Regex::new(pat).unwrap().is_match(&line),
        "Expected\n\
         match: {:?}\n\
         Got:   {:?}\n",
        pat,
        line
    );
}

/// Asserts that some line in `lines` matches `pat`.
pub fn assert_has_line(lines: &[String], pat: &str) {
    let re = Regex::new(pat).unwrap();
    assert!(
        lines.iter().any(|l| re.is_match(l)),
        "Expected a line matching {:?} in {:?}",
        pat,
        lines
    );
}

pub fn assert_no_line(lines: &[String], pat: &str) {
    let re = Regex::new(pat).unwrap();
    assert!(
        !lines.iter().any(|l| re.is_match(l)),
        "Unexpected line matching {:?} in {:?}",
        pat,
        lines
    );
}

fn assert_tagged(lines: &[String], cond: &str) {
    let last = lines.last().map(String::as_str).unwrap_or("");
    let re = Regex::new(&format!(r"^T?[A-Za-z0-9]+ {} ", cond)).unwrap();
    assert!(
        re.is_match(last),
        "Expected tagged {}, got {:?}",
        cond,
        lines
    );
}

pub fn assert_tagged_ok(lines: &[String]) {
    assert_tagged(lines, "OK");
}

pub fn assert_tagged_no(lines: &[String]) {
    assert_tagged(lines, "NO");
}

pub fn assert_tagged_bad(lines: &[String]) {
    assert_tagged(lines, "BAD");
}

/// A "TLS" that leaves the stream as it is, so `STARTTLS` can be exercised
/// without certificates.
pub struct PassThroughTls;

#[async_trait::async_trait]
impl TlsUpgrader for PassThroughTls {
    async fn upgrade(&self, stream: BoxStream) -> Result<BoxStream, Error> {
        Ok(stream)
    }
}

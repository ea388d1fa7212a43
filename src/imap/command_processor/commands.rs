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

use std::borrow::Cow;

use log::info;

use super::defs::*;

impl CommandProcessor {
    /// Return the greeting line to send to the client.
    pub fn greet(&self) -> s::ResponseLine {
        s::ResponseLine::untagged(s::Response::cond(
            s::RespCondType::Ok,
            Some(s::RespTextCode::Capability(self.capabilities())),
            format!("{} ready", self.config.server.server_name),
        ))
    }

    pub(super) async fn cmd_capability(
        &mut self,
        sender: &SendResponse,
    ) -> CmdResult {
        send_response(sender, s::Response::Capability(self.capabilities()))
            .await;
        success("CAPABILITY completed")
    }

    pub(super) async fn cmd_noop(
        &mut self,
        quip: &'static str,
        _sender: &SendResponse,
    ) -> CmdResult {
        // Nothing to do here; shared command processing takes care of the
        // actual poll operation.
        success(quip)
    }

    pub(super) async fn cmd_logout(
        &mut self,
        sender: &SendResponse,
    ) -> CmdResult {
        // LOGOUT is a bit weird because RFC 3501 requires sending an OK
        // response *AFTER* the BYE, so the BYE must not end the connection.
        send_event(
            sender,
            OutputEvent::ResponseLine {
                line: s::ResponseLine::untagged(s::Response::bye(format!(
                    "{} logging out",
                    self.config.server.server_name
                ))),
                ctl: OutputControl::Buffer,
            },
        )
        .await;

        self.deselect();
        self.identity = None;
        self.logged_out = true;
        success("LOGOUT completed")
    }

    pub(super) async fn cmd_id(
        &mut self,
        params: Vec<(String, Option<String>)>,
        sender: &SendResponse,
    ) -> CmdResult {
        // Only take action on the first ID exchange so we don't keep
        // rewriting the log prefix.
        if !self.id_exchanged {
            let mut name = None;
            let mut version = None;
            let mut message = String::new();

            for (key, value) in &params {
                let value = match *value {
                    Some(ref v) => v,
                    None => continue,
                };

                if key.eq_ignore_ascii_case("name") {
                    name = Some(value.clone());
                } else if key.eq_ignore_ascii_case("version") {
                    version = Some(value.clone());
                }

                message.push_str(&format!(" {:?} = {:?};", key, value));
            }

            self.log_prefix.set_user_agent(name, version);
            info!(
                "{} ID exchanged; client says it is{}",
                self.log_prefix, message
            );
            self.id_exchanged = true;
        }

        let mut id_info = vec![
            ("name".to_owned(), "Mailvane".to_owned()),
            ("version".to_owned(), env!("CARGO_PKG_VERSION").to_owned()),
        ];

        for (name, value) in &self.config.identification {
            // Silently replace _ with - since it's easy to accidentally use _
            // in the config but _ is never used in these parameters.
            id_info.push((name.replace('_', "-"), value.clone()));
        }

        send_response(sender, s::Response::Id(id_info)).await;
        success("ID completed")
    }

    pub(super) async fn cmd_enable(
        &mut self,
        exts: Vec<String>,
        sender: &SendResponse,
    ) -> CmdResult {
        let mut enabled = Vec::new();
        // Per RFC 5161, we silently ignore any extension which isn't
        // ENABLE-able or known.
        for ext in exts {
            match ext.as_str() {
                "CONDSTORE" if self.config.imap.enable_condstore => {
                    self.condstore_enabled = true;
                    enabled.push(ext);
                },
                "QRESYNC" if self.config.imap.enable_qresync => {
                    // RFC 7162 makes QRESYNC imply CONDSTORE.
                    self.qresync_enabled = true;
                    self.condstore_enabled = true;
                    enabled.push(ext);
                },
                _ => (),
            }
        }

        let quip = if enabled.is_empty() {
            "Nothing enabled"
        } else {
            "ENABLE completed"
        };

        send_response(sender, s::Response::Enabled(enabled)).await;
        success(quip)
    }

    pub(super) async fn cmd_namespace(
        &mut self,
        sender: &SendResponse,
    ) -> CmdResult {
        let response = identity!(self)?.namespace.namespace_response();
        send_response(sender, s::Response::Namespace(response)).await;
        success("NAMESPACE completed")
    }

    /// Checks whether `STARTTLS` may proceed.
    ///
    /// On success, the server sends the tagged `OK`, performs the handshake,
    /// and then calls `tls_started`.
    pub fn start_tls_check(&self) -> PartialResult<()> {
        if self.tls_active {
            Err(s::Response::bad("Already using TLS"))
        } else if !self.tls_offered {
            Err(s::Response::bad("STARTTLS not available"))
        } else {
            Ok(())
        }
    }

    pub fn tls_started(&mut self) {
        self.tls_active = true;
        self.tls_offered = false;
        info!("{} TLS established", self.log_prefix);
    }

    /// Checks whether `COMPRESS` with the given mechanism may proceed.
    pub fn compress_check(&self, mechanism: &str) -> PartialResult<()> {
        if !self.config.imap.enable_compression {
            Err(s::Response::bad("Compression not available"))
        } else if self.compressing {
            Err(s::Response::cond(
                s::RespCondType::No,
                Some(s::RespTextCode::CompressionActive),
                "Compression already active",
            ))
        } else if !mechanism.eq_ignore_ascii_case("DEFLATE") {
            Err(s::Response::bad(Cow::Owned(format!(
                "Unsupported compression mechanism {}",
                mechanism
            ))))
        } else {
            Ok(())
        }
    }

    pub fn compression_started(&mut self) {
        self.compressing = true;
    }
}

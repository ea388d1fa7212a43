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

use std::collections::HashMap;

use super::defs::*;
use crate::account::header;
use crate::imap::syntax::{BodySection, FetchAttr, SectionPart};

impl CommandProcessor {
    pub(super) async fn cmd_fetch(
        &mut self,
        uid: bool,
        set: SequenceSet,
        mut atts: Vec<FetchAttr>,
        changed_since: Option<u64>,
        sender: &SendResponse,
    ) -> CmdResult {
        // UID FETCH always reports the UID, whether asked for or not.
        if uid && !atts.contains(&FetchAttr::Uid) {
            atts.insert(0, FetchAttr::Uid);
        }
        if changed_since.is_some() && !atts.contains(&FetchAttr::Modseq) {
            atts.push(FetchAttr::Modseq);
        }
        if atts.contains(&FetchAttr::Modseq) {
            self.condstore_enabled = true;
        }

        let (folder, read_only, uids) = {
            let selected = selected!(self)?;
            (
                selected.folder.clone(),
                selected.read_only,
                selected.resolve(&set, uid),
            )
        };

        if uids.is_empty() {
            return success("FETCH completed");
        }

        let mut messages = repo!(self, messages(&folder.id))
            .map_err(map_error!(self))?
            .into_iter()
            .map(|m| (m.uid, m))
            .collect::<HashMap<_, _>>();

        let sets_seen = !read_only
            && atts.iter().any(|att| match *att {
                FetchAttr::Section(section) => !section.peek,
                _ => false,
            });

        let mut responses = Vec::with_capacity(uids.len());
        for uid in uids {
            let message = match messages.get_mut(&uid) {
                Some(message) => message,
                // Expunged by another session; it stays in the view until
                // the next poll that may report it.
                None => continue,
            };

            if changed_since.map_or(false, |since| message.modseq <= since) {
                continue;
            }

            let seq = match self.selected.as_ref().and_then(|s| s.seq_of(uid))
            {
                Some(seq) => seq,
                None => continue,
            };

            let mut flags_changed = false;
            if sets_seen && !message.has_flag(&Flag::Seen) {
                match repo!(
                    self,
                    update_flags(&folder.id, uid, FlagOp::Add, &[Flag::Seen])
                ) {
                    Ok((flags, modseq)) => {
                        self.notify(
                            &folder,
                            Event::Flags {
                                seq,
                                uid,
                                flags: flags.iter().map(Flag::to_string).collect(),
                            },
                        );
                        message.flags = flags;
                        message.modseq = modseq;
                        flags_changed = true;
                    },
                    Err(Error::Repository(RepositoryError::NotFound(_))) => {
                        continue
                    },
                    Err(e) => {
                        return Err(catch_all_error_handling(
                            &self.log_prefix,
                            e,
                        ))
                    },
                }
            }

            let mut fetched = atts
                .iter()
                .map(|&att| fetch_att(message, att))
                .collect::<Vec<_>>();
            // RFC 3501 has the server report implicit \Seen changes.
            if flags_changed && !atts.contains(&FetchAttr::Flags) {
                fetched.push(s::FetchAtt::Flags(message.reported_flags()));
            }

            responses.push(s::Response::Fetch(seq, fetched));
        }

        for response in responses {
            send_response(sender, response).await;
        }

        success("FETCH completed")
    }
}

fn fetch_att(message: &Message, att: FetchAttr) -> s::FetchAtt {
    match att {
        FetchAttr::Flags => s::FetchAtt::Flags(message.reported_flags()),
        FetchAttr::Uid => s::FetchAtt::Uid(message.uid),
        FetchAttr::InternalDate => s::FetchAtt::InternalDate(message.received_at),
        FetchAttr::Rfc822Size => s::FetchAtt::Rfc822Size(message.size),
        FetchAttr::Envelope => s::FetchAtt::Envelope(envelope(&message.body)),
        FetchAttr::Body => {
            s::FetchAtt::BodyStructure(body_structure(&message.body, false))
        },
        FetchAttr::BodyStructure => {
            s::FetchAtt::BodyStructure(body_structure(&message.body, true))
        },
        FetchAttr::Modseq => s::FetchAtt::Modseq(message.modseq),
        FetchAttr::Section(section) => section_att(&message.body, section),
    }
}

fn envelope(message: &[u8]) -> s::Envelope {
    let headers = header::parse(message);
    let raw_date = header::fields(message)
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("date"))
        .map(|(_, value)| value);

    let from = header::parse_address_list(&headers.from);
    // RFC 3501: absent Sender and Reply-To default to From.
    let sender = if headers.sender.is_empty() {
        from.clone()
    } else {
        header::parse_address_list(&headers.sender)
    };
    let reply_to = if headers.reply_to.is_empty() {
        from.clone()
    } else {
        header::parse_address_list(&headers.reply_to)
    };

    s::Envelope {
        date: raw_date,
        subject: Some(headers.subject).filter(|s| !s.is_empty()),
        from,
        sender,
        reply_to,
        to: header::parse_address_list(&headers.to),
        cc: header::parse_address_list(&headers.cc),
        bcc: header::parse_address_list(&headers.bcc),
        in_reply_to: headers.in_reply_to,
        message_id: headers.message_id,
    }
}

/// Describes the message as a single part, from its `Content-Type` and
/// `Content-Transfer-Encoding` headers.
fn body_structure(message: &[u8], extended: bool) -> s::BodyStructure {
    let mut content_type = "TEXT".to_owned();
    let mut content_subtype = "PLAIN".to_owned();
    let mut charset = None;
    let mut encoding = "7BIT".to_owned();

    for (name, value) in header::fields(message) {
        if name.eq_ignore_ascii_case("content-type") {
            let mut params = value.split(';');
            if let Some((ty, subty)) =
                params.next().and_then(|t| t.trim().split_once('/'))
            {
                content_type = ty.trim().to_ascii_uppercase();
                content_subtype = subty.trim().to_ascii_uppercase();
            }

            for param in params {
                if let Some((key, value)) = param.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("charset") {
                        charset =
                            Some(value.trim().trim_matches('"').to_owned());
                    }
                }
            }
        } else if name.eq_ignore_ascii_case("content-transfer-encoding") {
            encoding = value.trim().to_ascii_uppercase();
        }
    }

    if "TEXT" == content_type && charset.is_none() {
        charset = Some("US-ASCII".to_owned());
    }

    let body = &message[header::body_offset(message)..];
    let lines = if "TEXT" == content_type {
        Some(memchr::memchr_iter(b'\n', body).count() as u32)
    } else {
        None
    };

    s::BodyStructure {
        content_type,
        content_subtype,
        charset,
        encoding,
        size: body.len() as u32,
        lines,
        extended,
    }
}

fn section_att(message: &[u8], section: BodySection) -> s::FetchAtt {
    let offset = header::body_offset(message);
    let data = match section.part {
        SectionPart::Full => message,
        SectionPart::Header => &message[..offset],
        SectionPart::Text => &message[offset..],
    };

    let (origin, data) = match section.partial {
        None => (None, data),
        Some((origin, length)) => {
            let start = (origin as usize).min(data.len());
            let end = start.saturating_add(length as usize).min(data.len());
            (Some(origin), &data[start..end])
        },
    };

    s::FetchAtt::Section {
        name: section.response_name(),
        origin,
        data: data.to_vec(),
    }
}

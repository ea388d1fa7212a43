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

//! Typed server responses and their wire form.

use std::borrow::Cow;
use std::io::{self, Write};

use chrono::prelude::*;

use super::lex::LexWriter;
use super::sequence::SeqRange;
use super::threading::{self, ThreadNode};
use crate::account::header::Address;
use crate::account::model::Flag;

/// A complete response line, without the trailing CRLF.
#[derive(Clone, Debug)]
pub struct ResponseLine {
    /// `None` for untagged (`*`) responses.
    pub tag: Option<String>,
    pub response: Response,
}

impl ResponseLine {
    pub fn untagged(response: Response) -> Self {
        Self {
            tag: None,
            response,
        }
    }

    pub fn tagged(tag: impl Into<String>, response: Response) -> Self {
        Self {
            tag: Some(tag.into()),
            response,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RespCondType {
    Ok,
    No,
    Bad,
    Bye,
    Preauth,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RespTextCode {
    Alert,
    AlreadyExists,
    AppendUid(u32, u32),
    AuthenticationFailed,
    Cannot,
    Capability(Vec<String>),
    ClientBug,
    CompressionActive,
    /// UID validity, source UIDs, destination UIDs. The two lists pair up
    /// element-wise.
    CopyUid(u32, Vec<u32>, Vec<u32>),
    /// RFC 8457: the mailbox has inferiors.
    HasChildren,
    HighestModseq(u64),
    /// RFC 7162: messages a conditional `STORE` left alone.
    Modified(SeqRange),
    NonExistent,
    NoPerm,
    OverQuota,
    Parse,
    /// The flags, and whether `\*` is included.
    PermanentFlags(Vec<Flag>, bool),
    PrivacyRequired,
    ReadOnly,
    ReadWrite,
    TooBig,
    TryCreate,
    UidNext(u32),
    UidValidity(u32),
    Unavailable,
    Unseen(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CondResponse {
    pub cond: RespCondType,
    pub code: Option<RespTextCode>,
    pub quip: Option<Cow<'static, str>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NamespaceResponse {
    pub personal: Vec<String>,
    pub other: Vec<String>,
    pub shared: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListResponse {
    pub attributes: Vec<Cow<'static, str>>,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusAtt {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
    HighestModseq,
}

impl StatusAtt {
    pub fn name(self) -> &'static str {
        match self {
            StatusAtt::Messages => "MESSAGES",
            StatusAtt::Recent => "RECENT",
            StatusAtt::UidNext => "UIDNEXT",
            StatusAtt::UidValidity => "UIDVALIDITY",
            StatusAtt::Unseen => "UNSEEN",
            StatusAtt::HighestModseq => "HIGHESTMODSEQ",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusResponse {
    pub mailbox: String,
    pub atts: Vec<(StatusAtt, u64)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

/// A single-part body structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BodyStructure {
    pub content_type: String,
    pub content_subtype: String,
    pub charset: Option<String>,
    pub encoding: String,
    pub size: u32,
    /// Only reported for `TEXT` bodies.
    pub lines: Option<u32>,
    pub extended: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchAtt {
    Flags(Vec<Flag>),
    Uid(u32),
    InternalDate(DateTime<FixedOffset>),
    Rfc822Size(u32),
    Envelope(Envelope),
    BodyStructure(BodyStructure),
    Modseq(u64),
    /// A body section. `name` is what precedes the data, e.g. `BODY[TEXT]`
    /// or `RFC822.HEADER`; `origin` is the partial origin, if any.
    Section {
        name: String,
        origin: Option<u32>,
        data: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaResponse {
    pub root: String,
    /// Resource name, usage, limit.
    pub resources: Vec<(&'static str, u64, u64)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Cond(CondResponse),
    Capability(Vec<String>),
    Enabled(Vec<String>),
    Id(Vec<(String, String)>),
    Namespace(NamespaceResponse),
    List(ListResponse),
    Lsub(ListResponse),
    Status(StatusResponse),
    Flags(Vec<Flag>),
    Exists(u32),
    Recent(u32),
    Expunge(u32),
    Vanished(SeqRange),
    Search(Vec<u32>),
    Thread(Vec<ThreadNode>),
    Fetch(u32, Vec<FetchAtt>),
    Quota(QuotaResponse),
    QuotaRoot(String, Vec<String>),
}

impl Response {
    pub fn cond(
        cond: RespCondType,
        code: Option<RespTextCode>,
        quip: impl Into<Cow<'static, str>>,
    ) -> Self {
        Response::Cond(CondResponse {
            cond,
            code,
            quip: Some(quip.into()),
        })
    }

    pub fn ok(quip: impl Into<Cow<'static, str>>) -> Self {
        Self::cond(RespCondType::Ok, None, quip)
    }

    pub fn no(quip: impl Into<Cow<'static, str>>) -> Self {
        Self::cond(RespCondType::No, None, quip)
    }

    pub fn bad(quip: impl Into<Cow<'static, str>>) -> Self {
        Self::cond(RespCondType::Bad, None, quip)
    }

    pub fn bye(quip: impl Into<Cow<'static, str>>) -> Self {
        Self::cond(RespCondType::Bye, None, quip)
    }

    /// The condition of a status response, or `None` for data responses.
    pub fn cond_type(&self) -> Option<RespCondType> {
        match *self {
            Response::Cond(ref c) => Some(c.cond),
            _ => None,
        }
    }
}

impl ResponseLine {
    pub fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        match self.tag {
            Some(ref tag) => w.verbatim(tag)?,
            None => w.verbatim("*")?,
        }
        w.verbatim(" ")?;
        self.response.write_to(w)
    }
}

impl Response {
    pub fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        match *self {
            Response::Cond(ref c) => c.write_to(w),
            Response::Capability(ref caps) => {
                w.verbatim("CAPABILITY")?;
                for cap in caps {
                    w.verbatim(" ")?;
                    w.verbatim(cap)?;
                }
                Ok(())
            },
            Response::Enabled(ref caps) => {
                w.verbatim("ENABLED")?;
                for cap in caps {
                    w.verbatim(" ")?;
                    w.verbatim(cap)?;
                }
                Ok(())
            },
            Response::Id(ref params) => {
                w.verbatim("ID ")?;
                if params.is_empty() {
                    return w.nil();
                }
                w.verbatim("(")?;
                for (ix, &(ref k, ref v)) in params.iter().enumerate() {
                    if ix > 0 {
                        w.verbatim(" ")?;
                    }
                    w.string(k)?;
                    w.verbatim(" ")?;
                    w.string(v)?;
                }
                w.verbatim(")")
            },
            Response::Namespace(ref ns) => {
                w.verbatim("NAMESPACE ")?;
                write_namespace(w, &ns.personal)?;
                w.verbatim(" ")?;
                write_namespace(w, &ns.other)?;
                w.verbatim(" ")?;
                write_namespace(w, &ns.shared)
            },
            Response::List(ref l) => {
                w.verbatim("LIST ")?;
                l.write_to(w)
            },
            Response::Lsub(ref l) => {
                w.verbatim("LSUB ")?;
                l.write_to(w)
            },
            Response::Status(ref s) => {
                w.verbatim("STATUS ")?;
                w.mailbox(&s.mailbox)?;
                w.verbatim(" (")?;
                for (ix, &(att, value)) in s.atts.iter().enumerate() {
                    if ix > 0 {
                        w.verbatim(" ")?;
                    }
                    w.verbatim(att.name())?;
                    w.verbatim(" ")?;
                    w.num_u64(value)?;
                }
                w.verbatim(")")
            },
            Response::Flags(ref flags) => {
                w.verbatim("FLAGS ")?;
                w.flag_list(flags)
            },
            Response::Exists(n) => {
                w.num_u32(n)?;
                w.verbatim(" EXISTS")
            },
            Response::Recent(n) => {
                w.num_u32(n)?;
                w.verbatim(" RECENT")
            },
            Response::Expunge(n) => {
                w.num_u32(n)?;
                w.verbatim(" EXPUNGE")
            },
            Response::Vanished(ref uids) => {
                w.verbatim("VANISHED ")?;
                w.verbatim(&uids.to_string())
            },
            Response::Search(ref ids) => {
                w.verbatim("SEARCH")?;
                for &id in ids {
                    w.verbatim(" ")?;
                    w.num_u32(id)?;
                }
                Ok(())
            },
            Response::Thread(ref forest) => {
                w.verbatim("THREAD")?;
                if !forest.is_empty() {
                    w.verbatim(" ")?;
                    w.verbatim(&threading::format_forest(forest))?;
                }
                Ok(())
            },
            Response::Fetch(seq, ref atts) => {
                w.num_u32(seq)?;
                w.verbatim(" FETCH (")?;
                for (ix, att) in atts.iter().enumerate() {
                    if ix > 0 {
                        w.verbatim(" ")?;
                    }
                    att.write_to(w)?;
                }
                w.verbatim(")")
            },
            Response::Quota(ref q) => {
                w.verbatim("QUOTA ")?;
                w.string(&q.root)?;
                w.verbatim(" (")?;
                for (ix, &(name, usage, limit)) in q.resources.iter().enumerate()
                {
                    if ix > 0 {
                        w.verbatim(" ")?;
                    }
                    write!(w_raw(w), "{} {} {}", name, usage, limit)?;
                }
                w.verbatim(")")
            },
            Response::QuotaRoot(ref mailbox, ref roots) => {
                w.verbatim("QUOTAROOT ")?;
                w.mailbox(mailbox)?;
                for root in roots {
                    w.verbatim(" ")?;
                    w.string(root)?;
                }
                Ok(())
            },
        }
    }
}

/// Adapts a `LexWriter` for `write!`.
fn w_raw<W: Write>(w: &mut LexWriter<W>) -> RawWrite<'_, W> {
    RawWrite(w)
}

struct RawWrite<'a, W>(&'a mut LexWriter<W>);

impl<W: Write> Write for RawWrite<'_, W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.verbatim_bytes(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_namespace<W: Write>(
    w: &mut LexWriter<W>,
    prefixes: &[String],
) -> io::Result<()> {
    if prefixes.is_empty() {
        return w.nil();
    }

    w.verbatim("(")?;
    for prefix in prefixes {
        w.verbatim("(")?;
        w.string(&super::utf7::encode(prefix))?;
        w.verbatim(" \"/\")")?;
    }
    w.verbatim(")")
}

impl CondResponse {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        w.verbatim(match self.cond {
            RespCondType::Ok => "OK",
            RespCondType::No => "NO",
            RespCondType::Bad => "BAD",
            RespCondType::Bye => "BYE",
            RespCondType::Preauth => "PREAUTH",
        })?;

        if let Some(ref code) = self.code {
            w.verbatim(" [")?;
            code.write_to(w)?;
            w.verbatim("]")?;
        }

        if let Some(ref quip) = self.quip {
            w.verbatim(" ")?;
            // Quips are free text; strip anything that would break framing.
            let clean = quip.replace(|c: char| '\r' == c || '\n' == c, " ");
            w.verbatim(&clean)?;
        }

        Ok(())
    }
}

impl RespTextCode {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        match *self {
            RespTextCode::Alert => w.verbatim("ALERT"),
            RespTextCode::AlreadyExists => w.verbatim("ALREADYEXISTS"),
            RespTextCode::AppendUid(validity, uid) => {
                write!(w_raw(w), "APPENDUID {} {}", validity, uid)
            },
            RespTextCode::AuthenticationFailed => {
                w.verbatim("AUTHENTICATIONFAILED")
            },
            RespTextCode::Cannot => w.verbatim("CANNOT"),
            RespTextCode::Capability(ref caps) => {
                w.verbatim("CAPABILITY")?;
                for cap in caps {
                    w.verbatim(" ")?;
                    w.verbatim(cap)?;
                }
                Ok(())
            },
            RespTextCode::ClientBug => w.verbatim("CLIENTBUG"),
            RespTextCode::CompressionActive => {
                w.verbatim("COMPRESSIONACTIVE")
            },
            RespTextCode::CopyUid(validity, ref src, ref dst) => {
                write!(
                    w_raw(w),
                    "COPYUID {} {} {}",
                    validity,
                    compact_uid_list(src),
                    compact_uid_list(dst)
                )
            },
            RespTextCode::HasChildren => w.verbatim("HASCHILDREN"),
            RespTextCode::HighestModseq(modseq) => {
                write!(w_raw(w), "HIGHESTMODSEQ {}", modseq)
            },
            RespTextCode::Modified(ref set) => {
                write!(w_raw(w), "MODIFIED {}", set)
            },
            RespTextCode::NonExistent => w.verbatim("NONEXISTENT"),
            RespTextCode::NoPerm => w.verbatim("NOPERM"),
            RespTextCode::OverQuota => w.verbatim("OVERQUOTA"),
            RespTextCode::Parse => w.verbatim("PARSE"),
            RespTextCode::PermanentFlags(ref flags, any_keyword) => {
                w.verbatim("PERMANENTFLAGS (")?;
                for (ix, flag) in flags.iter().enumerate() {
                    if ix > 0 {
                        w.verbatim(" ")?;
                    }
                    w.flag(flag)?;
                }
                if any_keyword {
                    if !flags.is_empty() {
                        w.verbatim(" ")?;
                    }
                    w.verbatim("\\*")?;
                }
                w.verbatim(")")
            },
            RespTextCode::PrivacyRequired => w.verbatim("PRIVACYREQUIRED"),
            RespTextCode::ReadOnly => w.verbatim("READ-ONLY"),
            RespTextCode::ReadWrite => w.verbatim("READ-WRITE"),
            RespTextCode::TooBig => w.verbatim("TOOBIG"),
            RespTextCode::TryCreate => w.verbatim("TRYCREATE"),
            RespTextCode::UidNext(uid) => write!(w_raw(w), "UIDNEXT {}", uid),
            RespTextCode::UidValidity(v) => {
                write!(w_raw(w), "UIDVALIDITY {}", v)
            },
            RespTextCode::Unavailable => w.verbatim("UNAVAILABLE"),
            RespTextCode::Unseen(seq) => write!(w_raw(w), "UNSEEN {}", seq),
        }
    }
}

/// Formats a UID list, collapsing ascending runs into ranges but otherwise
/// keeping the given order so that paired lists stay aligned.
fn compact_uid_list(uids: &[u32]) -> String {
    let mut out = String::new();
    let mut ix = 0;
    while ix < uids.len() {
        let start = uids[ix];
        let mut end_ix = ix;
        while end_ix + 1 < uids.len() && uids[end_ix + 1] == uids[end_ix] + 1 {
            end_ix += 1;
        }

        if !out.is_empty() {
            out.push(',');
        }
        if end_ix == ix {
            out.push_str(&start.to_string());
        } else {
            out.push_str(&format!("{}:{}", start, uids[end_ix]));
        }
        ix = end_ix + 1;
    }
    out
}

impl ListResponse {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        w.verbatim("(")?;
        for (ix, att) in self.attributes.iter().enumerate() {
            if ix > 0 {
                w.verbatim(" ")?;
            }
            w.verbatim(att)?;
        }
        w.verbatim(") \"/\" ")?;
        if self.name.is_empty() {
            w.verbatim("\"\"")
        } else {
            w.mailbox(&self.name)
        }
    }
}

fn write_addresses<W: Write>(
    w: &mut LexWriter<W>,
    addresses: &[Address],
) -> io::Result<()> {
    if addresses.is_empty() {
        return w.nil();
    }

    w.verbatim("(")?;
    for addr in addresses {
        w.verbatim("(")?;
        w.nstring(addr.name.as_deref())?;
        w.verbatim(" NIL ")?;
        w.string(&addr.local)?;
        w.verbatim(" ")?;
        w.string(&addr.domain)?;
        w.verbatim(")")?;
    }
    w.verbatim(")")
}

impl FetchAtt {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        match *self {
            FetchAtt::Flags(ref flags) => {
                w.verbatim("FLAGS ")?;
                w.flag_list(flags)
            },
            FetchAtt::Uid(uid) => {
                w.verbatim("UID ")?;
                w.num_u32(uid)
            },
            FetchAtt::InternalDate(ref dt) => {
                w.verbatim("INTERNALDATE ")?;
                w.datetime(dt)
            },
            FetchAtt::Rfc822Size(size) => {
                w.verbatim("RFC822.SIZE ")?;
                w.num_u32(size)
            },
            FetchAtt::Envelope(ref env) => {
                w.verbatim("ENVELOPE (")?;
                w.nstring(env.date.as_deref())?;
                w.verbatim(" ")?;
                w.nstring(env.subject.as_deref())?;
                for list in [
                    &env.from,
                    &env.sender,
                    &env.reply_to,
                    &env.to,
                    &env.cc,
                    &env.bcc,
                ] {
                    w.verbatim(" ")?;
                    write_addresses(w, list)?;
                }
                w.verbatim(" ")?;
                w.nstring(env.in_reply_to.as_deref())?;
                w.verbatim(" ")?;
                w.nstring(env.message_id.as_deref())?;
                w.verbatim(")")
            },
            FetchAtt::BodyStructure(ref bs) => {
                w.verbatim(if bs.extended {
                    "BODYSTRUCTURE ("
                } else {
                    "BODY ("
                })?;
                w.string(&bs.content_type)?;
                w.verbatim(" ")?;
                w.string(&bs.content_subtype)?;
                w.verbatim(" ")?;
                match bs.charset {
                    Some(ref charset) => {
                        w.verbatim("(\"CHARSET\" ")?;
                        w.string(charset)?;
                        w.verbatim(")")?;
                    },
                    None => w.nil()?,
                }
                w.verbatim(" NIL NIL ")?;
                w.string(&bs.encoding)?;
                w.verbatim(" ")?;
                w.num_u32(bs.size)?;
                if let Some(lines) = bs.lines {
                    w.verbatim(" ")?;
                    w.num_u32(lines)?;
                }
                w.verbatim(")")
            },
            FetchAtt::Modseq(modseq) => {
                w.verbatim("MODSEQ (")?;
                w.num_u64(modseq)?;
                w.verbatim(")")
            },
            FetchAtt::Section {
                ref name,
                origin,
                ref data,
            } => {
                w.verbatim(name)?;
                if let Some(origin) = origin {
                    write!(w_raw(w), "<{}>", origin)?;
                }
                w.verbatim(" ")?;
                w.literal(data)
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn render(line: ResponseLine) -> String {
        let mut w = LexWriter::new(Vec::<u8>::new());
        line.write_to(&mut w).unwrap();
        String::from_utf8(w.into_inner()).unwrap()
    }

    #[test]
    fn cond_responses() {
        assert_eq!(
            "A1 OK [READ-WRITE] SELECT completed",
            render(ResponseLine::tagged(
                "A1",
                Response::cond(
                    RespCondType::Ok,
                    Some(RespTextCode::ReadWrite),
                    "SELECT completed"
                )
            ))
        );
        assert_eq!(
            "* OK [PERMANENTFLAGS (\\Seen \\Deleted \\*)] Limited",
            render(ResponseLine::untagged(Response::cond(
                RespCondType::Ok,
                Some(RespTextCode::PermanentFlags(
                    vec![Flag::Seen, Flag::Deleted],
                    true
                )),
                "Limited"
            )))
        );
        assert_eq!(
            "a OK [COPYUID 7 3:5,1 10:13] Done",
            render(ResponseLine::tagged(
                "a",
                Response::cond(
                    RespCondType::Ok,
                    Some(RespTextCode::CopyUid(
                        7,
                        vec![3, 4, 5, 1],
                        vec![10, 11, 12, 13]
                    )),
                    "Done"
                )
            ))
        );
        assert_eq!(
            "* BYE bad\u{20}\u{20}news",
            render(ResponseLine::untagged(Response::bye("bad\r\nnews")))
        );
    }

    #[test]
    fn data_responses() {
        assert_eq!(
            "* NAMESPACE ((\"\" \"/\")) ((\"example.org/\" \"/\")) NIL",
            render(ResponseLine::untagged(Response::Namespace(
                NamespaceResponse {
                    personal: vec![String::new()],
                    other: vec!["example.org/".to_owned()],
                    shared: vec![],
                }
            )))
        );
        assert_eq!(
            "* LIST (\\HasNoChildren \\Sent) \"/\" \"Sent Items\"",
            render(ResponseLine::untagged(Response::List(ListResponse {
                attributes: vec!["\\HasNoChildren".into(), "\\Sent".into()],
                name: "Sent Items".to_owned(),
            })))
        );
        assert_eq!(
            "* LIST (\\Noselect) \"/\" \"\"",
            render(ResponseLine::untagged(Response::List(ListResponse {
                attributes: vec!["\\Noselect".into()],
                name: String::new(),
            })))
        );
        assert_eq!(
            "* STATUS INBOX (MESSAGES 3 UIDNEXT 4)",
            render(ResponseLine::untagged(Response::Status(StatusResponse {
                mailbox: "INBOX".to_owned(),
                atts: vec![(StatusAtt::Messages, 3), (StatusAtt::UidNext, 4)],
            })))
        );
        assert_eq!(
            "* QUOTA \"example.com\" (STORAGE 10 1024 MESSAGE 3 100)",
            render(ResponseLine::untagged(Response::Quota(QuotaResponse {
                root: "example.com".to_owned(),
                resources: vec![("STORAGE", 10, 1024), ("MESSAGE", 3, 100)],
            })))
        );
        assert_eq!(
            "* ID (\"name\" \"Mailvane\")",
            render(ResponseLine::untagged(Response::Id(vec![(
                "name".to_owned(),
                "Mailvane".to_owned()
            )])))
        );
        assert_eq!(
            "* SEARCH 2 4",
            render(ResponseLine::untagged(Response::Search(vec![2, 4])))
        );
        assert_eq!(
            "* VANISHED 3:4,9",
            render(ResponseLine::untagged(Response::Vanished(
                [3, 4, 9].iter().copied().collect()
            )))
        );
    }

    #[test]
    fn fetch_response() {
        assert_eq!(
            "* 2 FETCH (UID 7 FLAGS (\\Seen) BODY[TEXT]<0> {5}\r\nhello \
             MODSEQ (12))",
            render(ResponseLine::untagged(Response::Fetch(
                2,
                vec![
                    FetchAtt::Uid(7),
                    FetchAtt::Flags(vec![Flag::Seen]),
                    FetchAtt::Section {
                        name: "BODY[TEXT]".to_owned(),
                        origin: Some(0),
                        data: b"hello".to_vec(),
                    },
                    FetchAtt::Modseq(12),
                ]
            )))
        );

        assert_eq!(
            "* 1 FETCH (ENVELOPE (NIL \"Hi\" ((\"Jane\" NIL \"jane\" \
             \"example.com\")) NIL NIL NIL NIL NIL NIL \"<a@b>\"))",
            render(ResponseLine::untagged(Response::Fetch(
                1,
                vec![FetchAtt::Envelope(Envelope {
                    subject: Some("Hi".to_owned()),
                    from: vec![Address {
                        name: Some("Jane".to_owned()),
                        local: "jane".to_owned(),
                        domain: "example.com".to_owned(),
                    }],
                    message_id: Some("<a@b>".to_owned()),
                    ..Envelope::default()
                })]
            )))
        );
    }
}

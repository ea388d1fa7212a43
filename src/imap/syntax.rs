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

//! Parsing of client command lines into the closed `Command` model.
//!
//! Parsing happens after the request reader has assembled the full command
//! line, including the contents of any non-`APPEND` literals, so the parsers
//! here see `{5}\r\nplugh` inline and consume it as a string.
//!
//! `APPEND` is not handled here in full. `parse_append_start` recognises the
//! part of the command before the message literal; the literal itself is
//! streamed by the request reader.
//!
//! All results are owned so that they can outlive the reader's buffer.

use std::str;

use chrono::prelude::*;
use nom::{
    branch::alt,
    bytes::complete::{is_a, is_not, tag, tag_no_case, take, take_while1,
                      take_while_m_n},
    character::complete::digit1,
    combinator::{all_consuming, map, map_opt, opt, value},
    multi::{fold_many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use super::response::StatusAtt;
use super::sequence::SequenceSet;
use super::threading::ThreadAlgorithm;
use super::utf7;
use crate::account::model::{Flag, FlagOp};

/// Maximum nesting of parenthesised search keys.
const MAX_SEARCH_DEPTH: u32 = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub tag: String,
    pub cmd: Command,
}

/// Every command the server understands.
///
/// `UID`-prefixed variants of message-set commands are carried as the same
/// variant with `uid: true`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Capability,
    Noop,
    Logout,
    StartTls,
    Login {
        user: String,
        password: String,
    },
    Authenticate {
        mechanism: String,
        initial: Option<String>,
    },
    Id(Vec<(String, Option<String>)>),
    Enable(Vec<String>),
    Compress(String),
    Namespace,
    Select {
        mailbox: String,
        condstore: bool,
    },
    Examine {
        mailbox: String,
        condstore: bool,
    },
    Create(String),
    Delete(String),
    Rename {
        src: String,
        dst: String,
    },
    Subscribe(String),
    Unsubscribe(String),
    List(ListCommand),
    Lsub {
        reference: String,
        pattern: String,
    },
    Status {
        mailbox: String,
        atts: Vec<StatusAtt>,
    },
    GetQuota(String),
    GetQuotaRoot(String),
    SetQuota {
        root: String,
        limits: Vec<(String, u64)>,
    },
    Check,
    Close,
    Unselect,
    Idle,
    Expunge {
        uid: bool,
        /// Only present for `UID EXPUNGE`.
        set: Option<SequenceSet>,
    },
    Search {
        uid: bool,
        charset: Option<String>,
        criteria: SearchKey,
    },
    Fetch {
        uid: bool,
        set: SequenceSet,
        atts: Vec<FetchAttr>,
        changed_since: Option<u64>,
    },
    Store {
        uid: bool,
        set: SequenceSet,
        op: FlagOp,
        silent: bool,
        flags: Vec<Flag>,
        unchanged_since: Option<u64>,
    },
    Copy {
        uid: bool,
        set: SequenceSet,
        dst: String,
    },
    Move {
        uid: bool,
        set: SequenceSet,
        dst: String,
    },
    Thread {
        uid: bool,
        algorithm: ThreadAlgorithm,
        charset: String,
        criteria: SearchKey,
    },
}

impl Command {
    /// The canonical name of the command, e.g. `UID FETCH`.
    pub fn name(&self) -> &'static str {
        macro_rules! uid {
            ($uid:expr, $plain:expr) => {
                if $uid {
                    concat!("UID ", $plain)
                } else {
                    $plain
                }
            };
        }

        match *self {
            Command::Capability => "CAPABILITY",
            Command::Noop => "NOOP",
            Command::Logout => "LOGOUT",
            Command::StartTls => "STARTTLS",
            Command::Login { .. } => "LOGIN",
            Command::Authenticate { .. } => "AUTHENTICATE",
            Command::Id(..) => "ID",
            Command::Enable(..) => "ENABLE",
            Command::Compress(..) => "COMPRESS",
            Command::Namespace => "NAMESPACE",
            Command::Select { .. } => "SELECT",
            Command::Examine { .. } => "EXAMINE",
            Command::Create(..) => "CREATE",
            Command::Delete(..) => "DELETE",
            Command::Rename { .. } => "RENAME",
            Command::Subscribe(..) => "SUBSCRIBE",
            Command::Unsubscribe(..) => "UNSUBSCRIBE",
            Command::List(..) => "LIST",
            Command::Lsub { .. } => "LSUB",
            Command::Status { .. } => "STATUS",
            Command::GetQuota(..) => "GETQUOTA",
            Command::GetQuotaRoot(..) => "GETQUOTAROOT",
            Command::SetQuota { .. } => "SETQUOTA",
            Command::Check => "CHECK",
            Command::Close => "CLOSE",
            Command::Unselect => "UNSELECT",
            Command::Idle => "IDLE",
            Command::Expunge { uid, .. } => uid!(uid, "EXPUNGE"),
            Command::Search { uid, .. } => uid!(uid, "SEARCH"),
            Command::Fetch { uid, .. } => uid!(uid, "FETCH"),
            Command::Store { uid, .. } => uid!(uid, "STORE"),
            Command::Copy { uid, .. } => uid!(uid, "COPY"),
            Command::Move { uid, .. } => uid!(uid, "MOVE"),
            Command::Thread { uid, .. } => uid!(uid, "THREAD"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ListCommand {
    pub select_subscribed: bool,
    pub select_special_use: bool,
    pub reference: String,
    pub patterns: Vec<String>,
    pub return_subscribed: bool,
    pub return_children: bool,
    pub return_special_use: bool,
    pub return_status: Option<Vec<StatusAtt>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchKey {
    All,
    Answered,
    Unanswered,
    Deleted,
    Undeleted,
    Draft,
    Undraft,
    Flagged,
    Unflagged,
    Seen,
    Unseen,
    Recent,
    New,
    Old,
    Keyword(Flag),
    Unkeyword(Flag),
    Subject(String),
    From(String),
    To(String),
    Cc(String),
    Body(String),
    Text(String),
    Larger(u32),
    Smaller(u32),
    Before(NaiveDate),
    On(NaiveDate),
    Since(NaiveDate),
    Modseq(u64),
    Uid(SequenceSet),
    Seq(SequenceSet),
    Not(Box<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    And(Vec<SearchKey>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionPart {
    Full,
    Header,
    Text,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BodySection {
    pub part: SectionPart,
    pub peek: bool,
    /// `<origin.length>`
    pub partial: Option<(u32, u32)>,
    /// Requested through the `RFC822*` names.
    pub rfc822: bool,
}

impl BodySection {
    /// The name under which the section is returned in `FETCH` responses.
    pub fn response_name(&self) -> String {
        if self.rfc822 {
            return match self.part {
                SectionPart::Full => "RFC822",
                SectionPart::Header => "RFC822.HEADER",
                SectionPart::Text => "RFC822.TEXT",
            }
            .to_owned();
        }

        match self.part {
            SectionPart::Full => "BODY[]",
            SectionPart::Header => "BODY[HEADER]",
            SectionPart::Text => "BODY[TEXT]",
        }
        .to_owned()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchAttr {
    Flags,
    Uid,
    InternalDate,
    Rfc822Size,
    Envelope,
    /// `BODY` without a section: the non-extensible body structure.
    Body,
    BodyStructure,
    Modseq,
    Section(BodySection),
}

/// The part of an `APPEND` command preceding the message literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendStart {
    pub tag: String,
    pub mailbox: String,
    pub flags: Vec<Flag>,
    pub date: Option<DateTime<FixedOffset>>,
}

/// The result of trying to parse a complete command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedLine {
    Command(CommandLine),
    /// The tag could be read but the command name is not known.
    Unknown(String),
    /// The command is known but its arguments are malformed.
    Bad(String),
    /// Not even a tag could be found.
    Incomprehensible,
}

pub fn parse_command_line(line: &[u8]) -> ParsedLine {
    let (rest, cmd_tag) = match tag_prefix(line) {
        Ok(r) => r,
        Err(_) => return ParsedLine::Incomprehensible,
    };

    let (args, name) = match command_name(rest) {
        Ok(r) => r,
        Err(_) => return ParsedLine::Unknown(cmd_tag),
    };
    let name = name.to_ascii_uppercase();

    let parsed = if "UID" == name {
        let (args, sub) = match preceded(tag(" "), command_name)(args) {
            Ok(r) => r,
            Err(_) => return ParsedLine::Bad(cmd_tag),
        };
        match uid_command(&sub.to_ascii_uppercase()) {
            Some(parser) => all_consuming(parser)(args),
            None => return ParsedLine::Unknown(cmd_tag),
        }
    } else {
        match plain_command(&name) {
            Some(parser) => all_consuming(parser)(args),
            None => return ParsedLine::Unknown(cmd_tag),
        }
    };

    match parsed {
        Ok((_, cmd)) => ParsedLine::Command(CommandLine { tag: cmd_tag, cmd }),
        Err(_) => ParsedLine::Bad(cmd_tag),
    }
}

/// Recognises the start of an `APPEND` command, i.e., everything up to (but
/// excluding) the message literal, including the space before it.
pub fn parse_append_start(i: &[u8]) -> Option<AppendStart> {
    let parsed: IResult<&[u8], AppendStart> = all_consuming(map(
        tuple((
            tag_prefix,
            tag_no_case("APPEND "),
            mailbox,
            opt(preceded(tag(" "), flag_list)),
            opt(preceded(tag(" "), datetime)),
            tag(" "),
        )),
        |(tag, _, mailbox, flags, date, _)| AppendStart {
            tag,
            mailbox,
            flags: flags.unwrap_or_default(),
            date,
        },
    ))(i);

    parsed.ok().map(|(_, a)| a)
}

/// Extracts just the tag from a line which could not otherwise be handled.
pub fn parse_tag(i: &[u8]) -> Option<String> {
    tag_prefix(i).ok().map(|(_, t)| t)
}

type Parser = fn(&[u8]) -> IResult<&[u8], Command>;

fn plain_command(name: &str) -> Option<Parser> {
    let parser: Parser = match name {
        "CAPABILITY" => |i| Ok((i, Command::Capability)),
        "NOOP" => |i| Ok((i, Command::Noop)),
        "LOGOUT" => |i| Ok((i, Command::Logout)),
        "STARTTLS" => |i| Ok((i, Command::StartTls)),
        "NAMESPACE" => |i| Ok((i, Command::Namespace)),
        "CHECK" => |i| Ok((i, Command::Check)),
        "CLOSE" => |i| Ok((i, Command::Close)),
        "UNSELECT" => |i| Ok((i, Command::Unselect)),
        "IDLE" => |i| Ok((i, Command::Idle)),
        "EXPUNGE" => |i| {
            Ok((
                i,
                Command::Expunge {
                    uid: false,
                    set: None,
                },
            ))
        },
        "LOGIN" => args_login,
        "AUTHENTICATE" => args_authenticate,
        "ID" => args_id,
        "ENABLE" => args_enable,
        "COMPRESS" => args_compress,
        "SELECT" => |i| args_select(i, false),
        "EXAMINE" => |i| args_select(i, true),
        "CREATE" => |i| map(preceded(tag(" "), mailbox), Command::Create)(i),
        "DELETE" => |i| map(preceded(tag(" "), mailbox), Command::Delete)(i),
        "SUBSCRIBE" => {
            |i| map(preceded(tag(" "), mailbox), Command::Subscribe)(i)
        },
        "UNSUBSCRIBE" => {
            |i| map(preceded(tag(" "), mailbox), Command::Unsubscribe)(i)
        },
        "RENAME" => args_rename,
        "LIST" => args_list,
        "LSUB" => args_lsub,
        "STATUS" => args_status,
        "GETQUOTA" => {
            |i| map(preceded(tag(" "), astring), Command::GetQuota)(i)
        },
        "GETQUOTAROOT" => {
            |i| map(preceded(tag(" "), mailbox), Command::GetQuotaRoot)(i)
        },
        "SETQUOTA" => args_setquota,
        "SEARCH" => |i| args_search(i, false),
        "FETCH" => |i| args_fetch(i, false),
        "STORE" => |i| args_store(i, false),
        "COPY" => |i| args_copy(i, false),
        "MOVE" => |i| args_move(i, false),
        "THREAD" => |i| args_thread(i, false),
        _ => return None,
    };
    Some(parser)
}

fn uid_command(name: &str) -> Option<Parser> {
    let parser: Parser = match name {
        "SEARCH" => |i| args_search(i, true),
        "FETCH" => |i| args_fetch(i, true),
        "STORE" => |i| args_store(i, true),
        "COPY" => |i| args_copy(i, true),
        "MOVE" => |i| args_move(i, true),
        "THREAD" => |i| args_thread(i, true),
        "EXPUNGE" => |i| {
            map(preceded(tag(" "), sequence_set), |set| Command::Expunge {
                uid: true,
                set: Some(set),
            })(i)
        },
        _ => return None,
    };
    Some(parser)
}

// ==================== COMMAND ARGUMENTS ====================

fn args_login(i: &[u8]) -> IResult<&[u8], Command> {
    map(
        pair(preceded(tag(" "), astring), preceded(tag(" "), astring)),
        |(user, password)| Command::Login { user, password },
    )(i)
}

fn args_authenticate(i: &[u8]) -> IResult<&[u8], Command> {
    map(
        pair(
            preceded(tag(" "), atom),
            opt(preceded(
                tag(" "),
                map(
                    take_while1(|b: u8| {
                        b.is_ascii_alphanumeric()
                            || b'+' == b
                            || b'/' == b
                            || b'=' == b
                    }),
                    latin,
                ),
            )),
        ),
        |(mechanism, initial)| Command::Authenticate {
            mechanism: mechanism.to_ascii_uppercase(),
            initial,
        },
    )(i)
}

fn args_id(i: &[u8]) -> IResult<&[u8], Command> {
    preceded(
        tag(" "),
        alt((
            value(Command::Id(Vec::new()), tag_no_case("NIL")),
            map(
                delimited(
                    tag("("),
                    separated_list0(
                        tag(" "),
                        separated_pair(string, tag(" "), nstring),
                    ),
                    tag(")"),
                ),
                Command::Id,
            ),
        )),
    )(i)
}

fn args_enable(i: &[u8]) -> IResult<&[u8], Command> {
    map(
        preceded(tag(" "), separated_list1(tag(" "), atom)),
        |exts| {
            Command::Enable(
                exts.into_iter().map(|e| e.to_ascii_uppercase()).collect(),
            )
        },
    )(i)
}

fn args_compress(i: &[u8]) -> IResult<&[u8], Command> {
    map(preceded(tag(" "), atom), |a| {
        Command::Compress(a.to_ascii_uppercase())
    })(i)
}

fn args_select(i: &[u8], examine: bool) -> IResult<&[u8], Command> {
    map(
        pair(
            preceded(tag(" "), mailbox),
            opt(preceded(tag(" "), tag_no_case("(CONDSTORE)"))),
        ),
        move |(mailbox, condstore)| {
            let condstore = condstore.is_some();
            if examine {
                Command::Examine { mailbox, condstore }
            } else {
                Command::Select { mailbox, condstore }
            }
        },
    )(i)
}

fn args_rename(i: &[u8]) -> IResult<&[u8], Command> {
    map(
        pair(preceded(tag(" "), mailbox), preceded(tag(" "), mailbox)),
        |(src, dst)| Command::Rename { src, dst },
    )(i)
}

fn args_lsub(i: &[u8]) -> IResult<&[u8], Command> {
    map(
        pair(preceded(tag(" "), mailbox), preceded(tag(" "), list_mailbox)),
        |(reference, pattern)| Command::Lsub { reference, pattern },
    )(i)
}

fn args_list(i: &[u8]) -> IResult<&[u8], Command> {
    let (i, select_opts) = opt(preceded(
        tag(" "),
        delimited(tag("("), separated_list0(tag(" "), atom), tag(")")),
    ))(i)?;
    let (i, reference) = preceded(tag(" "), mailbox)(i)?;
    let (i, patterns) = preceded(
        tag(" "),
        alt((
            delimited(
                tag("("),
                separated_list1(tag(" "), list_mailbox),
                tag(")"),
            ),
            map(list_mailbox, |p| vec![p]),
        )),
    )(i)?;
    let (i, return_opts) = opt(preceded(
        tag_no_case(" RETURN "),
        delimited(
            tag("("),
            separated_list0(tag(" "), list_return_opt),
            tag(")"),
        ),
    ))(i)?;

    let mut cmd = ListCommand {
        reference,
        patterns,
        ..ListCommand::default()
    };
    for select in select_opts.unwrap_or_default() {
        match select.to_ascii_uppercase().as_str() {
            "SUBSCRIBED" => cmd.select_subscribed = true,
            "SPECIAL-USE" => cmd.select_special_use = true,
            // REMOTE and RECURSIVEMATCH do not change anything here.
            _ => (),
        }
    }
    for ret in return_opts.unwrap_or_default() {
        match ret {
            ListReturn::Subscribed => cmd.return_subscribed = true,
            ListReturn::Children => cmd.return_children = true,
            ListReturn::SpecialUse => cmd.return_special_use = true,
            ListReturn::Status(atts) => cmd.return_status = Some(atts),
        }
    }

    Ok((i, Command::List(cmd)))
}

#[derive(Clone, Debug)]
enum ListReturn {
    Subscribed,
    Children,
    SpecialUse,
    Status(Vec<StatusAtt>),
}

fn list_return_opt(i: &[u8]) -> IResult<&[u8], ListReturn> {
    alt((
        map(
            preceded(tag_no_case("STATUS "), status_atts),
            ListReturn::Status,
        ),
        value(ListReturn::Subscribed, tag_no_case("SUBSCRIBED")),
        value(ListReturn::Children, tag_no_case("CHILDREN")),
        value(ListReturn::SpecialUse, tag_no_case("SPECIAL-USE")),
    ))(i)
}

fn args_status(i: &[u8]) -> IResult<&[u8], Command> {
    map(
        pair(preceded(tag(" "), mailbox), preceded(tag(" "), status_atts)),
        |(mailbox, atts)| Command::Status { mailbox, atts },
    )(i)
}

fn status_atts(i: &[u8]) -> IResult<&[u8], Vec<StatusAtt>> {
    delimited(tag("("), separated_list1(tag(" "), status_att), tag(")"))(i)
}

fn status_att(i: &[u8]) -> IResult<&[u8], StatusAtt> {
    alt((
        value(StatusAtt::Messages, tag_no_case("MESSAGES")),
        value(StatusAtt::Recent, tag_no_case("RECENT")),
        value(StatusAtt::UidNext, tag_no_case("UIDNEXT")),
        value(StatusAtt::UidValidity, tag_no_case("UIDVALIDITY")),
        value(StatusAtt::Unseen, tag_no_case("UNSEEN")),
        value(StatusAtt::HighestModseq, tag_no_case("HIGHESTMODSEQ")),
    ))(i)
}

fn args_setquota(i: &[u8]) -> IResult<&[u8], Command> {
    map(
        pair(
            preceded(tag(" "), astring),
            preceded(
                tag(" "),
                delimited(
                    tag("("),
                    separated_list0(
                        tag(" "),
                        separated_pair(
                            map(atom, |a| a.to_ascii_uppercase()),
                            tag(" "),
                            number64,
                        ),
                    ),
                    tag(")"),
                ),
            ),
        ),
        |(root, limits)| Command::SetQuota { root, limits },
    )(i)
}

fn args_search(i: &[u8], uid: bool) -> IResult<&[u8], Command> {
    map(
        pair(
            opt(preceded(tag_no_case(" CHARSET "), astring)),
            preceded(tag(" "), search_program),
        ),
        move |(charset, criteria)| Command::Search {
            uid,
            charset,
            criteria,
        },
    )(i)
}

fn args_thread(i: &[u8], uid: bool) -> IResult<&[u8], Command> {
    map(
        tuple((
            preceded(
                tag(" "),
                alt((
                    value(
                        ThreadAlgorithm::OrderedSubject,
                        tag_no_case("ORDEREDSUBJECT"),
                    ),
                    value(
                        ThreadAlgorithm::References,
                        tag_no_case("REFERENCES"),
                    ),
                )),
            ),
            preceded(tag(" "), astring),
            preceded(tag(" "), search_program),
        )),
        move |(algorithm, charset, criteria)| Command::Thread {
            uid,
            algorithm,
            charset,
            criteria,
        },
    )(i)
}

fn args_fetch(i: &[u8], uid: bool) -> IResult<&[u8], Command> {
    map(
        tuple((
            preceded(tag(" "), sequence_set),
            preceded(tag(" "), fetch_atts),
            opt(preceded(
                tag(" "),
                delimited(
                    tag_no_case("(CHANGEDSINCE "),
                    terminated(number64, opt(tag_no_case(" VANISHED"))),
                    tag(")"),
                ),
            )),
        )),
        move |(set, atts, changed_since)| Command::Fetch {
            uid,
            set,
            atts,
            changed_since,
        },
    )(i)
}

fn fetch_atts(i: &[u8]) -> IResult<&[u8], Vec<FetchAttr>> {
    use FetchAttr::*;

    alt((
        value(
            vec![Flags, InternalDate, Rfc822Size, Envelope],
            tag_no_case("ALL"),
        ),
        value(vec![Flags, InternalDate, Rfc822Size], tag_no_case("FAST")),
        value(
            vec![Flags, InternalDate, Rfc822Size, Envelope, Body],
            tag_no_case("FULL"),
        ),
        delimited(tag("("), separated_list1(tag(" "), fetch_att), tag(")")),
        map(fetch_att, |a| vec![a]),
    ))(i)
}

fn fetch_att(i: &[u8]) -> IResult<&[u8], FetchAttr> {
    let (rest, name) =
        take_while1(|b: u8| b.is_ascii_alphanumeric() || b'.' == b)(i)?;
    let name = latin(name).to_ascii_uppercase();

    let simple = |part, peek| {
        FetchAttr::Section(BodySection {
            part,
            peek,
            partial: None,
            rfc822: true,
        })
    };

    match name.as_str() {
        "FLAGS" => Ok((rest, FetchAttr::Flags)),
        "UID" => Ok((rest, FetchAttr::Uid)),
        "INTERNALDATE" => Ok((rest, FetchAttr::InternalDate)),
        "RFC822.SIZE" => Ok((rest, FetchAttr::Rfc822Size)),
        "ENVELOPE" => Ok((rest, FetchAttr::Envelope)),
        "BODYSTRUCTURE" => Ok((rest, FetchAttr::BodyStructure)),
        "MODSEQ" => Ok((rest, FetchAttr::Modseq)),
        "RFC822" => Ok((rest, simple(SectionPart::Full, false))),
        "RFC822.HEADER" => Ok((rest, simple(SectionPart::Header, true))),
        "RFC822.TEXT" => Ok((rest, simple(SectionPart::Text, false))),
        "BODY" | "BODY.PEEK" => {
            let peek = "BODY.PEEK" == name;
            match opt(section)(rest)? {
                (rest, Some((part, partial))) => Ok((
                    rest,
                    FetchAttr::Section(BodySection {
                        part,
                        peek,
                        partial,
                        rfc822: false,
                    }),
                )),
                (rest, None) if !peek => Ok((rest, FetchAttr::Body)),
                _ => Err(fail(i)),
            }
        },
        _ => Err(fail(i)),
    }
}

fn section(
    i: &[u8],
) -> IResult<&[u8], (SectionPart, Option<(u32, u32)>)> {
    pair(
        delimited(
            tag("["),
            map(
                opt(alt((
                    value(SectionPart::Header, tag_no_case("HEADER")),
                    value(SectionPart::Text, tag_no_case("TEXT")),
                ))),
                |p| p.unwrap_or(SectionPart::Full),
            ),
            tag("]"),
        ),
        opt(delimited(
            tag("<"),
            separated_pair(number, tag("."), number),
            tag(">"),
        )),
    )(i)
}

fn args_store(i: &[u8], uid: bool) -> IResult<&[u8], Command> {
    map(
        tuple((
            preceded(tag(" "), sequence_set),
            opt(preceded(
                tag(" "),
                delimited(tag_no_case("(UNCHANGEDSINCE "), number64, tag(")")),
            )),
            preceded(
                tag(" "),
                alt((
                    value(FlagOp::Add, tag("+")),
                    value(FlagOp::Remove, tag("-")),
                    value(FlagOp::Replace, tag("")),
                )),
            ),
            tag_no_case("FLAGS"),
            opt(tag_no_case(".SILENT")),
            preceded(
                tag(" "),
                alt((flag_list, separated_list1(tag(" "), flag))),
            ),
        )),
        move |(set, unchanged_since, op, _, silent, flags)| Command::Store {
            uid,
            set,
            op,
            silent: silent.is_some(),
            flags,
            unchanged_since,
        },
    )(i)
}

fn args_copy(i: &[u8], uid: bool) -> IResult<&[u8], Command> {
    map(
        pair(preceded(tag(" "), sequence_set), preceded(tag(" "), mailbox)),
        move |(set, dst)| Command::Copy { uid, set, dst },
    )(i)
}

fn args_move(i: &[u8], uid: bool) -> IResult<&[u8], Command> {
    map(
        pair(preceded(tag(" "), sequence_set), preceded(tag(" "), mailbox)),
        move |(set, dst)| Command::Move { uid, set, dst },
    )(i)
}

// ==================== SEARCH ====================

fn search_program(i: &[u8]) -> IResult<&[u8], SearchKey> {
    map(
        separated_list1(tag(" "), |i| search_key(i, 0)),
        |mut keys| {
            if 1 == keys.len() {
                keys.remove(0)
            } else {
                SearchKey::And(keys)
            }
        },
    )(i)
}

fn search_key(i: &[u8], depth: u32) -> IResult<&[u8], SearchKey> {
    if depth > MAX_SEARCH_DEPTH {
        return Err(fail(i));
    }

    if i.starts_with(b"(") {
        return map(
            delimited(
                tag("("),
                separated_list1(tag(" "), |i| search_key(i, depth + 1)),
                tag(")"),
            ),
            SearchKey::And,
        )(i);
    }

    if let Ok((rest, set)) = sequence_set(i) {
        return Ok((rest, SearchKey::Seq(set)));
    }

    let (i, word) = atom(i)?;

    match word.to_ascii_uppercase().as_str() {
        "ALL" => Ok((i, SearchKey::All)),
        "ANSWERED" => Ok((i, SearchKey::Answered)),
        "UNANSWERED" => Ok((i, SearchKey::Unanswered)),
        "DELETED" => Ok((i, SearchKey::Deleted)),
        "UNDELETED" => Ok((i, SearchKey::Undeleted)),
        "DRAFT" => Ok((i, SearchKey::Draft)),
        "UNDRAFT" => Ok((i, SearchKey::Undraft)),
        "FLAGGED" => Ok((i, SearchKey::Flagged)),
        "UNFLAGGED" => Ok((i, SearchKey::Unflagged)),
        "SEEN" => Ok((i, SearchKey::Seen)),
        "UNSEEN" => Ok((i, SearchKey::Unseen)),
        "RECENT" => Ok((i, SearchKey::Recent)),
        "NEW" => Ok((i, SearchKey::New)),
        "OLD" => Ok((i, SearchKey::Old)),
        "KEYWORD" => map(preceded(tag(" "), flag), SearchKey::Keyword)(i),
        "UNKEYWORD" => map(preceded(tag(" "), flag), SearchKey::Unkeyword)(i),
        "SUBJECT" => map(sp_astring, SearchKey::Subject)(i),
        "FROM" => map(sp_astring, SearchKey::From)(i),
        "TO" => map(sp_astring, SearchKey::To)(i),
        "CC" => map(sp_astring, SearchKey::Cc)(i),
        "BODY" => map(sp_astring, SearchKey::Body)(i),
        "TEXT" => map(sp_astring, SearchKey::Text)(i),
        "LARGER" => map(preceded(tag(" "), number), SearchKey::Larger)(i),
        "SMALLER" => map(preceded(tag(" "), number), SearchKey::Smaller)(i),
        "BEFORE" => map(preceded(tag(" "), date), SearchKey::Before)(i),
        "ON" => map(preceded(tag(" "), date), SearchKey::On)(i),
        "SINCE" => map(preceded(tag(" "), date), SearchKey::Since)(i),
        "MODSEQ" => map(preceded(tag(" "), number64), SearchKey::Modseq)(i),
        "UID" => map(preceded(tag(" "), sequence_set), SearchKey::Uid)(i),
        "NOT" => map(
            preceded(tag(" "), |i| search_key(i, depth + 1)),
            |k| SearchKey::Not(Box::new(k)),
        )(i),
        "OR" => map(
            pair(
                preceded(tag(" "), |i| search_key(i, depth + 1)),
                preceded(tag(" "), |i| search_key(i, depth + 1)),
            ),
            |(a, b)| SearchKey::Or(Box::new(a), Box::new(b)),
        )(i),
        _ => Err(fail(i)),
    }
}

// ==================== PRIMITIVE PARSERS ====================

fn sp_astring(i: &[u8]) -> IResult<&[u8], String> {
    preceded(tag(" "), astring)(i)
}

fn fail(i: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
}

fn latin(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn is_atom_char(b: u8) -> bool {
    !matches!(
        b,
        0..=b' '
            | 127..=255
            | b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']'
    )
}

fn atom(i: &[u8]) -> IResult<&[u8], String> {
    map(take_while1(is_atom_char), latin)(i)
}

fn tag_prefix(i: &[u8]) -> IResult<&[u8], String> {
    terminated(
        map(
            take_while1(|b| is_atom_char(b) && b'+' != b || b']' == b),
            latin,
        ),
        tag(" "),
    )(i)
}

fn command_name(i: &[u8]) -> IResult<&[u8], String> {
    map(take_while1(|b: u8| b.is_ascii_alphabetic()), latin)(i)
}

fn astring_atom(i: &[u8]) -> IResult<&[u8], String> {
    map(take_while1(|b| is_atom_char(b) || b']' == b), |s| {
        String::from_utf8_lossy(s).into_owned()
    })(i)
}

fn number(i: &[u8]) -> IResult<&[u8], u32> {
    map_opt(digit1, |s| {
        str::from_utf8(s).ok().and_then(|s| s.parse::<u32>().ok())
    })(i)
}

fn number64(i: &[u8]) -> IResult<&[u8], u64> {
    map_opt(digit1, |s| {
        str::from_utf8(s).ok().and_then(|s| s.parse::<u64>().ok())
    })(i)
}

fn literal(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, len) = delimited(
        alt((tag("~{"), tag("{"))),
        number,
        tuple((opt(tag("+")), tag("}"), opt(tag("\r")), tag("\n"))),
    )(i)?;
    take(len)(i)
}

fn quoted(i: &[u8]) -> IResult<&[u8], String> {
    delimited(
        tag("\""),
        fold_many0(
            alt((
                preceded(tag("\\"), alt((tag("\\"), tag("\"")))),
                is_not("\r\n\"\\"),
            )),
            Vec::new,
            |mut accum: Vec<u8>, piece: &[u8]| {
                accum.extend_from_slice(piece);
                accum
            },
        ),
        tag("\""),
    )(i)
    .map(|(i, bytes)| (i, String::from_utf8_lossy(&bytes).into_owned()))
}

fn string(i: &[u8]) -> IResult<&[u8], String> {
    alt((quoted, map(literal, latin)))(i)
}

fn astring(i: &[u8]) -> IResult<&[u8], String> {
    alt((astring_atom, string))(i)
}

fn nstring(i: &[u8]) -> IResult<&[u8], Option<String>> {
    alt((value(None, tag_no_case("NIL")), map(string, Some)))(i)
}

fn decode_mailbox(raw: String) -> String {
    match utf7::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        // Clients that don't bother with modified UTF-7 get what they sent.
        Err(_) => raw,
    }
}

fn mailbox(i: &[u8]) -> IResult<&[u8], String> {
    map(astring, decode_mailbox)(i)
}

/// A mailbox as used in `LIST` patterns, which may contain `%` and `*`.
fn list_mailbox(i: &[u8]) -> IResult<&[u8], String> {
    map(
        alt((
            map(
                take_while1(|b| {
                    is_atom_char(b) || b'%' == b || b'*' == b || b']' == b
                }),
                latin,
            ),
            string,
        )),
        decode_mailbox,
    )(i)
}

fn sequence_set(i: &[u8]) -> IResult<&[u8], SequenceSet> {
    map_opt(is_a("0123456789:*,"), |s: &[u8]| {
        str::from_utf8(s).ok().and_then(SequenceSet::parse)
    })(i)
}

fn flag(i: &[u8]) -> IResult<&[u8], Flag> {
    map_opt(
        take_while1(|b| is_atom_char(b) || b'\\' == b),
        |s: &[u8]| str::from_utf8(s).ok().and_then(|s| s.parse::<Flag>().ok()),
    )(i)
}

fn flag_list(i: &[u8]) -> IResult<&[u8], Vec<Flag>> {
    delimited(tag("("), separated_list0(tag(" "), flag), tag(")"))(i)
}

fn digits(min: usize, max: usize) -> impl Fn(&[u8]) -> IResult<&[u8], u32> {
    move |i| {
        map_opt(
            take_while_m_n(min, max, |b: u8| b.is_ascii_digit()),
            |s: &[u8]| str::from_utf8(s).ok().and_then(|s| s.parse().ok()),
        )(i)
    }
}

static MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct",
    "nov", "dec",
];

fn month(i: &[u8]) -> IResult<&[u8], u32> {
    map_opt(take(3usize), |name: &[u8]| {
        let name = str::from_utf8(name).ok()?;
        MONTH_NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|ix| ix as u32 + 1)
    })(i)
}

fn date_text(i: &[u8]) -> IResult<&[u8], NaiveDate> {
    map_opt(
        tuple((
            terminated(digits(1, 2), tag("-")),
            terminated(month, tag("-")),
            digits(4, 4),
        )),
        |(d, m, y)| NaiveDate::from_ymd_opt(y as i32, m, d),
    )(i)
}

fn date(i: &[u8]) -> IResult<&[u8], NaiveDate> {
    alt((date_text, delimited(tag("\""), date_text, tag("\""))))(i)
}

fn datetime(i: &[u8]) -> IResult<&[u8], DateTime<FixedOffset>> {
    map_opt(
        delimited(
            tag("\""),
            tuple((
                terminated(
                    alt((digits(2, 2), preceded(tag(" "), digits(1, 1)))),
                    tag("-"),
                ),
                terminated(month, tag("-")),
                terminated(digits(4, 4), tag(" ")),
                terminated(digits(2, 2), tag(":")),
                terminated(digits(2, 2), tag(":")),
                terminated(digits(2, 2), tag(" ")),
                pair(alt((tag("+"), tag("-"))), digits(4, 4)),
            )),
            tag("\""),
        ),
        |(d, mon, y, h, min, s, (sign, zone))| {
            let offset = ((zone / 100) * 3600 + (zone % 100) * 60) as i32;
            let offset = if b"-" == sign { -offset } else { offset };
            FixedOffset::east_opt(offset)?
                .from_local_datetime(
                    &NaiveDate::from_ymd_opt(y as i32, mon, d)?
                        .and_hms_opt(h, min, s)?,
                )
                .single()
        },
    )(i)
}

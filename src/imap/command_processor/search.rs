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

use super::defs::*;
use crate::account::header;
use crate::imap::syntax::SearchKey;

impl CommandProcessor {
    pub(super) async fn cmd_search(
        &mut self,
        uid: bool,
        charset: Option<String>,
        criteria: SearchKey,
        sender: &SendResponse,
    ) -> CmdResult {
        check_charset(charset.as_deref())?;

        let hits = self.search_messages(&criteria).await?;
        let ids = hits
            .iter()
            .map(|&(seq, ref m)| if uid { m.uid } else { seq })
            .collect::<Vec<_>>();

        send_response(sender, s::Response::Search(ids)).await;
        success("SEARCH completed")
    }

    /// Evaluates `criteria` against the messages in the current view,
    /// returning the matches with their sequence numbers, in sequence
    /// number order.
    pub(super) async fn search_messages(
        &mut self,
        criteria: &SearchKey,
    ) -> PartialResult<Vec<(u32, Message)>> {
        if uses_modseq(criteria) {
            self.condstore_enabled = true;
        }

        let folder_id = selected!(self)?.folder.id.clone();
        let messages =
            repo!(self, messages(&folder_id)).map_err(map_error!(self))?;

        let selected = selected!(self)?;
        let context = Context {
            max_seq: selected.uids.len() as u32,
            max_uid: selected.max_uid(),
        };

        Ok(messages
            .into_iter()
            .filter_map(|m| selected.seq_of(m.uid).map(|seq| (seq, m)))
            .filter(|&(seq, ref m)| context.matches(criteria, seq, m))
            .collect())
    }
}

pub(super) fn check_charset(charset: Option<&str>) -> PartialResult<()> {
    match charset {
        None => Ok(()),
        Some(cs)
            if cs.eq_ignore_ascii_case("UTF-8")
                || cs.eq_ignore_ascii_case("US-ASCII") =>
        {
            Ok(())
        },
        Some(cs) => Err(s::Response::no(Cow::Owned(format!(
            "Unsupported charset {}",
            cs
        )))),
    }
}

fn uses_modseq(key: &SearchKey) -> bool {
    match *key {
        SearchKey::Modseq(..) => true,
        SearchKey::Not(ref k) => uses_modseq(k),
        SearchKey::Or(ref a, ref b) => uses_modseq(a) || uses_modseq(b),
        SearchKey::And(ref keys) => keys.iter().any(uses_modseq),
        _ => false,
    }
}

/// What `*` means in sequence sets within the search.
#[derive(Clone, Copy, Debug)]
struct Context {
    max_seq: u32,
    max_uid: u32,
}

impl Context {
    fn matches(&self, key: &SearchKey, seq: u32, m: &Message) -> bool {
        match *key {
            SearchKey::All => true,
            SearchKey::Answered => m.has_flag(&Flag::Answered),
            SearchKey::Unanswered => !m.has_flag(&Flag::Answered),
            SearchKey::Deleted => m.has_flag(&Flag::Deleted),
            SearchKey::Undeleted => !m.has_flag(&Flag::Deleted),
            SearchKey::Draft => m.has_flag(&Flag::Draft),
            SearchKey::Undraft => !m.has_flag(&Flag::Draft),
            SearchKey::Flagged => m.has_flag(&Flag::Flagged),
            SearchKey::Unflagged => !m.has_flag(&Flag::Flagged),
            SearchKey::Seen => m.has_flag(&Flag::Seen),
            SearchKey::Unseen => !m.has_flag(&Flag::Seen),
            SearchKey::Recent => m.recent,
            SearchKey::New => m.recent && !m.has_flag(&Flag::Seen),
            SearchKey::Old => !m.recent,
            SearchKey::Keyword(ref flag) => m.has_flag(flag),
            SearchKey::Unkeyword(ref flag) => !m.has_flag(flag),
            SearchKey::Subject(ref s) => contains_ci(&m.subject, s),
            SearchKey::From(ref s) => contains_ci(&m.from, s),
            SearchKey::To(ref s) => contains_ci(&m.to, s),
            SearchKey::Cc(ref s) => contains_ci(&m.cc, s),
            SearchKey::Body(ref s) => {
                let body = &m.body[header::body_offset(&m.body)..];
                contains_ci(&String::from_utf8_lossy(body), s)
            },
            SearchKey::Text(ref s) => {
                contains_ci(&String::from_utf8_lossy(&m.body), s)
            },
            SearchKey::Larger(size) => m.size > size,
            SearchKey::Smaller(size) => m.size < size,
            // Date keys compare the internal date, disregarding time and
            // zone.
            SearchKey::Before(date) => m.received_at.date_naive() < date,
            SearchKey::On(date) => m.received_at.date_naive() == date,
            SearchKey::Since(date) => m.received_at.date_naive() >= date,
            SearchKey::Modseq(modseq) => m.modseq >= modseq,
            SearchKey::Uid(ref set) => {
                set.resolve(self.max_uid).contains(m.uid)
            },
            SearchKey::Seq(ref set) => set.resolve(self.max_seq).contains(seq),
            SearchKey::Not(ref k) => !self.matches(k, seq, m),
            SearchKey::Or(ref a, ref b) => {
                self.matches(a, seq, m) || self.matches(b, seq, m)
            },
            SearchKey::And(ref keys) => {
                keys.iter().all(|k| self.matches(k, seq, m))
            },
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::prelude::*;

    use super::*;

    fn message(uid: u32, flags: Vec<Flag>, recent: bool) -> Message {
        let body: &[u8] =
            b"Subject: Quarterly Report\r\n\r\nThe numbers are in.\r\n";
        Message {
            id: format!("m{}", uid),
            folder_id: "f1".to_owned(),
            uid,
            seq: uid,
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            subject: "Quarterly Report".to_owned(),
            from: "Alice <alice@example.com>".to_owned(),
            to: "bob@example.com".to_owned(),
            cc: String::new(),
            date: None,
            size: body.len() as u32,
            flags,
            recent,
            modseq: u64::from(uid) * 10,
            received_at: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2021, 6, 1, 12, 0, 0)
                .unwrap(),
            body: Arc::from(body),
        }
    }

    const CTX: Context = Context {
        max_seq: 3,
        max_uid: 7,
    };

    #[test]
    fn flag_keys() {
        let m = message(
            5,
            vec![Flag::Seen, Flag::Keyword("work".to_owned())],
            true,
        );
        assert!(CTX.matches(&SearchKey::Seen, 1, &m));
        assert!(!CTX.matches(&SearchKey::Unseen, 1, &m));
        assert!(CTX.matches(&SearchKey::Recent, 1, &m));
        assert!(!CTX.matches(&SearchKey::New, 1, &m));
        assert!(!CTX.matches(&SearchKey::Old, 1, &m));
        assert!(CTX.matches(
            &SearchKey::Keyword(Flag::Keyword("work".to_owned())),
            1,
            &m
        ));
        assert!(CTX.matches(&SearchKey::Undeleted, 1, &m));
    }

    #[test]
    fn text_keys_ignore_case() {
        let m = message(5, vec![], false);
        assert!(CTX.matches(
            &SearchKey::Subject("quarterly".to_owned()),
            1,
            &m
        ));
        assert!(CTX.matches(&SearchKey::From("ALICE".to_owned()), 1, &m));
        assert!(CTX.matches(&SearchKey::Body("numbers".to_owned()), 1, &m));
        assert!(!CTX.matches(&SearchKey::Body("quarterly".to_owned()), 1, &m));
        assert!(CTX.matches(&SearchKey::Text("quarterly".to_owned()), 1, &m));
        assert!(!CTX.matches(&SearchKey::Cc("bob".to_owned()), 1, &m));
    }

    #[test]
    fn sets_dates_and_combinators() {
        let m = message(7, vec![], false);
        let uid_star = SearchKey::Uid(SequenceSet::parse("*").unwrap());
        assert!(CTX.matches(&uid_star, 3, &m));
        let seq_two = SearchKey::Seq(SequenceSet::parse("2").unwrap());
        assert!(!CTX.matches(&seq_two, 3, &m));
        assert!(CTX.matches(
            &SearchKey::Or(Box::new(seq_two.clone()), Box::new(uid_star)),
            3,
            &m
        ));
        assert!(CTX.matches(&SearchKey::Not(Box::new(seq_two)), 3, &m));

        let june1 = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
        assert!(CTX.matches(&SearchKey::On(june1), 3, &m));
        assert!(CTX.matches(&SearchKey::Since(june1), 3, &m));
        assert!(!CTX.matches(&SearchKey::Before(june1), 3, &m));

        assert!(CTX.matches(&SearchKey::Modseq(70), 3, &m));
        assert!(!CTX.matches(&SearchKey::Modseq(71), 3, &m));
        assert!(CTX.matches(&SearchKey::And(vec![]), 3, &m));
    }

    #[test]
    fn charsets() {
        assert!(check_charset(None).is_ok());
        assert!(check_charset(Some("utf-8")).is_ok());
        assert!(check_charset(Some("US-ASCII")).is_ok());
        assert!(check_charset(Some("ISO-8859-1")).is_err());
    }
}

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

//! The RFC 5256 `ORDEREDSUBJECT` and `REFERENCES` threading algorithms.
//!
//! Both produce a strict forest: every input message appears exactly once.
//! Missing or garbled reference headers never cause failure; the message
//! simply becomes a root.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::account::model::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadAlgorithm {
    OrderedSubject,
    References,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadNode {
    /// Sequence number or UID depending on how the command was issued.
    pub id: u32,
    pub children: Vec<ThreadNode>,
}

impl ThreadNode {
    fn leaf(id: u32) -> Self {
        ThreadNode {
            id,
            children: Vec::new(),
        }
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(ThreadNode::count).sum::<usize>()
    }
}

pub fn thread(
    algorithm: ThreadAlgorithm,
    messages: &[&Message],
    id_of: impl Fn(&Message) -> u32,
) -> Vec<ThreadNode> {
    match algorithm {
        ThreadAlgorithm::OrderedSubject => ordered_subject(messages, id_of),
        ThreadAlgorithm::References => references(messages, id_of),
    }
}

/// Reduces a subject to the key used for grouping: lower-cased, with
/// leading reply/forward markers and `[list]` tags removed.
pub fn base_subject(subject: &str) -> String {
    const PREFIXES: &[&str] = &["re:", "fwd:", "fw:", "aw:", "sv:", "antw:"];

    let mut s = subject.trim().to_lowercase();
    loop {
        let before = s.len();

        for prefix in PREFIXES {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest.trim_start().to_owned();
            }
        }

        if s.starts_with('[') {
            if let Some(end) = s.find(']') {
                s = s[end + 1..].trim_start().to_owned();
            }
        }

        if s.len() == before {
            break;
        }
    }

    s
}

fn ordered_subject(
    messages: &[&Message],
    id_of: impl Fn(&Message) -> u32,
) -> Vec<ThreadNode> {
    let mut groups: HashMap<String, Vec<&Message>> = HashMap::new();
    for &message in messages {
        groups
            .entry(base_subject(&message.subject))
            .or_default()
            .push(message);
    }

    let mut groups = groups.into_iter().collect::<Vec<_>>();
    for &mut (_, ref mut members) in &mut groups {
        members.sort_by_key(|m| (m.sent_date(), m.uid));
    }
    // Threads are ordered by the date of their first message; the subject
    // only breaks ties.
    groups.sort_by(|&(ref ka, ref a), &(ref kb, ref b)| {
        (a[0].sent_date(), ka).cmp(&(b[0].sent_date(), kb))
    });

    groups
        .into_iter()
        .map(|(_, members)| ThreadNode {
            id: id_of(members[0]),
            children: members[1..]
                .iter()
                .map(|&m| ThreadNode::leaf(id_of(m)))
                .collect(),
        })
        .collect()
}

fn references(
    messages: &[&Message],
    id_of: impl Fn(&Message) -> u32,
) -> Vec<ThreadNode> {
    let mut by_message_id: HashMap<&str, u32> = HashMap::new();
    for &message in messages {
        if let Some(ref mid) = message.message_id {
            // First occurrence wins for duplicate ids.
            by_message_id.entry(mid.as_str()).or_insert(message.uid);
        }
    }

    let mut parents: HashMap<u32, u32> = HashMap::new();
    for &message in messages {
        let candidate = message
            .in_reply_to
            .as_deref()
            .and_then(|irt| by_message_id.get(irt).copied())
            .or_else(|| {
                message
                    .references
                    .iter()
                    .rev()
                    .find_map(|r| by_message_id.get(r.as_str()).copied())
            });

        let parent = match candidate {
            Some(parent) if parent != message.uid => parent,
            _ => continue,
        };

        if !creates_cycle(&parents, parent, message.uid) {
            parents.insert(message.uid, parent);
        }
    }

    let ids: HashMap<u32, u32> =
        messages.iter().map(|&m| (m.uid, id_of(m))).collect();
    let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for (&child, &parent) in &parents {
        children.entry(parent).or_default().push(child);
    }

    let mut roots = messages
        .iter()
        .map(|m| m.uid)
        .filter(|uid| !parents.contains_key(uid))
        .collect::<Vec<_>>();
    roots.sort_unstable();
    roots.dedup();

    roots
        .into_iter()
        .map(|uid| build_tree(uid, &children, &ids))
        .collect()
}

/// Whether making `parent` the parent of `child` would make `child` its own
/// ancestor.
fn creates_cycle(parents: &HashMap<u32, u32>, parent: u32, child: u32) -> bool {
    let mut cursor = Some(parent);
    let mut steps = 0;
    while let Some(node) = cursor {
        if node == child || steps > parents.len() {
            return true;
        }
        cursor = parents.get(&node).copied();
        steps += 1;
    }
    false
}

fn build_tree(
    uid: u32,
    children: &BTreeMap<u32, Vec<u32>>,
    ids: &HashMap<u32, u32>,
) -> ThreadNode {
    let mut kids = children.get(&uid).cloned().unwrap_or_default();
    kids.sort_unstable();

    ThreadNode {
        id: ids.get(&uid).copied().unwrap_or(uid),
        children: kids
            .into_iter()
            .map(|kid| build_tree(kid, children, ids))
            .collect(),
    }
}

/// Renders a forest in the `THREAD` response syntax, e.g.
/// `(2)(3 6 (4 23)(44 7 96))`.
pub fn format_forest(forest: &[ThreadNode]) -> String {
    let mut out = String::new();
    for root in forest {
        out.push('(');
        format_node(&mut out, root);
        out.push(')');
    }
    out
}

fn format_node(out: &mut String, node: &ThreadNode) {
    let _ = write!(out, "{}", node.id);
    match node.children.len() {
        0 => (),
        1 => {
            out.push(' ');
            format_node(out, &node.children[0]);
        },
        _ => {
            out.push(' ');
            for child in &node.children {
                out.push('(');
                format_node(out, child);
                out.push(')');
            }
        },
    }
}

/// Total number of nodes in the forest.
pub fn forest_size(forest: &[ThreadNode]) -> usize {
    forest.iter().map(ThreadNode::count).sum()
}

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

use super::{Event, Notification};

/// Collapses a backlog of notifications into an equivalent shorter list.
///
/// `Expunge`, `Flags` and `Status` events are kept individually and in their
/// original order, since clients renumber messages as they see them. For
/// each folder, the `Exists` events collapse to the latest count and the
/// `Recent` events to their sum; both are placed after the ordered events so
/// the count reflects every expunge that came before it.
pub fn coalesce(pending: Vec<Notification>) -> Vec<Notification> {
    if pending.len() <= 1 {
        return pending;
    }

    let mut ordered = Vec::with_capacity(pending.len());
    // Folder ids in order of first appearance, so output is deterministic.
    let mut folders = Vec::<String>::new();
    let mut exists = HashMap::<String, Notification>::new();
    let mut recent = HashMap::<String, Notification>::new();

    for n in pending {
        match n.event {
            Event::Exists(_) => {
                if !exists.contains_key(&n.folder_id)
                    && !recent.contains_key(&n.folder_id)
                {
                    folders.push(n.folder_id.clone());
                }
                exists.insert(n.folder_id.clone(), n);
            },

            Event::Recent(count) => {
                if let Some(prev) = recent.get_mut(&n.folder_id) {
                    if let Event::Recent(ref mut total) = prev.event {
                        *total = total.saturating_add(count);
                    }
                } else {
                    if !exists.contains_key(&n.folder_id) {
                        folders.push(n.folder_id.clone());
                    }
                    recent.insert(n.folder_id.clone(), n);
                }
            },

            Event::Expunge { .. } | Event::Flags { .. } | Event::Status { .. } => {
                ordered.push(n)
            },
        }
    }

    for folder in folders {
        ordered.extend(exists.remove(&folder));
        ordered.extend(recent.remove(&folder));
    }

    ordered
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn notif(folder: &str, event: Event) -> Notification {
        Notification {
            origin: "conn".to_owned(),
            mailbox_id: "mb".to_owned(),
            folder_id: folder.to_owned(),
            folder_path: folder.to_owned(),
            event,
        }
    }

    #[test]
    fn counts_collapse_and_order_survives() {
        let result = coalesce(vec![
            notif("f1", Event::Exists(3)),
            notif("f1", Event::Recent(1)),
            notif("f1", Event::Expunge { seq: 2, uid: 7 }),
            notif("f1", Event::Exists(4)),
            notif("f2", Event::Recent(2)),
            notif("f1", Event::Recent(1)),
            notif(
                "f1",
                Event::Flags {
                    seq: 1,
                    uid: 5,
                    flags: vec!["\\Seen".to_owned()],
                },
            ),
            notif("f1", Event::Expunge { seq: 1, uid: 5 }),
            notif("f2", Event::Recent(3)),
        ]);

        let events = result
            .iter()
            .map(|n| (n.folder_id.as_str(), n.event.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                ("f1", Event::Expunge { seq: 2, uid: 7 }),
                (
                    "f1",
                    Event::Flags {
                        seq: 1,
                        uid: 5,
                        flags: vec!["\\Seen".to_owned()],
                    }
                ),
                ("f1", Event::Expunge { seq: 1, uid: 5 }),
                ("f1", Event::Exists(4)),
                ("f1", Event::Recent(2)),
                ("f2", Event::Recent(5)),
            ],
            events
        );
    }

    #[test]
    fn single_event_untouched() {
        let one = vec![notif("f", Event::Status { messages: 9 })];
        assert_eq!(one.clone(), coalesce(one));
    }

    fn arb_event() -> impl Strategy<Value = (u8, Event)> {
        (
            0u8..3,
            prop_oneof![
                (0u32..50).prop_map(Event::Exists),
                (0u32..5).prop_map(Event::Recent),
                (1u32..50).prop_map(|seq| Event::Expunge { seq, uid: seq }),
                (1u32..50).prop_map(|seq| Event::Flags {
                    seq,
                    uid: seq,
                    flags: Vec::new(),
                }),
            ],
        )
    }

    proptest! {
        #[test]
        fn coalescing_keeps_ordered_events_and_totals(
            events in prop::collection::vec(arb_event(), 0..40)
        ) {
            let input = events
                .iter()
                .map(|(f, e)| notif(&format!("f{}", f), e.clone()))
                .collect::<Vec<_>>();
            let output = coalesce(input.clone());

            let is_ordered = |n: &&Notification| matches!(
                n.event,
                Event::Expunge { .. } | Event::Flags { .. }
            );
            prop_assert_eq!(
                input.iter().filter(is_ordered).collect::<Vec<_>>(),
                output.iter().filter(is_ordered).collect::<Vec<_>>()
            );

            for folder in 0u8..3 {
                let folder = format!("f{}", folder);
                let last_exists = input
                    .iter()
                    .filter(|n| n.folder_id == folder)
                    .filter_map(|n| match n.event {
                        Event::Exists(c) => Some(c),
                        _ => None,
                    })
                    .last();
                let out_exists = output
                    .iter()
                    .filter(|n| n.folder_id == folder)
                    .filter_map(|n| match n.event {
                        Event::Exists(c) => Some(c),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                prop_assert_eq!(
                    last_exists.into_iter().collect::<Vec<_>>(),
                    out_exists
                );

                let recent_sum = |ns: &[Notification]| -> u32 {
                    ns.iter()
                        .filter(|n| n.folder_id == folder)
                        .filter_map(|n| match n.event {
                            Event::Recent(c) => Some(c),
                            _ => None,
                        })
                        .sum()
                };
                prop_assert_eq!(recent_sum(&input), recent_sum(&output));
            }
        }
    }
}

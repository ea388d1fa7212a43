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

//! Sequence sets (`1,3:5,7:*`).
//!
//! A set is parsed once with `*` left symbolic, then resolved against the
//! current maximum sequence number or UID of the selected folder.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::*;

/// One endpoint of a sequence range as written by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqNum {
    Value(u32),
    /// `*`, the largest number in use.
    Max,
}

impl SeqNum {
    fn resolve(self, max: u32) -> u32 {
        match self {
            SeqNum::Value(v) => v,
            SeqNum::Max => max,
        }
    }
}

/// A sequence set as written by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceSet(pub Vec<(SeqNum, SeqNum)>);

impl SequenceSet {
    /// Parses the wire form. Returns `None` on any syntax error, including
    /// the number 0.
    pub fn parse(raw: &str) -> Option<Self> {
        fn endpoint(s: &str) -> Option<SeqNum> {
            if "*" == s {
                Some(SeqNum::Max)
            } else if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok().filter(|&v| v > 0).map(SeqNum::Value)
            } else {
                None
            }
        }

        let mut parts = Vec::new();
        for part in raw.split(',') {
            let part = match part.split_once(':') {
                None => {
                    let only = endpoint(part)?;
                    (only, only)
                },
                Some((start, end)) => (endpoint(start)?, endpoint(end)?),
            };
            parts.push(part);
        }

        Some(SequenceSet(parts))
    }

    /// Resolves `*` against `max`.
    ///
    /// Endpoints may be given in either order. RFC 3501 requires `n:*`
    /// to include `max` even when `n > max`, so a range whose low end is
    /// beyond `max` still matches `max` if the other end is `*`.
    pub fn resolve(&self, max: u32) -> SeqRange {
        let mut range = SeqRange::new();
        for &(a, b) in &self.0 {
            let (a, b) = (a.resolve(max), b.resolve(max));
            range.insert(a.min(b), a.max(b));
        }
        range
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn endpoint(f: &mut fmt::Formatter, n: SeqNum) -> fmt::Result {
            match n {
                SeqNum::Value(v) => write!(f, "{}", v),
                SeqNum::Max => write!(f, "*"),
            }
        }

        for (ix, &(a, b)) in self.0.iter().enumerate() {
            if ix > 0 {
                write!(f, ",")?;
            }
            endpoint(f, a)?;
            if a != b {
                write!(f, ":")?;
                endpoint(f, b)?;
            }
        }
        Ok(())
    }
}

/// A resolved set of numbers, maintained as a minimal sorted set of
/// inclusive ranges.
///
/// The `Display` format is the minimal wire form. IMAP cannot represent an
/// empty set; `Display` produces an empty string in that case.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SeqRange {
    parts: BTreeMap<u32, u32>,
}

impl SeqRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the inclusive range `start..=end`, fusing it with any
    /// overlapping or adjacent ranges.
    pub fn insert(&mut self, start: u32, mut end: u32) {
        debug_assert!(start <= end);

        // Absorb following ranges that touch this one.
        loop {
            let following = self
                .parts
                .range((Excluded(start), Unbounded))
                .next()
                .map(|(&s, &e)| (s, e));
            match following {
                Some((next_start, next_end))
                    if next_start <= end.saturating_add(1) =>
                {
                    end = end.max(next_end);
                    self.parts.remove(&next_start);
                },
                _ => break,
            }
        }

        if let Some((_, prev_end)) = self.parts.range_mut(..=start).next_back()
        {
            if prev_end.saturating_add(1) >= start {
                *prev_end = (*prev_end).max(end);
                return;
            }
        }

        self.parts.insert(start, end);
    }

    pub fn append(&mut self, item: u32) {
        self.insert(item, item);
    }

    pub fn contains(&self, v: u32) -> bool {
        self.parts
            .range(..=v)
            .next_back()
            .map_or(false, |(_, &end)| end >= v)
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts
            .iter()
            .map(|(&start, &end)| (end - start) as usize + 1)
            .sum()
    }

    /// Iterates the members in ascending order.
    pub fn items(&self) -> impl Iterator<Item = u32> + '_ {
        self.parts.iter().flat_map(|(&start, &end)| start..=end)
    }
}

impl FromIterator<u32> for SeqRange {
    fn from_iter<I: IntoIterator<Item = u32>>(it: I) -> Self {
        let mut this = SeqRange::new();
        for v in it {
            this.append(v);
        }
        this
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (ix, (&start, &end)) in self.parts.iter().enumerate() {
            let delim = if 0 == ix { "" } else { "," };
            if start == end {
                write!(f, "{}{}", delim, start)?;
            } else {
                write!(f, "{}{}:{}", delim, start, end)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_and_resolve() {
        let set = SequenceSet::parse("1,3:5,9:*").unwrap();
        assert_eq!("1,3:5,9:*", set.to_string());
        assert_eq!("1,3:5,9:12", set.resolve(12).to_string());

        // n:* with n beyond the maximum still names the maximum.
        assert_eq!("4:7", SequenceSet::parse("7:*").unwrap().resolve(4).to_string());
        assert_eq!("2:5", SequenceSet::parse("5:2").unwrap().resolve(9).to_string());
        assert_eq!("1:4", SequenceSet::parse("1:2,3,4").unwrap().resolve(9).to_string());

        assert!(SequenceSet::parse("").is_none());
        assert!(SequenceSet::parse("0").is_none());
        assert!(SequenceSet::parse("1:").is_none());
        assert!(SequenceSet::parse("1:2:3").is_none());
        assert!(SequenceSet::parse("a").is_none());
        assert!(SequenceSet::parse("+1").is_none());
    }

    #[test]
    fn range_ops() {
        let r = [5, 1, 2, 3, 9, 4].iter().copied().collect::<SeqRange>();
        assert_eq!("1:5,9", r.to_string());
        assert_eq!(6, r.len());
        assert!(r.contains(4));
        assert!(!r.contains(6));
        assert_eq!(vec![1, 2, 3, 4, 5, 9], r.items().collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn range_matches_set(
            ranges in prop::collection::vec((1u32..200, 0u32..20), 0..20)
        ) {
            let mut expected = BTreeSet::new();
            let mut range = SeqRange::new();
            for &(start, len) in &ranges {
                range.insert(start, start + len);
                expected.extend(start..=start + len);
            }

            prop_assert_eq!(
                expected.iter().copied().collect::<Vec<_>>(),
                range.items().collect::<Vec<_>>()
            );
            prop_assert_eq!(expected.len(), range.len());

            // The minimal form has no adjacent or overlapping parts.
            let parts = range.parts.iter().collect::<Vec<_>>();
            for w in parts.windows(2) {
                prop_assert!(*w[0].1 + 1 < *w[1].0);
            }
        }
    }
}

// matches.rs - Match results: per-slot capture spans and accessors.
//
// Spans are flat (start, length) i32 pairs, several per slot when a group
// captured inside a loop. Balanced-group deletion writes a negative
// placeholder pair (-3 - index encoding); `tidy` compacts those away after
// a successful match, so the public accessors only ever see real spans.

use smallvec::SmallVec;

use crate::error::Error;
use crate::program::Program;
use crate::runner;

/// A capture span resolved against the subject text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Group<'t> {
    text: &'t str,
    start: usize,
    len: usize,
}

impl<'t> Group<'t> {
    /// Byte offset of the start of the span.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Byte offset one past the end of the span.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }

    /// The captured text.
    pub fn as_str(&self) -> &'t str {
        &self.text[self.start..self.start + self.len]
    }
}

/// The outcome of one successful search: every capture slot's spans plus
/// the cursor position the next search resumes from.
#[derive(Clone, Debug)]
pub struct Match<'r, 't> {
    program: &'r Program,
    text: &'t str,
    text_beg: usize,
    text_end: usize,
    text_pos: usize,
    spans: Vec<SmallVec<[i32; 8]>>,
    counts: Vec<usize>,
    balancing: bool,
}

impl<'r, 't> Match<'r, 't> {
    pub(crate) fn new(
        program: &'r Program,
        text: &'t str,
        text_beg: usize,
        text_end: usize,
    ) -> Match<'r, 't> {
        Match {
            program,
            text,
            text_beg,
            text_end,
            text_pos: text_beg,
            spans: vec![SmallVec::new(); program.cap_count],
            counts: vec![0; program.cap_count],
            balancing: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        for count in &mut self.counts {
            *count = 0;
        }
        self.balancing = false;
    }

    // === Runner-side span bookkeeping ===

    pub(crate) fn add_match(&mut self, cap: i32, start: i32, len: i32) {
        let cap = cap as usize;
        let at = self.counts[cap] * 2;
        let spans = &mut self.spans[cap];
        if spans.len() < at + 2 {
            spans.resize(at + 2, 0);
        }
        spans[at] = start;
        spans[at + 1] = len;
        self.counts[cap] += 1;
    }

    /// Record a balancing deletion for `cap`: a placeholder that cancels the
    /// last real span during `tidy`.
    pub(crate) fn balance_match(&mut self, cap: i32) {
        self.balancing = true;
        let c = cap as usize;
        let mut target = self.counts[c] as i32 * 2 - 2;
        if self.spans[c][target as usize] < 0 {
            target = -3 - self.spans[c][target as usize];
        }
        target -= 2;
        if target >= 0 && self.spans[c][target as usize] < 0 {
            let start = self.spans[c][target as usize];
            let len = self.spans[c][target as usize + 1];
            self.add_match(cap, start, len);
        } else {
            self.add_match(cap, -3 - target, -4 - target);
        }
    }

    pub(crate) fn remove_match(&mut self, cap: i32) {
        self.counts[cap as usize] -= 1;
    }

    pub(crate) fn is_matched(&self, cap: i32) -> bool {
        let c = cap as usize;
        c < self.counts.len()
            && self.counts[c] > 0
            && self.spans[c][self.counts[c] * 2 - 1] != -2
    }

    pub(crate) fn match_index(&self, cap: i32) -> i32 {
        let c = cap as usize;
        let v = self.spans[c][self.counts[c] * 2 - 2];
        if v >= 0 {
            v
        } else {
            self.spans[c][(-3 - v) as usize]
        }
    }

    pub(crate) fn match_length(&self, cap: i32) -> i32 {
        let c = cap as usize;
        let v = self.spans[c][self.counts[c] * 2 - 1];
        if v >= 0 {
            v
        } else {
            self.spans[c][(-3 - v) as usize]
        }
    }

    /// Compact away balancing placeholders and record the final cursor.
    pub(crate) fn tidy(&mut self, text_pos: usize) {
        self.text_pos = text_pos;
        if !self.balancing {
            return;
        }
        for cap in 0..self.counts.len() {
            let limit = self.counts[cap] * 2;
            let spans = &mut self.spans[cap];
            let mut i = 0;
            while i < limit && spans[i] >= 0 {
                i += 1;
            }
            let mut j = i as i32;
            while i < limit {
                if spans[i] < 0 {
                    // a placeholder cell eats one previously written cell
                    j -= 1;
                } else {
                    if i as i32 != j {
                        spans[j as usize] = spans[i];
                    }
                    j += 1;
                }
                i += 1;
            }
            self.counts[cap] = (j / 2) as usize;
        }
        self.balancing = false;
    }

    // === Public accessors ===

    /// The full-match span (slot 0).
    pub fn full(&self) -> Group<'t> {
        self.group(0).unwrap_or(Group {
            text: self.text,
            start: self.text_pos,
            len: 0,
        })
    }

    /// Byte offset where the match starts.
    pub fn start(&self) -> usize {
        self.full().start()
    }

    /// Byte offset one past where the match ends.
    pub fn end(&self) -> usize {
        self.full().end()
    }

    /// Length of the match in bytes.
    pub fn len(&self) -> usize {
        self.full().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The matched text.
    pub fn as_str(&self) -> &'t str {
        self.full().as_str()
    }

    /// Number of capture slots, including slot 0.
    pub fn groups_len(&self) -> usize {
        self.counts.len()
    }

    /// Last-recorded span of a slot, or `None` if the group did not
    /// participate in the match.
    pub fn group(&self, slot: i32) -> Option<Group<'t>> {
        if !self.is_matched(slot) {
            return None;
        }
        Some(Group {
            text: self.text,
            start: self.match_index(slot) as usize,
            len: self.match_length(slot) as usize,
        })
    }

    /// Span of a group addressed by its source number (honors the sparse
    /// capture map).
    pub fn group_numbered(&self, number: i32) -> Option<Group<'t>> {
        self.group(self.program.capture_slot(number)?)
    }

    /// Span of a named group.
    pub fn group_named(&self, name: &str) -> Option<Group<'t>> {
        self.group(self.program.capture_slot_named(name)?)
    }

    /// Every span a slot recorded, in source-text order. Captures inside
    /// loops record one span per iteration.
    pub fn group_captures(&self, slot: i32) -> Vec<Group<'t>> {
        let c = slot as usize;
        if c >= self.counts.len() {
            return Vec::new();
        }
        (0..self.counts[c])
            .map(|i| Group {
                text: self.text,
                start: self.spans[c][i * 2] as usize,
                len: self.spans[c][i * 2 + 1] as usize,
            })
            .collect()
    }

    /// Cursor position the search ended at; the restart point for
    /// [`Match::next_match`].
    pub fn text_pos(&self) -> usize {
        self.text_pos
    }

    /// Search for the next match after this one. Progress is guaranteed: an
    /// empty match advances the restart position by one character, so a
    /// chain of `next_match` calls always terminates.
    pub fn next_match(&self) -> Result<Option<Match<'r, 't>>, Error> {
        let rtl = self.program.right_to_left;
        let mut start = self.text_pos;
        if self.len() == 0 {
            // empty match: bump one character in scan direction
            if !rtl {
                if start >= self.text_end {
                    return Ok(None);
                }
                start += runner::char_len_at(self.text, start);
            } else {
                if start <= self.text_beg {
                    return Ok(None);
                }
                start -= runner::char_len_before(self.text, start);
            }
        }
        runner::scan(
            self.program,
            self.text,
            self.text_beg,
            self.text_end,
            start,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn program(cap_count: usize) -> Program {
        Program {
            codes: Vec::new(),
            strings: Vec::new(),
            classes: Vec::new(),
            cap_count,
            caps: None,
            cap_names: None,
            track_reserve: 0,
            prefix: None,
            first_chars: None,
            anchors: 0,
            right_to_left: false,
            options: 0,
        }
    }

    #[test]
    fn add_and_query_spans() {
        let prog = program(2);
        let mut m = Match::new(&prog, "hello", 0, 5);
        assert!(!m.is_matched(1));
        m.add_match(1, 1, 3);
        assert!(m.is_matched(1));
        assert_eq!(m.match_index(1), 1);
        assert_eq!(m.match_length(1), 3);
        m.tidy(4);
        assert_eq!(m.group(1).unwrap().as_str(), "ell");
        assert!(m.group(0).is_none());
    }

    #[test]
    fn remove_rolls_back() {
        let prog = program(2);
        let mut m = Match::new(&prog, "abc", 0, 3);
        m.add_match(1, 0, 1);
        m.add_match(1, 1, 1);
        assert_eq!(m.match_index(1), 1);
        m.remove_match(1);
        assert_eq!(m.match_index(1), 0);
        m.remove_match(1);
        assert!(!m.is_matched(1));
    }

    #[test]
    fn balance_and_tidy_cancel_spans() {
        let prog = program(2);
        let mut m = Match::new(&prog, "abcdef", 0, 6);
        m.add_match(1, 0, 2);
        m.add_match(1, 2, 2);
        // delete the latest span, as a balancing group does
        m.balance_match(1);
        assert!(m.is_matched(1));
        m.tidy(6);
        let caps = m.group_captures(1);
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].range(), 0..2);
    }

    #[test]
    fn balance_to_empty_reports_unmatched() {
        let prog = program(2);
        let mut m = Match::new(&prog, "ab", 0, 2);
        m.add_match(1, 0, 1);
        m.balance_match(1);
        // the placeholder pair (-1, -2) marks the slot as balanced empty
        assert!(!m.is_matched(1));
        m.tidy(2);
        assert!(m.group(1).is_none());
        assert!(m.group_captures(1).is_empty());
    }

    #[test]
    fn multiple_captures_preserved_in_order() {
        let prog = program(2);
        let mut m = Match::new(&prog, "aaa", 0, 3);
        m.add_match(1, 0, 1);
        m.add_match(1, 1, 1);
        m.add_match(1, 2, 1);
        m.tidy(3);
        let caps = m.group_captures(1);
        assert_eq!(caps.len(), 3);
        assert_eq!(caps[0].start(), 0);
        assert_eq!(caps[2].start(), 2);
        // last-recorded span is the reported one
        assert_eq!(m.group(1).unwrap().start(), 2);
    }
}

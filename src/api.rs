// api.rs - Public surface: compiled Regex, searches, match iteration.

use std::time::Duration;

use crate::error::Error;
use crate::matches::Match;
use crate::program::Program;
use crate::runner;
use crate::syntax::SyntaxTree;
use crate::writer::{self, ScanHints};

/// A compiled pattern, ready to search. Immutable and shareable across
/// threads; each search carries its own state.
///
/// The pattern arrives as a [`SyntaxTree`](crate::syntax::SyntaxTree) built
/// by a parser (or by hand in tests); no surface syntax is parsed here.
#[derive(Clone, Debug)]
pub struct Regex {
    program: Program,
}

impl Regex {
    /// Compile a tree with no scan hints.
    pub fn from_tree(tree: &SyntaxTree) -> Result<Regex, Error> {
        Ok(Regex {
            program: writer::compile(tree)?,
        })
    }

    /// Compile a tree and attach a prefix analyzer's hints.
    pub fn with_hints(tree: &SyntaxTree, hints: ScanHints) -> Result<Regex, Error> {
        Ok(Regex {
            program: writer::compile_with_hints(tree, hints)?,
        })
    }

    /// The compiled program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Search `text[start..end]`, beginning at `start` (at `end` for a
    /// right-to-left pattern), with an optional deadline.
    ///
    /// `Ok(None)` is a clean "no match"; `Err` reports only the timeout or
    /// an engine bug.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or not on character boundaries.
    pub fn find_range<'r, 't>(
        &'r self,
        text: &'t str,
        start: usize,
        end: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Match<'r, 't>>, Error> {
        assert!(start <= end && end <= text.len(), "search range out of bounds");
        assert!(
            text.is_char_boundary(start) && text.is_char_boundary(end),
            "search range not on character boundaries"
        );
        let scan_start = if self.program.right_to_left { end } else { start };
        runner::scan(&self.program, text, start, end, scan_start, timeout)
    }

    /// First match in `text`, or `None`.
    pub fn find<'r, 't>(&'r self, text: &'t str) -> Option<Match<'r, 't>> {
        self.find_range(text, 0, text.len(), None).ok().flatten()
    }

    /// Whether `text` contains a match.
    pub fn is_match(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    /// First match with capture groups; alias of [`Regex::find`], which
    /// always records captures.
    pub fn captures<'r, 't>(&'r self, text: &'t str) -> Option<Match<'r, 't>> {
        self.find(text)
    }

    /// Iterate over non-overlapping matches. Empty matches advance by one
    /// character, so iteration always terminates.
    pub fn find_iter<'r, 't>(&'r self, text: &'t str) -> FindIter<'r, 't> {
        FindIter {
            regex: self,
            text,
            last: None,
            started: false,
        }
    }
}

/// Iterator over non-overlapping matches, chained through
/// [`Match::next_match`].
pub struct FindIter<'r, 't> {
    regex: &'r Regex,
    text: &'t str,
    last: Option<Match<'r, 't>>,
    started: bool,
}

impl<'r, 't> Iterator for FindIter<'r, 't> {
    type Item = Match<'r, 't>;

    fn next(&mut self) -> Option<Match<'r, 't>> {
        let found = match &self.last {
            Some(prev) => prev.next_match().ok().flatten(),
            None if !self.started => {
                self.started = true;
                self.regex
                    .find_range(self.text, 0, self.text.len(), None)
                    .ok()
                    .flatten()
            }
            None => None,
        };
        self.last = found.clone();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charclass::CharClass;
    use crate::syntax::{options, Node, SyntaxTree, MAX_REPEAT};

    fn digits() -> Regex {
        // \d+
        let tree = SyntaxTree::new(
            Node::Setloop { class: CharClass::digit(), min: 1, max: MAX_REPEAT, opts: 0 },
            options::NONE,
            1,
        );
        Regex::from_tree(&tree).unwrap()
    }

    #[test]
    fn find_and_accessors() {
        let re = digits();
        let m = re.find("abc 123 def").unwrap();
        assert_eq!(m.as_str(), "123");
        assert_eq!(m.start(), 4);
        assert_eq!(m.end(), 7);
        assert_eq!(m.len(), 3);
        assert!(!m.is_empty());
    }

    #[test]
    fn no_match_returns_none() {
        let re = digits();
        assert!(re.find("no numbers here").is_none());
        assert!(!re.is_match("xyz"));
    }

    #[test]
    fn find_iter_collects_all() {
        let re = digits();
        let found: Vec<&str> = re.find_iter("1 + 22 = 333").map(|m| m.as_str()).collect();
        assert_eq!(found, vec!["1", "22", "333"]);
    }

    #[test]
    fn find_iter_empty_matches_advance() {
        // a* yields an empty match at every position of "bb" plus the ends
        let tree = SyntaxTree::new(
            Node::Oneloop { ch: 'a', min: 0, max: MAX_REPEAT, opts: 0 },
            options::NONE,
            1,
        );
        let re = Regex::from_tree(&tree).unwrap();
        let positions: Vec<usize> = re.find_iter("bb").map(|m| m.start()).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn find_range_window() {
        let re = digits();
        let m = re.find_range("12 34 56", 2, 5, None).unwrap().unwrap();
        assert_eq!(m.as_str(), "34");
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn find_range_checks_bounds() {
        let re = digits();
        let _ = re.find_range("abc", 0, 9, None);
    }

    #[test]
    fn next_match_progresses() {
        let re = digits();
        let text = "1a22";
        let first = re.find(text).unwrap();
        assert_eq!(first.as_str(), "1");
        let second = first.next_match().unwrap().unwrap();
        assert_eq!(second.as_str(), "22");
        assert!(second.next_match().unwrap().is_none());
    }
}

// charclass.rs - Character classes: builder, canonical blob encoding, membership.
//
// A class is serialized as a self-delimited run of u32 cells:
//
//   [0] flags (bit 0 = negate)
//   [1] length of the range-boundary list
//   [2] length of the category list
//   ...  sorted boundary scalars; a scalar is in the range portion iff the
//        index of the first boundary greater than it is odd
//   ...  category cells: +k / -k include/exclude general category k-1,
//        +100 / -100 any/none whitespace, 0 brackets an OR-joined group
//   ...  optional subtrahend blob of the same shape
//
// Cells are u32 rather than string chars so that boundary values may name
// any scalar plus the exclusive upper bound U+110000; category cells are
// i32 values stored in two's complement.

use crate::unicode::{self, Category};

const FLAGS: usize = 0;
const SET_LENGTH: usize = 1;
const CATEGORY_LENGTH: usize = 2;
const SET_START: usize = 3;

const NEGATE: u32 = 1;

/// Category cell meaning "any whitespace" (negated: "no whitespace").
pub const SPACE_CODE: i32 = 100;

/// One past the last scalar value, used as an open range's upper boundary.
const LAST_PLUS_ONE: u32 = 0x110000;

/// An immutable, canonical character class.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CharClass {
    blob: Vec<u32>,
}

impl CharClass {
    pub(crate) fn from_blob(blob: Vec<u32>) -> CharClass {
        CharClass { blob }
    }

    /// The raw cell encoding.
    pub fn blob(&self) -> &[u32] {
        &self.blob
    }

    /// Membership test.
    pub fn contains(&self, ch: char) -> bool {
        contains_at(&self.blob, 0, ch)
    }

    pub fn is_negated(&self) -> bool {
        self.blob[FLAGS] & NEGATE != 0
    }

    pub fn has_subtraction(&self) -> bool {
        let end = SET_START + self.blob[SET_LENGTH] as usize + self.blob[CATEGORY_LENGTH] as usize;
        self.blob.len() > end
    }

    /// Same class with the outer negate flag flipped.
    pub fn negated(&self) -> CharClass {
        let mut blob = self.blob.clone();
        blob[FLAGS] ^= NEGATE;
        CharClass { blob }
    }

    /// If the class denotes exactly one scalar, that scalar.
    pub fn singleton(&self) -> Option<char> {
        if self.is_negated() || self.has_subtraction() {
            return None;
        }
        if self.blob[CATEGORY_LENGTH] != 0 || self.blob[SET_LENGTH] != 2 {
            return None;
        }
        let lo = self.blob[SET_START];
        let hi = self.blob[SET_START + 1];
        if hi == lo + 1 {
            char::from_u32(lo)
        } else {
            None
        }
    }

    /// The class augmented with the lowercase image of every member, the
    /// augmentation applied recursively to any subtrahend.
    pub fn case_folded(&self) -> CharClass {
        let mut builder = self.to_builder();
        builder.add_lowercase();
        builder.finish()
    }

    fn to_builder(&self) -> CharClassBuilder {
        let set_len = self.blob[SET_LENGTH] as usize;
        let cat_len = self.blob[CATEGORY_LENGTH] as usize;
        let mut builder = CharClassBuilder::new();
        builder.negate(self.is_negated());
        let bounds = &self.blob[SET_START..SET_START + set_len];
        for pair in bounds.chunks(2) {
            let lo = pair[0];
            let hi = if pair.len() == 2 { pair[1] - 1 } else { LAST_PLUS_ONE - 1 };
            builder.ranges.push((lo, hi));
        }
        builder.canonical = true; // a serialized blob is canonical already
        builder
            .categories
            .extend(self.blob[SET_START + set_len..SET_START + set_len + cat_len].iter().copied());
        let end = SET_START + set_len + cat_len;
        if self.blob.len() > end {
            builder.subtractor = Some(CharClass::from_blob(self.blob[end..].to_vec()));
        }
        builder
    }

    // === Stock classes ===

    /// `\d`: decimal digit.
    pub fn digit() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_category(Category::DecimalDigitNumber);
        b.finish()
    }

    /// `\D`.
    pub fn not_digit() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_not_category(Category::DecimalDigitNumber);
        b.finish()
    }

    /// `\d` under ECMA rules: ASCII digits only.
    pub fn ecma_digit() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_range('0', '9');
        b.finish()
    }

    /// `\w`: word character.
    pub fn word() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_word_categories();
        b.finish()
    }

    /// `\w` under ECMA rules.
    pub fn ecma_word() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_range('0', '9');
        b.add_range('A', 'Z');
        b.add_char('_');
        b.add_range('a', 'z');
        b.finish()
    }

    /// `\s`: whitespace.
    pub fn space() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_space();
        b.finish()
    }

    /// `\S`.
    pub fn not_space() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_not_space();
        b.finish()
    }

    /// `\s` under ECMA rules.
    pub fn ecma_space() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_range('\u{9}', '\u{D}');
        b.add_char(' ');
        b.finish()
    }

    /// `.` with the singleline option: every scalar.
    pub fn any() -> CharClass {
        let mut b = CharClassBuilder::new();
        b.add_range('\0', '\u{10FFFF}');
        b.finish()
    }
}

fn contains_at(blob: &[u32], start: usize, ch: char) -> bool {
    let set_len = blob[start + SET_LENGTH] as usize;
    let cat_len = blob[start + CATEGORY_LENGTH] as usize;
    let end = start + SET_START + set_len + cat_len;

    let mut subtracted = false;
    if blob.len() > end {
        subtracted = contains_at(blob, end, ch);
    }

    let mut found = in_ranges(&blob[start + SET_START..start + SET_START + set_len], ch);
    if !found && cat_len != 0 {
        found = in_categories(
            &blob[start + SET_START + set_len..start + SET_START + set_len + cat_len],
            ch,
        );
    }
    if blob[start + FLAGS] & NEGATE != 0 {
        found = !found;
    }
    found && !subtracted
}

fn in_ranges(bounds: &[u32], ch: char) -> bool {
    let code = ch as u32;
    let mut lo = 0usize;
    let mut hi = bounds.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if code < bounds[mid] {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    // `lo` is the index of the first boundary greater than `code`.
    lo % 2 == 1
}

fn in_categories(cells: &[u32], ch: char) -> bool {
    let cat = unicode::general_category(ch) as i32;
    let mut i = 0usize;
    while i < cells.len() {
        let cur = cells[i] as i32;
        if cur == 0 {
            if in_category_group(cat, ch, cells, &mut i) {
                return true;
            }
        } else if cur > 0 {
            if cur == SPACE_CODE {
                if ch.is_whitespace() {
                    return true;
                }
            } else if cat == cur - 1 {
                return true;
            }
        } else if cur == -SPACE_CODE {
            if !ch.is_whitespace() {
                return true;
            }
        } else if cat != -1 - cur {
            return true;
        }
        i += 1;
    }
    false
}

// `*i` points at the opening zero; leaves it at the closing zero.
fn in_category_group(cat: i32, _ch: char, cells: &[u32], i: &mut usize) -> bool {
    *i += 1;
    if (cells[*i] as i32) > 0 {
        // positive group: member of any listed category
        let mut answer = false;
        loop {
            let cur = cells[*i] as i32;
            if cur == 0 {
                break;
            }
            if !answer && cat == cur - 1 {
                answer = true;
            }
            *i += 1;
        }
        answer
    } else {
        // negative group: member of none of the listed categories
        let mut answer = true;
        loop {
            let cur = cells[*i] as i32;
            if cur == 0 {
                break;
            }
            if answer && cat == -1 - cur {
                answer = false;
            }
            *i += 1;
        }
        answer
    }
}

/// Accumulates class content and serializes it canonically.
///
/// The builder tracks whether its range list is still canonical (sorted,
/// non-overlapping, non-abutting); appends in ascending order keep the flag
/// set and serialisation skips the normalisation pass.
#[derive(Clone, Debug, Default)]
pub struct CharClassBuilder {
    ranges: Vec<(u32, u32)>, // inclusive
    categories: Vec<u32>,    // i32 cells in two's complement
    negate: bool,
    canonical: bool,
    subtractor: Option<CharClass>,
}

impl CharClassBuilder {
    pub fn new() -> CharClassBuilder {
        CharClassBuilder {
            ranges: Vec::new(),
            categories: Vec::new(),
            negate: false,
            canonical: true,
            subtractor: None,
        }
    }

    pub fn add_char(&mut self, ch: char) {
        self.push_range(ch as u32, ch as u32);
    }

    pub fn add_range(&mut self, lo: char, hi: char) {
        self.push_range(lo as u32, hi as u32);
    }

    fn push_range(&mut self, lo: u32, hi: u32) {
        debug_assert!(lo <= hi);
        if let Some(&(_, last_hi)) = self.ranges.last() {
            if lo <= last_hi.saturating_add(1) {
                self.canonical = false;
            }
        }
        self.ranges.push((lo, hi));
    }

    pub fn add_category(&mut self, cat: Category) {
        self.categories.push((cat as i32 + 1) as u32);
    }

    pub fn add_not_category(&mut self, cat: Category) {
        self.categories.push((-(cat as i32 + 1)) as u32);
    }

    pub fn add_space(&mut self) {
        self.categories.push(SPACE_CODE as u32);
    }

    pub fn add_not_space(&mut self) {
        self.categories.push((-SPACE_CODE) as u32);
    }

    /// The word-character category group: letters, non-spacing marks,
    /// decimal digits, connector punctuation.
    pub fn add_word_categories(&mut self) {
        use Category::*;
        self.categories.push(0);
        for cat in [
            UppercaseLetter,
            LowercaseLetter,
            TitlecaseLetter,
            ModifierLetter,
            OtherLetter,
            NonSpacingMark,
            DecimalDigitNumber,
            ConnectorPunctuation,
        ] {
            self.categories.push((cat as i32 + 1) as u32);
        }
        self.categories.push(0);
    }

    /// Merge a canonical, non-negated class into this builder.
    pub fn add_class(&mut self, other: &CharClass) {
        debug_assert!(!other.is_negated() && !other.has_subtraction());
        let other_b = other.to_builder();
        for (lo, hi) in other_b.ranges {
            self.push_range(lo, hi);
        }
        self.categories.extend(other_b.categories);
    }

    pub fn negate(&mut self, yes: bool) {
        self.negate = yes;
    }

    /// Subtract `sub` from the finished class. The subtrahend keeps its own
    /// negate flag; the outer flag never applies to it.
    pub fn subtract(&mut self, sub: CharClass) {
        self.subtractor = Some(sub);
    }

    /// For every scalar currently in the range list, add its lowercase image
    /// under the interval table. Recurses into the subtrahend.
    pub fn add_lowercase(&mut self) {
        self.canonical = false;
        let images: Vec<(u32, u32)> = self
            .ranges
            .iter()
            .flat_map(|&(lo, hi)| unicode::lower_images(lo, hi))
            .collect();
        self.ranges.extend(images);
        if let Some(sub) = self.subtractor.take() {
            self.subtractor = Some(sub.case_folded());
        }
    }

    fn canonicalize(&mut self) {
        if self.canonical || self.ranges.len() < 2 {
            self.canonical = true;
            return;
        }
        self.ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for &(lo, hi) in self.ranges.iter() {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => {
                    if hi > last.1 {
                        last.1 = hi;
                    }
                }
                _ => merged.push((lo, hi)),
            }
        }
        self.ranges = merged;
        self.canonical = true;
    }

    /// Canonicalize and serialize.
    pub fn finish(mut self) -> CharClass {
        self.canonicalize();
        let mut blob = Vec::with_capacity(SET_START + self.ranges.len() * 2 + self.categories.len());
        blob.push(if self.negate { NEGATE } else { 0 });
        blob.push((self.ranges.len() * 2) as u32);
        blob.push(self.categories.len() as u32);
        for &(lo, hi) in &self.ranges {
            blob.push(lo);
            blob.push(hi + 1);
        }
        blob.extend(&self.categories);
        if let Some(sub) = self.subtractor {
            blob.extend(sub.blob());
        }
        CharClass { blob }
    }
}

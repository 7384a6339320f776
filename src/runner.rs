// runner.rs - The stack-machine interpreter.
//
// One search = scan() driving go() at successive start positions. Forward
// execution walks the instruction stream; any failed test falls into the
// backtrack dispatch, which pops one frame off the track and resumes the
// instruction it names in its Back (or, for negative positions, Back2)
// variant. Three growable stores carry all state:
//
//   track - backtrack frames, popped by the dispatch switch
//   stack - operand bookkeeping (marks, counters, snapshots)
//   crawl - capture-write log, unwound one entry per Uncapture
//
// All three grow downward: the position index is the next free slot and the
// top of the store is the lowest used index. Doubling recopies the live
// region to the high end, which keeps distances-from-the-bottom stable, so
// the snapshots Setjump records stay valid across growth.

use std::time::{Duration, Instant};

use log::trace;
use memchr::{memchr, memchr2, memrchr, memrchr2};

use crate::error::Error;
use crate::matches::Match;
use crate::program::{anchor, op, Program};
use crate::syntax::options;
use crate::unicode;

const TIMEOUT_CHECK_INTERVAL: u32 = 256;
const MIN_TRACK_SIZE: usize = 32;
const MIN_CRAWL_SIZE: usize = 32;

/// Which variant of an instruction the dispatch is entering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Back {
    None,
    One,
    Two,
}

/// Byte length of the scalar starting at `pos`.
pub(crate) fn char_len_at(text: &str, pos: usize) -> usize {
    match text[pos..].chars().next() {
        Some(c) => c.len_utf8(),
        None => 1,
    }
}

/// Byte length of the scalar ending at `pos`.
pub(crate) fn char_len_before(text: &str, pos: usize) -> usize {
    match text[..pos].chars().next_back() {
        Some(c) => c.len_utf8(),
        None => 1,
    }
}

#[inline]
fn char_right(text: &str, pos: usize) -> (char, usize) {
    match text[pos..].chars().next() {
        Some(c) => (c, c.len_utf8()),
        None => ('\0', 1),
    }
}

#[inline]
fn char_left(text: &str, pos: usize) -> (char, usize) {
    match text[..pos].chars().next_back() {
        Some(c) => (c, c.len_utf8()),
        None => ('\0', 1),
    }
}

/// Search `text[beg..end]` for one match starting no earlier than `start`
/// (no later than, for a right-to-left program).
pub(crate) fn scan<'r, 't>(
    program: &'r Program,
    text: &'t str,
    beg: usize,
    end: usize,
    start: usize,
    timeout: Option<Duration>,
) -> Result<Option<Match<'r, 't>>, Error> {
    Runner::new(program, text, beg, end, start, timeout).run()
}

struct Runner<'r, 't> {
    prog: &'r Program,
    text: &'t str,
    bytes: &'t [u8],
    beg: usize,
    end: usize,
    start: usize,
    pos: usize,

    // per-opcode modifier state
    rtl: bool,
    ci: bool,

    track: Vec<i32>,
    track_pos: usize,
    stack: Vec<i32>,
    stack_pos: usize,
    crawl: Vec<i32>,
    crawl_pos: usize,

    m: Match<'r, 't>,

    timeout: Duration,
    deadline: Option<Instant>,
    tick: u32,
}

impl<'r, 't> Runner<'r, 't> {
    fn new(
        prog: &'r Program,
        text: &'t str,
        beg: usize,
        end: usize,
        start: usize,
        timeout: Option<Duration>,
    ) -> Runner<'r, 't> {
        let track_size = (prog.track_reserve * 8).max(MIN_TRACK_SIZE);
        let stack_size = (track_size / 2).max(MIN_TRACK_SIZE);
        Runner {
            prog,
            text,
            bytes: text.as_bytes(),
            beg,
            end,
            start,
            pos: start,
            rtl: false,
            ci: false,
            track: vec![0; track_size],
            track_pos: track_size,
            stack: vec![0; stack_size],
            stack_pos: stack_size,
            crawl: vec![0; MIN_CRAWL_SIZE],
            crawl_pos: MIN_CRAWL_SIZE,
            m: Match::new(prog, text, beg, end),
            timeout: timeout.unwrap_or_default(),
            deadline: timeout.map(|t| Instant::now() + t),
            tick: 0,
        }
    }

    fn run(mut self) -> Result<Option<Match<'r, 't>>, Error> {
        let stop = if self.prog.right_to_left { self.beg } else { self.end };
        loop {
            if self.find_first_char() {
                self.check_timeout()?;
                self.reset_state();
                if self.go()? {
                    let pos = self.pos;
                    let mut m = self.m;
                    m.tidy(pos);
                    return Ok(Some(m));
                }
            }
            if self.pos == stop {
                return Ok(None);
            }
            self.pos = if self.prog.right_to_left {
                self.pos - char_len_before(self.text, self.pos)
            } else {
                self.pos + char_len_at(self.text, self.pos)
            };
        }
    }

    fn reset_state(&mut self) {
        self.track_pos = self.track.len();
        self.stack_pos = self.stack.len();
        self.crawl_pos = self.crawl.len();
        self.m.reset();
    }

    #[inline]
    fn check_timeout(&mut self) -> Result<(), Error> {
        if let Some(deadline) = self.deadline {
            self.tick += 1;
            if self.tick >= TIMEOUT_CHECK_INTERVAL {
                self.tick = 0;
                if Instant::now() >= deadline {
                    return Err(Error::RuntimeLimit { limit: self.timeout });
                }
            }
        }
        Ok(())
    }

    // === Acceleration ===

    /// Advance to a plausible starting position. Behavior is identical with
    /// all hints absent; the hints only skip positions that cannot start a
    /// match.
    fn find_first_char(&mut self) -> bool {
        let prog = self.prog;
        if prog.anchors & (anchor::BEGINNING | anchor::START | anchor::END_Z | anchor::END) != 0 {
            if !prog.right_to_left {
                if (prog.anchors & anchor::BEGINNING != 0 && self.pos > self.beg)
                    || (prog.anchors & anchor::START != 0 && self.pos > self.start)
                {
                    self.pos = self.end;
                    return false;
                }
                if prog.anchors & anchor::END_Z != 0 {
                    let last = self.last_char_start();
                    if self.pos < last {
                        self.pos = last;
                    }
                } else if prog.anchors & anchor::END != 0 && self.pos < self.end {
                    self.pos = self.end;
                }
            } else {
                let last = self.last_char_start();
                if (prog.anchors & anchor::END != 0 && self.pos < self.end)
                    || (prog.anchors & anchor::END_Z != 0
                        && self.pos < self.end
                        && !(self.pos == last && self.bytes[self.pos] == b'\n'))
                    || (prog.anchors & anchor::START != 0 && self.pos < self.start)
                {
                    self.pos = self.beg;
                    return false;
                }
                if prog.anchors & anchor::BEGINNING != 0 && self.pos > self.beg {
                    self.pos = self.beg;
                }
            }
            if let Some(bm) = &prog.prefix {
                return bm.matches_at(self.bytes, self.pos, self.beg, self.end);
            }
            return true;
        }

        if let Some(bm) = &prog.prefix {
            return match bm.scan(self.bytes, self.pos, self.beg, self.end) {
                Some(found) => {
                    self.pos = found;
                    true
                }
                None => {
                    trace!("prefix exhausted the subject");
                    self.pos = if prog.right_to_left { self.beg } else { self.end };
                    false
                }
            };
        }

        if let Some(fc) = &prog.first_chars {
            // singleton ASCII classes take the byte-search fast path
            if let Some(ch) = fc.class.singleton() {
                if ch.is_ascii() {
                    return self.first_byte_search(ch as u8, fc.case_insensitive);
                }
            }
            if !prog.right_to_left {
                while self.pos < self.end {
                    let (mut ch, len) = char_right(self.text, self.pos);
                    if fc.case_insensitive {
                        ch = unicode::to_lower(ch);
                    }
                    if fc.class.contains(ch) {
                        return true;
                    }
                    self.pos += len;
                }
            } else {
                while self.pos > self.beg {
                    let (mut ch, len) = char_left(self.text, self.pos);
                    if fc.case_insensitive {
                        ch = unicode::to_lower(ch);
                    }
                    if fc.class.contains(ch) {
                        return true;
                    }
                    self.pos -= len;
                }
            }
            return false;
        }

        true
    }

    fn first_byte_search(&mut self, b: u8, ci: bool) -> bool {
        let fold = ci && b.is_ascii_alphabetic();
        if !self.prog.right_to_left {
            let hay = &self.bytes[self.pos..self.end];
            let found = if fold {
                memchr2(b.to_ascii_lowercase(), b.to_ascii_uppercase(), hay)
            } else {
                memchr(b, hay)
            };
            match found {
                Some(i) => {
                    self.pos += i;
                    true
                }
                None => {
                    self.pos = self.end;
                    false
                }
            }
        } else {
            let hay = &self.bytes[self.beg..self.pos];
            let found = if fold {
                memrchr2(b.to_ascii_lowercase(), b.to_ascii_uppercase(), hay)
            } else {
                memrchr(b, hay)
            };
            match found {
                Some(i) => {
                    // leave the cursor on the right edge of the byte
                    self.pos = self.beg + i + 1;
                    true
                }
                None => {
                    self.pos = self.beg;
                    false
                }
            }
        }
    }

    fn last_char_start(&self) -> usize {
        if self.end > self.beg {
            self.end - char_len_before(self.text, self.end)
        } else {
            self.beg
        }
    }

    // === Track / stack / crawl primitives ===

    fn double_track(&mut self) {
        let old_len = self.track.len();
        let mut grown = vec![0; old_len * 2];
        grown[self.track_pos + old_len..].copy_from_slice(&self.track[self.track_pos..]);
        self.track = grown;
        self.track_pos += old_len;
    }

    fn double_stack(&mut self) {
        let old_len = self.stack.len();
        let mut grown = vec![0; old_len * 2];
        grown[self.stack_pos + old_len..].copy_from_slice(&self.stack[self.stack_pos..]);
        self.stack = grown;
        self.stack_pos += old_len;
    }

    fn double_crawl(&mut self) {
        let old_len = self.crawl.len();
        let mut grown = vec![0; old_len * 2];
        grown[self.crawl_pos + old_len..].copy_from_slice(&self.crawl[self.crawl_pos..]);
        self.crawl = grown;
        self.crawl_pos += old_len;
    }

    /// Guarantee the static reservation of free frames below the tops.
    /// Called only on backward jumps; forward runs between them stay within
    /// the writer's reservation.
    fn ensure_storage(&mut self) {
        let needed = self.prog.track_reserve * 4;
        if self.stack_pos < needed {
            self.double_stack();
        }
        if self.track_pos < needed {
            self.double_track();
        }
    }

    #[inline]
    fn track_push0(&mut self, pc: usize) {
        self.track_pos -= 1;
        self.track[self.track_pos] = pc as i32;
    }

    #[inline]
    fn track_push1(&mut self, v1: i32, pc: usize) {
        self.track_pos -= 2;
        self.track[self.track_pos + 1] = v1;
        self.track[self.track_pos] = pc as i32;
    }

    #[inline]
    fn track_push2(&mut self, v1: i32, v2: i32, pc: usize) {
        self.track_pos -= 3;
        self.track[self.track_pos + 2] = v1;
        self.track[self.track_pos + 1] = v2;
        self.track[self.track_pos] = pc as i32;
    }

    #[inline]
    fn track_push3(&mut self, v1: i32, v2: i32, v3: i32, pc: usize) {
        self.track_pos -= 4;
        self.track[self.track_pos + 3] = v1;
        self.track[self.track_pos + 2] = v2;
        self.track[self.track_pos + 1] = v3;
        self.track[self.track_pos] = pc as i32;
    }

    /// Push a frame whose handler is the second backtracking variant.
    #[inline]
    fn track_push2nd1(&mut self, v1: i32, pc: usize) {
        self.track_pos -= 2;
        self.track[self.track_pos + 1] = v1;
        self.track[self.track_pos] = -(pc as i32);
    }

    #[inline]
    fn track_push2nd2(&mut self, v1: i32, v2: i32, pc: usize) {
        self.track_pos -= 3;
        self.track[self.track_pos + 2] = v1;
        self.track[self.track_pos + 1] = v2;
        self.track[self.track_pos] = -(pc as i32);
    }

    #[inline]
    fn track_pop(&mut self, n: usize) {
        self.track_pos += n;
    }

    #[inline]
    fn track_peek(&self, i: usize) -> i32 {
        self.track[self.track_pos - i - 1]
    }

    /// Distance of the track top from the bottom; survives doubling.
    #[inline]
    fn track_avail(&self) -> i32 {
        (self.track.len() - self.track_pos) as i32
    }

    #[inline]
    fn track_to(&mut self, avail: i32) {
        self.track_pos = self.track.len() - avail as usize;
    }

    #[inline]
    fn stack_push1(&mut self, v1: i32) {
        if self.stack_pos < 1 {
            self.double_stack();
        }
        self.stack_pos -= 1;
        self.stack[self.stack_pos] = v1;
    }

    #[inline]
    fn stack_push2(&mut self, v1: i32, v2: i32) {
        if self.stack_pos < 2 {
            self.double_stack();
        }
        self.stack_pos -= 2;
        self.stack[self.stack_pos + 1] = v1;
        self.stack[self.stack_pos] = v2;
    }

    #[inline]
    fn stack_pop(&mut self, n: usize) {
        self.stack_pos += n;
    }

    #[inline]
    fn stack_peek(&self, i: usize) -> i32 {
        self.stack[self.stack_pos - i - 1]
    }

    #[inline]
    fn crawl_push(&mut self, v: i32) {
        if self.crawl_pos == 0 {
            self.double_crawl();
        }
        self.crawl_pos -= 1;
        self.crawl[self.crawl_pos] = v;
    }

    #[inline]
    fn crawl_pop(&mut self) -> i32 {
        let v = self.crawl[self.crawl_pos];
        self.crawl_pos += 1;
        v
    }

    /// Number of capture-undo records; distance from the crawl bottom.
    #[inline]
    fn crawl_avail(&self) -> i32 {
        (self.crawl.len() - self.crawl_pos) as i32
    }

    // === Captures ===

    fn capture(&mut self, capnum: i32, start: i32, end: i32) {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        self.crawl_push(capnum);
        self.m.add_match(capnum, start, end - start);
    }

    fn transfer_capture(&mut self, capnum: i32, uncapnum: i32, start: i32, end: i32) {
        let (mut start, mut end) = if end < start { (end, start) } else { (start, end) };
        let start2 = self.m.match_index(uncapnum);
        let end2 = start2 + self.m.match_length(uncapnum);

        // the new capture gets the innermost defined interval
        if start >= end2 {
            end = start;
            start = end2;
        } else if end <= start2 {
            start = start2;
        } else {
            if end > end2 {
                end = end2;
            }
            if start2 > start {
                start = start2;
            }
        }
        self.crawl_push(uncapnum);
        self.m.balance_match(uncapnum);
        if capnum != -1 {
            self.crawl_push(capnum);
            self.m.add_match(capnum, start, end - start);
        }
    }

    fn uncapture(&mut self) {
        let capnum = self.crawl_pop();
        self.m.remove_match(capnum);
    }

    // === Character access ===

    #[inline]
    fn has_forward(&self) -> bool {
        if self.rtl {
            self.pos > self.beg
        } else {
            self.pos < self.end
        }
    }

    /// Consume one character in the operating direction, folded if the
    /// current instruction is case-insensitive.
    #[inline]
    fn forward_char_next(&mut self) -> char {
        let ch = if self.rtl {
            let (ch, len) = char_left(self.text, self.pos);
            self.pos -= len;
            ch
        } else {
            let (ch, len) = char_right(self.text, self.pos);
            self.pos += len;
            ch
        };
        if self.ci {
            unicode::to_lower(ch)
        } else {
            ch
        }
    }

    /// Position one character back from `pos` in the operating direction.
    #[inline]
    fn char_back(&self, pos: usize) -> usize {
        if self.rtl {
            pos + char_len_at(self.text, pos)
        } else {
            pos - char_len_before(self.text, pos)
        }
    }

    /// Single-character test for the One/Notone/Set instruction families.
    /// `family` is the offset of the primary code within its triplet.
    #[inline]
    fn char_test(&self, family: i32, operand: i32, ch: char) -> bool {
        match family {
            0 => ch as i32 == operand,
            1 => ch as i32 != operand,
            _ => self.prog.classes[operand as usize].contains(ch),
        }
    }

    fn is_boundary(&self, ecma: bool) -> bool {
        let word = |ch: char| {
            if ecma {
                unicode::is_ecma_word_char(ch)
            } else {
                unicode::is_word_char(ch)
            }
        };
        let left = self.pos > self.beg && word(char_left(self.text, self.pos).0);
        let right = self.pos < self.end && word(char_right(self.text, self.pos).0);
        left != right
    }

    fn string_match(&mut self, index: usize) -> bool {
        let text = self.text;
        let s: &str = &self.prog.strings[index];
        if !self.ci {
            let n = s.len();
            if !self.rtl {
                if self.end - self.pos < n
                    || &self.bytes[self.pos..self.pos + n] != s.as_bytes()
                {
                    return false;
                }
                self.pos += n;
            } else {
                if self.pos - self.beg < n
                    || &self.bytes[self.pos - n..self.pos] != s.as_bytes()
                {
                    return false;
                }
                self.pos -= n;
            }
            true
        } else if !self.rtl {
            let mut pos = self.pos;
            for pch in s.chars() {
                if pos >= self.end {
                    return false;
                }
                let (tch, len) = char_right(text, pos);
                if unicode::to_lower(tch) != pch {
                    return false;
                }
                pos += len;
            }
            self.pos = pos;
            true
        } else {
            let mut pos = self.pos;
            for pch in s.chars().rev() {
                if pos <= self.beg {
                    return false;
                }
                let (tch, len) = char_left(text, pos);
                if unicode::to_lower(tch) != pch {
                    return false;
                }
                pos -= len;
            }
            self.pos = pos;
            true
        }
    }

    fn ref_match(&mut self, slot: i32) -> bool {
        let text = self.text;
        let start = self.m.match_index(slot) as usize;
        let len = self.m.match_length(slot) as usize;
        let captured = &text[start..start + len];
        if !self.ci {
            if !self.rtl {
                if self.end - self.pos < len
                    || &self.bytes[self.pos..self.pos + len] != captured.as_bytes()
                {
                    return false;
                }
                self.pos += len;
            } else {
                if self.pos - self.beg < len
                    || &self.bytes[self.pos - len..self.pos] != captured.as_bytes()
                {
                    return false;
                }
                self.pos -= len;
            }
            true
        } else if !self.rtl {
            let mut pos = self.pos;
            for cch in captured.chars() {
                if pos >= self.end {
                    return false;
                }
                let (tch, tlen) = char_right(text, pos);
                if unicode::to_lower(tch) != unicode::to_lower(cch) {
                    return false;
                }
                pos += tlen;
            }
            self.pos = pos;
            true
        } else {
            let mut pos = self.pos;
            for cch in captured.chars().rev() {
                if pos <= self.beg {
                    return false;
                }
                let (tch, tlen) = char_left(text, pos);
                if unicode::to_lower(tch) != unicode::to_lower(cch) {
                    return false;
                }
                pos -= tlen;
            }
            self.pos = pos;
            true
        }
    }

    // === Dispatch ===

    /// Pop the next backtrack frame. `None` means the track is exhausted:
    /// no alternative remains and the attempt failed.
    #[inline]
    fn pop_frame(&mut self) -> Option<(usize, Back)> {
        if self.track_pos == self.track.len() {
            return None;
        }
        self.ensure_storage();
        let v = self.track[self.track_pos];
        self.track_pos += 1;
        if v < 0 {
            Some(((-v) as usize, Back::Two))
        } else {
            Some((v as usize, Back::One))
        }
    }

    /// Jump to `target`, growing storage on backward jumps.
    #[inline]
    fn jump(&mut self, pc: usize, target: i32) -> usize {
        let target = target as usize;
        if target < pc {
            self.ensure_storage();
        }
        target
    }

    /// Execute the program from instruction 0 at the current position.
    /// Returns whether slot 0 recorded a match.
    fn go(&mut self) -> Result<bool, Error> {
        let mut pc: usize = 0;
        let mut back = Back::None;

        loop {
            self.check_timeout()?;
            if pc >= self.prog.codes.len() {
                return Err(Error::internal(format!("code position {} out of range", pc)));
            }
            let full = self.prog.codes[pc];
            let code = full & op::MASK;
            self.rtl = full & op::RTL != 0;
            self.ci = full & op::CI != 0;

            let mut fail = false;
            match (code, back) {
                // ============================================================
                // Control
                // ============================================================
                (op::STOP, Back::None) => {
                    return Ok(self.m.is_matched(0));
                }

                (op::NOTHING, Back::None) => {
                    fail = true;
                }

                (op::GOTO, Back::None) => {
                    pc = self.jump(pc, self.prog.codes[pc + 1]);
                }

                (op::LAZYBRANCH, Back::None) => {
                    self.track_push1(self.pos as i32, pc);
                    pc += 2;
                }
                (op::LAZYBRANCH, Back::One) => {
                    self.track_pop(1);
                    self.pos = self.track_peek(0) as usize;
                    pc = self.jump(pc, self.prog.codes[pc + 1]);
                }

                // ============================================================
                // Anchors
                // ============================================================
                (op::BOL, Back::None) => {
                    if self.pos > self.beg && self.bytes[self.pos - 1] != b'\n' {
                        fail = true;
                    } else {
                        pc += 1;
                    }
                }
                (op::EOL, Back::None) => {
                    if self.pos < self.end && self.bytes[self.pos] != b'\n' {
                        fail = true;
                    } else {
                        pc += 1;
                    }
                }
                (op::BOUNDARY, Back::None) => {
                    if self.is_boundary(false) {
                        pc += 1;
                    } else {
                        fail = true;
                    }
                }
                (op::NONBOUNDARY, Back::None) => {
                    if self.is_boundary(false) {
                        fail = true;
                    } else {
                        pc += 1;
                    }
                }
                (op::ECMABOUNDARY, Back::None) => {
                    if self.is_boundary(true) {
                        pc += 1;
                    } else {
                        fail = true;
                    }
                }
                (op::NONECMABOUNDARY, Back::None) => {
                    if self.is_boundary(true) {
                        fail = true;
                    } else {
                        pc += 1;
                    }
                }
                (op::BEGINNING, Back::None) => {
                    if self.pos > self.beg {
                        fail = true;
                    } else {
                        pc += 1;
                    }
                }
                (op::START, Back::None) => {
                    if self.pos != self.start {
                        fail = true;
                    } else {
                        pc += 1;
                    }
                }
                (op::ENDZ, Back::None) => {
                    if self.pos < self.end
                        && !(self.pos + 1 == self.end && self.bytes[self.pos] == b'\n')
                    {
                        fail = true;
                    } else {
                        pc += 1;
                    }
                }
                (op::END, Back::None) => {
                    if self.pos < self.end {
                        fail = true;
                    } else {
                        pc += 1;
                    }
                }

                // ============================================================
                // Single-character tests
                // ============================================================
                (op::ONE | op::NOTONE | op::SET, Back::None) => {
                    let family = code - op::ONE;
                    let operand = self.prog.codes[pc + 1];
                    if !self.has_forward() {
                        fail = true;
                    } else {
                        let ch = self.forward_char_next();
                        if self.char_test(family, operand, ch) {
                            pc += 2;
                        } else {
                            fail = true;
                        }
                    }
                }

                // ============================================================
                // Fixed repetitions
                // ============================================================
                (op::ONEREP | op::NOTONEREP | op::SETREP, Back::None) => {
                    let family = code - op::ONEREP;
                    let operand = self.prog.codes[pc + 1];
                    let count = self.prog.codes[pc + 2];
                    let mut ok = true;
                    for _ in 0..count {
                        if !self.has_forward() {
                            ok = false;
                            break;
                        }
                        let ch = self.forward_char_next();
                        if !self.char_test(family, operand, ch) {
                            ok = false;
                            break;
                        }
                    }
                    if ok {
                        pc += 3;
                    } else {
                        fail = true;
                    }
                }

                // ============================================================
                // Greedy loops: consume the maximum, then give back one
                // character per backtrack
                // ============================================================
                (op::ONELOOP | op::NOTONELOOP | op::SETLOOP, Back::None) => {
                    let family = code - op::ONELOOP;
                    let operand = self.prog.codes[pc + 1];
                    let max = self.prog.codes[pc + 2];
                    let mut matched: i32 = 0;
                    while matched < max && self.has_forward() {
                        let save = self.pos;
                        let ch = self.forward_char_next();
                        if !self.char_test(family, operand, ch) {
                            self.pos = save;
                            break;
                        }
                        matched += 1;
                    }
                    if matched > 0 {
                        let give_back = self.char_back(self.pos);
                        self.track_push2(matched - 1, give_back as i32, pc);
                    }
                    pc += 3;
                }
                (op::ONELOOP | op::NOTONELOOP | op::SETLOOP, Back::One) => {
                    self.track_pop(2);
                    let remaining = self.track_peek(0);
                    let at = self.track_peek(1) as usize;
                    self.pos = at;
                    if remaining > 0 {
                        let give_back = self.char_back(at);
                        self.track_push2(remaining - 1, give_back as i32, pc);
                    }
                    pc += 3;
                }

                // ============================================================
                // Lazy loops: consume the minimum, take one more character
                // per backtrack
                // ============================================================
                (op::ONELAZY | op::NOTONELAZY | op::SETLAZY, Back::None) => {
                    let max = self.prog.codes[pc + 2];
                    if max > 0 && self.has_forward() {
                        self.track_push2(max - 1, self.pos as i32, pc);
                    }
                    pc += 3;
                }
                (op::ONELAZY | op::NOTONELAZY | op::SETLAZY, Back::One) => {
                    let family = code - op::ONELAZY;
                    let operand = self.prog.codes[pc + 1];
                    self.track_pop(2);
                    let remaining = self.track_peek(0);
                    self.pos = self.track_peek(1) as usize;
                    if !self.has_forward() {
                        fail = true;
                    } else {
                        let ch = self.forward_char_next();
                        if self.char_test(family, operand, ch) {
                            if remaining > 0 {
                                self.track_push2(remaining - 1, self.pos as i32, pc);
                            }
                            pc += 3;
                        } else {
                            fail = true;
                        }
                    }
                }

                // ============================================================
                // Literals and references
                // ============================================================
                (op::MULTI, Back::None) => {
                    let index = self.prog.codes[pc + 1] as usize;
                    if self.string_match(index) {
                        pc += 2;
                    } else {
                        fail = true;
                    }
                }
                (op::REF, Back::None) => {
                    let slot = self.prog.codes[pc + 1];
                    if self.m.is_matched(slot) {
                        if self.ref_match(slot) {
                            pc += 2;
                        } else {
                            fail = true;
                        }
                    } else if self.prog.options & options::ECMASCRIPT != 0 {
                        // unmatched group: trivially succeed
                        pc += 2;
                    } else {
                        fail = true;
                    }
                }

                // ============================================================
                // Marks and captures
                // ============================================================
                (op::SETMARK, Back::None) => {
                    self.stack_push1(self.pos as i32);
                    self.track_push0(pc);
                    pc += 1;
                }
                (op::NULLMARK, Back::None) => {
                    self.stack_push1(-1);
                    self.track_push0(pc);
                    pc += 1;
                }
                (op::SETMARK | op::NULLMARK, Back::One) => {
                    self.stack_pop(1);
                    fail = true;
                }

                (op::GETMARK, Back::None) => {
                    self.stack_pop(1);
                    let mark = self.stack_peek(0);
                    self.track_push1(mark, pc);
                    self.pos = mark as usize;
                    pc += 1;
                }
                (op::GETMARK, Back::One) => {
                    self.track_pop(1);
                    self.stack_push1(self.track_peek(0));
                    fail = true;
                }

                (op::CAPTUREMARK, Back::None) => {
                    let capnum = self.prog.codes[pc + 1];
                    let uncapnum = self.prog.codes[pc + 2];
                    if uncapnum != -1 && !self.m.is_matched(uncapnum) {
                        fail = true;
                    } else {
                        self.stack_pop(1);
                        let mark = self.stack_peek(0);
                        if uncapnum != -1 {
                            self.transfer_capture(capnum, uncapnum, mark, self.pos as i32);
                        } else {
                            self.capture(capnum, mark, self.pos as i32);
                        }
                        self.track_push1(mark, pc);
                        pc += 3;
                    }
                }
                (op::CAPTUREMARK, Back::One) => {
                    self.track_pop(1);
                    self.stack_push1(self.track_peek(0));
                    self.uncapture();
                    if self.prog.codes[pc + 1] != -1 && self.prog.codes[pc + 2] != -1 {
                        self.uncapture();
                    }
                    fail = true;
                }

                // ============================================================
                // Unbounded quantifier tails
                // ============================================================
                (op::BRANCHMARK, Back::None) => {
                    self.stack_pop(1);
                    let mark = self.stack_peek(0);
                    if self.pos as i32 != mark {
                        // body advanced: save state and loop
                        self.track_push2(mark, self.pos as i32, pc);
                        self.stack_push1(self.pos as i32);
                        pc = self.jump(pc, self.prog.codes[pc + 1]);
                    } else {
                        // empty body match: exit the loop
                        self.track_push2nd1(mark, pc);
                        pc += 2;
                    }
                }
                (op::BRANCHMARK, Back::One) => {
                    self.track_pop(2);
                    self.stack_pop(1);
                    self.pos = self.track_peek(1) as usize; // recall position
                    self.track_push2nd1(self.track_peek(0), pc); // save old mark
                    pc += 2;
                }
                (op::BRANCHMARK, Back::Two) => {
                    self.track_pop(1);
                    self.stack_push1(self.track_peek(0)); // recall old mark
                    fail = true;
                }

                (op::LAZYBRANCHMARK, Back::None) => {
                    self.stack_pop(1);
                    let mark = self.stack_peek(0);
                    if self.pos as i32 != mark {
                        // nonempty: continue straight, loop on backtrack
                        if mark != -1 {
                            self.track_push2(mark, self.pos as i32, pc);
                        } else {
                            self.track_push2(self.pos as i32, self.pos as i32, pc);
                        }
                    } else {
                        // empty body match: only the exit remains
                        self.stack_push1(mark);
                        self.track_push2nd1(self.stack_peek(0), pc);
                    }
                    pc += 2;
                }
                (op::LAZYBRANCHMARK, Back::One) => {
                    self.track_pop(2);
                    let at = self.track_peek(1);
                    self.track_push2nd1(self.track_peek(0), pc); // save old mark
                    self.stack_push1(at); // new mark
                    self.pos = at as usize;
                    pc = self.jump(pc, self.prog.codes[pc + 1]);
                }
                (op::LAZYBRANCHMARK, Back::Two) => {
                    self.stack_pop(1);
                    self.track_pop(1);
                    self.stack_push1(self.track_peek(0)); // recall old mark
                    fail = true;
                }

                // ============================================================
                // Counted quantifiers
                // ============================================================
                (op::SETCOUNT, Back::None) => {
                    self.stack_push2(self.pos as i32, self.prog.codes[pc + 1]);
                    self.track_push0(pc);
                    pc += 2;
                }
                (op::NULLCOUNT, Back::None) => {
                    self.stack_push2(-1, self.prog.codes[pc + 1]);
                    self.track_push0(pc);
                    pc += 2;
                }
                (op::SETCOUNT | op::NULLCOUNT, Back::One) => {
                    self.stack_pop(2);
                    fail = true;
                }

                (op::BRANCHCOUNT, Back::None) => {
                    self.stack_pop(2);
                    let mark = self.stack_peek(0);
                    let count = self.stack_peek(1);
                    let matched = self.pos as i32 - mark;
                    if count >= self.prog.codes[pc + 2] || (matched == 0 && count >= 0) {
                        // max iterations or empty body: exit the loop
                        self.track_push2nd2(mark, count, pc);
                        pc += 3;
                    } else {
                        self.track_push1(mark, pc);
                        self.stack_push2(self.pos as i32, count + 1);
                        pc = self.jump(pc, self.prog.codes[pc + 1]);
                    }
                }
                (op::BRANCHCOUNT, Back::One) => {
                    self.track_pop(1);
                    self.stack_pop(2);
                    let old_mark = self.track_peek(0);
                    let mark = self.stack_peek(0);
                    let count = self.stack_peek(1);
                    if count > 0 {
                        // the minimum is satisfied: accept fewer iterations
                        self.pos = mark as usize;
                        self.track_push2nd2(old_mark, count - 1, pc);
                        pc += 3;
                    } else {
                        self.stack_push2(old_mark, count - 1);
                        fail = true;
                    }
                }
                (op::BRANCHCOUNT, Back::Two) => {
                    self.track_pop(2);
                    self.stack_push2(self.track_peek(0), self.track_peek(1));
                    fail = true;
                }

                (op::LAZYBRANCHCOUNT, Back::None) => {
                    self.stack_pop(2);
                    let mark = self.stack_peek(0);
                    let count = self.stack_peek(1);
                    if count < 0 {
                        // below the minimum: iterate now
                        self.track_push2nd1(mark, pc);
                        self.stack_push2(self.pos as i32, count + 1);
                        pc = self.jump(pc, self.prog.codes[pc + 1]);
                    } else {
                        self.track_push3(mark, count, self.pos as i32, pc);
                        pc += 3;
                    }
                }
                (op::LAZYBRANCHCOUNT, Back::One) => {
                    self.track_pop(3);
                    let mark = self.track_peek(0);
                    let count = self.track_peek(1);
                    let at = self.track_peek(2);
                    if count < self.prog.codes[pc + 2] && at != mark {
                        // under the limit and the last body advanced: iterate
                        self.pos = at as usize;
                        self.stack_push2(at, count + 1);
                        self.track_push2nd1(mark, pc);
                        pc = self.jump(pc, self.prog.codes[pc + 1]);
                    } else {
                        self.stack_push2(mark, count);
                        fail = true;
                    }
                }
                (op::LAZYBRANCHCOUNT, Back::Two) => {
                    self.track_pop(1);
                    self.stack_pop(2);
                    let count = self.stack_peek(1);
                    self.stack_push2(self.track_peek(0), count - 1);
                    fail = true;
                }

                // ============================================================
                // Lookaround frames
                // ============================================================
                (op::SETJUMP, Back::None) => {
                    self.stack_push2(self.track_avail(), self.crawl_avail());
                    self.track_push0(pc);
                    pc += 1;
                }
                (op::SETJUMP, Back::One) => {
                    self.stack_pop(2);
                    fail = true;
                }

                (op::BACKJUMP, Back::None) => {
                    self.stack_pop(2);
                    self.track_to(self.stack_peek(0));
                    while self.crawl_avail() != self.stack_peek(1) {
                        self.uncapture();
                    }
                    fail = true;
                }

                (op::FOREJUMP, Back::None) => {
                    self.stack_pop(2);
                    self.track_to(self.stack_peek(0));
                    self.track_push1(self.stack_peek(1), pc);
                    pc += 1;
                }
                (op::FOREJUMP, Back::One) => {
                    self.track_pop(1);
                    while self.crawl_avail() != self.track_peek(0) {
                        self.uncapture();
                    }
                    fail = true;
                }

                (op::TESTREF, Back::None) => {
                    if self.m.is_matched(self.prog.codes[pc + 1]) {
                        pc += 2;
                    } else {
                        fail = true;
                    }
                }

                _ => {
                    return Err(Error::internal(format!(
                        "unrecognized opcode {} (back {:?}) at {}",
                        code, back, pc
                    )));
                }
            }

            if fail {
                match self.pop_frame() {
                    Some((next_pc, variant)) => {
                        pc = next_pc;
                        back = variant;
                    }
                    None => return Ok(false),
                }
            } else {
                back = Back::None;
            }
        }
    }
}

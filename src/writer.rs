// writer.rs - Lowers a syntax tree into a Program.
//
// Two passes over the tree: a sizing pass that counts instruction cells and
// backtracking notes (the static track reservation), then an emitting pass
// that writes into the pre-sized buffer. Forward jumps are emitted with a
// placeholder operand and patched in place once the target is known.

use std::collections::HashMap;

use log::debug;

use crate::boyermoore::BoyerMoore;
use crate::charclass::CharClass;
use crate::error::Error;
use crate::program::{anchor, op, op_backtracks, FirstChars, Program};
use crate::syntax::{options, Node, SyntaxTree, MAX_REPEAT};
use crate::unicode;

/// Literal-prefix hint: the text every match must start with (end with, for
/// a right-to-left program).
#[derive(Clone, Debug, Default)]
pub struct PrefixHint {
    pub text: Box<str>,
    pub case_insensitive: bool,
}

/// The scan-hint analyzer's output contract. All fields optional; the
/// default (all-null) must not change any match result, only the work done
/// to find it.
#[derive(Clone, Debug, Default)]
pub struct ScanHints {
    pub prefix: Option<PrefixHint>,
    pub first_chars: Option<FirstChars>,
    pub anchors: u32,
}

/// Lower a tree into an executable program, with no scan hints.
pub fn compile(tree: &SyntaxTree) -> Result<Program, Error> {
    compile_with_hints(tree, ScanHints::default())
}

/// Lower a tree into an executable program and attach the analyzer's hints.
pub fn compile_with_hints(tree: &SyntaxTree, hints: ScanHints) -> Result<Program, Error> {
    let mut writer = Writer::new(tree)?;

    let (cells, frames) = writer.measure_program(&tree.root)?;
    writer.codes.reserve_exact(cells);
    writer.emit_program(&tree.root)?;
    debug_assert_eq!(writer.codes.len(), cells);
    debug_assert_eq!(writer.track_count, frames);

    let rtl = tree.options & options::RIGHT_TO_LEFT != 0;
    let mut program = Program {
        codes: writer.codes,
        strings: writer.strings,
        classes: writer.classes,
        cap_count: tree.cap_count,
        caps: writer.caps,
        cap_names: writer.cap_names,
        track_reserve: writer.track_count,
        prefix: None,
        first_chars: None,
        anchors: hints.anchors & (anchor::BEGINNING | anchor::START | anchor::END_Z | anchor::END),
        right_to_left: rtl,
        options: tree.options,
    };

    if let Some(prefix) = hints.prefix {
        if prefix.text.is_empty() {
            debug!("prefix hint dropped: empty literal");
        } else if prefix.case_insensitive && !prefix.text.is_ascii() {
            debug!("prefix hint demoted: case-insensitive literal is not ASCII");
        } else {
            program.prefix = Some(BoyerMoore::new(&prefix.text, prefix.case_insensitive, rtl)?);
        }
    }
    if program.prefix.is_none() {
        program.first_chars = hints.first_chars;
    }

    if log::log_enabled!(log::Level::Debug) {
        debug!(
            "wrote {} cells, {} strings, {} classes, track reserve {}",
            program.codes.len(),
            program.strings.len(),
            program.classes.len(),
            program.track_reserve,
        );
        debug!("program:\n{}", program.dump());
    }
    Ok(program)
}

struct Writer<'a> {
    tree: &'a SyntaxTree,
    codes: Vec<i32>,
    strings: Vec<Box<str>>,
    string_index: HashMap<Box<str>, i32>,
    classes: Vec<CharClass>,
    class_index: HashMap<Vec<u32>, i32>,
    caps: Option<HashMap<i32, i32>>,
    cap_names: Option<HashMap<Box<str>, i32>>,
    track_count: usize,
}

impl<'a> Writer<'a> {
    fn new(tree: &'a SyntaxTree) -> Result<Writer<'a>, Error> {
        if tree.cap_count == 0 {
            return Err(Error::internal("capture slot 0 is required for the whole match"));
        }
        // dense slot assignment for sparse source numbering
        let caps = match &tree.cap_numbers {
            Some(numbers) => {
                let mut map = HashMap::with_capacity(numbers.len());
                for (slot, &number) in numbers.iter().enumerate() {
                    if map.insert(number, slot as i32).is_some() {
                        return Err(Error::internal(format!(
                            "capture number {} listed twice",
                            number
                        )));
                    }
                }
                Some(map)
            }
            None => None,
        };
        // group names resolve through the number map to dense slots
        let cap_names = match &tree.cap_names {
            Some(names) => {
                let mut map = HashMap::with_capacity(names.len());
                for (name, &number) in names {
                    let slot = match &caps {
                        Some(m) => *m.get(&number).ok_or_else(|| {
                            Error::internal(format!("name {:?} refers to unknown group", name))
                        })?,
                        None => number,
                    };
                    map.insert(name.clone(), slot);
                }
                Some(map)
            }
            None => None,
        };
        Ok(Writer {
            tree,
            codes: Vec::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            classes: Vec::new(),
            class_index: HashMap::new(),
            caps,
            cap_names,
            track_count: 0,
        })
    }

    fn map_capnum(&self, number: i32) -> Result<i32, Error> {
        if number == -1 {
            return Ok(-1);
        }
        let slot = match &self.caps {
            Some(map) => *map
                .get(&number)
                .ok_or_else(|| Error::internal(format!("unknown capture group {}", number)))?,
            None => number,
        };
        if !(0..self.tree.cap_count as i32).contains(&slot) {
            return Err(Error::internal(format!("capture slot {} out of range", slot)));
        }
        Ok(slot)
    }

    fn bits(&self, opts: u32) -> i32 {
        let mut bits = 0;
        if opts & options::IGNORE_CASE != 0 {
            bits |= op::CI;
        }
        if opts & options::RIGHT_TO_LEFT != 0 {
            bits |= op::RTL;
        }
        bits
    }

    fn fold_char(&self, ch: char, opts: u32) -> char {
        if opts & options::IGNORE_CASE != 0 {
            unicode::to_lower(ch)
        } else {
            ch
        }
    }

    fn string_index(&mut self, text: Box<str>) -> i32 {
        if let Some(&index) = self.string_index.get(&text) {
            return index;
        }
        let index = self.strings.len() as i32;
        self.string_index.insert(text.clone(), index);
        self.strings.push(text);
        index
    }

    fn class_index(&mut self, class: CharClass) -> i32 {
        if let Some(&index) = self.class_index.get(class.blob()) {
            return index;
        }
        let index = self.classes.len() as i32;
        self.class_index.insert(class.blob().to_vec(), index);
        self.classes.push(class);
        index
    }

    // === Emitting primitives ===

    fn note(&mut self, code: i32) {
        if op_backtracks(code) {
            self.track_count += 1;
        }
    }

    fn emit1(&mut self, code: i32) {
        self.note(code);
        self.codes.push(code);
    }

    fn emit2(&mut self, code: i32, a: i32) {
        self.note(code);
        self.codes.push(code);
        self.codes.push(a);
    }

    fn emit3(&mut self, code: i32, a: i32, b: i32) {
        self.note(code);
        self.codes.push(code);
        self.codes.push(a);
        self.codes.push(b);
    }

    /// Emit a jump with a placeholder target; returns the operand cell to
    /// patch.
    fn emit_jump(&mut self, code: i32) -> usize {
        self.emit2(code, 0);
        self.codes.len() - 1
    }

    fn patch(&mut self, operand_cell: usize, target: i32) {
        self.codes[operand_cell] = target;
    }

    fn cur_pos(&self) -> i32 {
        self.codes.len() as i32
    }

    // === Sizing pass ===

    /// Cells and backtracking notes for the whole program: the outer
    /// wrapper plus the root fragment.
    fn measure_program(&self, root: &Node) -> Result<(usize, usize), Error> {
        let (cells, frames) = self.measure_node(root)?;
        // Lazybranch + Setmark + root + Capturemark + Stop
        Ok((cells + 7, frames + 3))
    }

    fn measure_node(&self, node: &Node) -> Result<(usize, usize), Error> {
        Ok(match node {
            Node::Empty => (0, 0),
            Node::Group { child } => self.measure_node(child)?,
            Node::Nothing => (1, 0),
            Node::One { .. } | Node::Notone { .. } | Node::Set { .. } => (2, 0),
            Node::Multi { .. } => (2, 0),
            Node::Ref { .. } => (2, 0),
            Node::Beginning
            | Node::Start
            | Node::Bol
            | Node::Eol
            | Node::EndZ
            | Node::End
            | Node::Boundary
            | Node::Nonboundary
            | Node::EcmaBoundary
            | Node::NonEcmaBoundary => (1, 0),

            Node::Oneloop { min, max, .. }
            | Node::Notoneloop { min, max, .. }
            | Node::Setloop { min, max, .. }
            | Node::Onelazy { min, max, .. }
            | Node::Notonelazy { min, max, .. }
            | Node::Setlazy { min, max, .. } => {
                self.check_bounds(*min, *max)?;
                let mut cells = 0;
                let mut frames = 0;
                if *min > 0 {
                    cells += 3;
                }
                if *max > *min {
                    cells += 3;
                    frames += 1;
                }
                (cells, frames)
            }

            Node::Concat { children } => {
                let mut cells = 0;
                let mut frames = 0;
                for child in children {
                    let (c, f) = self.measure_node(child)?;
                    cells += c;
                    frames += f;
                }
                (cells, frames)
            }

            Node::Alternate { children } => {
                if children.is_empty() {
                    return Err(Error::internal("empty alternation"));
                }
                let mut cells = 0;
                let mut frames = 0;
                for child in children {
                    let (c, f) = self.measure_node(child)?;
                    cells += c;
                    frames += f;
                }
                let branches = children.len() - 1;
                (cells + branches * 4, frames + branches * 2)
            }

            Node::Loop { child, min, max } | Node::Lazyloop { child, min, max } => {
                self.check_bounds(*min, *max)?;
                let (c, f) = self.measure_node(child)?;
                let counted = *max < MAX_REPEAT || *min > 1;
                let head = if counted { 2 } else { 1 };
                let tail = if counted { 3 } else { 2 };
                let skip = if *min == 0 { 2 } else { 0 };
                (
                    c + head + tail + skip,
                    f + 2 + if *min == 0 { 1 } else { 0 },
                )
            }

            Node::Capture { child, .. } => {
                let (c, f) = self.measure_node(child)?;
                (c + 4, f + 2)
            }

            Node::Require { child } => {
                let (c, f) = self.measure_node(child)?;
                (c + 4, f + 4)
            }
            Node::Prevent { child } => {
                let (c, f) = self.measure_node(child)?;
                (c + 5, f + 4)
            }
            Node::Greedy { child } => {
                let (c, f) = self.measure_node(child)?;
                (c + 2, f + 2)
            }

            Node::Testref { yes, no, .. } => {
                let (yc, yf) = self.measure_node(yes)?;
                let (nc, nf) = match no {
                    Some(no) => self.measure_node(no)?,
                    None => (0, 0),
                };
                (yc + nc + 9, yf + nf + 5)
            }
            Node::Testgroup { cond, yes, no } => {
                let (cc, cf) = self.measure_node(cond)?;
                let (yc, yf) = self.measure_node(yes)?;
                let (nc, nf) = match no {
                    Some(no) => self.measure_node(no)?,
                    None => (0, 0),
                };
                (cc + yc + nc + 9, cf + yf + nf + 7)
            }
        })
    }

    fn check_bounds(&self, min: i32, max: i32) -> Result<(), Error> {
        if min < 0 || max < min {
            return Err(Error::internal(format!("bad loop bounds {}..{}", min, max)));
        }
        Ok(())
    }

    // === Emitting pass ===

    /// The outer wrapper lets the matcher treat retry-at-next-position as
    /// one more alternative: on total failure the bottom Lazybranch lands
    /// on Stop with nothing captured.
    fn emit_program(&mut self, root: &Node) -> Result<(), Error> {
        let bottom = self.emit_jump(op::LAZYBRANCH);
        self.emit1(op::SETMARK);
        self.emit_node(root)?;
        self.emit3(op::CAPTUREMARK, 0, -1);
        let stop = self.cur_pos();
        self.patch(bottom, stop);
        self.emit1(op::STOP);
        Ok(())
    }

    fn emit_node(&mut self, node: &Node) -> Result<(), Error> {
        match node {
            Node::Empty => {}
            Node::Nothing => self.emit1(op::NOTHING),

            Node::One { ch, opts } => {
                let c = self.fold_char(*ch, *opts);
                self.emit2(op::ONE | self.bits(*opts), c as i32);
            }
            Node::Notone { ch, opts } => {
                let c = self.fold_char(*ch, *opts);
                self.emit2(op::NOTONE | self.bits(*opts), c as i32);
            }
            Node::Set { class, opts } => {
                let class = if *opts & options::IGNORE_CASE != 0 {
                    class.case_folded()
                } else {
                    class.clone()
                };
                let index = self.class_index(class);
                self.emit2(op::SET | self.bits(*opts), index);
            }
            Node::Multi { text, opts } => {
                let folded: Box<str> = if *opts & options::IGNORE_CASE != 0 {
                    text.chars().map(unicode::to_lower).collect::<String>().into()
                } else {
                    text.clone()
                };
                let index = self.string_index(folded);
                self.emit2(op::MULTI | self.bits(*opts), index);
            }
            Node::Ref { group, opts } => {
                let slot = self.map_capnum(*group)?;
                self.emit2(op::REF | self.bits(*opts), slot);
            }

            Node::Oneloop { ch, min, max, opts } => {
                let c = self.fold_char(*ch, *opts) as i32;
                self.emit_leaf_loop(op::ONEREP, op::ONELOOP, c, *min, *max, *opts)?;
            }
            Node::Notoneloop { ch, min, max, opts } => {
                let c = self.fold_char(*ch, *opts) as i32;
                self.emit_leaf_loop(op::NOTONEREP, op::NOTONELOOP, c, *min, *max, *opts)?;
            }
            Node::Setloop { class, min, max, opts } => {
                let operand = self.set_operand(class, *opts);
                self.emit_leaf_loop(op::SETREP, op::SETLOOP, operand, *min, *max, *opts)?;
            }
            Node::Onelazy { ch, min, max, opts } => {
                let c = self.fold_char(*ch, *opts) as i32;
                self.emit_leaf_loop(op::ONEREP, op::ONELAZY, c, *min, *max, *opts)?;
            }
            Node::Notonelazy { ch, min, max, opts } => {
                let c = self.fold_char(*ch, *opts) as i32;
                self.emit_leaf_loop(op::NOTONEREP, op::NOTONELAZY, c, *min, *max, *opts)?;
            }
            Node::Setlazy { class, min, max, opts } => {
                let operand = self.set_operand(class, *opts);
                self.emit_leaf_loop(op::SETREP, op::SETLAZY, operand, *min, *max, *opts)?;
            }

            Node::Concat { children } => {
                for child in children {
                    self.emit_node(child)?;
                }
            }

            Node::Alternate { children } => {
                if children.is_empty() {
                    return Err(Error::internal("empty alternation"));
                }
                let mut end_jumps = Vec::with_capacity(children.len() - 1);
                for (i, child) in children.iter().enumerate() {
                    if i + 1 < children.len() {
                        let branch = self.emit_jump(op::LAZYBRANCH);
                        self.emit_node(child)?;
                        end_jumps.push(self.emit_jump(op::GOTO));
                        let next = self.cur_pos();
                        self.patch(branch, next);
                    } else {
                        self.emit_node(child)?;
                    }
                }
                let done = self.cur_pos();
                for jump in end_jumps {
                    self.patch(jump, done);
                }
            }

            Node::Loop { child, min, max } => self.emit_loop(child, *min, *max, false)?,
            Node::Lazyloop { child, min, max } => self.emit_loop(child, *min, *max, true)?,

            Node::Capture { group, uncap, child } => {
                let group = self.map_capnum(*group)?;
                let uncap = self.map_capnum(*uncap)?;
                self.emit1(op::SETMARK);
                self.emit_node(child)?;
                self.emit3(op::CAPTUREMARK, group, uncap);
            }
            Node::Group { child } => self.emit_node(child)?,

            Node::Require { child } => {
                self.emit1(op::SETJUMP);
                self.emit1(op::SETMARK);
                self.emit_node(child)?;
                self.emit1(op::GETMARK);
                self.emit1(op::FOREJUMP);
            }
            Node::Prevent { child } => {
                self.emit1(op::SETJUMP);
                let branch = self.emit_jump(op::LAZYBRANCH);
                self.emit_node(child)?;
                self.emit1(op::BACKJUMP);
                let next = self.cur_pos();
                self.patch(branch, next);
                self.emit1(op::FOREJUMP);
            }
            Node::Greedy { child } => {
                self.emit1(op::SETJUMP);
                self.emit_node(child)?;
                self.emit1(op::FOREJUMP);
            }

            Node::Testref { group, yes, no } => {
                let slot = self.map_capnum(*group)?;
                self.emit1(op::SETJUMP);
                let branch = self.emit_jump(op::LAZYBRANCH);
                self.emit2(op::TESTREF, slot);
                self.emit1(op::FOREJUMP);
                self.emit_node(yes)?;
                let done = self.emit_jump(op::GOTO);
                let no_pos = self.cur_pos();
                self.patch(branch, no_pos);
                self.emit1(op::FOREJUMP);
                if let Some(no) = no {
                    self.emit_node(no)?;
                }
                let end = self.cur_pos();
                self.patch(done, end);
            }
            Node::Testgroup { cond, yes, no } => {
                self.emit1(op::SETJUMP);
                let branch = self.emit_jump(op::LAZYBRANCH);
                self.emit1(op::SETMARK);
                self.emit_node(cond)?;
                self.emit1(op::GETMARK);
                self.emit1(op::FOREJUMP);
                self.emit_node(yes)?;
                let done = self.emit_jump(op::GOTO);
                let no_pos = self.cur_pos();
                self.patch(branch, no_pos);
                self.emit1(op::FOREJUMP);
                if let Some(no) = no {
                    self.emit_node(no)?;
                }
                let end = self.cur_pos();
                self.patch(done, end);
            }

            Node::Beginning => self.emit1(op::BEGINNING),
            Node::Start => self.emit1(op::START),
            Node::Bol => self.emit1(op::BOL),
            Node::Eol => self.emit1(op::EOL),
            Node::EndZ => self.emit1(op::ENDZ),
            Node::End => self.emit1(op::END),
            Node::Boundary => self.emit1(op::BOUNDARY),
            Node::Nonboundary => self.emit1(op::NONBOUNDARY),
            Node::EcmaBoundary => self.emit1(op::ECMABOUNDARY),
            Node::NonEcmaBoundary => self.emit1(op::NONECMABOUNDARY),
        }
        Ok(())
    }

    fn set_operand(&mut self, class: &CharClass, opts: u32) -> i32 {
        let class = if opts & options::IGNORE_CASE != 0 {
            class.case_folded()
        } else {
            class.clone()
        };
        self.class_index(class)
    }

    /// A leaf quantifier is a fixed repetition for the minimum followed by
    /// an open repetition for the rest.
    fn emit_leaf_loop(
        &mut self,
        rep_op: i32,
        loop_op: i32,
        operand: i32,
        min: i32,
        max: i32,
        opts: u32,
    ) -> Result<(), Error> {
        self.check_bounds(min, max)?;
        let bits = self.bits(opts);
        if min > 0 {
            self.emit3(rep_op | bits, operand, min);
        }
        if max > min {
            let rest = if max == MAX_REPEAT { i32::MAX } else { max - min };
            self.emit3(loop_op | bits, operand, rest);
        }
        Ok(())
    }

    /// General quantifier over a subexpression. Small bounds use the
    /// mark scheme, everything else the counted scheme; a zero minimum
    /// jumps straight to the tail so the body is optional on entry.
    fn emit_loop(&mut self, child: &Node, min: i32, max: i32, lazy: bool) -> Result<(), Error> {
        self.check_bounds(min, max)?;
        let counted = max < MAX_REPEAT || min > 1;
        if counted {
            self.emit2(
                if min == 0 { op::NULLCOUNT } else { op::SETCOUNT },
                if min == 0 { 0 } else { 1 - min },
            );
        } else {
            self.emit1(if min == 0 { op::NULLMARK } else { op::SETMARK });
        }
        let skip = if min == 0 {
            Some(self.emit_jump(op::GOTO))
        } else {
            None
        };
        let body = self.cur_pos();
        self.emit_node(child)?;
        let tail = self.cur_pos();
        if counted {
            let rest = if max == MAX_REPEAT { i32::MAX } else { max - min };
            self.emit3(
                if lazy { op::LAZYBRANCHCOUNT } else { op::BRANCHCOUNT },
                body,
                rest,
            );
        } else {
            self.emit2(
                if lazy { op::LAZYBRANCHMARK } else { op::BRANCHMARK },
                body,
            );
        }
        if let Some(skip) = skip {
            self.patch(skip, tail);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::op;
    use crate::syntax::{options, Node, SyntaxTree};

    fn compile_root(root: Node) -> Program {
        compile(&SyntaxTree::new(root, options::NONE, 1)).unwrap()
    }

    #[test]
    fn wrapper_shape() {
        let prog = compile_root(Node::one('a'));
        // Lazybranch 0 ... Stop, group 0 capture around the body
        assert_eq!(prog.codes[0], op::LAZYBRANCH);
        assert_eq!(prog.codes[2], op::SETMARK);
        assert_eq!(prog.codes[3], op::ONE);
        assert_eq!(prog.codes[4], 'a' as i32);
        assert_eq!(prog.codes[5], op::CAPTUREMARK);
        assert_eq!(prog.codes[6], 0);
        assert_eq!(prog.codes[7], -1);
        // the bottom branch targets the Stop instruction
        assert_eq!(prog.codes[1], 8);
        assert_eq!(prog.codes[8], op::STOP);
    }

    #[test]
    fn deterministic_output() {
        let tree = SyntaxTree::new(
            Node::concat(vec![
                Node::capture(1, Node::multi("ab")),
                Node::alternate(vec![Node::one('x'), Node::multi("ab")]),
                Node::set(crate::charclass::CharClass::digit()),
            ]),
            options::NONE,
            2,
        );
        let a = compile(&tree).unwrap();
        let b = compile(&tree).unwrap();
        assert_eq!(a.codes, b.codes);
        assert_eq!(a.strings, b.strings);
        assert_eq!(
            a.classes.iter().map(|c| c.blob().to_vec()).collect::<Vec<_>>(),
            b.classes.iter().map(|c| c.blob().to_vec()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn pools_deduplicate() {
        let prog = compile_root(Node::concat(vec![
            Node::multi("ab"),
            Node::multi("ab"),
            Node::set(crate::charclass::CharClass::digit()),
            Node::set(crate::charclass::CharClass::digit()),
        ]));
        assert_eq!(prog.strings.len(), 1);
        assert_eq!(prog.classes.len(), 1);
    }

    #[test]
    fn sizing_matches_emission() {
        // the debug asserts in compile_with_hints verify the sizing pass;
        // exercise a nest of every fragment shape
        let tree = SyntaxTree::new(
            Node::concat(vec![
                Node::alternate(vec![
                    Node::greedy_loop(0, 3, Node::one('a')),
                    Node::lazy_loop(2, crate::syntax::MAX_REPEAT, Node::one('b')),
                    Node::Empty,
                ]),
                Node::require(Node::one('x')),
                Node::prevent(Node::one('y')),
                Node::atomic(Node::multi("zz")),
                Node::Testref {
                    group: 1,
                    yes: Box::new(Node::one('1')),
                    no: None,
                },
                Node::Testgroup {
                    cond: Box::new(Node::one('c')),
                    yes: Box::new(Node::one('2')),
                    no: Some(Box::new(Node::one('3'))),
                },
                Node::capture(1, Node::Oneloop { ch: 'q', min: 1, max: 5, opts: 0 }),
                Node::Boundary,
                Node::Nothing,
            ]),
            options::NONE,
            2,
        );
        let prog = compile(&tree).unwrap();
        assert!(prog.track_reserve > 0);
    }

    #[test]
    fn case_insensitive_literals_fold_at_write_time() {
        let tree = SyntaxTree::new(
            Node::multi("AbC").with_opts(options::IGNORE_CASE),
            options::IGNORE_CASE,
            1,
        );
        let prog = compile(&tree).unwrap();
        assert_eq!(&*prog.strings[0], "abc");
        let multi = prog.codes[3];
        assert_ne!(multi & op::CI, 0);
    }

    #[test]
    fn sparse_capture_numbers_map_densely() {
        // source groups 0, 3, 7 -> slots 0, 1, 2
        let tree = SyntaxTree::new(
            Node::concat(vec![
                Node::capture(3, Node::one('a')),
                Node::capture(7, Node::one('b')),
                Node::Ref { group: 3, opts: 0 },
            ]),
            options::NONE,
            1,
        )
        .with_numbers(vec![0, 3, 7]);
        let prog = compile(&tree).unwrap();
        assert_eq!(prog.cap_count, 3);
        assert_eq!(prog.capture_slot(3), Some(1));
        assert_eq!(prog.capture_slot(7), Some(2));
        assert_eq!(prog.capture_slot(5), None);
        // the Ref operand was rewritten to the dense slot
        let ref_at = prog
            .codes
            .iter()
            .position(|&c| c & op::MASK == op::REF)
            .unwrap();
        assert_eq!(prog.codes[ref_at + 1], 1);
    }

    #[test]
    fn named_groups_resolve_to_slots() {
        let mut names = std::collections::HashMap::new();
        names.insert("num".into(), 1);
        let tree = SyntaxTree::new(
            Node::capture(1, Node::one('a')),
            options::NONE,
            2,
        )
        .with_names(names);
        let prog = compile(&tree).unwrap();
        assert_eq!(prog.capture_slot_named("num"), Some(1));
        assert_eq!(prog.capture_slot_named("other"), None);
    }

    #[test]
    fn unknown_ref_is_internal_error() {
        let tree = SyntaxTree::new(Node::Ref { group: 4, opts: 0 }, options::NONE, 1);
        assert!(matches!(compile(&tree), Err(Error::Internal { .. })));
    }

    #[test]
    fn prefix_hint_attaches() {
        let tree = SyntaxTree::new(Node::multi("abc"), options::NONE, 1);
        let hints = ScanHints {
            prefix: Some(PrefixHint { text: "abc".into(), case_insensitive: false }),
            ..ScanHints::default()
        };
        let prog = compile_with_hints(&tree, hints).unwrap();
        assert!(prog.prefix.is_some());
        assert!(prog.first_chars.is_none());
    }

    #[test]
    fn non_ascii_ci_prefix_demotes_to_first_chars() {
        let tree = SyntaxTree::new(Node::multi("ä"), options::IGNORE_CASE, 1);
        let mut builder = crate::charclass::CharClassBuilder::new();
        builder.add_char('ä');
        let hints = ScanHints {
            prefix: Some(PrefixHint { text: "ä".into(), case_insensitive: true }),
            first_chars: Some(FirstChars {
                class: builder.finish(),
                case_insensitive: true,
            }),
            anchors: 0,
        };
        let prog = compile_with_hints(&tree, hints).unwrap();
        assert!(prog.prefix.is_none());
        assert!(prog.first_chars.is_some());
    }

    #[test]
    fn track_reserve_counts_backtracking_ops() {
        // a|b : wrapper (Lazybranch+Setmark+Capturemark) + Lazybranch + Goto
        let prog = compile_root(Node::alternate(vec![Node::one('a'), Node::one('b')]));
        assert_eq!(prog.track_reserve, 5);
    }
}

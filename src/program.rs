// program.rs - The compiled form: opcode constants and the immutable Program bundle.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::boyermoore::BoyerMoore;
use crate::charclass::CharClass;

/// Primary opcodes plus the modifier bits OR-ed into the opcode cell.
///
/// `BACK`/`BACK2` never appear in an emitted instruction stream; the runner
/// synthesizes them when it pops a backtrack frame (a negative code position
/// on the track selects the second backtracking variant).
pub mod op {
    pub const ONEREP: i32 = 0;
    pub const NOTONEREP: i32 = 1;
    pub const SETREP: i32 = 2;
    pub const ONELOOP: i32 = 3;
    pub const NOTONELOOP: i32 = 4;
    pub const SETLOOP: i32 = 5;
    pub const ONELAZY: i32 = 6;
    pub const NOTONELAZY: i32 = 7;
    pub const SETLAZY: i32 = 8;
    pub const ONE: i32 = 9;
    pub const NOTONE: i32 = 10;
    pub const SET: i32 = 11;
    pub const MULTI: i32 = 12;
    pub const REF: i32 = 13;
    pub const BOL: i32 = 14;
    pub const EOL: i32 = 15;
    pub const BOUNDARY: i32 = 16;
    pub const NONBOUNDARY: i32 = 17;
    pub const BEGINNING: i32 = 18;
    pub const START: i32 = 19;
    pub const ENDZ: i32 = 20;
    pub const END: i32 = 21;
    pub const NOTHING: i32 = 22;
    pub const LAZYBRANCH: i32 = 23;
    pub const BRANCHMARK: i32 = 24;
    pub const LAZYBRANCHMARK: i32 = 25;
    pub const NULLCOUNT: i32 = 26;
    pub const SETCOUNT: i32 = 27;
    pub const BRANCHCOUNT: i32 = 28;
    pub const LAZYBRANCHCOUNT: i32 = 29;
    pub const NULLMARK: i32 = 30;
    pub const SETMARK: i32 = 31;
    pub const CAPTUREMARK: i32 = 32;
    pub const GETMARK: i32 = 33;
    pub const SETJUMP: i32 = 34;
    pub const BACKJUMP: i32 = 35;
    pub const FOREJUMP: i32 = 36;
    pub const TESTREF: i32 = 37;
    pub const GOTO: i32 = 38;
    pub const STOP: i32 = 40;
    pub const ECMABOUNDARY: i32 = 41;
    pub const NONECMABOUNDARY: i32 = 42;

    /// Mask extracting the primary code.
    pub const MASK: i32 = 63;
    /// Process the character to the left of the cursor.
    pub const RTL: i32 = 64;
    /// Backtracking variant (runner-synthesized only).
    pub const BACK: i32 = 128;
    /// Second backtracking variant (runner-synthesized only).
    pub const BACK2: i32 = 256;
    /// Case-insensitive: fold both sides before comparing.
    pub const CI: i32 = 512;
}

/// Leading-anchor bits derived by the scan-hint analyzer.
pub mod anchor {
    pub const BEGINNING: u32 = 1 << 0;
    pub const START: u32 = 1 << 1;
    pub const END_Z: u32 = 1 << 2;
    pub const END: u32 = 1 << 3;
}

/// Total cell count of the instruction whose primary code is `code`.
pub fn op_size(code: i32) -> usize {
    match code & op::MASK {
        op::NOTHING
        | op::BOL
        | op::EOL
        | op::BOUNDARY
        | op::NONBOUNDARY
        | op::ECMABOUNDARY
        | op::NONECMABOUNDARY
        | op::BEGINNING
        | op::START
        | op::ENDZ
        | op::END
        | op::SETMARK
        | op::NULLMARK
        | op::GETMARK
        | op::SETJUMP
        | op::BACKJUMP
        | op::FOREJUMP
        | op::STOP => 1,
        op::ONE
        | op::NOTONE
        | op::SET
        | op::MULTI
        | op::REF
        | op::TESTREF
        | op::GOTO
        | op::NULLCOUNT
        | op::SETCOUNT
        | op::LAZYBRANCH
        | op::BRANCHMARK
        | op::LAZYBRANCHMARK => 2,
        _ => 3,
    }
}

/// Whether an instruction with this primary code registers a backtracking
/// note; used for the static track reservation.
pub fn op_backtracks(code: i32) -> bool {
    matches!(
        code & op::MASK,
        op::ONELOOP
            | op::NOTONELOOP
            | op::SETLOOP
            | op::ONELAZY
            | op::NOTONELAZY
            | op::SETLAZY
            | op::LAZYBRANCH
            | op::BRANCHMARK
            | op::LAZYBRANCHMARK
            | op::NULLCOUNT
            | op::SETCOUNT
            | op::BRANCHCOUNT
            | op::LAZYBRANCHCOUNT
            | op::NULLMARK
            | op::SETMARK
            | op::CAPTUREMARK
            | op::GETMARK
            | op::SETJUMP
            | op::BACKJUMP
            | op::FOREJUMP
            | op::GOTO
    )
}

fn op_name(code: i32) -> &'static str {
    match code & op::MASK {
        op::ONEREP => "Onerep",
        op::NOTONEREP => "Notonerep",
        op::SETREP => "Setrep",
        op::ONELOOP => "Oneloop",
        op::NOTONELOOP => "Notoneloop",
        op::SETLOOP => "Setloop",
        op::ONELAZY => "Onelazy",
        op::NOTONELAZY => "Notonelazy",
        op::SETLAZY => "Setlazy",
        op::ONE => "One",
        op::NOTONE => "Notone",
        op::SET => "Set",
        op::MULTI => "Multi",
        op::REF => "Ref",
        op::BOL => "Bol",
        op::EOL => "Eol",
        op::BOUNDARY => "Boundary",
        op::NONBOUNDARY => "Nonboundary",
        op::BEGINNING => "Beginning",
        op::START => "Start",
        op::ENDZ => "EndZ",
        op::END => "End",
        op::NOTHING => "Nothing",
        op::LAZYBRANCH => "Lazybranch",
        op::BRANCHMARK => "Branchmark",
        op::LAZYBRANCHMARK => "Lazybranchmark",
        op::NULLCOUNT => "Nullcount",
        op::SETCOUNT => "Setcount",
        op::BRANCHCOUNT => "Branchcount",
        op::LAZYBRANCHCOUNT => "Lazybranchcount",
        op::NULLMARK => "Nullmark",
        op::SETMARK => "Setmark",
        op::CAPTUREMARK => "Capturemark",
        op::GETMARK => "Getmark",
        op::SETJUMP => "Setjump",
        op::BACKJUMP => "Backjump",
        op::FOREJUMP => "Forejump",
        op::TESTREF => "Testref",
        op::GOTO => "Goto",
        op::STOP => "Stop",
        op::ECMABOUNDARY => "ECMABoundary",
        op::NONECMABOUNDARY => "NonECMABoundary",
        _ => "?",
    }
}

/// First-character prefilter hint: a class the first scalar of any match
/// must belong to, plus whether the input should be folded before testing.
#[derive(Clone, Debug)]
pub struct FirstChars {
    pub class: CharClass,
    pub case_insensitive: bool,
}

/// The immutable output of the writer. Shareable across threads; every
/// search runs against it without mutating it.
#[derive(Clone, Debug)]
pub struct Program {
    /// Fixed-width instruction stream, 1-3 cells per instruction.
    pub codes: Vec<i32>,
    /// Literal pool, indexed by `Multi` operands.
    pub strings: Vec<Box<str>>,
    /// Class pool, indexed by `Set`-family operands.
    pub classes: Vec<CharClass>,
    /// Number of capture slots, including slot 0.
    pub cap_count: usize,
    /// Sparse source capture number -> dense slot, when the source numbering
    /// has gaps.
    pub caps: Option<HashMap<i32, i32>>,
    /// Group name -> dense slot.
    pub cap_names: Option<HashMap<Box<str>, i32>>,
    /// Static bound on track frames required by any forward run between
    /// backward jumps.
    pub track_reserve: usize,
    /// Literal prefix accelerator.
    pub prefix: Option<BoyerMoore>,
    /// First-character prefilter.
    pub first_chars: Option<FirstChars>,
    /// Leading-anchor bits (`anchor::*`).
    pub anchors: u32,
    /// Scan direction.
    pub right_to_left: bool,
    /// The global option word the tree was compiled with.
    pub options: u32,
}

impl Program {
    /// Dense slot for a source capture number, or `None` if the number does
    /// not name a group.
    pub fn capture_slot(&self, group: i32) -> Option<i32> {
        match &self.caps {
            Some(map) => map.get(&group).copied(),
            None => {
                if (0..self.cap_count as i32).contains(&group) {
                    Some(group)
                } else {
                    None
                }
            }
        }
    }

    /// Dense slot for a group name.
    pub fn capture_slot_named(&self, name: &str) -> Option<i32> {
        self.cap_names.as_ref()?.get(name).copied()
    }

    /// Opcode disassembly, one instruction per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut pc = 0usize;
        while pc < self.codes.len() {
            let code = self.codes[pc];
            let _ = write!(out, "{:04} {}", pc, op_name(code));
            if code & op::CI != 0 {
                out.push_str("-Ci");
            }
            if code & op::RTL != 0 {
                out.push_str("-Rtl");
            }
            let size = op_size(code);
            for operand in 0..size - 1 {
                let v = self.codes[pc + 1 + operand];
                match (code & op::MASK, operand) {
                    (op::ONE | op::NOTONE | op::ONEREP | op::ONELOOP | op::ONELAZY, 0)
                    | (op::NOTONEREP | op::NOTONELOOP | op::NOTONELAZY, 0) => {
                        let ch = char::from_u32(v as u32).unwrap_or('\u{FFFD}');
                        let _ = write!(out, " ch = {:?}", ch);
                    }
                    (op::MULTI, 0) => {
                        let _ = write!(out, " str = {:?}", &self.strings[v as usize]);
                    }
                    (op::SET | op::SETREP | op::SETLOOP | op::SETLAZY, 0) => {
                        let _ = write!(out, " class = #{}", v);
                    }
                    (
                        op::LAZYBRANCH | op::BRANCHMARK | op::LAZYBRANCHMARK | op::GOTO
                        | op::BRANCHCOUNT | op::LAZYBRANCHCOUNT,
                        0,
                    ) => {
                        let _ = write!(out, " addr = {}", v);
                    }
                    _ => {
                        let _ = write!(out, " {}", v);
                    }
                }
            }
            out.push('\n');
            pc += size;
        }
        out
    }
}

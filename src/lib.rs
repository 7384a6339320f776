// rewind - a backtracking regular-expression engine core.
//
// The crate compiles a parsed pattern tree into a fixed-width bytecode
// program and executes it with an explicit-stack backtracking matcher:
//
//   syntax     -> tree node types (the parser contract)
//   charclass  -> class builder, blob encoding, membership
//   unicode    -> general categories, interval lowercase table
//   writer     -> tree -> Program lowering (two passes)
//   program    -> opcodes, the immutable Program bundle, disassembly
//   boyermoore -> literal prefix acceleration
//   runner     -> the interpreter: scan, dispatch, backtrack switch
//   matches    -> capture spans, Match accessors, next_match
//   api        -> public Regex surface

pub mod api;
pub mod boyermoore;
pub mod charclass;
pub mod error;
pub mod matches;
pub mod prelude;
pub mod program;
pub(crate) mod runner;
pub mod syntax;
pub mod unicode;
pub mod writer;

pub use crate::api::{FindIter, Regex};
pub use crate::error::Error;
pub use crate::matches::{Group, Match};
pub use crate::program::Program;
pub use crate::writer::{compile, compile_with_hints, PrefixHint, ScanHints};

// prelude.rs - One-stop imports for embedders and tests.

pub use crate::api::{FindIter, Regex};
pub use crate::charclass::{CharClass, CharClassBuilder};
pub use crate::error::Error;
pub use crate::matches::{Group, Match};
pub use crate::syntax::{options, Node, SyntaxTree, MAX_REPEAT};
pub use crate::writer::{compile, compile_with_hints, PrefixHint, ScanHints};

use thiserror::Error;

use crate::ir;
use crate::parser::LrAction;

/// Errors that may occur while building parse tables, parsing a token
/// stream or lowering a Wasm module.
///
/// Every error aborts the operation that raised it; no partial tables or
/// partial IR are ever returned.
#[derive(Debug, Error)]
pub enum Error {
    /// The grammar itself is malformed: an undeclared symbol occurs in a
    /// production, or the start symbol has no productions.
    #[error("grammar error: {0}")]
    Grammar(String),
    /// Two actions collided at the same `(state, terminal)` cell and the
    /// default shift-over-reduce rule could not reconcile them.
    #[error("LR construction conflict {first} vs {second} ({production_a} vs {production_b})")]
    GrammarConflict {
        /// The action that was about to be written.
        first: LrAction,
        /// The action already present in the table.
        second: LrAction,
        /// Rendering of the production behind `first`.
        production_a: String,
        /// Rendering of the production behind `second`.
        production_b: String,
    },
    /// No action exists for the current state and look-ahead token.
    #[error("parse error at position {position}: unexpected {token}")]
    Parse {
        /// Position of the offending token as reported by the lexer.
        position: u32,
        /// Rendering of the offending token.
        token: String,
    },
    /// An operation or definition kind outside the supported Wasm subset.
    #[error("unsupported wasm: {0}")]
    UnsupportedWasm(String),
    /// A store into a local or global slot whose type disagrees with the
    /// stored value, or a global initializer of the wrong type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ir::Type,
        found: ir::Type,
    },
    /// The operand or block stack was popped past empty. Indicates
    /// malformed input bytecode.
    #[error("stack underflow")]
    StackUnderflow,
}

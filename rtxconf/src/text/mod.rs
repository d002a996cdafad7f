//! Raw text handling: wrap reconstruction and stanza scanning.

mod scanner;
mod wrap;

pub use scanner::{ContextId, ContextKey, Scanner, Stanza};
pub use wrap::{
    Ambiguity, ContinuationMarker, DigitSplit, EqualsSplit, Join, Line, NumericContinuation,
    Reconstruction, Reconstructor, WrapOptions, WrapPolicy,
};

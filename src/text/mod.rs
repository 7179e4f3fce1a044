//! Text measurement and truncation.
//!
//! [`Tokenizer`] provides deterministic token counting under a frozen
//! heuristic encoding; [`Truncator`] fits oversized text to a token ceiling
//! under a selectable strategy while accounting for the sentinel marker it
//! injects.

mod tokenizer;
mod truncate;

pub use tokenizer::{HeuristicTokenizer, Tokenizer};
pub use truncate::{TRUNCATION_SENTINEL, TextShape, Truncation, TruncationStrategy, Truncator};

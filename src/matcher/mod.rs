//! Glob matching over character slices, as used for CODEOWNERS-style path rules.
//!
//! A [`Matcher`] reports how many characters it consumes at an offset, or a negative value
//! when it does not match there. Patterns are compiled once by [`pattern::compile`] into a
//! [`CompositeMatcher`]; malformed patterns are rejected at that point, never while
//! matching.

mod asterisk;
pub mod codeowners;
mod character;
mod composite;
mod double_asterisk;
mod end_of_segment;
mod negating;
pub mod pattern;
mod range;

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

pub use asterisk::{AsteriskMatcher, QuestionMarkMatcher};
pub use character::CharacterMatcher;
pub use codeowners::CodeOwners;
pub use composite::CompositeMatcher;
pub use double_asterisk::DoubleAsteriskMatcher;
pub use end_of_segment::EndOfSegmentMatcher;
pub use negating::NegatingMatcher;
pub use pattern::Pattern;
pub use range::RangeMatcher;

/// Outcome of [`Matcher::consume`] that never matches anything.
pub const NO_MATCH: i32 = -1;

pub trait Matcher: Debug + Send + Sync {
    /// Number of characters matched starting at `offset` (zero for assertions), or a negative
    /// value when there is no match.
    fn consume(&self, input: &[char], offset: usize) -> i32;

    /// Whether the matcher can also match shorter prefixes of what `consume` returns, so a
    /// composite may backtrack into it.
    fn multi(&self) -> bool {
        false
    }

    /// Candidate consumption lengths, longest first. Consulted only for `multi` matchers.
    fn alternatives(&self, input: &[char], offset: usize) -> Vec<usize> {
        let consumed = self.consume(input, offset);
        if consumed < 0 {
            Vec::new()
        } else {
            (0..=consumed as usize).rev().collect()
        }
    }
}

pub type MatcherRef = Arc<dyn Matcher>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,
    #[error("unterminated character range in `{0}`")]
    UnterminatedRange(String),
    #[error("empty character range in `{0}`")]
    EmptyRange(String),
    #[error("invalid character range {0}-{1}")]
    InvalidRange(char, char),
    #[error("pattern ends with an escape character: `{0}`")]
    TrailingEscape(String),
    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<PatternError>,
    },
}

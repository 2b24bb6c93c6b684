use super::{Matcher, MatcherRef};

/// Zero-width assertion inverting its delegate: a delegate result `r` becomes `-r - 1`, so a
/// failed delegate yields a successful zero-length match and a delegate consuming `n`
/// characters yields `-n - 1`.
#[derive(Debug)]
pub struct NegatingMatcher {
    delegate: MatcherRef,
}

impl NegatingMatcher {
    pub fn new(delegate: MatcherRef) -> Self {
        Self { delegate }
    }
}

impl Matcher for NegatingMatcher {
    fn consume(&self, input: &[char], offset: usize) -> i32 {
        -self.delegate.consume(input, offset) - 1
    }
}

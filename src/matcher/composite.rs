use super::{CharacterMatcher, Matcher, MatcherRef};

/// Sequence of matchers applied one after another.
///
/// `multi` members are tried with their longest consumption first; when the rest of the
/// sequence fails, the composite backtracks to shorter consumptions.
#[derive(Debug, Default)]
pub struct CompositeMatcher {
    matchers: Vec<MatcherRef>,
}

impl CompositeMatcher {
    pub fn new(matchers: Vec<MatcherRef>) -> Self {
        Self { matchers }
    }

    pub fn literal(text: &str) -> Self {
        Self::new(
            text.chars()
                .map(|c| CharacterMatcher::of(c) as MatcherRef)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    fn consume_from(&self, input: &[char], offset: usize, index: usize) -> i32 {
        let Some(matcher) = self.matchers.get(index) else {
            return 0;
        };
        if matcher.multi() {
            for length in matcher.alternatives(input, offset) {
                let rest = self.consume_from(input, offset + length, index + 1);
                if rest >= 0 {
                    return length as i32 + rest;
                }
            }
            return super::NO_MATCH;
        }
        let consumed = matcher.consume(input, offset);
        if consumed < 0 {
            return super::NO_MATCH;
        }
        let rest = self.consume_from(input, offset + consumed as usize, index + 1);
        if rest < 0 {
            super::NO_MATCH
        } else {
            consumed + rest
        }
    }
}

impl Matcher for CompositeMatcher {
    fn consume(&self, input: &[char], offset: usize) -> i32 {
        if self.matchers.is_empty() {
            return 0;
        }
        self.consume_from(input, offset, 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::matcher::{AsteriskMatcher, DoubleAsteriskMatcher, EndOfSegmentMatcher};

    fn chars(text: &str) -> Vec<char> {
        text.chars().collect()
    }

    #[test]
    fn literal_consumes_concatenated_length() {
        let matcher = CompositeMatcher::literal("src/");
        let input = chars("src/main");

        assert_eq!(matcher.consume(&input, 0), 4);
        assert!(matcher.consume(&input, 1) < 0);
    }

    #[test]
    fn empty_composite_matches_nothing_anywhere() {
        let matcher = CompositeMatcher::default();
        let input = chars("abc");

        assert_eq!(matcher.consume(&input, 0), 0);
        assert_eq!(matcher.consume(&input, 3), 0);
    }

    #[test]
    fn backtracks_into_asterisk() {
        let matcher = CompositeMatcher::new(vec![
            Arc::new(AsteriskMatcher),
            Arc::new(CompositeMatcher::literal(".java")),
            Arc::new(EndOfSegmentMatcher),
        ]);

        assert_eq!(matcher.consume(&chars("Foo.java"), 0), 8);
        assert_eq!(matcher.consume(&chars("Foo.java.java"), 0), 13);
        assert!(matcher.consume(&chars("Foo.javax"), 0) < 0);
    }

    #[test]
    fn backtracks_across_segments() {
        let matcher = CompositeMatcher::new(vec![
            Arc::new(CompositeMatcher::literal("a/")),
            Arc::new(DoubleAsteriskMatcher),
            Arc::new(CompositeMatcher::literal("b")),
            Arc::new(EndOfSegmentMatcher),
        ]);

        assert_eq!(matcher.consume(&chars("a/b"), 0), 3);
        assert_eq!(matcher.consume(&chars("a/x/y/b"), 0), 7);
        assert!(matcher.consume(&chars("a/xb"), 0) < 0);
    }
}

use super::Matcher;

/// Zero-width match at a path segment boundary: end of input or before a `/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndOfSegmentMatcher;

impl Matcher for EndOfSegmentMatcher {
    fn consume(&self, input: &[char], offset: usize) -> i32 {
        match input.get(offset) {
            None if offset == input.len() => 0,
            Some('/') => 0,
            _ => super::NO_MATCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_at_end_and_before_separator() {
        let input: Vec<char> = "a/b".chars().collect();

        assert_eq!(EndOfSegmentMatcher.consume(&input, 3), 0);
        assert_eq!(EndOfSegmentMatcher.consume(&input, 1), 0);
        assert!(EndOfSegmentMatcher.consume(&input, 0) < 0);
        assert!(EndOfSegmentMatcher.consume(&input, 4) < 0);
    }
}

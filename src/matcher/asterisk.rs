use super::Matcher;

/// `*`: any run of characters within one path segment.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsteriskMatcher;

impl Matcher for AsteriskMatcher {
    fn consume(&self, input: &[char], offset: usize) -> i32 {
        if offset > input.len() {
            return super::NO_MATCH;
        }
        input[offset..].iter().take_while(|c| **c != '/').count() as i32
    }

    fn multi(&self) -> bool {
        true
    }
}

/// `?`: any single character except `/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuestionMarkMatcher;

impl Matcher for QuestionMarkMatcher {
    fn consume(&self, input: &[char], offset: usize) -> i32 {
        match input.get(offset) {
            Some(c) if *c != '/' => 1,
            _ => super::NO_MATCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asterisk_stays_in_segment() {
        let input: Vec<char> = "foo/bar".chars().collect();
        assert_eq!(AsteriskMatcher.consume(&input, 0), 3);
        assert_eq!(AsteriskMatcher.consume(&input, 3), 0);
        assert_eq!(AsteriskMatcher.consume(&input, 7), 0);
        assert!(AsteriskMatcher.consume(&input, 8) < 0);
    }

    #[test]
    fn question_mark_rejects_separator() {
        let input: Vec<char> = "a/".chars().collect();
        assert_eq!(QuestionMarkMatcher.consume(&input, 0), 1);
        assert!(QuestionMarkMatcher.consume(&input, 1) < 0);
        assert!(QuestionMarkMatcher.consume(&input, 2) < 0);
    }
}

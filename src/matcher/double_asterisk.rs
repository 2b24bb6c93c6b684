use super::Matcher;

/// `**`: consumes through and including the next `/`, or to the end of input when no `/`
/// follows. As a `multi` matcher it can also stop at any earlier segment boundary or span
/// several segments.
#[derive(Debug, Default, Clone, Copy)]
pub struct DoubleAsteriskMatcher;

impl Matcher for DoubleAsteriskMatcher {
    fn consume(&self, input: &[char], offset: usize) -> i32 {
        if offset > input.len() {
            return super::NO_MATCH;
        }
        match input[offset..].iter().position(|c| *c == '/') {
            Some(separator) => separator as i32 + 1,
            None => (input.len() - offset) as i32,
        }
    }

    fn multi(&self) -> bool {
        true
    }

    fn alternatives(&self, input: &[char], offset: usize) -> Vec<usize> {
        if offset > input.len() {
            return Vec::new();
        }
        let rest = &input[offset..];
        let mut lengths = vec![rest.len()];
        lengths.extend(
            rest.iter()
                .enumerate()
                .rev()
                .filter(|(index, c)| **c == '/' && index + 1 < rest.len())
                .map(|(index, _)| index + 1),
        );
        lengths.push(0);
        lengths.dedup();
        lengths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_to_end_without_separator() {
        let input: Vec<char> = "src/main".chars().collect();
        assert_eq!(DoubleAsteriskMatcher.consume(&input, 4), 4);
    }

    #[test]
    fn consumes_through_first_separator() {
        let input: Vec<char> = "src/main/java".chars().collect();
        assert_eq!(DoubleAsteriskMatcher.consume(&input, 0), 4);
        assert_eq!(DoubleAsteriskMatcher.consume(&input, 4), 5);
    }

    #[test]
    fn alternatives_stop_at_segment_boundaries() {
        let input: Vec<char> = "a/b/c".chars().collect();
        assert_eq!(DoubleAsteriskMatcher.alternatives(&input, 0), vec![5, 4, 2, 0]);
    }
}

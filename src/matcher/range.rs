use super::{Matcher, PatternError};

/// Matches one character from a set of inclusive ranges, as written in `[a-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeMatcher {
    ranges: Vec<(char, char)>,
}

impl RangeMatcher {
    pub fn new(ranges: Vec<(char, char)>) -> Result<Self, PatternError> {
        for (low, high) in &ranges {
            if low > high {
                return Err(PatternError::InvalidRange(*low, *high));
            }
        }
        Ok(Self { ranges })
    }

    /// Parses the body between `[` and `]`, without a leading `!`.
    pub fn parse(body: &[char]) -> Result<Self, PatternError> {
        if body.is_empty() {
            return Err(PatternError::EmptyRange(String::new()));
        }
        let mut ranges = Vec::new();
        let mut index = 0;
        while index < body.len() {
            let low = body[index];
            if index + 2 < body.len() && body[index + 1] == '-' {
                ranges.push((low, body[index + 2]));
                index += 3;
            } else {
                ranges.push((low, low));
                index += 1;
            }
        }
        Self::new(ranges)
    }

    pub fn contains(&self, c: char) -> bool {
        self.ranges.iter().any(|(low, high)| (*low..=*high).contains(&c))
    }
}

impl Matcher for RangeMatcher {
    fn consume(&self, input: &[char], offset: usize) -> i32 {
        match input.get(offset) {
            Some(c) if *c != '/' && self.contains(*c) => 1,
            _ => super::NO_MATCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_characters_and_spans() {
        let body: Vec<char> = "a-cx_".chars().collect();
        let matcher = RangeMatcher::parse(&body).expect("parse range");
        let input: Vec<char> = "bxz_-".chars().collect();

        assert_eq!(matcher.consume(&input, 0), 1);
        assert_eq!(matcher.consume(&input, 1), 1);
        assert!(matcher.consume(&input, 2) < 0);
        assert_eq!(matcher.consume(&input, 3), 1);
        assert!(matcher.consume(&input, 4) < 0);
    }

    #[test]
    fn rejects_reversed_range() {
        let body: Vec<char> = "z-a".chars().collect();
        assert_eq!(
            RangeMatcher::parse(&body),
            Err(PatternError::InvalidRange('z', 'a'))
        );
    }
}

use std::sync::Arc;

use super::{
    AsteriskMatcher, CharacterMatcher, CompositeMatcher, DoubleAsteriskMatcher,
    EndOfSegmentMatcher, Matcher, MatcherRef, NegatingMatcher, PatternError,
    QuestionMarkMatcher, RangeMatcher,
};

/// Compiled gitignore-style path pattern.
///
/// A pattern without a `/` (other than a trailing one) matches at any directory depth; a
/// leading or inner `/` anchors it to the root. A pattern matching a directory also matches
/// everything below it, and a trailing `/` restricts it to directories.
#[derive(Debug)]
pub struct Pattern {
    source: String,
    matcher: CompositeMatcher,
}

impl Pattern {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        let input: Vec<char> = path.trim_start_matches('/').chars().collect();
        self.matcher.consume(&input, 0) >= 0
    }
}

pub fn compile(pattern: &str) -> Result<Pattern, PatternError> {
    if pattern.is_empty() || pattern == "/" {
        return Err(PatternError::Empty);
    }
    let mut body = pattern;
    let directory_only = body.len() > 1 && body.ends_with('/') && !body.ends_with("\\/");
    if directory_only {
        body = &body[..body.len() - 1];
    }
    let anchored = body.starts_with('/') || body.trim_start_matches("**/").contains('/');
    let body: Vec<char> = body.trim_start_matches('/').chars().collect();

    let mut matchers: Vec<MatcherRef> = Vec::new();
    if !anchored {
        matchers.push(Arc::new(DoubleAsteriskMatcher));
    }

    let mut index = 0;
    while index < body.len() {
        match body[index] {
            '\\' => {
                let escaped = body
                    .get(index + 1)
                    .ok_or_else(|| PatternError::TrailingEscape(pattern.to_string()))?;
                matchers.push(CharacterMatcher::of(*escaped));
                index += 2;
            }
            '*' => {
                let run = body[index..].iter().take_while(|c| **c == '*').count();
                let at_segment_start = index == 0 || body[index - 1] == '/';
                let next = body.get(index + run);
                if run >= 2 && at_segment_start && matches!(next, None | Some('/')) {
                    matchers.push(Arc::new(DoubleAsteriskMatcher));
                    index += run + usize::from(next.is_some());
                } else {
                    matchers.push(Arc::new(AsteriskMatcher));
                    index += run;
                }
            }
            '?' => {
                matchers.push(Arc::new(QuestionMarkMatcher));
                index += 1;
            }
            '[' => {
                let negated = body.get(index + 1) == Some(&'!');
                let start = index + 1 + usize::from(negated);
                // A `]` right after the opening bracket is part of the set.
                let search_from = if body.get(start) == Some(&']') { start + 1 } else { start };
                let close = body
                    .iter()
                    .skip(search_from)
                    .position(|c| *c == ']')
                    .map(|position| search_from + position)
                    .ok_or_else(|| PatternError::UnterminatedRange(pattern.to_string()))?;
                let range = Arc::new(RangeMatcher::parse(&body[start..close])?);
                if negated {
                    matchers.push(Arc::new(NegatingMatcher::new(range)));
                    matchers.push(Arc::new(QuestionMarkMatcher));
                } else {
                    matchers.push(range);
                }
                index = close + 1;
            }
            c => {
                matchers.push(CharacterMatcher::of(c));
                index += 1;
            }
        }
    }

    if directory_only {
        matchers.push(CharacterMatcher::of('/'));
    } else {
        matchers.push(Arc::new(EndOfSegmentMatcher));
    }

    Ok(Pattern {
        source: pattern.to_string(),
        matcher: CompositeMatcher::new(matchers),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        compile(pattern).expect("compile pattern").matches(path)
    }

    #[test]
    fn unanchored_name_matches_at_any_depth() {
        assert!(matches("build", "build"));
        assert!(matches("build", "app/build/out.txt"));
        assert!(!matches("build", "app/rebuild"));
    }

    #[test]
    fn anchored_pattern_matches_from_root() {
        assert!(matches("/docs", "docs/index.md"));
        assert!(!matches("/docs", "app/docs/index.md"));
        assert!(matches("src/main", "src/main/App.java"));
        assert!(!matches("src/main", "lib/src/main/App.java"));
    }

    #[test]
    fn asterisk_and_question_mark_stay_in_segment() {
        assert!(matches("*.java", "src/Foo.java"));
        assert!(!matches("*.java", "src/Foo.javax"));
        assert!(matches("/src/?oo.txt", "src/foo.txt"));
        assert!(!matches("/src/?oo.txt", "src/fooo.txt"));
    }

    #[test]
    fn double_asterisk_spans_directories() {
        assert!(matches("**/logs", "logs"));
        assert!(matches("**/logs", "a/b/logs/today.log"));
        assert!(matches("a/**/b", "a/b"));
        assert!(matches("a/**/b", "a/x/y/b"));
        assert!(matches("docs/**", "docs/a/b.md"));
        assert!(!matches("docs/**", "docs"));
    }

    #[test]
    fn ranges_and_negated_ranges() {
        assert!(matches("file[0-9].txt", "file7.txt"));
        assert!(!matches("file[0-9].txt", "fileA.txt"));
        assert!(matches("file[!0-9].txt", "fileA.txt"));
        assert!(!matches("file[!0-9].txt", "file7.txt"));
    }

    #[test]
    fn trailing_slash_only_matches_directories() {
        assert!(matches("docs/", "docs/readme.md"));
        assert!(!matches("docs/", "docs"));
    }

    #[test]
    fn escapes_are_literal() {
        assert!(matches("\\*.md", "*.md"));
        assert!(!matches("\\*.md", "a.md"));
    }

    #[test]
    fn malformed_patterns_fail_to_compile() {
        assert_eq!(compile("").err(), Some(PatternError::Empty));
        assert!(matches!(
            compile("file[0-9"),
            Err(PatternError::UnterminatedRange(_))
        ));
        assert!(matches!(compile("a\\"), Err(PatternError::TrailingEscape(_))));
        assert_eq!(
            compile("[z-a]").err(),
            Some(PatternError::InvalidRange('z', 'a'))
        );
    }
}

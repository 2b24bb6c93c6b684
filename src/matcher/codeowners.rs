use super::pattern::{self, Pattern};
use super::PatternError;

#[derive(Debug)]
struct Entry {
    pattern: Pattern,
    owners: Vec<String>,
}

/// Ownership rules read from a `CODEOWNERS` file. The last matching rule wins.
#[derive(Debug, Default)]
pub struct CodeOwners {
    entries: Vec<Entry>,
}

impl CodeOwners {
    /// Parses `CODEOWNERS` content. Comments, blank lines and `[Section]` headers are
    /// skipped; a malformed pattern fails with its line number.
    pub fn parse(content: &str) -> Result<Self, PatternError> {
        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || is_section_header(line) {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(raw_pattern) = parts.next() else {
                continue;
            };
            let owners = parts
                .take_while(|part| !part.starts_with('#'))
                .map(str::to_string)
                .collect();
            let pattern = pattern::compile(raw_pattern).map_err(|source| PatternError::Line {
                line: number + 1,
                source: Box::new(source),
            })?;
            entries.push(Entry { pattern, owners });
        }
        Ok(Self { entries })
    }

    /// Owners of `path`, or `None` when no rule matches. A matching rule without owners
    /// yields an empty list.
    pub fn owners(&self, path: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.pattern.matches(path))
            .map(|entry| entry.owners.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_section_header(line: &str) -> bool {
    let line = line.strip_prefix('^').unwrap_or(line);
    let Some(rest) = line.strip_prefix('[') else {
        return false;
    };
    match rest.split_once(']') {
        Some((_, after)) => {
            let after = after.trim_start();
            after.is_empty() || after.starts_with('[') || after.starts_with('@')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODEOWNERS: &str = "\
# global owners
*                       @global

[Backend]
/src/main/java/         @backend @reviewers
*.sql                   @dba # database files

docs/**                 @writers
/src/main/java/legacy/
";

    #[test]
    fn last_matching_rule_wins() {
        let owners = CodeOwners::parse(CODEOWNERS).expect("parse codeowners");

        assert_eq!(owners.len(), 5);
        assert_eq!(
            owners.owners("src/main/java/App.java"),
            Some(&["@backend".to_string(), "@reviewers".to_string()][..])
        );
        assert_eq!(
            owners.owners("src/main/java/schema.sql"),
            Some(&["@dba".to_string()][..])
        );
        assert_eq!(
            owners.owners("docs/guide/intro.md"),
            Some(&["@writers".to_string()][..])
        );
        assert_eq!(owners.owners("README.md"), Some(&["@global".to_string()][..]));
        assert_eq!(owners.owners("src/main/java/legacy/Old.java"), Some(&[][..]));
    }

    #[test]
    fn no_rule_means_no_owner() {
        let owners = CodeOwners::parse("/docs/ @writers\n").expect("parse codeowners");
        assert_eq!(owners.owners("src/App.java"), None);
    }

    #[test]
    fn reports_line_of_malformed_pattern() {
        let error = CodeOwners::parse("# header\n\nfile[0-9 @owner\n").expect_err("malformed");
        assert!(matches!(error, PatternError::Line { line: 3, .. }));
    }
}

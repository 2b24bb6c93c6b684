use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::Matcher;

/// Matches exactly one literal character.
#[derive(Debug, PartialEq, Eq)]
pub struct CharacterMatcher {
    expected: char,
}

impl CharacterMatcher {
    /// Shared matcher for `expected`. One instance exists per character.
    pub fn of(expected: char) -> Arc<CharacterMatcher> {
        static INTERNED: OnceLock<Mutex<HashMap<char, Arc<CharacterMatcher>>>> = OnceLock::new();
        INTERNED
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .entry(expected)
            .or_insert_with(|| Arc::new(CharacterMatcher { expected }))
            .clone()
    }

    pub fn expected(&self) -> char {
        self.expected
    }
}

impl Matcher for CharacterMatcher {
    fn consume(&self, input: &[char], offset: usize) -> i32 {
        match input.get(offset) {
            Some(c) if *c == self.expected => 1,
            _ => super::NO_MATCH,
        }
    }
}

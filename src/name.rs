//! Agent name validation and collision-avoidance candidate generation.

use crate::error::CoordinationError;

/// Letters, digits, underscore, hyphen; non-empty; reasonable length.
pub fn validate(name: &str) -> Result<(), CoordinationError> {
    const MAX_LEN: usize = 64;
    let ok = !name.is_empty()
        && name.len() <= MAX_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(CoordinationError::InvalidName(name.to_string()))
    }
}

/// Yields `base`, `base2`, `base3`, ... up to `base99` — the collision-avoidance
/// sequence `join` walks when no explicit name was requested.
pub struct CandidateNames<'a> {
    base: &'a str,
    next: u32,
}

impl<'a> CandidateNames<'a> {
    pub fn new(base: &'a str) -> Self {
        Self { base, next: 1 }
    }
}

impl<'a> Iterator for CandidateNames<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.next > 99 {
            return None;
        }
        let n = self.next;
        self.next += 1;
        Some(if n == 1 {
            self.base.to_string()
        } else {
            format!("{}{}", self.base, n)
        })
    }
}

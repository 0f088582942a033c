use std::sync::Arc;

use dashmap::DashMap;
use rampart_core::Subject;
use regex::Regex;

use crate::acl::ANONYMOUS;

/// Compiled patterns kept by a matcher built with [`SubjectMatcher::new`].
pub const DEFAULT_PATTERN_CAPACITY: usize = 4096;

/// Matches record patterns against subjects.
///
/// Patterns are full-string regular expressions over the subject uid and
/// each of its roles. A pattern that does not compile is compared literally.
/// Up to `capacity` compiled patterns are kept; reaching it starts the set
/// over.
#[derive(Clone)]
pub struct SubjectMatcher {
    compiled: Arc<DashMap<String, Option<Regex>>>,
    capacity: usize,
}

impl Default for SubjectMatcher {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PATTERN_CAPACITY)
    }
}

impl SubjectMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            compiled: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of compiled patterns currently kept.
    pub fn cached(&self) -> usize {
        self.compiled.len()
    }

    /// An absent subject matches `anonymous` and nothing else; an
    /// authenticated one never matches `anonymous`.
    pub fn matches(&self, pattern: &str, subject: Option<&Subject>) -> bool {
        let Some(subject) = subject else {
            return pattern == ANONYMOUS;
        };
        if pattern == ANONYMOUS {
            return false;
        }
        let mut candidates = std::iter::once(subject.uid.as_str()).chain(subject.roles.iter().map(String::as_str));
        match self.regex(pattern) {
            Some(re) => candidates.any(|c| re.is_match(c)),
            None => candidates.any(|c| c == pattern),
        }
    }

    fn regex(&self, pattern: &str) -> Option<Regex> {
        if let Some(hit) = self.compiled.get(pattern) {
            return hit.value().clone();
        }
        let compiled = match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::debug!(pattern, error = %err, "pattern is not a valid regex, matching literally");
                None
            }
        };
        if self.compiled.len() >= self.capacity {
            tracing::debug!(capacity = self.capacity, "compiled pattern cache full, clearing");
            self.compiled.clear();
        }
        self.compiled.insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

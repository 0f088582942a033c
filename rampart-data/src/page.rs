use serde::{Deserialize, Serialize};

/// A window of results with the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub skip: u64,
    pub limit: u64,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, skip: u64, limit: u64, total: u64) -> Self {
        Self {
            content,
            skip,
            limit,
            total,
        }
    }

    pub fn has_more(&self) -> bool {
        self.skip + (self.content.len() as u64) < self.total
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            skip: self.skip,
            limit: self.limit,
            total: self.total,
        }
    }
}

//! Default symbolic names for artifacts whose instructions do not provide one.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;

pub trait IdentifierSource: Send + Sync {
    fn next_identifier(&self) -> String;
}

/// Prefix plus a counter owned by one assembler. Two assemblers never share a counter.
#[derive(Debug)]
pub struct SessionCounter {
    prefix: String,
    next: AtomicU64,
}

impl SessionCounter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), next: AtomicU64::new(0) }
    }
}

impl IdentifierSource for SessionCounter {
    fn next_identifier(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.prefix, n)
    }
}

/// Prefix plus a random alphanumeric suffix; for artifacts built by independent sessions.
#[derive(Debug, Clone)]
pub struct RandomIdentifiers {
    prefix: String,
    len: usize,
}

impl RandomIdentifiers {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), len: 12 }
    }

    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len.max(1);
        self
    }
}

impl IdentifierSource for RandomIdentifiers {
    fn next_identifier(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

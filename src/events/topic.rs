//! # Topic patterns.
//!
//! Topics are colon-segmented strings (`process:ready`, `worker:forked`,
//! `process:log:info`). A subscription names either an exact topic, the
//! catch-all `*`, or a prefix ending in a wildcard segment (`worker:*`).
//!
//! ## Rules
//! - `worker:*` matches `worker:forked` and `worker:a:b`, never `workers` nor `worker:`.
//! - Matching is plain prefix comparison; patterns are parsed once at subscribe time.

use std::fmt;
use std::sync::Arc;

/// Parsed subscription pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopicPattern {
    /// `*`: every topic.
    All,
    /// A single topic.
    Exact(Arc<str>),
    /// Every topic under this prefix. Stored with its trailing `:`.
    Prefix(Arc<str>),
}

impl TopicPattern {
    /// Parses a pattern string.
    ///
    /// ```
    /// use procvisor::TopicPattern;
    ///
    /// let p = TopicPattern::parse("worker:*");
    /// assert!(p.matches("worker:forked"));
    /// assert!(!p.matches("workers"));
    /// ```
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            return TopicPattern::All;
        }
        match pattern.strip_suffix('*') {
            Some(prefix) if prefix.ends_with(':') => TopicPattern::Prefix(Arc::from(prefix)),
            _ => TopicPattern::Exact(Arc::from(pattern)),
        }
    }

    /// Returns `true` if `topic` is covered by this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::All => true,
            TopicPattern::Exact(t) => &**t == topic,
            TopicPattern::Prefix(p) => topic.len() > p.len() && topic.starts_with(&**p),
        }
    }
}

impl From<&str> for TopicPattern {
    fn from(value: &str) -> Self {
        TopicPattern::parse(value)
    }
}

impl From<String> for TopicPattern {
    fn from(value: String) -> Self {
        TopicPattern::parse(&value)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicPattern::All => f.write_str("*"),
            TopicPattern::Exact(t) => f.write_str(t),
            TopicPattern::Prefix(p) => write!(f, "{p}*"),
        }
    }
}

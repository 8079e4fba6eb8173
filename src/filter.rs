use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::types::Tag;

/// Tags older than this are truncated by `--inactive`.
pub const TRUNCATE_AGE: TimeDelta = TimeDelta::days(30);
/// Tags older than this are renewed.
pub const RENEW_AGE: TimeDelta = TimeDelta::days(20);
/// Number of stale tags kept back from deletion.
pub const DEFAULT_KEEP: usize = 25;

static RENEWABLE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}\.\d{2}\.\d{2}-\d{2}\.\d{2}$").expect("renewable tag pattern is valid")
});

/// Case-insensitive, unanchored pattern. A pattern that does not compile
/// matches nothing.
#[derive(Debug, Clone)]
pub struct Pattern(Option<Regex>);

impl Pattern {
    pub fn new(pattern: &str) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => Pattern(Some(re)),
            Err(err) => {
                warn!(%pattern, %err, "invalid regular expression, nothing will match");
                Pattern(None)
            }
        }
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.0.as_ref().is_some_and(|re| re.is_match(haystack))
    }
}

/// Rule deciding which tags of a repository get deleted
#[derive(Debug, Clone)]
pub enum TagFilter {
    /// Every tag whose name matches.
    Pattern(Pattern),
    /// Every tag older than `max_age`, except the first `keep` of those in
    /// listing order.
    Age { max_age: TimeDelta, keep: usize },
}

impl TagFilter {
    pub fn pattern(pattern: &str) -> Self {
        TagFilter::Pattern(Pattern::new(pattern))
    }

    pub fn inactive() -> Self {
        TagFilter::Age {
            max_age: TRUNCATE_AGE,
            keep: DEFAULT_KEEP,
        }
    }

    /// Names of the tags to delete, in listing order.
    ///
    /// In age mode the retention applies to the stale tags as listed, not to
    /// the full list sorted by date: it keeps the newest ones only when the
    /// registry lists tags newest first (Docker Hub does).
    pub fn select(&self, tags: &[Tag], now: DateTime<Utc>) -> Vec<String> {
        match self {
            TagFilter::Pattern(pattern) => tags
                .iter()
                .filter(|tag| pattern.is_match(&tag.name))
                .map(|tag| tag.name.clone())
                .collect(),
            TagFilter::Age { max_age, keep } => tags
                .iter()
                .filter(|tag| is_older_than(tag, *max_age, now))
                .skip(*keep)
                .map(|tag| tag.name.clone())
                .collect(),
        }
    }
}

/// A tag with no update time counts as stale.
fn is_older_than(tag: &Tag, max_age: TimeDelta, now: DateTime<Utc>) -> bool {
    tag.last_updated
        .is_none_or(|last_updated| now.signed_duration_since(last_updated) > max_age)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewDecision {
    Renew,
    InvalidName,
    Fresh,
}

/// Only date-stamped tags (`YY.MM.DD-HH.MM`) older than [`RENEW_AGE`] are renewed.
pub fn renew_decision(tag: &Tag, now: DateTime<Utc>) -> RenewDecision {
    if !RENEWABLE_TAG.is_match(&tag.name) {
        RenewDecision::InvalidName
    } else if is_older_than(tag, RENEW_AGE, now) {
        RenewDecision::Renew
    } else {
        RenewDecision::Fresh
    }
}

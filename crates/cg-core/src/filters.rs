//! Filter table
//!
//! Three tiers, evaluated in order: keyword groups, a flat common list, and
//! per-site substrings. Groups and entries are ordered sequences; the first
//! matching entry decides, so the source order must survive loading.

use std::collections::HashMap;

/// A single substring filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterEntry {
    /// Substring searched for in the request URL
    pub pattern: String,
    /// Match against the raw URL instead of the URL without its query string
    pub match_raw_url: bool,
    /// Hostnames/domain levels of the page on which this entry is not applied
    pub exceptions: Vec<String>,
}

impl FilterEntry {
    /// Entry matched against the URL without its query string.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            match_raw_url: false,
            exceptions: Vec::new(),
        }
    }

    /// Entry matched against the full URL, query included.
    pub fn raw(pattern: impl Into<String>) -> Self {
        Self {
            match_raw_url: true,
            ..Self::new(pattern)
        }
    }

    pub fn with_exceptions<I, S>(mut self, exceptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exceptions = exceptions.into_iter().map(Into::into).collect();
        self
    }

    /// Test the entry against a request URL and its query-less form.
    #[inline]
    pub fn matches(&self, raw_url: &str, clean_url: &str) -> bool {
        if self.match_raw_url {
            raw_url.contains(self.pattern.as_str())
        } else {
            clean_url.contains(self.pattern.as_str())
        }
    }

    /// True if any exception equals a level of the page's host chain.
    pub fn is_excepted<'h>(&self, mut host_chain: impl Iterator<Item = &'h str>) -> bool {
        if self.exceptions.is_empty() {
            return false;
        }
        host_chain.any(|level| self.exceptions.iter().any(|exception| exception == level))
    }
}

/// Filters only scanned when `keyword` occurs in the raw URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordGroup {
    pub keyword: String,
    pub entries: Vec<FilterEntry>,
}

impl KeywordGroup {
    pub fn new(keyword: impl Into<String>, entries: Vec<FilterEntry>) -> Self {
        Self {
            keyword: keyword.into(),
            entries,
        }
    }
}

/// The complete, read-only network filter table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterTable {
    /// Keyword groups in source order
    pub groups: Vec<KeywordGroup>,
    /// Ungrouped entries in source order
    pub common: Vec<FilterEntry>,
    /// Host or domain level -> raw substrings blocked on that site
    pub specific: HashMap<String, Vec<String>>,
}

impl FilterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all tiers.
    pub fn entry_count(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum::<usize>()
            + self.common.len()
            + self.specific.values().map(Vec::len).sum::<usize>()
    }
}

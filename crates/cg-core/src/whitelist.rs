//! In-memory whitelist
//!
//! A set of hostnames exempt from filtering and injection. Presence is the
//! only state: removing a domain deletes it, there is no `false` entry.
//! Persistence lives in the background crate.

use std::collections::BTreeSet;

use crate::tab::Tab;

/// Exempted hostnames, kept sorted so compiled rules come out in a stable
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    domains: BTreeSet<String>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
        }
    }

    #[inline]
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    /// Add a domain. Returns false if it was already present.
    pub fn insert(&mut self, domain: impl Into<String>) -> bool {
        self.domains.insert(domain.into())
    }

    /// Remove a domain. Returns false if it was not present.
    pub fn remove(&mut self, domain: &str) -> bool {
        self.domains.remove(domain)
    }

    /// Replace the whole set, e.g. after re-reading storage.
    pub fn replace(&mut self, other: Whitelist) {
        self.domains = other.domains;
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Domains in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    /// Check the tab's hostname, then each ladder level.
    pub fn is_whitelisted(&self, tab: &Tab) -> bool {
        self.whitelisted_domain_for(tab).is_some()
    }

    /// The first level of the tab's host chain present in the whitelist.
    pub fn whitelisted_domain_for<'t>(&self, tab: &'t Tab) -> Option<&'t str> {
        tab.host_chain().find(|level| self.contains(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(url: &str, whitelist: &Whitelist) -> Tab {
        Tab::prepare(1, Some(url), whitelist)
    }

    #[test]
    fn test_exact_hostname() {
        let whitelist = Whitelist::from_domains(["example.com"]);
        let t = tab("https://www.example.com/", &whitelist);
        assert!(t.whitelisted);
        assert_eq!(whitelist.whitelisted_domain_for(&t), Some("example.com"));
    }

    #[test]
    fn test_parent_level() {
        let whitelist = Whitelist::from_domains(["example.com"]);
        let t = tab("https://a.b.example.com/", &whitelist);
        assert!(whitelist.is_whitelisted(&t));
        assert_eq!(whitelist.whitelisted_domain_for(&t), Some("example.com"));
    }

    #[test]
    fn test_most_specific_match_wins() {
        let whitelist = Whitelist::from_domains(["example.com", "b.example.com"]);
        let t = tab("https://a.b.example.com/", &whitelist);
        assert_eq!(whitelist.whitelisted_domain_for(&t), Some("b.example.com"));
    }

    #[test]
    fn test_child_does_not_cover_parent() {
        let whitelist = Whitelist::from_domains(["shop.example.com"]);
        let t = tab("https://example.com/", &whitelist);
        assert!(!whitelist.is_whitelisted(&t));
        assert_eq!(whitelist.whitelisted_domain_for(&t), None);
    }

    #[test]
    fn test_non_http_tab_never_whitelisted() {
        let whitelist = Whitelist::from_domains(["extensions"]);
        let t = tab("chrome://extensions", &whitelist);
        assert!(!whitelist.is_whitelisted(&t));
    }

    #[test]
    fn test_insert_remove_round_trip() {
        let mut whitelist = Whitelist::new();
        assert!(whitelist.insert("example.com"));
        assert!(!whitelist.insert("example.com"));
        assert!(whitelist.remove("example.com"));
        assert!(!whitelist.remove("example.com"));
        assert!(whitelist.is_empty());
    }
}

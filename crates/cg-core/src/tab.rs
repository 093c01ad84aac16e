//! Tab registry
//!
//! Authoritative snapshot of live tabs. A tab's state is always recomputed
//! from its URL and the current whitelist, never patched field by field.

use std::collections::{BTreeMap, HashSet};

use crate::types::NO_TAB;
use crate::url::{domain_levels, is_http_url, normalize_hostname};
use crate::whitelist::Whitelist;

// =============================================================================
// Tab
// =============================================================================

/// Derived state of one browser tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id: i32,
    /// Last committed URL (empty if the browser reported none)
    pub url: String,
    /// Normalized hostname, `None` for non-HTTP(S) pages
    pub hostname: Option<String>,
    /// Parent domains, most specific first, hostname excluded
    pub host_levels: Vec<String>,
    pub whitelisted: bool,
}

impl Tab {
    /// Compute a tab from scratch.
    pub fn prepare(id: i32, url: Option<&str>, whitelist: &Whitelist) -> Self {
        let url = url.unwrap_or_default();
        let hostname = normalize_hostname(url, true);
        let host_levels = hostname.as_deref().map(domain_levels).unwrap_or_default();

        let mut tab = Self {
            id,
            url: url.to_string(),
            hostname,
            host_levels,
            whitelisted: false,
        };
        tab.whitelisted = whitelist.is_whitelisted(&tab);
        tab
    }

    /// Hostname followed by every ladder level. Empty for non-HTTP(S) tabs.
    pub fn host_chain(&self) -> impl Iterator<Item = &str> {
        self.hostname
            .as_deref()
            .into_iter()
            .chain(self.host_levels.iter().map(String::as_str))
    }

    /// The page is a web page we know the hostname of.
    #[inline]
    pub fn is_http(&self) -> bool {
        self.hostname.is_some() && is_http_url(&self.url)
    }

    /// Injection only targets web pages that are not whitelisted.
    #[inline]
    pub fn is_injectable(&self) -> bool {
        self.is_http() && !self.whitelisted
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Live tabs keyed by tab id.
///
/// Iteration is in ascending id order, which makes initiator adoption
/// deterministic when several tabs share a hostname.
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: BTreeMap<i32, Tab>,
    xml_tabs: HashSet<i32>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute and store a tab, replacing any previous state.
    pub fn upsert(&mut self, id: i32, url: Option<&str>, whitelist: &Whitelist) -> &Tab {
        let tab = Tab::prepare(id, url, whitelist);
        log::debug!(
            "tab {} -> {:?} (levels: {}, whitelisted: {})",
            id,
            tab.hostname,
            tab.host_levels.len(),
            tab.whitelisted
        );
        self.tabs.insert(id, tab);
        &self.tabs[&id]
    }

    /// Drop a tab. Idempotent.
    pub fn remove(&mut self, id: i32) -> Option<Tab> {
        self.xml_tabs.remove(&id);
        self.tabs.remove(&id)
    }

    pub fn get(&self, id: i32) -> Option<&Tab> {
        self.tabs.get(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.tabs.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.tabs.clear();
        self.xml_tabs.clear();
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.values()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.tabs.keys().copied().collect()
    }

    /// First tracked tab whose hostname equals `hostname`.
    pub fn find_by_hostname(&self, hostname: &str) -> Option<i32> {
        self.tabs
            .values()
            .find(|tab| tab.hostname.as_deref() == Some(hostname))
            .map(|tab| tab.id)
    }

    /// Resolve the tab a request belongs to.
    ///
    /// Requests without a tab (service workers, cached fetches) are adopted by
    /// a tab whose hostname equals the initiator's. The adoption applies to
    /// this decision only.
    pub fn resolve_request_tab(&self, tab_id: i32, initiator: Option<&str>) -> Option<&Tab> {
        if tab_id == NO_TAB {
            let host = initiator.and_then(|origin| normalize_hostname(origin, true))?;
            let adopted = self.find_by_hostname(&host)?;
            return self.get(adopted);
        }
        self.get(tab_id)
    }

    /// Recompute the whitelisted flag of every tab whose host chain contains
    /// `domain`. Returns the ids whose flag changed.
    pub fn refresh_whitelisted(&mut self, domain: &str, whitelist: &Whitelist) -> Vec<i32> {
        let mut changed = Vec::new();
        for tab in self.tabs.values_mut() {
            if !tab.host_chain().any(|level| level == domain) {
                continue;
            }
            let whitelisted = whitelist.is_whitelisted(tab);
            if tab.whitelisted != whitelisted {
                tab.whitelisted = whitelisted;
                changed.push(tab.id);
            }
        }
        changed
    }

    /// Recompute every tab's whitelisted flag.
    pub fn refresh_all_whitelisted(&mut self, whitelist: &Whitelist) -> Vec<i32> {
        let mut changed = Vec::new();
        for tab in self.tabs.values_mut() {
            let whitelisted = whitelist.is_whitelisted(tab);
            if tab.whitelisted != whitelisted {
                tab.whitelisted = whitelisted;
                changed.push(tab.id);
            }
        }
        changed
    }

    /// Record whether the tab's main document is served as XML.
    pub fn mark_xml(&mut self, id: i32, is_xml: bool) {
        if is_xml {
            self.xml_tabs.insert(id);
        } else {
            self.xml_tabs.remove(&id);
        }
    }

    pub fn is_xml(&self, id: i32) -> bool {
        self.xml_tabs.contains(&id)
    }
}

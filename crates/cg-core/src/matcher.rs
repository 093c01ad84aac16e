//! Request Filter Engine
//!
//! This is the hot path - every script, stylesheet and XHR request of an
//! imperative-backend browser goes through here synchronously. No I/O, no
//! suspension, and allocation only for initiator adoption.
//!
//! Evaluation order is fixed: keyword groups, then the flat common list, then
//! the per-site substrings of the page's host chain. The first decisive entry
//! wins.

use crate::filters::{FilterEntry, FilterTable};
use crate::tab::{Tab, TabRegistry};
use crate::types::{MatchDecision, MatchResult, MatchSource, RequestContext, RequestType};
use crate::url::clean_url;

// =============================================================================
// Matcher
// =============================================================================

/// The request matching engine over a borrowed filter table.
pub struct Matcher<'a> {
    table: &'a FilterTable,
}

impl<'a> Matcher<'a> {
    /// Create a new matcher with the given table.
    pub fn new(table: &'a FilterTable) -> Self {
        Self { table }
    }

    /// Match a request and return the decision.
    pub fn match_request(&self, ctx: &RequestContext<'_>, tabs: &TabRegistry) -> MatchResult {
        if !RequestType::FILTERED.intersects(ctx.request_type) {
            return MatchResult::allow(MatchSource::UnfilteredType, None);
        }

        let tab = match tabs.resolve_request_tab(ctx.tab_id, ctx.initiator) {
            Some(tab) => tab,
            None => return MatchResult::allow(MatchSource::UnknownTab, None),
        };

        if tab.whitelisted {
            return MatchResult::allow(MatchSource::Whitelisted, Some(tab.id));
        }

        if ctx.url.is_empty() {
            return MatchResult::allow(MatchSource::NoUrl, Some(tab.id));
        }

        self.match_for_tab(ctx.url, tab)
    }

    /// Run the three filter tiers for a request on a known, non-whitelisted
    /// tab.
    pub fn match_for_tab(&self, url: &str, tab: &Tab) -> MatchResult {
        let clean = clean_url(url);

        // Tier 1: keyword groups. Only groups whose keyword occurs in the raw
        // URL are scanned.
        for group in &self.table.groups {
            if !url.contains(group.keyword.as_str()) {
                continue;
            }
            if let Some(result) = match_entries(&group.entries, url, clean, tab, |index| {
                MatchSource::Group {
                    keyword: group.keyword.clone(),
                    index,
                }
            }) {
                return result;
            }
        }

        // Tier 2: ungrouped entries
        if let Some(result) = match_entries(&self.table.common, url, clean, tab, |index| {
            MatchSource::Common { index }
        }) {
            return result;
        }

        // Tier 3: site specific substrings, most specific level first
        for level in tab.host_chain() {
            let Some(patterns) = self.table.specific.get(level) else {
                continue;
            };
            if patterns.iter().any(|pattern| url.contains(pattern.as_str())) {
                return MatchResult {
                    decision: MatchDecision::Block,
                    source: MatchSource::Specific {
                        level: level.to_string(),
                    },
                    excepted: false,
                    tab_id: Some(tab.id),
                };
            }
        }

        MatchResult::allow(MatchSource::NoMatch, Some(tab.id))
    }

    /// Convenience wrapper returning only whether to cancel.
    #[inline]
    pub fn should_block(&self, ctx: &RequestContext<'_>, tabs: &TabRegistry) -> bool {
        self.match_request(ctx, tabs).is_block()
    }
}

/// Scan an ordered entry list. The first matching entry decides: allow if the
/// page is one of its exceptions, block otherwise.
fn match_entries(
    entries: &[FilterEntry],
    url: &str,
    clean: &str,
    tab: &Tab,
    source: impl Fn(usize) -> MatchSource,
) -> Option<MatchResult> {
    let (index, entry) = entries
        .iter()
        .enumerate()
        .find(|(_, entry)| entry.matches(url, clean))?;

    let excepted = entry.is_excepted(tab.host_chain());
    Some(MatchResult {
        decision: if excepted {
            MatchDecision::Allow
        } else {
            MatchDecision::Block
        },
        source: source(index),
        excepted,
        tab_id: Some(tab.id),
    })
}

use std::collections::HashSet;

use cg_core::filters::{FilterEntry, FilterTable};

/// Counts from [`optimize_filters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    /// Entries that could never decide because an earlier entry in the same
    /// list has the same pattern and match mode
    pub shadowed: usize,
    /// Repeated per-site substrings
    pub deduped: usize,
    /// Keyword groups left without entries
    pub empty_groups: usize,
}

/// Remove entries that can never change a decision.
///
/// Matching stops at the first entry whose pattern hits, so a later entry in
/// the same list with an identical pattern and match mode is unreachable. The
/// first occurrence, including its exception list, is kept. Decisions are
/// identical before and after.
pub fn optimize_filters(table: &mut FilterTable) -> OptimizeStats {
    let before = table.entry_count();
    let mut shadowed = 0usize;

    for group in &mut table.groups {
        shadowed += drop_shadowed(&mut group.entries);
    }
    shadowed += drop_shadowed(&mut table.common);

    let groups_before = table.groups.len();
    table.groups.retain(|group| !group.entries.is_empty());
    let empty_groups = groups_before - table.groups.len();

    let mut deduped = 0usize;
    for patterns in table.specific.values_mut() {
        let mut seen: HashSet<String> = HashSet::new();
        let len = patterns.len();
        patterns.retain(|pattern| seen.insert(pattern.clone()));
        deduped += len - patterns.len();
    }
    table.specific.retain(|_, patterns| !patterns.is_empty());

    let after = table.entry_count();

    if shadowed + deduped + empty_groups > 0 {
        log::debug!(
            "optimized filters: {} -> {} entries ({} shadowed, {} deduped, {} empty groups)",
            before,
            after,
            shadowed,
            deduped,
            empty_groups
        );
    }

    OptimizeStats {
        before,
        after,
        shadowed,
        deduped,
        empty_groups,
    }
}

fn drop_shadowed(entries: &mut Vec<FilterEntry>) -> usize {
    let mut seen: HashSet<(String, bool)> = HashSet::new();
    let len = entries.len();
    entries.retain(|entry| seen.insert((entry.pattern.clone(), entry.match_raw_url)));
    len - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_core::filters::KeywordGroup;

    #[test]
    fn drops_shadowed_entries_keeping_first() {
        let mut table = FilterTable::new();
        table.groups.push(KeywordGroup::new(
            "cmp",
            vec![
                FilterEntry::new("cmp.js").with_exceptions(["a.com"]),
                FilterEntry::new("cmp.js"),
                FilterEntry::raw("cmp.js"),
            ],
        ));
        table.common = vec![FilterEntry::new("gdpr"), FilterEntry::new("gdpr")];

        let stats = optimize_filters(&mut table);
        assert_eq!(stats.before, 5);
        assert_eq!(stats.after, 3);
        assert_eq!(stats.shadowed, 2);
        assert_eq!(table.groups[0].entries[0].exceptions, vec!["a.com"]);
        assert!(table.groups[0].entries[1].match_raw_url);
    }

    #[test]
    fn removes_empty_groups_and_duplicate_specifics() {
        let mut table = FilterTable::new();
        table.groups.push(KeywordGroup::new("empty", Vec::new()));
        table.groups.push(KeywordGroup::new("kept", vec![FilterEntry::new("x")]));
        table
            .specific
            .insert("example.com".into(), vec!["a".into(), "a".into(), "b".into()]);
        table.specific.insert("void.com".into(), Vec::new());

        let stats = optimize_filters(&mut table);
        assert_eq!(stats.empty_groups, 1);
        assert_eq!(stats.deduped, 1);
        assert_eq!(table.groups.len(), 1);
        assert_eq!(table.specific["example.com"], vec!["a", "b"]);
        assert!(!table.specific.contains_key("void.com"));
    }
}

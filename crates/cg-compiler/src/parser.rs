use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use cg_core::filters::{FilterEntry, FilterTable, KeywordGroup};
use cg_core::injection::{InjectionRule, RuleCatalog, RulePayload, ScriptRef};

/// Error type for data bundle loading.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid filter entry in {section}: {reason}")]
    InvalidEntry { section: String, reason: String },
    #[error("Invalid rule for {host}: {reason}")]
    InvalidRule { host: String, reason: String },
    #[error("Invalid css bucket id: {0}")]
    InvalidBucket(String),
}

/// Everything the background needs from the static data.
#[derive(Debug, Clone, Default)]
pub struct DataBundle {
    pub filters: FilterTable,
    pub catalog: RuleCatalog,
}

#[derive(Deserialize)]
struct RawBundle {
    #[serde(default)]
    block_urls: RawBlockUrls,
    #[serde(default)]
    rules: Map<String, Value>,
    #[serde(default)]
    commons: Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct RawBlockUrls {
    #[serde(default)]
    common_groups: Map<String, Value>,
    #[serde(default)]
    common: Vec<RawEntry>,
    #[serde(default)]
    specific: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(alias = "substring")]
    r: String,
    #[serde(default, alias = "match_raw_url")]
    q: Value,
    #[serde(default, alias = "exceptions")]
    e: Option<Vec<String>>,
}

impl From<RawEntry> for FilterEntry {
    fn from(raw: RawEntry) -> Self {
        FilterEntry {
            pattern: raw.r,
            match_raw_url: is_truthy(&raw.q),
            exceptions: raw.e.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct RawRule {
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    c: Option<Value>,
    #[serde(default)]
    j: Option<Value>,
}

/// Parse a complete data bundle (`block_urls`, `rules`, `commons`).
pub fn parse_bundle(text: &str) -> Result<DataBundle, CompileError> {
    let raw: RawBundle = serde_json::from_str(text)?;

    let filters = build_filter_table(raw.block_urls)?;

    let mut catalog = RuleCatalog::new();
    for (key, value) in raw.commons {
        let bucket = key
            .trim()
            .parse::<u32>()
            .map_err(|_| CompileError::InvalidBucket(key.clone()))?;
        let css = value
            .as_str()
            .ok_or_else(|| CompileError::InvalidBucket(key.clone()))?;
        catalog.commons.insert(bucket, css.to_string());
    }

    for (host, value) in raw.rules {
        let rule = parse_rule(&host, value)?;
        catalog.rules.insert(host, rule);
    }

    log::debug!(
        "parsed bundle: {} filter entries, {} site rules, {} css buckets",
        filters.entry_count(),
        catalog.rules.len(),
        catalog.commons.len()
    );

    Ok(DataBundle { filters, catalog })
}

/// Parse only the `block_urls` object of a bundle.
pub fn parse_filter_table(text: &str) -> Result<FilterTable, CompileError> {
    let raw: RawBlockUrls = serde_json::from_str(text)?;
    build_filter_table(raw)
}

fn build_filter_table(raw: RawBlockUrls) -> Result<FilterTable, CompileError> {
    let mut table = FilterTable::new();

    // Map iteration follows source order (serde_json preserve_order).
    for (keyword, value) in raw.common_groups {
        let entries: Vec<RawEntry> =
            serde_json::from_value(value).map_err(|e| CompileError::InvalidEntry {
                section: format!("common_groups.{}", keyword),
                reason: e.to_string(),
            })?;
        if keyword.is_empty() {
            return Err(CompileError::InvalidEntry {
                section: "common_groups".to_string(),
                reason: "empty group keyword".to_string(),
            });
        }
        table.groups.push(KeywordGroup::new(
            keyword,
            entries.into_iter().map(FilterEntry::from).collect(),
        ));
    }

    table.common = raw.common.into_iter().map(FilterEntry::from).collect();
    table.specific = raw.specific;

    Ok(table)
}

fn parse_rule(host: &str, value: Value) -> Result<InjectionRule, CompileError> {
    let raw: RawRule = serde_json::from_value(value).map_err(|e| CompileError::InvalidRule {
        host: host.to_string(),
        reason: e.to_string(),
    })?;

    let mut payloads = Vec::new();

    if let Some(css) = raw.s {
        payloads.push(RulePayload::CustomCss(css));
    }

    if let Some(bucket) = raw.c {
        let bucket = as_u32(&bucket).ok_or_else(|| CompileError::InvalidRule {
            host: host.to_string(),
            reason: format!("css bucket must be a non-negative integer, got {}", bucket),
        })?;
        payloads.push(RulePayload::SharedCss(bucket));
    }

    if let Some(script) = raw.j {
        let number = as_i64(&script).ok_or_else(|| CompileError::InvalidRule {
            host: host.to_string(),
            reason: format!("script must be an integer, got {}", script),
        })?;
        let script = if number > 0 {
            let shared = u32::try_from(number).map_err(|_| CompileError::InvalidRule {
                host: host.to_string(),
                reason: format!("script number out of range: {}", number),
            })?;
            ScriptRef::Shared(shared)
        } else {
            ScriptRef::Named
        };
        payloads.push(RulePayload::Script(script));
    }

    Ok(InjectionRule::new(payloads))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    as_i64(value).and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = r##"{
        "block_urls": {
            "common_groups": {
                "zeta": [{ "r": "/zeta.js" }],
                "cookie": [
                    { "r": "cookie-banner.js", "e": ["good.example.com"] },
                    { "r": "cookie=consent", "q": 1 }
                ],
                "alpha": [{ "r": "/alpha.js", "q": false }]
            },
            "common": [{ "r": "/gdpr/" }, { "substring": "cmp=", "match_raw_url": true }],
            "specific": { "example.com": ["/notice.js"] }
        },
        "rules": {
            "example.com": { "s": ".a{}", "c": 4, "j": 0 },
            "news.org": { "j": 7 },
            "plain.net": {}
        },
        "commons": { "4": "#cc{display:none}" }
    }"##;

    #[test]
    fn preserves_group_order() {
        let bundle = parse_bundle(BUNDLE).expect("bundle should parse");
        let keywords: Vec<_> = bundle.filters.groups.iter().map(|g| g.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["zeta", "cookie", "alpha"]);

        let cookie = &bundle.filters.groups[1];
        assert_eq!(cookie.entries[0].pattern, "cookie-banner.js");
        assert_eq!(cookie.entries[0].exceptions, vec!["good.example.com"]);
        assert!(!cookie.entries[0].match_raw_url);
        assert!(cookie.entries[1].match_raw_url);
    }

    #[test]
    fn parses_common_and_specific() {
        let bundle = parse_bundle(BUNDLE).expect("bundle should parse");
        assert_eq!(bundle.filters.common.len(), 2);
        assert!(bundle.filters.common[1].match_raw_url);
        assert_eq!(bundle.filters.specific["example.com"], vec!["/notice.js"]);
    }

    #[test]
    fn parses_rules_as_tagged_payloads() {
        let bundle = parse_bundle(BUNDLE).expect("bundle should parse");
        let rule = bundle.catalog.rule("example.com").expect("rule exists");
        assert_eq!(
            rule.payloads,
            vec![
                RulePayload::CustomCss(".a{}".into()),
                RulePayload::SharedCss(4),
                RulePayload::Script(ScriptRef::Named),
            ]
        );
        assert_eq!(
            bundle.catalog.rule("news.org").map(|r| r.payloads.clone()),
            Some(vec![RulePayload::Script(ScriptRef::Shared(7))])
        );
        assert!(bundle.catalog.rule("plain.net").is_some_and(|r| r.is_empty()));
        assert_eq!(bundle.catalog.shared_css(4), Some("#cc{display:none}"));
    }

    #[test]
    fn empty_bundle_is_valid() {
        let bundle = parse_bundle("{}").expect("empty bundle should parse");
        assert_eq!(bundle.filters.entry_count(), 0);
        assert!(bundle.catalog.rules.is_empty());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(parse_bundle("not json"), Err(CompileError::Json(_))));
        assert!(matches!(
            parse_bundle(r#"{"block_urls": {"common_groups": {"x": [{"q": true}]}}}"#),
            Err(CompileError::InvalidEntry { .. })
        ));
        assert!(matches!(
            parse_bundle(r#"{"rules": {"a.com": {"c": "big"}}}"#),
            Err(CompileError::InvalidRule { .. })
        ));
        assert!(matches!(
            parse_bundle(r#"{"commons": {"x": ".a{}"}}"#),
            Err(CompileError::InvalidBucket(_))
        ));
    }

    #[test]
    fn parses_block_urls_alone() {
        let table = parse_filter_table(r#"{"common": [{"r": "ads"}]}"#).expect("table should parse");
        assert_eq!(table.common, vec![FilterEntry::new("ads")]);
    }
}

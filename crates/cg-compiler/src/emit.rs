//! Bundle writer
//!
//! Serializes tables back into the bundle format accepted by the parser.
//! Group and entry order is kept; per-site tables are written sorted so the
//! output is stable.

use serde_json::{json, Map, Value};

use cg_core::filters::{FilterEntry, FilterTable};
use cg_core::injection::{InjectionRule, RulePayload, ScriptRef};

use crate::parser::DataBundle;

fn emit_entry(entry: &FilterEntry) -> Value {
    let mut out = Map::new();
    out.insert("r".to_string(), json!(entry.pattern));
    if entry.match_raw_url {
        out.insert("q".to_string(), json!(true));
    }
    if !entry.exceptions.is_empty() {
        out.insert("e".to_string(), json!(entry.exceptions));
    }
    Value::Object(out)
}

fn emit_rule(rule: &InjectionRule) -> Value {
    let mut out = Map::new();
    for payload in &rule.payloads {
        match payload {
            RulePayload::CustomCss(css) => out.insert("s".to_string(), json!(css)),
            RulePayload::SharedCss(bucket) => out.insert("c".to_string(), json!(bucket)),
            RulePayload::Script(ScriptRef::Shared(n)) => out.insert("j".to_string(), json!(n)),
            RulePayload::Script(ScriptRef::Named) => out.insert("j".to_string(), json!(0)),
        };
    }
    Value::Object(out)
}

/// The `block_urls` object of a bundle.
pub fn emit_filter_table(table: &FilterTable) -> Value {
    let groups: Map<String, Value> = table
        .groups
        .iter()
        .map(|group| {
            let entries: Vec<Value> = group.entries.iter().map(emit_entry).collect();
            (group.keyword.clone(), Value::Array(entries))
        })
        .collect();

    let mut hosts: Vec<&String> = table.specific.keys().collect();
    hosts.sort();
    let specific: Map<String, Value> = hosts
        .into_iter()
        .map(|host| (host.clone(), json!(table.specific[host])))
        .collect();

    json!({
        "common_groups": groups,
        "common": table.common.iter().map(emit_entry).collect::<Vec<_>>(),
        "specific": specific,
    })
}

pub fn emit_bundle(bundle: &DataBundle) -> Value {
    let mut hosts: Vec<&String> = bundle.catalog.rules.keys().collect();
    hosts.sort();
    let rules: Map<String, Value> = hosts
        .into_iter()
        .map(|host| (host.clone(), emit_rule(&bundle.catalog.rules[host])))
        .collect();

    let mut buckets: Vec<u32> = bundle.catalog.commons.keys().copied().collect();
    buckets.sort_unstable();
    let commons: Map<String, Value> = buckets
        .into_iter()
        .map(|bucket| (bucket.to_string(), json!(bundle.catalog.commons[&bucket])))
        .collect();

    json!({
        "block_urls": emit_filter_table(&bundle.filters),
        "rules": rules,
        "commons": commons,
    })
}

//! Injection rules and the precedence cascade
//!
//! Resolves which stylesheet/script payloads a page receives on top of the
//! always-injected common stylesheet and embeds script. Precedence is strict:
//! exact hostname, then ladder levels (most specific first), then the generic
//! fallback script. At most one tier contributes payloads.

use std::collections::HashMap;
use std::sync::Arc;

use crate::tab::Tab;

// =============================================================================
// Rule Table
// =============================================================================

/// Script attached to a site rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptRef {
    /// Shared script `common<n>.js`
    Shared(u32),
    /// Script named after the matched hostname, `<hostname>.js`
    Named,
}

/// One payload of a site rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulePayload {
    /// Stylesheet text specific to the site
    CustomCss(String),
    /// Stylesheet shared between sites, by bucket id
    SharedCss(u32),
    Script(ScriptRef),
}

/// Payloads for one hostname, in injection order. An empty rule means the
/// hostname has no dedicated payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionRule {
    pub payloads: Vec<RulePayload>,
}

impl InjectionRule {
    pub fn new(payloads: Vec<RulePayload>) -> Self {
        Self { payloads }
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// The static per-site rule table plus shared stylesheet buckets.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    pub rules: HashMap<String, InjectionRule>,
    pub commons: HashMap<u32, String>,
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(&self, hostname: &str) -> Option<&InjectionRule> {
        self.rules.get(hostname)
    }

    pub fn shared_css(&self, bucket: u32) -> Option<&str> {
        self.commons.get(&bucket).map(String::as_str)
    }
}

// =============================================================================
// Rule Cache
// =============================================================================

/// Lazily resolved rules per hostname.
///
/// Entries are never invalidated while the process lives; the rule table is
/// immutable at runtime. Start-up and extension updates call [`clear`].
///
/// [`clear`]: RuleCache::clear
#[derive(Debug, Default)]
pub struct RuleCache {
    entries: HashMap<String, Arc<InjectionRule>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule for `hostname`, resolving and caching it on first use. Hostnames
    /// without a rule cache an empty one.
    pub fn resolve(&mut self, hostname: &str, catalog: &RuleCatalog) -> Arc<InjectionRule> {
        if let Some(rule) = self.entries.get(hostname) {
            return Arc::clone(rule);
        }

        let rule = Arc::new(catalog.rule(hostname).cloned().unwrap_or_default());
        self.entries.insert(hostname.to_string(), Arc::clone(&rule));
        rule
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Locations of the fixed payload files inside the extension package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPaths {
    pub common_css: String,
    pub embeds_js: String,
    pub fallback_js: String,
    /// Directory prefix of per-site and shared scripts, with trailing `/`
    pub script_dir: String,
}

impl Default for PayloadPaths {
    fn default() -> Self {
        Self {
            common_css: "data/css/common.css".to_string(),
            embeds_js: "data/js/embeds.js".to_string(),
            fallback_js: "data/js/common.js".to_string(),
            script_dir: "data/js/".to_string(),
        }
    }
}

impl PayloadPaths {
    /// File of a site script resolved for `hostname`.
    pub fn script_file(&self, script: ScriptRef, hostname: &str) -> String {
        match script {
            ScriptRef::Shared(n) => format!("{}common{}.js", self.script_dir, n),
            ScriptRef::Named => format!("{}{}.js", self.script_dir, hostname),
        }
    }
}

/// Stylesheet source handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssSource {
    File(String),
    Code(String),
}

/// A concrete injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Css(CssSource),
    /// Script file path
    Script(String),
}

/// Concrete payloads of a site rule. Shared buckets missing from the catalog
/// are skipped; the rule still claims its tier.
pub fn rule_payloads(
    hostname: &str,
    rule: &InjectionRule,
    catalog: &RuleCatalog,
    paths: &PayloadPaths,
) -> Vec<Payload> {
    let mut payloads = Vec::with_capacity(rule.payloads.len());
    for payload in &rule.payloads {
        match payload {
            RulePayload::CustomCss(css) => payloads.push(Payload::Css(CssSource::Code(css.clone()))),
            RulePayload::SharedCss(bucket) => match catalog.shared_css(*bucket) {
                Some(css) => payloads.push(Payload::Css(CssSource::Code(css.to_string()))),
                None => log::warn!("rule for {} references missing css bucket {}", hostname, bucket),
            },
            RulePayload::Script(script) => {
                payloads.push(Payload::Script(paths.script_file(*script, hostname)))
            }
        }
    }
    payloads
}

// =============================================================================
// Cascade
// =============================================================================

/// Tier of the cascade that produced the payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeTier {
    /// Rule for the page's exact hostname
    Exact(String),
    /// Rule for a parent domain level
    Level(String),
    /// No rule anywhere on the ladder
    Fallback,
}

/// Site payloads chosen for a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionPlan {
    pub tier: CascadeTier,
    pub payloads: Vec<Payload>,
}

/// Walk the tab's host chain and pick the first level with a non-empty rule.
pub fn plan_cascade(
    tab: &Tab,
    cache: &mut RuleCache,
    catalog: &RuleCatalog,
    paths: &PayloadPaths,
) -> InjectionPlan {
    for (depth, level) in tab.host_chain().enumerate() {
        let rule = cache.resolve(level, catalog);
        if rule.is_empty() {
            continue;
        }
        let payloads = rule_payloads(level, &rule, catalog, paths);

        let tier = if depth == 0 {
            CascadeTier::Exact(level.to_string())
        } else {
            CascadeTier::Level(level.to_string())
        };
        return InjectionPlan { tier, payloads };
    }

    InjectionPlan {
        tier: CascadeTier::Fallback,
        payloads: vec![Payload::Script(paths.fallback_js.clone())],
    }
}

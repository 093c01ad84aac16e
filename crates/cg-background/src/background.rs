//! Background orchestration
//!
//! Owns the tab registry, whitelist and rule cache and reacts to browser
//! events. All state sits behind `RefCell`s: the extension is single-threaded
//! and no borrow is ever held across an `.await`.

use std::cell::{Ref, RefCell};

use cg_compiler::{DataBundle, RuleIdAllocator};
use cg_core::filters::FilterTable;
use cg_core::injection::{PayloadPaths, RuleCache, RuleCatalog};
use cg_core::matcher::Matcher;
use cg_core::tab::TabRegistry;
use cg_core::types::{MatchResult, RequestContext, RequestType};
use cg_core::whitelist::Whitelist;

use crate::config::BackgroundConfig;
use crate::events::{
    is_newer_version, BlockingResponse, HeadersDetails, InstalledDetails, NavigationDetails,
    RequestDetails, TabChange,
};
use crate::host::{Host, RawTab};
use crate::store::{load_whitelist, persist_whitelist};
use crate::sync::resync;

pub struct Background<H> {
    pub(crate) host: H,
    pub(crate) config: BackgroundConfig,
    pub(crate) paths: PayloadPaths,
    filters: FilterTable,
    pub(crate) catalog: RuleCatalog,
    pub(crate) tabs: RefCell<TabRegistry>,
    pub(crate) whitelist: RefCell<Whitelist>,
    pub(crate) rule_cache: RefCell<RuleCache>,
    rule_ids: RefCell<RuleIdAllocator>,
}

impl<H: Host> Background<H> {
    pub fn new(host: H, bundle: DataBundle, config: BackgroundConfig) -> Self {
        let paths = config.payloads.paths();
        Self {
            host,
            config,
            paths,
            filters: bundle.filters,
            catalog: bundle.catalog,
            tabs: RefCell::new(TabRegistry::new()),
            whitelist: RefCell::new(Whitelist::new()),
            rule_cache: RefCell::new(RuleCache::new()),
            rule_ids: RefCell::new(RuleIdAllocator::new()),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    pub fn tabs(&self) -> Ref<'_, TabRegistry> {
        self.tabs.borrow()
    }

    pub fn whitelist(&self) -> Ref<'_, Whitelist> {
        self.whitelist.borrow()
    }

    /// Load persisted state. Call once before dispatching events.
    pub async fn init(&self) {
        log::info!(
            "background starting ({:?} backend, {} filter entries, {} site rules)",
            self.config.backend,
            self.filters.entry_count(),
            self.catalog.rules.len()
        );
        self.reload().await;
    }

    // =========================================================================
    // Tab events
    // =========================================================================

    pub fn on_tab_created(&self, tab: &RawTab) {
        let whitelist = self.whitelist.borrow();
        self.tabs
            .borrow_mut()
            .upsert(tab.id, tab.url.as_deref(), &whitelist);
    }

    /// Any status change recomputes the tab from its current URL.
    pub fn on_tab_updated(&self, change: &TabChange, tab: &RawTab) {
        if change.status.is_none() {
            return;
        }
        let url = tab.url.as_deref().or(change.url.as_deref());
        let whitelist = self.whitelist.borrow();
        self.tabs.borrow_mut().upsert(tab.id, url, &whitelist);
    }

    pub fn on_tab_removed(&self, tab_id: i32) {
        self.tabs.borrow_mut().remove(tab_id);
    }

    /// Top-level navigations re-prepare the tab and inject into it.
    pub async fn on_committed(&self, details: &NavigationDetails) {
        if details.frame_id > 0 {
            return;
        }
        {
            let whitelist = self.whitelist.borrow();
            self.tabs
                .borrow_mut()
                .upsert(details.tab_id, details.url.as_deref(), &whitelist);
        }
        self.inject(details.tab_id, 0).await;
    }

    /// Sub-frames are injected once their response starts.
    pub async fn on_response_started(&self, details: &RequestDetails) {
        if details.frame_id > 0 {
            self.inject(details.tab_id, details.frame_id).await;
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Decide a request synchronously.
    pub fn match_request(&self, details: &RequestDetails) -> MatchResult {
        let ctx = RequestContext {
            url: &details.url,
            tab_id: details.tab_id,
            initiator: details.initiator.as_deref(),
            request_type: RequestType::from_str(&details.request_type),
        };
        let tabs = self.tabs.borrow();
        Matcher::new(&self.filters).match_request(&ctx, &tabs)
    }

    /// Blocking request listener of the imperative backend.
    pub fn on_before_request(&self, details: &RequestDetails) -> BlockingResponse {
        if self.config.is_declarative() {
            return BlockingResponse { cancel: false };
        }

        let result = self.match_request(details);
        if result.is_block() {
            log::debug!(
                "blocked {} on tab {:?} ({:?})",
                details.url,
                result.tab_id,
                result.source
            );
        } else if result.excepted {
            log::debug!("allowed {} by exception ({:?})", details.url, result.source);
        }
        BlockingResponse {
            cancel: result.is_block(),
        }
    }

    /// Flag tabs whose document is served as XML.
    pub fn on_headers_received(&self, details: &HeadersDetails) -> BlockingResponse {
        let mut tabs = self.tabs.borrow_mut();
        if tabs.contains(details.tab_id) {
            if let Some(content_type) = details.header("Content-Type") {
                tabs.mark_xml(details.tab_id, content_type.contains("/xml"));
            }
        }
        BlockingResponse { cancel: false }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn on_startup(&self) {
        self.rule_cache.borrow_mut().clear();
        self.rebuild_all().await;
    }

    pub async fn on_installed(&self, details: &InstalledDetails, current_version: &str) {
        self.rule_cache.borrow_mut().clear();

        let updated = details.reason == "update"
            && details
                .previous_version
                .as_deref()
                .is_some_and(|previous| is_newer_version(current_version, previous));
        if updated {
            log::info!(
                "updated from {:?} to {}, rebuilding tabs",
                details.previous_version,
                current_version
            );
            self.rebuild_all().await;
        }
    }

    /// Forget every tab, re-query the open ones and inject into each.
    pub async fn rebuild_all(&self) {
        self.tabs.borrow_mut().clear();

        let open = match self.host.query_all().await {
            Ok(open) => open,
            Err(e) => {
                log::warn!("tab query failed: {}", e);
                return;
            }
        };

        {
            let whitelist = self.whitelist.borrow();
            let mut tabs = self.tabs.borrow_mut();
            for tab in &open {
                tabs.upsert(tab.id, tab.url.as_deref(), &whitelist);
            }
        }

        let ids = self.tabs.borrow().ids();
        log::info!("rebuilt {} tabs", ids.len());
        for id in ids {
            self.inject(id, 0).await;
        }
    }

    // =========================================================================
    // Whitelist
    // =========================================================================

    /// Flip the whitelist state of a tab's site.
    ///
    /// A whitelisted tab removes the domain that matched it; any other web
    /// tab adds its hostname. Tab flags follow only once the new map is
    /// persisted; a failed write restores the previous map.
    pub async fn toggle(&self, tab_id: i32) {
        let target = {
            let tabs = self.tabs.borrow();
            let whitelist = self.whitelist.borrow();
            tabs.get(tab_id).filter(|tab| tab.is_http()).and_then(|tab| {
                if tab.whitelisted {
                    whitelist
                        .whitelisted_domain_for(tab)
                        .or(tab.hostname.as_deref())
                        .map(|domain| (domain.to_string(), true))
                } else {
                    tab.hostname.clone().map(|hostname| (hostname, false))
                }
            })
        };
        let Some((domain, was_whitelisted)) = target else {
            return;
        };

        let snapshot = {
            let mut whitelist = self.whitelist.borrow_mut();
            if was_whitelisted {
                whitelist.remove(&domain);
            } else {
                whitelist.insert(domain.clone());
            }
            whitelist.clone()
        };

        if let Err(e) = persist_whitelist(&self.host, &self.config.storage_key, &snapshot).await {
            log::warn!("whitelist write failed, keeping previous state: {}", e);
            let mut whitelist = self.whitelist.borrow_mut();
            if was_whitelisted {
                whitelist.insert(domain);
            } else {
                whitelist.remove(&domain);
            }
            return;
        }

        let changed = {
            let whitelist = self.whitelist.borrow();
            self.tabs.borrow_mut().refresh_whitelisted(&domain, &whitelist)
        };
        log::info!(
            "{} {} ({} tabs updated)",
            if was_whitelisted { "unwhitelisted" } else { "whitelisted" },
            domain,
            changed.len()
        );

        if self.config.is_declarative() {
            self.resync().await;
        }
    }

    /// Re-read the persisted whitelist.
    pub async fn reload(&self) {
        self.rule_ids.borrow_mut().reset();

        match load_whitelist(&self.host, &self.config.storage_key).await {
            Ok(Some(stored)) => self.whitelist.borrow_mut().replace(stored),
            Ok(None) => log::debug!("no stored whitelist, keeping current"),
            Err(e) => log::warn!("whitelist read failed: {}", e),
        }

        {
            let whitelist = self.whitelist.borrow();
            self.tabs.borrow_mut().refresh_all_whitelisted(&whitelist);
        }

        if self.config.is_declarative() {
            self.resync().await;
        }
    }

    /// Replace installed dynamic rules with the current whitelist's.
    pub async fn resync(&self) {
        match resync(&self.host, &self.whitelist, &self.rule_ids).await {
            Ok(count) => log::info!("installed {} allow rules", count),
            Err(e) => log::warn!("dynamic rule sync failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::mock::{Call, MockHost};
    use serde_json::json;

    const BUNDLE: &str = r#"{
        "block_urls": {
            "common_groups": {
                "track": [{ "r": "track.js", "e": ["good.example.com"] }]
            },
            "common": [{ "r": "ads" }],
            "specific": {}
        },
        "rules": {},
        "commons": {}
    }"#;

    fn background(backend: Backend) -> Background<MockHost> {
        let bundle = cg_compiler::parse_bundle(BUNDLE).unwrap();
        let config = BackgroundConfig {
            backend,
            ..BackgroundConfig::default()
        };
        Background::new(MockHost::new(), bundle, config)
    }

    fn request(tab_id: i32, url: &str) -> RequestDetails {
        RequestDetails {
            tab_id,
            frame_id: 0,
            url: url.to_string(),
            initiator: None,
            request_type: "script".to_string(),
        }
    }

    fn open(bg: &Background<MockHost>, id: i32, url: &str) {
        bg.on_tab_created(&RawTab {
            id,
            url: Some(url.to_string()),
        });
    }

    #[tokio::test]
    async fn blocks_on_tracked_tab() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://evil.example.com/");
        open(&bg, 2, "https://good.example.com/");

        let url = "https://cdn.example.com/track.js?x=1";
        assert!(bg.on_before_request(&request(1, url)).cancel);
        assert!(!bg.on_before_request(&request(2, url)).cancel);
        assert!(!bg.on_before_request(&request(99, url)).cancel);
    }

    #[tokio::test]
    async fn ignores_unfiltered_types_and_declarative() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://x.com/");
        let mut details = request(1, "https://x.com/ads/banner.png");
        details.request_type = "image".to_string();
        assert!(!bg.on_before_request(&details).cancel);

        let bg = background(Backend::Declarative);
        open(&bg, 1, "https://x.com/");
        assert!(!bg.on_before_request(&request(1, "https://x.com/ads/x.js")).cancel);
    }

    #[tokio::test]
    async fn toggle_round_trip() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://shop.example.com/");
        open(&bg, 2, "https://example.com/");

        bg.toggle(2).await;
        assert!(bg.whitelist().contains("example.com"));
        assert!(bg.tabs().get(1).unwrap().whitelisted);
        assert!(bg.tabs().get(2).unwrap().whitelisted);
        assert_eq!(
            bg.host().stored("whitelisted_domains"),
            Some(json!({"example.com": true}))
        );

        // Toggling from the subdomain removes the matched parent domain.
        bg.toggle(1).await;
        assert!(bg.whitelist().is_empty());
        assert!(!bg.tabs().get(1).unwrap().whitelisted);
        assert!(!bg.tabs().get(2).unwrap().whitelisted);
    }

    #[tokio::test]
    async fn toggle_prefers_hostname_key() {
        let bg = background(Backend::Imperative);
        bg.host().store(
            "whitelisted_domains",
            json!({"shop.example.com": true, "example.com": true}),
        );
        bg.reload().await;
        open(&bg, 1, "https://shop.example.com/");

        bg.toggle(1).await;
        assert!(!bg.whitelist().contains("shop.example.com"));
        assert!(bg.whitelist().contains("example.com"));
        assert!(bg.tabs().get(1).unwrap().whitelisted);
    }

    #[tokio::test]
    async fn toggle_rolls_back_on_write_failure() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://example.com/");
        bg.host().fail_storage_writes(true);

        bg.toggle(1).await;
        assert!(bg.whitelist().is_empty());
        assert!(!bg.tabs().get(1).unwrap().whitelisted);
    }

    #[tokio::test]
    async fn toggle_ignores_non_web_tabs() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "chrome://extensions");
        bg.toggle(1).await;
        bg.toggle(42).await;
        assert!(bg.whitelist().is_empty());
        assert!(bg.host().stored("whitelisted_domains").is_none());
    }

    #[tokio::test]
    async fn declarative_toggle_resyncs() {
        let bg = background(Backend::Declarative);
        bg.init().await;
        open(&bg, 1, "https://example.com/");

        bg.toggle(1).await;
        let rules = bg.host().dynamic_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].condition.initiator_domains, vec!["example.com"]);

        bg.toggle(1).await;
        assert!(bg.host().dynamic_rules().is_empty());
    }

    #[tokio::test]
    async fn reload_keeps_map_when_key_absent() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://a.com/");
        bg.toggle(1).await;
        bg.host().clear_storage();

        bg.reload().await;
        assert!(bg.whitelist().contains("a.com"));

        bg.host()
            .store("whitelisted_domains", json!({"b.com": true}));
        bg.reload().await;
        assert!(!bg.whitelist().contains("a.com"));
        assert!(!bg.tabs().get(1).unwrap().whitelisted);
    }

    #[tokio::test]
    async fn headers_flag_xml_tabs() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://feed.example.com/rss");
        let details: HeadersDetails = serde_json::from_value(json!({
            "tabId": 1,
            "responseHeaders": [{"name": "content-type", "value": "application/xml"}]
        }))
        .unwrap();

        assert!(!bg.on_headers_received(&details).cancel);
        assert!(bg.tabs().is_xml(1));

        bg.on_tab_removed(1);
        assert!(!bg.tabs().is_xml(1));
    }

    #[tokio::test]
    async fn tab_update_requires_status() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://a.com/");
        let tab = RawTab {
            id: 1,
            url: Some("https://b.com/".to_string()),
        };

        bg.on_tab_updated(&TabChange::default(), &tab);
        assert_eq!(bg.tabs().get(1).unwrap().hostname.as_deref(), Some("a.com"));

        let change = TabChange {
            status: Some("loading".to_string()),
            url: None,
        };
        bg.on_tab_updated(&change, &tab);
        assert_eq!(bg.tabs().get(1).unwrap().hostname.as_deref(), Some("b.com"));
    }

    #[tokio::test]
    async fn installed_update_rebuilds() {
        let bg = background(Backend::Imperative);
        bg.host().set_open_tabs(vec![RawTab {
            id: 5,
            url: Some("https://a.com/".to_string()),
        }]);

        let install = InstalledDetails {
            reason: "install".to_string(),
            previous_version: None,
        };
        bg.on_installed(&install, "3.5.0").await;
        assert!(bg.tabs().is_empty());

        let downgrade = InstalledDetails {
            reason: "update".to_string(),
            previous_version: Some("3.6.0".to_string()),
        };
        bg.on_installed(&downgrade, "3.5.0").await;
        assert!(bg.tabs().is_empty());

        let update = InstalledDetails {
            reason: "update".to_string(),
            previous_version: Some("3.4.9".to_string()),
        };
        bg.on_installed(&update, "3.5.0").await;
        assert!(bg.tabs().contains(5));
        assert!(bg
            .host()
            .calls()
            .iter()
            .any(|call| matches!(call, Call::InsertCss { tab_id: 5, .. })));
    }
}

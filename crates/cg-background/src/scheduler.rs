//! Injection scheduler
//!
//! Common stylesheet first (retried), then the embeds script, then the site
//! payloads chosen by the cascade.

use cg_core::injection::{plan_cascade, CascadeTier, CssSource, InjectionPlan, Payload};

use crate::background::Background;
use crate::host::{Host, InjectionTarget, RunAt};

/// What an injection run ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// Tab unknown, not a web page, or whitelisted
    Skipped,
    /// The common stylesheet failed on every attempt
    Abandoned { attempts: u32 },
    /// Site payloads came from this tier
    Injected(CascadeTier),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Css,
    Script,
}

impl<H: Host> Background<H> {
    fn is_injectable(&self, tab_id: i32) -> bool {
        self.tabs
            .borrow()
            .get(tab_id)
            .is_some_and(|tab| tab.is_injectable())
    }

    /// Run-at hint for the imperative backend; `None` lets the host decide.
    fn run_at(&self, tab_id: i32, kind: PayloadKind) -> Option<RunAt> {
        if self.config.is_declarative() {
            return None;
        }
        if self.tabs.borrow().is_xml(tab_id) {
            return Some(RunAt::DocumentIdle);
        }
        Some(match kind {
            PayloadKind::Css => RunAt::DocumentStart,
            PayloadKind::Script => RunAt::DocumentEnd,
        })
    }

    fn plan(&self, tab_id: i32) -> Option<InjectionPlan> {
        let tabs = self.tabs.borrow();
        let tab = tabs.get(tab_id).filter(|tab| tab.is_injectable())?;
        let mut cache = self.rule_cache.borrow_mut();
        Some(plan_cascade(tab, &mut cache, &self.catalog, &self.paths))
    }

    /// Inject into one frame of a tab.
    pub async fn inject(&self, tab_id: i32, frame_id: i32) -> InjectionOutcome {
        let target = InjectionTarget::new(tab_id, frame_id);
        let common_css = CssSource::File(self.paths.common_css.clone());
        let max_attempts = self.config.injection_attempts.max(1);

        let mut attempt = 0u32;
        loop {
            // The tab may have navigated away or been whitelisted meanwhile.
            if !self.is_injectable(tab_id) {
                return InjectionOutcome::Skipped;
            }
            attempt += 1;

            let run_at = self.run_at(tab_id, PayloadKind::Css);
            match self.host.insert_css(target, &common_css, run_at).await {
                Ok(()) => break,
                Err(e) if attempt < max_attempts => {
                    log::debug!("common css attempt {} on tab {} failed: {}", attempt, tab_id, e);
                }
                Err(e) => {
                    log::warn!(
                        "giving up on tab {} frame {} after {} attempts: {}",
                        tab_id,
                        frame_id,
                        attempt,
                        e
                    );
                    return InjectionOutcome::Abandoned { attempts: attempt };
                }
            }
        }

        if !self.is_injectable(tab_id) {
            return InjectionOutcome::Skipped;
        }

        let run_at = self.run_at(tab_id, PayloadKind::Script);
        if let Err(e) = self
            .host
            .execute_script(target, &self.paths.embeds_js, run_at)
            .await
        {
            log::warn!("embeds script on tab {}: {}", tab_id, e);
        }

        let Some(plan) = self.plan(tab_id) else {
            return InjectionOutcome::Skipped;
        };
        log::debug!(
            "tab {} frame {}: {:?} ({} payloads)",
            tab_id,
            frame_id,
            plan.tier,
            plan.payloads.len()
        );

        for payload in &plan.payloads {
            if !self.is_injectable(tab_id) {
                return InjectionOutcome::Skipped;
            }
            let result = match payload {
                Payload::Css(css) => {
                    let run_at = self.run_at(tab_id, PayloadKind::Css);
                    self.host.insert_css(target, css, run_at).await
                }
                Payload::Script(file) => {
                    let run_at = self.run_at(tab_id, PayloadKind::Script);
                    self.host.execute_script(target, file, run_at).await
                }
            };
            if let Err(e) = result {
                log::warn!("site payload on tab {}: {}", tab_id, e);
            }
        }

        InjectionOutcome::Injected(plan.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, BackgroundConfig};
    use crate::host::RawTab;
    use crate::mock::{Call, MockHost};

    const BUNDLE: &str = r##"{
        "rules": {
            "example.com": { "s": ".a{}" },
            "parent.org": { "c": 2, "j": 0 }
        },
        "commons": { "2": "#cc{display:none}" }
    }"##;

    fn background(backend: Backend) -> Background<MockHost> {
        let bundle = cg_compiler::parse_bundle(BUNDLE).unwrap();
        let config = BackgroundConfig {
            backend,
            ..BackgroundConfig::default()
        };
        Background::new(MockHost::new(), bundle, config)
    }

    fn open(bg: &Background<MockHost>, id: i32, url: &str) {
        bg.on_tab_created(&RawTab {
            id,
            url: Some(url.to_string()),
        });
    }

    fn common_css_calls(calls: &[Call]) -> usize {
        calls
            .iter()
            .filter(|call| {
                matches!(call, Call::InsertCss { css: CssSource::File(file), .. } if file == "data/css/common.css")
            })
            .count()
    }

    fn script_calls<'a>(calls: &'a [Call]) -> Vec<&'a str> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::ExecuteScript { file, .. } => Some(file.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn retries_until_success() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://unknown.net/");
        bg.host().fail_next_css(4);

        let outcome = bg.inject(1, 0).await;
        assert_eq!(outcome, InjectionOutcome::Injected(CascadeTier::Fallback));

        let calls = bg.host().calls();
        // Four failed attempts are recorded too.
        assert_eq!(common_css_calls(&calls), 5);
        assert_eq!(bg.host().successful_css(), 1);
        assert_eq!(script_calls(&calls), vec!["data/js/embeds.js", "data/js/common.js"]);
    }

    #[tokio::test]
    async fn gives_up_after_five_failures() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://unknown.net/");
        bg.host().fail_next_css(5);

        let outcome = bg.inject(1, 0).await;
        assert_eq!(outcome, InjectionOutcome::Abandoned { attempts: 5 });

        let calls = bg.host().calls();
        assert_eq!(common_css_calls(&calls), 5);
        assert!(script_calls(&calls).is_empty());
    }

    #[tokio::test]
    async fn removed_tab_stops_retries() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://unknown.net/");
        bg.host().fail_next_css(5);
        bg.host().yield_on_css(true);

        let (outcome, ()) = tokio::join!(bg.inject(1, 0), async { bg.on_tab_removed(1) });
        assert_eq!(outcome, InjectionOutcome::Skipped);

        let calls = bg.host().calls();
        assert_eq!(common_css_calls(&calls), 1);
        assert!(script_calls(&calls).is_empty());
    }

    #[tokio::test]
    async fn whitelisted_mid_run_gets_no_scripts() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://unknown.net/");
        bg.host().yield_on_css(true);

        let (outcome, ()) = tokio::join!(bg.inject(1, 0), bg.toggle(1));
        assert!(bg.tabs().get(1).unwrap().whitelisted);
        assert_eq!(outcome, InjectionOutcome::Skipped);
        assert!(script_calls(&bg.host().calls()).is_empty());
    }

    #[tokio::test]
    async fn exact_rule_never_falls_through() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://example.com/");

        let outcome = bg.inject(1, 0).await;
        assert_eq!(outcome, InjectionOutcome::Injected(CascadeTier::Exact("example.com".into())));

        let calls = bg.host().calls();
        assert_eq!(script_calls(&calls), vec!["data/js/embeds.js"]);
        assert!(calls.iter().any(|call| matches!(
            call,
            Call::InsertCss { css: CssSource::Code(code), run_at: Some(RunAt::DocumentStart), .. } if code == ".a{}"
        )));
    }

    #[tokio::test]
    async fn parent_level_payloads() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://www.news.parent.org/");

        let outcome = bg.inject(1, 3).await;
        assert_eq!(outcome, InjectionOutcome::Injected(CascadeTier::Level("parent.org".into())));

        let calls = bg.host().calls();
        assert_eq!(
            script_calls(&calls),
            vec!["data/js/embeds.js", "data/js/parent.org.js"]
        );
        assert!(calls
            .iter()
            .all(|call| !matches!(call, Call::InsertCss { frame_id, .. } if *frame_id != 3)));
    }

    #[tokio::test]
    async fn skips_whitelisted_and_unknown_tabs() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://example.com/");
        bg.toggle(1).await;

        assert_eq!(bg.inject(1, 0).await, InjectionOutcome::Skipped);
        assert_eq!(bg.inject(7, 0).await, InjectionOutcome::Skipped);

        open(&bg, 2, "about:blank");
        assert_eq!(bg.inject(2, 0).await, InjectionOutcome::Skipped);
        assert_eq!(common_css_calls(&bg.host().calls()), 0);
    }

    #[tokio::test]
    async fn xml_tabs_inject_when_idle() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://unknown.net/feed");
        bg.tabs.borrow_mut().mark_xml(1, true);

        bg.inject(1, 0).await;
        assert!(bg.host().calls().iter().all(|call| match call {
            Call::InsertCss { run_at, .. } | Call::ExecuteScript { run_at, .. } => {
                *run_at == Some(RunAt::DocumentIdle)
            }
            _ => true,
        }));
    }

    #[tokio::test]
    async fn declarative_backend_has_no_run_at() {
        let bg = background(Backend::Declarative);
        open(&bg, 1, "https://unknown.net/");

        bg.inject(1, 0).await;
        assert!(bg.host().calls().iter().all(|call| match call {
            Call::InsertCss { run_at, .. } | Call::ExecuteScript { run_at, .. } => run_at.is_none(),
            _ => true,
        }));
    }

    #[tokio::test]
    async fn committed_navigation_injects_top_frame_only() {
        let bg = background(Backend::Imperative);
        let sub = crate::events::NavigationDetails {
            tab_id: 1,
            frame_id: 2,
            url: Some("https://example.com/".to_string()),
        };
        bg.on_committed(&sub).await;
        assert!(bg.tabs().is_empty());

        let top = crate::events::NavigationDetails { frame_id: 0, ..sub };
        bg.on_committed(&top).await;
        assert!(bg.tabs().contains(1));
        assert_eq!(bg.host().successful_css(), 2);
    }

    #[tokio::test]
    async fn response_started_ignores_top_frame() {
        let bg = background(Backend::Imperative);
        open(&bg, 1, "https://unknown.net/");
        let details = crate::events::RequestDetails {
            tab_id: 1,
            frame_id: 0,
            url: "https://unknown.net/".to_string(),
            initiator: None,
            request_type: "sub_frame".to_string(),
        };

        bg.on_response_started(&details).await;
        assert!(bg.host().calls().is_empty());

        bg.on_response_started(&crate::events::RequestDetails { frame_id: 4, ..details }).await;
        assert_eq!(bg.host().successful_css(), 1);
    }
}

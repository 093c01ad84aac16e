//! In-memory host for tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use cg_compiler::{DeclarativeRule, RuleUpdate};
use cg_core::injection::CssSource;

use crate::error::HostError;
use crate::host::{
    DynamicRulesHost, InjectionTarget, RawTab, RunAt, ScriptingHost, StorageArea, TabsHost,
};

/// A recorded host call. Failed calls are recorded as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    InsertCss {
        tab_id: i32,
        frame_id: i32,
        css: CssSource,
        run_at: Option<RunAt>,
    },
    ExecuteScript {
        tab_id: i32,
        frame_id: i32,
        file: String,
        run_at: Option<RunAt>,
    },
    ReloadPage {
        tab_id: i32,
    },
    CreateTab {
        url: String,
    },
}

#[derive(Default)]
pub struct MockHost {
    storage: RefCell<HashMap<String, Value>>,
    open_tabs: RefCell<Vec<RawTab>>,
    rules: RefCell<Vec<DeclarativeRule>>,
    calls: RefCell<Vec<Call>>,
    css_failures: Cell<u32>,
    successful_css: Cell<u32>,
    yield_on_css: Cell<bool>,
    fail_storage_writes: Cell<bool>,
    fail_rule_updates: Cell<bool>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn stored(&self, key: &str) -> Option<Value> {
        self.storage.borrow().get(key).cloned()
    }

    pub fn store(&self, key: &str, value: Value) {
        self.storage.borrow_mut().insert(key.to_string(), value);
    }

    pub fn clear_storage(&self) {
        self.storage.borrow_mut().clear();
    }

    pub fn set_open_tabs(&self, tabs: Vec<RawTab>) {
        *self.open_tabs.borrow_mut() = tabs;
    }

    pub fn dynamic_rules(&self) -> Vec<DeclarativeRule> {
        self.rules.borrow().clone()
    }

    /// Make the next `n` stylesheet insertions fail.
    pub fn fail_next_css(&self, n: u32) {
        self.css_failures.set(n);
    }

    /// Suspend once inside every stylesheet insertion, letting concurrent
    /// handlers run before it completes.
    pub fn yield_on_css(&self, enabled: bool) {
        self.yield_on_css.set(enabled);
    }

    pub fn successful_css(&self) -> u32 {
        self.successful_css.get()
    }

    pub fn fail_storage_writes(&self, fail: bool) {
        self.fail_storage_writes.set(fail);
    }

    pub fn fail_rule_updates(&self, fail: bool) {
        self.fail_rule_updates.set(fail);
    }
}

#[async_trait(?Send)]
impl StorageArea for MockHost {
    async fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self.stored(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        if self.fail_storage_writes.get() {
            return Err(HostError::Storage("quota exceeded".to_string()));
        }
        self.store(key, value);
        Ok(())
    }
}

#[async_trait(?Send)]
impl TabsHost for MockHost {
    async fn query_all(&self) -> Result<Vec<RawTab>, HostError> {
        Ok(self.open_tabs.borrow().clone())
    }

    async fn create(&self, url: &str) -> Result<(), HostError> {
        self.calls.borrow_mut().push(Call::CreateTab {
            url: url.to_string(),
        });
        Ok(())
    }

    fn extension_url(&self, path: &str) -> String {
        format!("chrome-extension://mock/{}", path)
    }
}

#[async_trait(?Send)]
impl ScriptingHost for MockHost {
    async fn insert_css(
        &self,
        target: InjectionTarget,
        css: &CssSource,
        run_at: Option<RunAt>,
    ) -> Result<(), HostError> {
        self.calls.borrow_mut().push(Call::InsertCss {
            tab_id: target.tab_id,
            frame_id: target.frame_id,
            css: css.clone(),
            run_at,
        });
        if self.yield_on_css.get() {
            tokio::task::yield_now().await;
        }

        let failures = self.css_failures.get();
        if failures > 0 {
            self.css_failures.set(failures - 1);
            return Err(HostError::Injection {
                tab_id: target.tab_id,
                reason: "frame not ready".to_string(),
            });
        }
        self.successful_css.set(self.successful_css.get() + 1);
        Ok(())
    }

    async fn execute_script(
        &self,
        target: InjectionTarget,
        file: &str,
        run_at: Option<RunAt>,
    ) -> Result<(), HostError> {
        self.calls.borrow_mut().push(Call::ExecuteScript {
            tab_id: target.tab_id,
            frame_id: target.frame_id,
            file: file.to_string(),
            run_at,
        });
        Ok(())
    }

    async fn reload_page(&self, tab_id: i32) -> Result<(), HostError> {
        self.calls.borrow_mut().push(Call::ReloadPage { tab_id });
        Ok(())
    }
}

#[async_trait(?Send)]
impl DynamicRulesHost for MockHost {
    async fn get_dynamic_rules(&self) -> Result<Vec<DeclarativeRule>, HostError> {
        Ok(self.rules.borrow().clone())
    }

    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), HostError> {
        if self.fail_rule_updates.get() {
            return Err(HostError::Rules("update rejected".to_string()));
        }
        let mut rules = self.rules.borrow_mut();
        rules.retain(|rule| !update.remove_rule_ids.contains(&rule.id));
        rules.extend(update.add_rules);
        Ok(())
    }
}

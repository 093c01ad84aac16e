//! Browser host boundary
//!
//! Every browser API the background touches goes through these traits. The
//! wasm crate implements them over `chrome.*`; tests use an in-memory mock.
//! The extension runs on a single thread, hence `?Send`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use cg_compiler::{DeclarativeRule, RuleUpdate};
use cg_core::injection::CssSource;

use crate::error::HostError;

/// A tab as returned by a tab query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawTab {
    pub id: i32,
    #[serde(default)]
    pub url: Option<String>,
}

/// Frame an injection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionTarget {
    pub tab_id: i32,
    pub frame_id: i32,
}

impl InjectionTarget {
    pub fn new(tab_id: i32, frame_id: i32) -> Self {
        Self { tab_id, frame_id }
    }
}

/// Document lifecycle point an injection should run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAt {
    DocumentStart,
    DocumentEnd,
    DocumentIdle,
}

impl RunAt {
    pub fn as_str(self) -> &'static str {
        match self {
            RunAt::DocumentStart => "document_start",
            RunAt::DocumentEnd => "document_end",
            RunAt::DocumentIdle => "document_idle",
        }
    }
}

/// Persistent key/value storage.
#[async_trait(?Send)]
pub trait StorageArea {
    async fn get(&self, key: &str) -> Result<Option<Value>, HostError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), HostError>;
}

#[async_trait(?Send)]
pub trait TabsHost {
    async fn query_all(&self) -> Result<Vec<RawTab>, HostError>;
    /// Open a new tab on `url`.
    async fn create(&self, url: &str) -> Result<(), HostError>;
    /// Absolute URL of a file packaged with the extension.
    fn extension_url(&self, path: &str) -> String;
}

#[async_trait(?Send)]
pub trait ScriptingHost {
    async fn insert_css(
        &self,
        target: InjectionTarget,
        css: &CssSource,
        run_at: Option<RunAt>,
    ) -> Result<(), HostError>;

    async fn execute_script(
        &self,
        target: InjectionTarget,
        file: &str,
        run_at: Option<RunAt>,
    ) -> Result<(), HostError>;

    /// Reload the page from inside the tab.
    async fn reload_page(&self, tab_id: i32) -> Result<(), HostError>;
}

#[async_trait(?Send)]
pub trait DynamicRulesHost {
    async fn get_dynamic_rules(&self) -> Result<Vec<DeclarativeRule>, HostError>;
    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), HostError>;
}

/// Everything the background needs from the browser.
pub trait Host: StorageArea + TabsHost + ScriptingHost + DynamicRulesHost {}

impl<T> Host for T where T: StorageArea + TabsHost + ScriptingHost + DynamicRulesHost {}

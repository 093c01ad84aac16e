//! `chrome.*` implementation of the background host traits.

use async_trait::async_trait;
use js_sys::{Function, Reflect};
use serde_json::{json, Value};
use wasm_bindgen::{JsCast, JsValue};

use cg_background::host::{
    DynamicRulesHost, InjectionTarget, RawTab, RunAt, ScriptingHost, StorageArea, TabsHost,
};
use cg_background::HostError;
use cg_compiler::{DeclarativeRule, RuleUpdate};
use cg_core::injection::CssSource;

use crate::js::{call, describe, from_js, lookup, to_js};

const RELOAD_SOURCE: &str = "window.location.reload();";

/// Browser host. Manifest V3 injects through `chrome.scripting`; older
/// manifests through `chrome.tabs` with run-at hints.
pub struct JsHost {
    manifest_v3: bool,
}

impl JsHost {
    pub fn new(manifest_v3: bool) -> Self {
        Self { manifest_v3 }
    }

    /// Whether the running extension declares manifest version 3.
    pub fn detect_manifest_v3() -> bool {
        manifest_field("manifest_version").and_then(|v| v.as_f64()) == Some(3.0)
    }
}

/// Field of `chrome.runtime.getManifest()`.
pub fn manifest_field(name: &str) -> Option<JsValue> {
    let runtime = lookup(&["runtime"]).ok()?;
    let get_manifest: Function = Reflect::get(&runtime, &"getManifest".into())
        .ok()?
        .dyn_into()
        .ok()?;
    let manifest = get_manifest.call0(&runtime).ok()?;
    Reflect::get(&manifest, &JsValue::from_str(name)).ok()
}

fn injection_error(tab_id: i32) -> impl Fn(JsValue) -> HostError {
    move |e| HostError::Injection {
        tab_id,
        reason: describe(&e),
    }
}

fn encode(value: &Value) -> Result<JsValue, HostError> {
    to_js(value).map_err(|e| HostError::Decode(describe(&e)))
}

#[async_trait(?Send)]
impl StorageArea for JsHost {
    async fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        let items = call(&["storage", "local"], "get", &[JsValue::from_str(key)])
            .await
            .map_err(|e| HostError::Storage(describe(&e)))?;
        let value = Reflect::get(&items, &JsValue::from_str(key))
            .map_err(|e| HostError::Storage(describe(&e)))?;
        from_js(&value).map_err(HostError::Decode)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        let mut items = serde_json::Map::new();
        items.insert(key.to_string(), value);
        let items = encode(&Value::Object(items))?;
        call(&["storage", "local"], "set", &[items])
            .await
            .map_err(|e| HostError::Storage(describe(&e)))?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl TabsHost for JsHost {
    async fn query_all(&self) -> Result<Vec<RawTab>, HostError> {
        let result = call(&["tabs"], "query", &[encode(&json!({}))?])
            .await
            .map_err(|e| HostError::Tabs(describe(&e)))?;
        let tabs: Vec<Value> = from_js(&result).map_err(HostError::Decode)?;
        // Tabs without an id (devtools windows) are skipped.
        Ok(tabs
            .into_iter()
            .filter_map(|tab| serde_json::from_value(tab).ok())
            .collect())
    }

    async fn create(&self, url: &str) -> Result<(), HostError> {
        call(&["tabs"], "create", &[encode(&json!({ "url": url }))?])
            .await
            .map_err(|e| HostError::Tabs(describe(&e)))?;
        Ok(())
    }

    fn extension_url(&self, path: &str) -> String {
        let resolved = lookup(&["runtime"]).ok().and_then(|runtime| {
            let get_url: Function = Reflect::get(&runtime, &"getURL".into()).ok()?.dyn_into().ok()?;
            get_url
                .call1(&runtime, &JsValue::from_str(path))
                .ok()?
                .as_string()
        });
        resolved.unwrap_or_else(|| path.to_string())
    }
}

#[async_trait(?Send)]
impl ScriptingHost for JsHost {
    async fn insert_css(
        &self,
        target: InjectionTarget,
        css: &CssSource,
        run_at: Option<RunAt>,
    ) -> Result<(), HostError> {
        if self.manifest_v3 {
            let mut details = json!({
                "target": { "tabId": target.tab_id, "frameIds": [target.frame_id] }
            });
            match css {
                CssSource::File(file) => details["files"] = json!([file]),
                CssSource::Code(code) => details["css"] = json!(code),
            }
            call(&["scripting"], "insertCSS", &[encode(&details)?])
                .await
                .map_err(injection_error(target.tab_id))?;
        } else {
            let mut details = json!({ "frameId": target.frame_id });
            match css {
                CssSource::File(file) => details["file"] = json!(file),
                CssSource::Code(code) => details["code"] = json!(code),
            }
            if let Some(run_at) = run_at {
                details["runAt"] = json!(run_at.as_str());
            }
            call(
                &["tabs"],
                "insertCSS",
                &[JsValue::from(target.tab_id), encode(&details)?],
            )
            .await
            .map_err(injection_error(target.tab_id))?;
        }
        Ok(())
    }

    async fn execute_script(
        &self,
        target: InjectionTarget,
        file: &str,
        run_at: Option<RunAt>,
    ) -> Result<(), HostError> {
        if self.manifest_v3 {
            let details = json!({
                "target": { "tabId": target.tab_id, "frameIds": [target.frame_id] },
                "files": [file]
            });
            call(&["scripting"], "executeScript", &[encode(&details)?])
                .await
                .map_err(injection_error(target.tab_id))?;
        } else {
            let mut details = json!({ "file": file, "frameId": target.frame_id });
            if let Some(run_at) = run_at {
                details["runAt"] = json!(run_at.as_str());
            }
            call(
                &["tabs"],
                "executeScript",
                &[JsValue::from(target.tab_id), encode(&details)?],
            )
            .await
            .map_err(injection_error(target.tab_id))?;
        }
        Ok(())
    }

    async fn reload_page(&self, tab_id: i32) -> Result<(), HostError> {
        if self.manifest_v3 {
            let details = encode(&json!({ "target": { "tabId": tab_id } }))?;
            let func = Function::new_no_args(RELOAD_SOURCE);
            Reflect::set(&details, &"func".into(), &func).map_err(injection_error(tab_id))?;
            call(&["scripting"], "executeScript", &[details])
                .await
                .map_err(injection_error(tab_id))?;
        } else {
            let details = encode(&json!({ "code": RELOAD_SOURCE }))?;
            call(&["tabs"], "executeScript", &[JsValue::from(tab_id), details])
                .await
                .map_err(injection_error(tab_id))?;
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl DynamicRulesHost for JsHost {
    async fn get_dynamic_rules(&self) -> Result<Vec<DeclarativeRule>, HostError> {
        let rules = call(&["declarativeNetRequest"], "getDynamicRules", &[])
            .await
            .map_err(|e| HostError::Rules(describe(&e)))?;
        from_js(&rules).map_err(HostError::Decode)
    }

    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), HostError> {
        let update = to_js(&update).map_err(|e| HostError::Decode(describe(&e)))?;
        call(&["declarativeNetRequest"], "updateDynamicRules", &[update])
            .await
            .map_err(|e| HostError::Rules(describe(&e)))?;
        Ok(())
    }
}

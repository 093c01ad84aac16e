//! WebAssembly extension background for ConsentGuard
//!
//! `start` parses the data bundle, builds the [`Background`] over the real
//! `chrome.*` APIs and registers every browser listener. Handlers that touch
//! the browser run as local futures; the blocking request listeners answer
//! synchronously.

mod host;
mod js;

use std::cell::RefCell;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use cg_background::{
    Background, Backend, BackgroundConfig, Command, HeadersDetails, InstalledDetails, Message,
    NavigationDetails, RawTab, RequestDetails, TabChange,
};
use cg_compiler::{optimize_filters, parse_bundle};

pub use host::JsHost;

type Shared = Rc<Background<JsHost>>;

thread_local! {
    static BACKGROUND: RefCell<Option<Shared>> = const { RefCell::new(None) };
}

fn background() -> Option<Shared> {
    BACKGROUND.with(|slot| slot.borrow().clone())
}

fn decode<T: DeserializeOwned>(value: &JsValue, what: &str) -> Option<T> {
    match js::from_js(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            log::warn!("undecodable {}: {}", what, e);
            None
        }
    }
}

fn allow() -> JsValue {
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"cancel".into(), &JsValue::FALSE);
    result.into()
}

/// Start the background.
///
/// `bundle_json` is the filter and rule data; `config_json` is optional, the
/// backend then follows the manifest version.
#[wasm_bindgen]
pub fn start(bundle_json: &str, config_json: Option<String>, debug: bool) -> Result<(), JsValue> {
    if background().is_some() {
        return Err(JsValue::from_str("Already started. Reload the extension to restart."));
    }

    wasm_logger::init(wasm_logger::Config::new(if debug {
        log::Level::Debug
    } else {
        log::Level::Info
    }));

    let mut bundle = parse_bundle(bundle_json)
        .map_err(|e| JsValue::from_str(&format!("Failed to load data bundle: {}", e)))?;
    let stats = optimize_filters(&mut bundle.filters);
    log::debug!("filters: {} -> {} entries", stats.before, stats.after);

    let config = match config_json {
        Some(text) => BackgroundConfig::from_json(&text)
            .map_err(|e| JsValue::from_str(&format!("Failed to load config: {}", e)))?,
        None => BackgroundConfig {
            backend: if JsHost::detect_manifest_v3() {
                Backend::Declarative
            } else {
                Backend::Imperative
            },
            ..BackgroundConfig::default()
        },
    };

    let host = JsHost::new(config.is_declarative());
    let bg: Shared = Rc::new(Background::new(host, bundle, config));
    BACKGROUND.with(|slot| *slot.borrow_mut() = Some(Rc::clone(&bg)));

    register_listeners(&bg)?;

    spawn_local(async move {
        bg.init().await;
    });

    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    background().is_some()
}

/// Counts for the options page.
#[wasm_bindgen]
pub fn get_status() -> JsValue {
    let result = js_sys::Object::new();
    if let Some(bg) = background() {
        let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::TRUE);
        let _ = js_sys::Reflect::set(&result, &"tabs".into(), &JsValue::from(bg.tabs().len() as u32));
        let _ = js_sys::Reflect::set(
            &result,
            &"whitelisted".into(),
            &JsValue::from(bg.whitelist().len() as u32),
        );
        let backend = match bg.config().backend {
            Backend::Imperative => "imperative",
            Backend::Declarative => "declarative",
        };
        let _ = js_sys::Reflect::set(&result, &"backend".into(), &JsValue::from_str(backend));
    } else {
        let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::FALSE);
    }
    result.into()
}

fn register_listeners(bg: &Shared) -> Result<(), JsValue> {
    // Tabs
    {
        let bg = Rc::clone(bg);
        let on_created = Closure::wrap(Box::new(move |tab: JsValue| {
            if let Some(tab) = decode::<RawTab>(&tab, "tab") {
                bg.on_tab_created(&tab);
            }
        }) as Box<dyn FnMut(JsValue)>);
        js::add_listener(&["tabs", "onCreated"], on_created.as_ref(), &[])?;
        on_created.forget();
    }
    {
        let bg = Rc::clone(bg);
        let on_updated = Closure::wrap(Box::new(move |_tab_id: JsValue, change: JsValue, tab: JsValue| {
            let change = decode::<TabChange>(&change, "tab change");
            let tab = decode::<RawTab>(&tab, "tab");
            if let (Some(change), Some(tab)) = (change, tab) {
                bg.on_tab_updated(&change, &tab);
            }
        }) as Box<dyn FnMut(JsValue, JsValue, JsValue)>);
        js::add_listener(&["tabs", "onUpdated"], on_updated.as_ref(), &[])?;
        on_updated.forget();
    }
    {
        let bg = Rc::clone(bg);
        let on_removed = Closure::wrap(Box::new(move |tab_id: JsValue| {
            if let Some(tab_id) = tab_id.as_f64() {
                bg.on_tab_removed(tab_id as i32);
            }
        }) as Box<dyn FnMut(JsValue)>);
        js::add_listener(&["tabs", "onRemoved"], on_removed.as_ref(), &[])?;
        on_removed.forget();
    }

    // Navigation and injection
    {
        let bg = Rc::clone(bg);
        let on_committed = Closure::wrap(Box::new(move |details: JsValue| {
            if let Some(details) = decode::<NavigationDetails>(&details, "navigation") {
                let bg = Rc::clone(&bg);
                spawn_local(async move { bg.on_committed(&details).await });
            }
        }) as Box<dyn FnMut(JsValue)>);
        js::add_listener(&["webNavigation", "onCommitted"], on_committed.as_ref(), &[])?;
        on_committed.forget();
    }
    {
        let bg = Rc::clone(bg);
        let on_response_started = Closure::wrap(Box::new(move |details: JsValue| {
            if let Some(details) = decode::<RequestDetails>(&details, "response") {
                let bg = Rc::clone(&bg);
                spawn_local(async move { bg.on_response_started(&details).await });
            }
        }) as Box<dyn FnMut(JsValue)>);
        let filter = js::to_js(&serde_json::json!({ "urls": ["<all_urls>"], "types": ["sub_frame"] }))?;
        js::add_listener(
            &["webRequest", "onResponseStarted"],
            on_response_started.as_ref(),
            &[filter],
        )?;
        on_response_started.forget();
    }

    // Lifecycle
    {
        let bg = Rc::clone(bg);
        let on_startup = Closure::wrap(Box::new(move || {
            let bg = Rc::clone(&bg);
            spawn_local(async move { bg.on_startup().await });
        }) as Box<dyn FnMut()>);
        js::add_listener(&["runtime", "onStartup"], on_startup.as_ref(), &[])?;
        on_startup.forget();
    }
    {
        let bg = Rc::clone(bg);
        let on_installed = Closure::wrap(Box::new(move |details: JsValue| {
            let Some(details) = decode::<InstalledDetails>(&details, "install details") else {
                return;
            };
            let version = host::manifest_field("version")
                .and_then(|v| v.as_string())
                .unwrap_or_default();
            let bg = Rc::clone(&bg);
            spawn_local(async move { bg.on_installed(&details, &version).await });
        }) as Box<dyn FnMut(JsValue)>);
        js::add_listener(&["runtime", "onInstalled"], on_installed.as_ref(), &[])?;
        on_installed.forget();
    }

    // Messages
    {
        let bg = Rc::clone(bg);
        let on_message = Closure::wrap(Box::new(
            move |message: JsValue, _sender: JsValue, send_response: JsValue| -> JsValue {
                let Some(message) = decode::<Value>(&message, "message") else {
                    return JsValue::FALSE;
                };
                let replies = matches!(
                    Message::from_value(&message),
                    Message::Command(Command::GetActiveTab { .. })
                );

                let bg = Rc::clone(&bg);
                spawn_local(async move {
                    let Some(reply) = bg.handle_message(&message).await else {
                        return;
                    };
                    let Ok(send_response) = send_response.dyn_into::<js_sys::Function>() else {
                        return;
                    };
                    match js::to_js(&reply) {
                        Ok(reply) => {
                            let _ = send_response.call1(&JsValue::UNDEFINED, &reply);
                        }
                        Err(e) => log::warn!("reply encoding: {}", js::describe(&e)),
                    }
                });

                // Keep the channel open for the asynchronous reply.
                JsValue::from_bool(replies)
            },
        ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>);
        js::add_listener(&["runtime", "onMessage"], on_message.as_ref(), &[])?;
        on_message.forget();
    }

    if !bg.config().is_declarative() {
        register_blocking_listeners(bg)?;
    }

    Ok(())
}

fn register_blocking_listeners(bg: &Shared) -> Result<(), JsValue> {
    {
        let bg = Rc::clone(bg);
        let on_before_request = Closure::wrap(Box::new(move |details: JsValue| -> JsValue {
            let Some(details) = decode::<RequestDetails>(&details, "request") else {
                return allow();
            };
            js::to_js(&bg.on_before_request(&details)).unwrap_or_else(|_| allow())
        }) as Box<dyn FnMut(JsValue) -> JsValue>);
        let filter = js::to_js(&serde_json::json!({
            "urls": ["http://*/*", "https://*/*"],
            "types": ["script", "stylesheet", "xmlhttprequest"]
        }))?;
        let spec = js::to_js(&serde_json::json!(["blocking"]))?;
        js::add_listener(
            &["webRequest", "onBeforeRequest"],
            on_before_request.as_ref(),
            &[filter, spec],
        )?;
        on_before_request.forget();
    }
    {
        let bg = Rc::clone(bg);
        let on_headers = Closure::wrap(Box::new(move |details: JsValue| -> JsValue {
            let Some(details) = decode::<HeadersDetails>(&details, "headers") else {
                return allow();
            };
            js::to_js(&bg.on_headers_received(&details)).unwrap_or_else(|_| allow())
        }) as Box<dyn FnMut(JsValue) -> JsValue>);
        let filter = js::to_js(&serde_json::json!({
            "urls": ["http://*/*", "https://*/*"],
            "types": ["main_frame"]
        }))?;
        let spec = js::to_js(&serde_json::json!(["blocking", "responseHeaders"]))?;
        js::add_listener(
            &["webRequest", "onHeadersReceived"],
            on_headers.as_ref(),
            &[filter, spec],
        )?;
        on_headers.forget();
    }
    Ok(())
}

//! Thin helpers over the `chrome.*` namespace.

use js_sys::{Array, Function, Promise, Reflect, JSON};
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

/// `chrome.<path...>`, failing on the first missing segment.
pub fn lookup(path: &[&str]) -> Result<JsValue, JsValue> {
    let mut value = Reflect::get(&js_sys::global(), &"chrome".into())?;
    for segment in path {
        if value.is_undefined() || value.is_null() {
            break;
        }
        value = Reflect::get(&value, &JsValue::from_str(segment))?;
    }
    if value.is_undefined() || value.is_null() {
        return Err(JsValue::from_str(&format!("chrome.{} is unavailable", path.join("."))));
    }
    Ok(value)
}

fn last_error() -> Option<JsValue> {
    lookup(&["runtime", "lastError"]).ok()
}

/// Call `chrome.<path>.<method>(...args, callback)` and await the callback.
///
/// `runtime.lastError` set during the callback rejects the call, which is how
/// callback-style APIs report failure.
pub async fn call(path: &[&str], method: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
    let target = lookup(path)?;
    let func: Function = Reflect::get(&target, &JsValue::from_str(method))?.dyn_into()?;

    let mut sync_error = None;
    let promise = Promise::new(&mut |resolve: Function, reject: Function| {
        let callback = Closure::once_into_js(move |result: JsValue| match last_error() {
            Some(error) => {
                let _ = reject.call1(&JsValue::NULL, &error);
            }
            None => {
                let _ = resolve.call1(&JsValue::NULL, &result);
            }
        });

        let call_args: Array = args.iter().collect();
        call_args.push(&callback);
        if let Err(e) = func.apply(&target, &call_args) {
            sync_error = Some(e);
        }
    });

    if let Some(e) = sync_error {
        return Err(e);
    }
    JsFuture::from(promise).await
}

/// Register `callback` on `chrome.<path>.addListener`.
pub fn add_listener(path: &[&str], callback: &JsValue, extra: &[JsValue]) -> Result<(), JsValue> {
    let event = lookup(path)?;
    let add: Function = Reflect::get(&event, &"addListener".into())?.dyn_into()?;
    let args: Array = std::iter::once(callback).chain(extra.iter()).collect();
    add.apply(&event, &args)?;
    Ok(())
}

pub fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value).map_err(|e| JsValue::from_str(&e.to_string()))?;
    JSON::parse(&text)
}

pub fn from_js<T: DeserializeOwned>(value: &JsValue) -> Result<T, String> {
    let text = if value.is_undefined() || value.is_null() {
        "null".to_string()
    } else {
        JSON::stringify(value)
            .map(String::from)
            .map_err(|e| describe(&e))?
    };
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

/// Readable message of a thrown value or `lastError`.
pub fn describe(error: &JsValue) -> String {
    if let Some(s) = error.as_string() {
        return s;
    }
    if let Some(message) = Reflect::get(error, &"message".into())
        .ok()
        .and_then(|m| m.as_string())
    {
        return message;
    }
    JSON::stringify(error)
        .map(String::from)
        .unwrap_or_else(|_| "unknown error".to_string())
}

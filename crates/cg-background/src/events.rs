//! Browser event payloads
//!
//! Field names follow the browser's camelCase objects so the wasm glue can
//! hand them over as JSON.

use serde::{Deserialize, Serialize};

use cg_core::types::NO_TAB;

fn no_tab() -> i32 {
    NO_TAB
}

/// `tabs.onUpdated` change info.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TabChange {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// `webNavigation.onCommitted` details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDetails {
    pub tab_id: i32,
    #[serde(default)]
    pub frame_id: i32,
    #[serde(default)]
    pub url: Option<String>,
}

/// `webRequest` details shared by request and response events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    #[serde(default = "no_tab")]
    pub tab_id: i32,
    #[serde(default)]
    pub frame_id: i32,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default, rename = "type")]
    pub request_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// `webRequest.onHeadersReceived` details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersDetails {
    #[serde(default = "no_tab")]
    pub tab_id: i32,
    #[serde(default)]
    pub frame_id: i32,
    #[serde(default)]
    pub response_headers: Vec<HttpHeader>,
}

impl HeadersDetails {
    /// Value of the first header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .and_then(|header| header.value.as_deref())
    }
}

/// `runtime.onInstalled` details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledDetails {
    pub reason: String,
    #[serde(default)]
    pub previous_version: Option<String>,
}

/// Answer to a blocking request listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockingResponse {
    pub cancel: bool,
}

/// Whether `current` is strictly newer than `previous`, comparing dotted
/// numeric components. Missing components count as zero; a non-numeric
/// component compares as zero.
pub fn is_newer_version(current: &str, previous: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(current), parse(previous));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x > y;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_compare() {
        assert!(is_newer_version("3.5.0", "3.4.9"));
        assert!(is_newer_version("3.10", "3.9"));
        assert!(is_newer_version("3.4.1", "3.4"));
        assert!(!is_newer_version("3.4", "3.4.0"));
        assert!(!is_newer_version("3.4.0", "3.5"));
    }

    #[test]
    fn headers_are_case_insensitive() {
        let details: HeadersDetails = serde_json::from_str(
            r#"{"tabId": 3, "responseHeaders": [{"name": "content-TYPE", "value": "text/xml"}]}"#,
        )
        .unwrap();
        assert_eq!(details.header("Content-Type"), Some("text/xml"));
        assert_eq!(details.frame_id, 0);
    }

    #[test]
    fn request_without_tab() {
        let details: RequestDetails =
            serde_json::from_str(r#"{"url": "https://a.com/x.js", "type": "script"}"#).unwrap();
        assert_eq!(details.tab_id, NO_TAB);
        assert_eq!(details.request_type, "script");
    }
}

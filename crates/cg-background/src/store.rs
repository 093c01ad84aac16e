//! Persisted whitelist
//!
//! Stored under a single key as `{ "<domain>": true, ... }`. Domains mapped
//! to anything but `true` are not whitelisted.

use serde_json::{Map, Value};

use cg_core::whitelist::Whitelist;

use crate::error::HostError;
use crate::host::StorageArea;

/// Decode the stored mapping.
pub fn decode_whitelist(value: &Value) -> Result<Whitelist, HostError> {
    let map = value
        .as_object()
        .ok_or_else(|| HostError::Decode(format!("whitelist is not an object: {}", value)))?;
    Ok(Whitelist::from_domains(
        map.iter()
            .filter(|(_, flag)| flag.as_bool() == Some(true))
            .map(|(domain, _)| domain.as_str()),
    ))
}

pub fn encode_whitelist(whitelist: &Whitelist) -> Value {
    let map: Map<String, Value> = whitelist
        .iter()
        .map(|domain| (domain.to_string(), Value::Bool(true)))
        .collect();
    Value::Object(map)
}

/// Read the whitelist. `None` when nothing has been stored yet.
pub async fn load_whitelist<S>(storage: &S, key: &str) -> Result<Option<Whitelist>, HostError>
where
    S: StorageArea + ?Sized,
{
    match storage.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => decode_whitelist(&value).map(Some),
    }
}

/// Write the full whitelist.
pub async fn persist_whitelist<S>(storage: &S, key: &str, whitelist: &Whitelist) -> Result<(), HostError>
where
    S: StorageArea + ?Sized,
{
    storage.set(key, encode_whitelist(whitelist)).await
}

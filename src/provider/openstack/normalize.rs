//! Mapping of raw OpenStack JSON onto [`ProviderObject`].

use serde_json::{Map, Value, json};

use crate::error::{ProviderError, Result};
use crate::provider::{ProviderObject, ResourceKind};

/// Converts one raw object of `kind` into a [`ProviderObject`].
///
/// # Errors
///
/// Returns an error if the object has no usable id.
pub fn normalize(kind: ResourceKind, raw: Value) -> Result<ProviderObject> {
    let Value::Object(mut attributes) = raw else {
        return Err(ProviderError::invalid_response(format!("{kind} is not a JSON object")).into());
    };

    let name = take_string(&mut attributes, "name")
        .or_else(|| take_string(&mut attributes, "display_name"));
    let status = take_string(&mut attributes, "status");
    let id = take_string(&mut attributes, "id")
        .or_else(|| (kind == ResourceKind::Keypair).then(|| name.clone()).flatten())
        .ok_or_else(|| ProviderError::invalid_response(format!("{kind} without an id")))?;

    match kind {
        ResourceKind::Server => normalize_server(&mut attributes),
        ResourceKind::Volume => normalize_volume(&mut attributes),
        _ => {}
    }

    Ok(ProviderObject {
        id,
        name,
        status,
        attributes,
    })
}

/// Converts a list of raw objects.
///
/// # Errors
///
/// Returns an error if any object has no usable id.
pub fn normalize_all(kind: ResourceKind, raw: Vec<Value>) -> Result<Vec<ProviderObject>> {
    raw.into_iter()
        .map(|item| {
            // Keypair listings wrap each entry as {"keypair": {...}}.
            let item = match item {
                Value::Object(mut wrapper) if kind == ResourceKind::Keypair => {
                    wrapper.remove("keypair").unwrap_or(Value::Object(wrapper))
                }
                other => other,
            };
            normalize(kind, item)
        })
        .collect()
}

fn take_string(attributes: &mut Map<String, Value>, key: &str) -> Option<String> {
    match attributes.remove(key)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Flattens `addresses` into `networks` and lifts the extended status.
fn normalize_server(attributes: &mut Map<String, Value>) {
    if let Some(Value::Object(addresses)) = attributes.get("addresses") {
        let networks: Map<String, Value> = addresses
            .iter()
            .map(|(network, entries)| {
                let ips: Vec<Value> = entries
                    .as_array()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|e| e.get("addr").cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                (network.clone(), Value::Array(ips))
            })
            .collect();
        attributes.insert(String::from("networks"), Value::Object(networks));
    }

    if let Some(task_state) = attributes.get("OS-EXT-STS:task_state").cloned() {
        attributes.insert(String::from("task_state"), task_state);
    }
    if let Some(zone) = attributes.get("OS-EXT-AZ:availability_zone").cloned() {
        attributes.insert(String::from("availability_zone"), zone);
    }
}

/// Rewrites attachment records to `{id, server_id, volume_id, device}`.
fn normalize_volume(attributes: &mut Map<String, Value>) {
    if let Some(Value::Array(attachments)) = attributes.get("attachments") {
        let normalized: Vec<Value> = attachments
            .iter()
            .map(|a| {
                let id = a
                    .get("attachment_id")
                    .or_else(|| a.get("id"))
                    .cloned()
                    .unwrap_or(Value::Null);
                json!({
                    "id": id,
                    "server_id": a.get("server_id").cloned().unwrap_or(Value::Null),
                    "volume_id": a.get("volume_id").cloned().unwrap_or(Value::Null),
                    "device": a.get("device").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        attributes.insert(String::from("attachments"), Value::Array(normalized));
    }
}

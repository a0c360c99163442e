// Wire-level payload shapes shared by every vendor integration.
//
// Device and channel bodies stay as raw JSON: each vendor transformer in
// `micsync-core` owns the field mapping. Only the framing (list envelopes,
// cursor pagination, discovery bodies, push messages) is typed here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw payloads for one device: the device body plus its channel list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDetail {
    pub device: Value,
    pub channels: Vec<Value>,
}

/// `{ "ips": [...] }` body used by the discovery endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryIps {
    #[serde(default)]
    pub ips: Vec<String>,
}

/// One parsed message from a vendor push stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Message kind, e.g. `"device_update"`, `"channel_update"`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Continuation state for a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NextPage {
    pub cursor: String,
}

/// Flatten any of the listing shapes a vendor may answer with.
///
/// Accepted: a bare array, `{data: [...]}`, `{devices: [...]}`,
/// `{channels: [...]}`, or `{edges: [{node: {...}}], pageInfo: {...}}`
/// (optionally nested under `data` or `devices`). Returns the items and the
/// next cursor, if the connection reports more pages.
pub(crate) fn normalize_listing(body: Value) -> Result<(Vec<Value>, Option<NextPage>), String> {
    match body {
        Value::Array(items) => Ok((items, None)),
        Value::Object(mut map) => {
            if map.contains_key("edges") {
                let next = next_page(map.get("pageInfo"));
                let edges = match map.remove("edges") {
                    Some(Value::Array(edges)) => edges,
                    Some(other) => return Err(format!("`edges` is not a list: {other}")),
                    None => Vec::new(),
                };
                let nodes = edges
                    .into_iter()
                    .map(|edge| match edge {
                        Value::Object(mut e) => e.remove("node").unwrap_or(Value::Null),
                        other => other,
                    })
                    .filter(|node| !node.is_null())
                    .collect();
                return Ok((nodes, next));
            }
            for key in ["data", "devices", "channels", "items"] {
                if let Some(inner) = map.remove(key) {
                    return normalize_listing(inner);
                }
            }
            Err("object has no recognised list field".into())
        }
        other => Err(format!("expected a list, got {other}")),
    }
}

fn next_page(page_info: Option<&Value>) -> Option<NextPage> {
    let info = page_info?;
    if !info.get("hasNextPage").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    info.get("endCursor")
        .and_then(Value::as_str)
        .map(|cursor| NextPage {
            cursor: cursor.to_owned(),
        })
}

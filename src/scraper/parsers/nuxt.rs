//! Public API token lookup in a Nuxt `__NUXT_DATA__` payload.
//!
//! Nuxt serialises page state as a flat array where objects refer to other
//! entries by index. On the AcademicTransfer listing, entry 10 is a
//! `["Reactive", state_idx]` pointer, the state object maps
//! `$satDataApiPublicAccessToken` to another index, and that entry holds the
//! bearer token.

use scraper::Html;
use serde_json::Value;

use super::select_one;
use crate::error::ExtractError;

const SCRIPT_SELECTOR: &str = "script#__NUXT_DATA__";
const STATE_POINTER_INDEX: usize = 10;
const TOKEN_KEY: &str = "$satDataApiPublicAccessToken";
const MIN_TOKEN_LEN: usize = 10;

fn malformed(msg: &str) -> ExtractError {
    ExtractError::StructuredData(format!("__NUXT_DATA__: {}", msg))
}

pub fn parse_nuxt_payload(html: &str) -> Result<Vec<Value>, ExtractError> {
    let doc = Html::parse_document(html);
    let script = select_one(doc.root_element(), SCRIPT_SELECTOR).ok_or_else(|| malformed("script element not found"))?;
    let raw: String = script.text().collect();

    let payload: Value =
        serde_json::from_str(raw.trim()).map_err(|e| malformed(&format!("invalid JSON: {}", e)))?;

    match payload {
        Value::Array(items) => Ok(items),
        _ => Err(malformed("payload is not an array")),
    }
}

fn index_at(value: &Value, len: usize) -> Option<usize> {
    value.as_u64().map(|i| i as usize).filter(|i| *i < len)
}

pub fn extract_public_token(data: &[Value]) -> Result<String, ExtractError> {
    let pointer = data
        .get(STATE_POINTER_INDEX)
        .and_then(Value::as_array)
        .filter(|entry| entry.len() >= 2)
        .ok_or_else(|| malformed("state pointer entry missing"))?;

    let state_idx = index_at(&pointer[1], data.len()).ok_or_else(|| malformed("bad state index"))?;
    let state = data[state_idx]
        .as_object()
        .ok_or_else(|| malformed("state block is not an object"))?;

    let token_idx = state
        .get(TOKEN_KEY)
        .and_then(|v| index_at(v, data.len()))
        .ok_or_else(|| malformed("token index not found"))?;

    match data[token_idx].as_str() {
        Some(token) if token.len() >= MIN_TOKEN_LEN => Ok(token.to_string()),
        _ => Err(malformed("resolved token is not a valid string")),
    }
}

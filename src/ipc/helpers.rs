use super::error::HandlerErr;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

pub const DEFAULT_DEVICE_ID: &str = "default";

pub fn require_db(db: &Option<Connection>) -> Result<&Connection, HandlerErr> {
    db.as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing numeric {}", key)))
}

pub fn get_required_object<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a serde_json::Map<String, serde_json::Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))
}

pub fn device_id(params: &serde_json::Value) -> String {
    get_optional_str(params, "deviceId")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string())
}

/// Wall clock, unless the caller pins it with `params.now`.
pub fn parse_now(params: &serde_json::Value) -> Result<NaiveDateTime, HandlerErr> {
    let Some(raw) = params.get("now").and_then(|v| v.as_str()) else {
        return Ok(chrono::Local::now().naive_local());
    };
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map_err(|_| HandlerErr::bad_params("now must be YYYY-MM-DDTHH:MM[:SS]"))
}

pub fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_optional_date(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<NaiveDate>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let raw = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))?;
            parse_date(raw, key).map(Some)
        }
    }
}

use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use super::error::err;
use super::types::{Actor, AppState, Request, Role};

/// The one authorization gate. Every role-restricted handler calls this first
/// instead of re-deriving role logic inline.
pub fn require_role(
    state: &AppState,
    req: &Request,
    allowed: &[Role],
) -> Result<Actor, serde_json::Value> {
    let Some(actor) = state.actor.as_ref() else {
        return Err(err(&req.id, "unauthorized", "sign in first", None));
    };
    if !allowed.contains(&actor.role) {
        return Err(err(
            &req.id,
            "forbidden",
            format!("requires role {:?}", allowed),
            None,
        ));
    }
    Ok(actor.clone())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn opt_str(params: &JsonValue, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn opt_i64(params: &JsonValue, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn opt_bool(params: &JsonValue, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, serde_json::Value> {
    let raw = required_str(req, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            None,
        )
    })
}

/// ISO weekday numbers (Mon=1..Sun=7) stored on a class as a JSON array.
pub fn parse_days_of_week(raw: Option<&str>) -> Vec<u32> {
    raw.and_then(|s| serde_json::from_str::<Vec<u32>>(s).ok())
        .map(|days| days.into_iter().filter(|d| (1..=7).contains(d)).collect())
        .unwrap_or_default()
}

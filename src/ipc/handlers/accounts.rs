use crate::accounts::{self, Registration};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_object, get_required_str, parse_now};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub(crate) fn registration_from(params: &serde_json::Value) -> Result<Registration, HandlerErr> {
    Ok(Registration {
        name: get_required_str(params, "name")?,
        email: get_required_str(params, "email")?,
        course: get_optional_str(params, "course").unwrap_or_default(),
        year: get_optional_str(params, "year").unwrap_or_default(),
    })
}

fn accounts_register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let reg = registration_from(params)?;
    let now = parse_now(params)?;
    let account = accounts::register_student(conn, &reg, now)?;
    Ok(json!({ "account": account.to_json() }))
}

fn accounts_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let account = accounts::require(conn, &user_id)?;
    Ok(json!({ "account": account.to_json() }))
}

fn accounts_update_profile(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let patch = get_required_object(params, "patch")?;
    let account = accounts::update_profile(conn, &user_id, patch)?;
    Ok(json!({ "account": account.to_json() }))
}

fn handle_accounts_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match accounts_register(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_accounts_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match accounts_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_accounts_update_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match accounts_update_profile(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "accounts.register" => Some(handle_accounts_register(state, req)),
        "accounts.get" => Some(handle_accounts_get(state, req)),
        "accounts.updateProfile" => Some(handle_accounts_update_profile(state, req)),
        _ => None,
    }
}

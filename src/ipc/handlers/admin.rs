use crate::accounts::{self, Verdict};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::accounts::registration_from;
use crate::ipc::helpers::{get_optional_date, get_required_str, parse_now};
use crate::ipc::types::{AppState, Request};
use crate::notifications;
use crate::stats;
use rusqlite::Connection;
use serde_json::json;

const APPROVED_MESSAGE: &str = "Your account has been approved. You can now check in to lectures.";
const REJECTED_MESSAGE: &str =
    "Your account registration was rejected. Contact the administrator for details.";

fn admin_bootstrap(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let reg = registration_from(params)?;
    let now = parse_now(params)?;
    let account = accounts::bootstrap_admin(conn, &reg, now)?;
    Ok(json!({ "account": account.to_json() }))
}

fn admin_pending_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let admin_id = get_required_str(params, "adminId")?;
    accounts::require_admin(conn, &admin_id)?;
    let pending = accounts::list_pending(conn).map_err(HandlerErr::query)?;
    Ok(json!({
        "accounts": pending.iter().map(|a| a.to_json()).collect::<Vec<_>>()
    }))
}

fn admin_verify(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let admin_id = get_required_str(params, "adminId")?;
    accounts::require_admin(conn, &admin_id)?;
    let user_id = get_required_str(params, "userId")?;
    let action = get_required_str(params, "action")?;
    let Some(verdict) = Verdict::parse(&action) else {
        return Err(HandlerErr::bad_params("action must be approve or reject"));
    };
    let now = parse_now(params)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::update)?;
    let account = accounts::set_verification(&tx, &user_id, verdict)?;
    let message = match verdict {
        Verdict::Approve => APPROVED_MESSAGE,
        Verdict::Reject => REJECTED_MESSAGE,
    };
    let notification =
        notifications::create(&tx, &account.id, message, now).map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::update)?;

    Ok(json!({
        "account": account.to_json(),
        "notificationId": notification.id
    }))
}

fn admin_stats(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let admin_id = get_required_str(params, "adminId")?;
    accounts::require_admin(conn, &admin_id)?;
    let from = get_optional_date(params, "from")?;
    let to = get_optional_date(params, "to")?;
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(HandlerErr::bad_params("from must not be after to"));
        }
    }
    let stats = stats::collect(conn, from, to).map_err(HandlerErr::query)?;
    Ok(stats.to_json())
}

fn handle_admin_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match admin_bootstrap(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_admin_pending_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match admin_pending_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_admin_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match admin_verify(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_admin_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match admin_stats(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.bootstrap" => Some(handle_admin_bootstrap(state, req)),
        "admin.pending.list" => Some(handle_admin_pending_list(state, req)),
        "admin.verify" => Some(handle_admin_verify(state, req)),
        "admin.stats" => Some(handle_admin_stats(state, req)),
        _ => None,
    }
}

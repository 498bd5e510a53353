use crate::accounts;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::notifications::{self, DEFAULT_LIST_LIMIT};
use rusqlite::Connection;
use serde_json::{json, Value};

fn notifications_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    accounts::require(conn, &user_id)?;
    let limit = match params.get("limit") {
        None | Some(Value::Null) => DEFAULT_LIST_LIMIT,
        Some(v) => match v.as_u64() {
            Some(n) if (1..=100).contains(&n) => n as usize,
            _ => return Err(HandlerErr::bad_params("limit must be in 1..=100")),
        },
    };
    let (items, unread) = notifications::list(conn, &user_id, limit).map_err(HandlerErr::query)?;
    Ok(json!({
        "notifications": items.iter().map(|n| n.to_json()).collect::<Vec<_>>(),
        "unreadCount": unread
    }))
}

fn notifications_mark_read(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let notification_id = get_required_str(params, "notificationId")?;
    if !notifications::mark_read(conn, &user_id, &notification_id).map_err(HandlerErr::update)? {
        return Err(HandlerErr::new("not_found", "notification not found"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_notifications_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match notifications_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_notifications_mark_read(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match notifications_mark_read(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_notifications_list(state, req)),
        "notifications.markRead" => Some(handle_notifications_mark_read(state, req)),
        _ => None,
    }
}

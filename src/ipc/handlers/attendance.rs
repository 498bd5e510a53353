use crate::accounts;
use crate::history::{self, AttendanceFilter, HistoryQuery, Period};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, parse_date, parse_now};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};

fn attendance_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let account = accounts::require(conn, &student_id)?;

    let period_raw = get_optional_str(params, "period").unwrap_or_else(|| "weekly".into());
    let Some(period) = Period::parse(&period_raw) else {
        return Err(HandlerErr::bad_params("period must be daily, weekly or monthly"));
    };
    let filter_raw = get_optional_str(params, "filter").unwrap_or_else(|| "all".into());
    let Some(filter) = AttendanceFilter::parse(&filter_raw) else {
        return Err(HandlerErr::bad_params("filter must be all, attended or missed"));
    };
    let now = parse_now(params)?;
    let date = match get_optional_str(params, "date") {
        Some(raw) => parse_date(&raw, "date")?,
        None => now.date(),
    };

    let schedule = store::load_schedule(conn).map_err(HandlerErr::query)?;
    let records = store::check_ins_for_student(conn, &student_id).map_err(HandlerErr::query)?;
    let query = HistoryQuery {
        period,
        date,
        filter,
        registered_on: account.created_at.date(),
        now,
    };
    let entries = history::history(&schedule, &records, &query);
    let (from, to) = period.range(date);
    let attended = entries
        .iter()
        .filter(|e| matches!(e.status, history::EntryStatus::Attended { .. }))
        .count();

    Ok(json!({
        "from": from.format("%Y-%m-%d").to_string(),
        "to": to.format("%Y-%m-%d").to_string(),
        "attendedCount": attended,
        "missedCount": entries.len() - attended,
        "entries": entries.iter().map(|e| e.to_json()).collect::<Vec<_>>()
    }))
}

fn attendance_daily_counts(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    accounts::require(conn, &student_id)?;
    let records = store::check_ins_for_student(conn, &student_id).map_err(HandlerErr::query)?;
    let days: Vec<Value> = history::daily_counts(&records)
        .into_iter()
        .map(|(date, count)| {
            json!({
                "date": date.format("%Y-%m-%d").to_string(),
                "count": count,
            })
        })
        .collect();
    Ok(json!({ "days": days }))
}

fn handle_attendance_history(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_history(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_daily_counts(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_daily_counts(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "attendance.history" => Some(handle_attendance_history(state, req)),
        "attendance.dailyCounts" => Some(handle_attendance_daily_counts(state, req)),
        _ => None,
    }
}

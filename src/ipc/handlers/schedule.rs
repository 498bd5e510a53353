use crate::accounts;
use crate::config;
use crate::geo::Coordinate;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_object, get_required_str, parse_now};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, ClockTime, Lecture, Schedule, ScheduleSlot, TimeWindow};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub(crate) fn slot_json(slot: &ScheduleSlot) -> Value {
    json!({
        "id": slot.id,
        "day": schedule::weekday_name(slot.day),
        "start": slot.window.start.to_string(),
        "end": slot.window.end.to_string(),
        "course": slot.course,
        "lecturer": slot.lecturer,
        "room": slot.room,
        "location": slot.location,
    })
}

pub(crate) fn lecture_json(lecture: &Lecture) -> Value {
    json!({
        "id": lecture.id,
        "slotId": lecture.slot_id,
        "date": lecture.date.format("%Y-%m-%d").to_string(),
        "day": schedule::weekday_name(lecture.day),
        "start": lecture.window.start.to_string(),
        "end": lecture.window.end.to_string(),
        "course": lecture.course,
        "lecturer": lecture.lecturer,
        "room": lecture.room,
        "location": lecture.location,
    })
}

fn required_text(obj: &Map<String, Value>, key: &str, max_len: usize) -> Result<String, HandlerErr> {
    let s = obj
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("slot.{} is required", key)));
    }
    if s.chars().count() > max_len {
        return Err(HandlerErr::bad_params(format!(
            "slot.{} length must be <= {}",
            key, max_len
        )));
    }
    Ok(s.to_string())
}

fn optional_text(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn slot_from(conn: &Connection, obj: &Map<String, Value>) -> Result<ScheduleSlot, HandlerErr> {
    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if id.contains('@') {
        return Err(HandlerErr::bad_params("slot.id must not contain '@'"));
    }
    let day = schedule::parse_weekday(&required_text(obj, "day", 16)?)?;
    let window = TimeWindow::new(
        ClockTime::parse(&required_text(obj, "start", 5)?)?,
        ClockTime::parse(&required_text(obj, "end", 5)?)?,
    )?;

    let lat = obj.get("latitude").and_then(|v| v.as_f64());
    let lon = obj.get("longitude").and_then(|v| v.as_f64());
    let location = match (lat, lon) {
        (Some(lat), Some(lon)) => Coordinate::new(lat, lon)?,
        (None, None) => config::campus_location(conn).map_err(HandlerErr::query)?,
        _ => {
            return Err(HandlerErr::bad_params(
                "slot.latitude and slot.longitude must be given together",
            ))
        }
    };

    Ok(ScheduleSlot {
        id,
        day,
        window,
        course: required_text(obj, "course", 120)?,
        lecturer: optional_text(obj, "lecturer"),
        room: optional_text(obj, "room"),
        location,
    })
}

fn schedule_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule = store::load_schedule(conn).map_err(HandlerErr::query)?;
    let slots: Vec<Value> = match get_optional_str(params, "day") {
        Some(raw) => {
            let day = schedule::parse_weekday(&raw)?;
            schedule.day(day).into_iter().map(slot_json).collect()
        }
        None => schedule.slots().map(slot_json).collect(),
    };
    Ok(json!({ "slots": slots }))
}

fn schedule_upsert_slot(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let admin_id = get_required_str(params, "adminId")?;
    accounts::require_admin(conn, &admin_id)?;
    let slot = slot_from(conn, get_required_object(params, "slot")?)?;

    let mut slots = store::load_slots(conn).map_err(HandlerErr::query)?;
    slots.retain(|s| s.id != slot.id);
    slots.push(slot.clone());
    Schedule::from_slots(slots)?;

    store::upsert_slot(conn, &slot).map_err(HandlerErr::update)?;
    log::info!(
        "saved slot {} ({} {} {})",
        slot.id,
        schedule::weekday_name(slot.day),
        slot.window,
        slot.course
    );
    Ok(json!({ "slot": slot_json(&slot) }))
}

fn schedule_delete_slot(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let admin_id = get_required_str(params, "adminId")?;
    accounts::require_admin(conn, &admin_id)?;
    let slot_id = get_required_str(params, "slotId")?;
    if !store::delete_slot(conn, &slot_id).map_err(HandlerErr::update)? {
        return Err(HandlerErr::new("not_found", "slot not found"));
    }
    log::info!("deleted slot {}", slot_id);
    Ok(json!({ "ok": true }))
}

fn schedule_lectures_at(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let now = parse_now(params)?;
    let schedule = store::load_schedule(conn).map_err(HandlerErr::query)?;
    let lectures = schedule.resolve(now);
    Ok(json!({
        "now": crate::db::format_timestamp(now),
        "lectures": lectures.iter().map(lecture_json).collect::<Vec<_>>()
    }))
}

fn handle_schedule_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedule_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_schedule_upsert_slot(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedule_upsert_slot(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_schedule_delete_slot(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedule_delete_slot(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_schedule_lectures_at(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedule_lectures_at(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "schedule.list" => Some(handle_schedule_list(state, req)),
        "schedule.upsertSlot" => Some(handle_schedule_upsert_slot(state, req)),
        "schedule.deleteSlot" => Some(handle_schedule_delete_slot(state, req)),
        "schedule.lecturesAt" => Some(handle_schedule_lectures_at(state, req)),
        _ => None,
    }
}

use crate::accounts;
use crate::checkin::{
    self, CheckInRecord, CheckInSession, CheckInState, Eligibility, FixOutcome, LocationError,
    LocationSource, Refusal,
};
use crate::config::CheckInPolicy;
use crate::db;
use crate::geo::{self, Coordinate};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::schedule::lecture_json;
use crate::ipc::helpers::{
    device_id, get_optional_str, get_required_f64, get_required_str, parse_now, require_db,
};
use crate::ipc::types::{AppState, Request, SessionKey};
use crate::schedule;
use crate::store::{SqliteAttendanceStore, SqliteSchedule};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

/// The fix (or failure) the shell captured for one locate request.
struct ReportedPosition {
    result: Result<Coordinate, LocationError>,
}

impl ReportedPosition {
    fn from_params(params: &Value) -> Result<Self, HandlerErr> {
        if let Some(raw) = get_optional_str(params, "error") {
            let Some(reason) = LocationError::parse(&raw) else {
                return Err(HandlerErr::bad_params(format!("unknown location error: {}", raw)));
            };
            return Ok(Self { result: Err(reason) });
        }
        let latitude = get_required_f64(params, "latitude")?;
        let longitude = get_required_f64(params, "longitude")?;
        Ok(Self {
            result: Ok(Coordinate::new(latitude, longitude)?),
        })
    }
}

impl LocationSource for ReportedPosition {
    fn current_position(&mut self) -> Result<Coordinate, LocationError> {
        self.result
    }
}

fn record_json(record: &CheckInRecord) -> Value {
    json!({
        "studentId": record.student_id,
        "lectureId": record.lecture_id,
        "checkedInAt": db::format_timestamp(record.checked_in_at),
        "location": record.coordinate,
    })
}

fn session_json(session: &CheckInSession, policy: &CheckInPolicy) -> Value {
    let state = session.state();
    let mut out = json!({
        "state": state.name(),
        "lecture": state.lecture().map(lecture_json),
        "allowedDistanceMeters": policy.allowed_distance_meters,
    });
    if let Some(fix) = state.fix() {
        out["location"] = json!(fix.coordinate);
        out["distanceMeters"] = json!(fix.distance_meters);
        out["distanceText"] = json!(geo::describe_distance(fix.distance_meters));
    }
    match state {
        CheckInState::Locating { request, .. } => {
            out["requestId"] = json!(request.id);
            out["deadline"] = json!(db::format_timestamp(request.deadline));
        }
        CheckInState::LocationUnavailable { reason, .. } => {
            out["locationError"] = json!(reason.code());
            out["message"] = json!(reason.to_string());
        }
        CheckInState::CheckedIn { record, .. } => {
            out["record"] = record_json(record);
        }
        CheckInState::CheckInFailed { error, .. } => {
            out["writeError"] = json!(match error {
                checkin::WriteError::Conflict => "conflict".to_string(),
                checkin::WriteError::Failed(msg) => msg.clone(),
            });
        }
        _ => {}
    }
    out
}

fn with_decision(mut out: Value, decision: &Result<Eligibility, Refusal>) -> Value {
    match decision {
        Ok(eligibility) => {
            out["eligibility"] = json!(eligibility.code());
        }
        Err(refusal) => {
            out["blocked"] = json!({
                "code": refusal.code(),
                "message": refusal.to_string(),
                "retryable": refusal.retryable(),
            });
        }
    }
    out
}

fn session_key(params: &Value) -> Result<SessionKey, HandlerErr> {
    Ok((get_required_str(params, "studentId")?, device_id(params)))
}

/// Drops other devices' sessions whose lecture is over. The caller's own
/// session is kept so it can still report why it is blocked.
fn evict_finished(
    sessions: &mut HashMap<SessionKey, CheckInSession>,
    keep: &SessionKey,
    now: NaiveDateTime,
) {
    let before = sessions.len();
    sessions.retain(|key, session| key == keep || !session.is_finished(now));
    let evicted = before - sessions.len();
    if evicted > 0 {
        log::debug!("evicted {} finished check-in sessions", evicted);
    }
}

fn checkin_select(
    conn: &Connection,
    sessions: &mut HashMap<SessionKey, CheckInSession>,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let key = session_key(params)?;
    accounts::require_verified_student(conn, &key.0)?;
    let lecture_id = get_required_str(params, "lectureId")?;
    let now = parse_now(params)?;
    evict_finished(sessions, &key, now);

    let lecture = schedule::find_current(&SqliteSchedule::new(conn), now, &lecture_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| {
            HandlerErr::new("lecture_not_in_session", "lecture is not in session right now")
                .with_details(json!({ "lectureId": lecture_id }))
        })?;
    let policy = CheckInPolicy::load(conn).map_err(HandlerErr::query)?;

    let session = sessions
        .entry(key.clone())
        .or_insert_with(|| CheckInSession::new(key.0.clone()));
    let request = session.select_lecture(lecture, now, policy.location_timeout());
    log::debug!(
        "student {} device {} selected {} (request {})",
        key.0,
        key.1,
        lecture_id,
        request.id
    );

    let store = SqliteAttendanceStore::new(conn);
    let decision = checkin::evaluate(session, &store, &policy, now);
    Ok(json!({
        "requestId": request.id,
        "deadline": db::format_timestamp(request.deadline),
        "session": with_decision(session_json(session, &policy), &decision),
    }))
}

fn checkin_locate(
    conn: &Connection,
    sessions: &mut HashMap<SessionKey, CheckInSession>,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let key = session_key(params)?;
    let request_id = params
        .get("requestId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing requestId"))?;
    let mut reported = ReportedPosition::from_params(params)?;
    let now = parse_now(params)?;
    evict_finished(sessions, &key, now);

    let Some(session) = sessions.get_mut(&key) else {
        return Err(Refusal::NoLectureSelected.into());
    };
    let policy = CheckInPolicy::load(conn).map_err(HandlerErr::query)?;

    let outcome = session.locate_with(request_id, &mut reported, now);
    match outcome {
        FixOutcome::Stale => {
            log::debug!("dropped stale fix {} for student {}", request_id, key.0);
            return Err(HandlerErr::new(
                "stale_location_request",
                "location request was superseded by a newer selection",
            )
            .with_details(json!({ "state": session.state().name() })));
        }
        FixOutcome::TimedOut => {
            log::info!("fix {} for student {} arrived after the deadline", request_id, key.0);
        }
        FixOutcome::Applied | FixOutcome::Ignored => {}
    }

    let store = SqliteAttendanceStore::new(conn);
    let decision = checkin::evaluate(session, &store, &policy, now);
    let outcome = match outcome {
        FixOutcome::Applied => "applied",
        FixOutcome::TimedOut => "timedOut",
        FixOutcome::Ignored => "ignored",
        FixOutcome::Stale => "stale",
    };
    Ok(json!({
        "outcome": outcome,
        "session": with_decision(session_json(session, &policy), &decision),
    }))
}

fn checkin_status(
    conn: &Connection,
    sessions: &mut HashMap<SessionKey, CheckInSession>,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let key = session_key(params)?;
    let now = parse_now(params)?;
    evict_finished(sessions, &key, now);
    let policy = CheckInPolicy::load(conn).map_err(HandlerErr::query)?;

    let Some(session) = sessions.get_mut(&key) else {
        let idle = CheckInSession::new(key.0.clone());
        return Ok(with_decision(
            session_json(&idle, &policy),
            &Err(Refusal::NoLectureSelected),
        ));
    };
    let store = SqliteAttendanceStore::new(conn);
    let decision = checkin::evaluate(session, &store, &policy, now);
    Ok(with_decision(session_json(session, &policy), &decision))
}

fn checkin_submit(
    conn: &Connection,
    sessions: &mut HashMap<SessionKey, CheckInSession>,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let key = session_key(params)?;
    accounts::require_verified_student(conn, &key.0)?;
    let now = parse_now(params)?;
    evict_finished(sessions, &key, now);

    let Some(session) = sessions.get_mut(&key) else {
        return Err(Refusal::NoLectureSelected.into());
    };
    let policy = CheckInPolicy::load(conn).map_err(HandlerErr::query)?;
    let store = SqliteAttendanceStore::new(conn);

    match checkin::submit(session, &store, &policy, now) {
        Ok(record) => {
            log::info!(
                "student {} checked in to {} at {}",
                record.student_id,
                record.lecture_id,
                db::format_timestamp(record.checked_in_at)
            );
            Ok(json!({
                "record": record_json(&record),
                "session": session_json(session, &policy),
            }))
        }
        Err(refusal) => {
            if refusal.retryable() {
                log::warn!("check-in write for student {} failed: {}", key.0, refusal);
            } else {
                log::info!("check-in refused for student {}: {}", key.0, refusal.code());
            }
            let state = session.state().name();
            let mut e = HandlerErr::from(refusal);
            if let Some(details) = e.details.as_mut() {
                details["state"] = json!(state);
            }
            Err(e)
        }
    }
}

type SessionHandler =
    fn(&Connection, &mut HashMap<SessionKey, CheckInSession>, &Value) -> Result<Value, HandlerErr>;

fn run(state: &mut AppState, req: &Request, f: SessionHandler) -> Value {
    let AppState { db, checkins, .. } = state;
    let result = require_db(db).and_then(|conn| f(conn, checkins, &req.params));
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "checkin.select" => Some(run(state, req, checkin_select)),
        "checkin.locate" => Some(run(state, req, checkin_locate)),
        "checkin.status" => Some(run(state, req, checkin_status)),
        "checkin.submit" => Some(run(state, req, checkin_submit)),
        _ => None,
    }
}

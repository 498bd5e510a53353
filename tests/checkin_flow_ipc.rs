mod common;

use common::{add_slot, bootstrap_admin, register_student, str_at, verified_student, Sidecar, CAMPUS};
use serde_json::{json, Value};

// 2024-03-04 is a Monday.
const LECTURE: &str = "math-101@2024-03-04";

fn world(prefix: &str) -> (Sidecar, String, String) {
    let mut sc = Sidecar::with_workspace(prefix);
    let admin = bootstrap_admin(&mut sc);
    let student = verified_student(&mut sc, &admin, "amina@uni.ac.ug");
    add_slot(&mut sc, &admin, "math-101", "monday", "08:00", "11:00", "Mathematics");
    (sc, admin, student)
}

fn select(sc: &mut Sidecar, student: &str, device: &str, now: &str) -> Value {
    sc.request_ok(
        "checkin.select",
        json!({ "studentId": student, "deviceId": device, "lectureId": LECTURE, "now": now }),
    )
}

fn locate(sc: &mut Sidecar, student: &str, device: &str, request_id: u64, lat: f64, now: &str) -> Value {
    sc.request_ok(
        "checkin.locate",
        json!({
            "studentId": student,
            "deviceId": device,
            "requestId": request_id,
            "latitude": lat,
            "longitude": CAMPUS.1,
            "now": now
        }),
    )
}

#[test]
fn eligible_student_checks_in_once() {
    let (mut sc, _admin, student) = world("attendd-checkin-happy");

    let selected = select(&mut sc, &student, "phone", "2024-03-04T08:30:00");
    assert_eq!(selected["requestId"], json!(1));
    assert_eq!(str_at(&selected, "/session/state"), "locating");
    assert_eq!(str_at(&selected, "/session/blocked/code"), "location_unknown");
    assert_eq!(str_at(&selected, "/session/lecture/course"), "Mathematics");

    let located = locate(&mut sc, &student, "phone", 1, CAMPUS.0, "2024-03-04T08:30:05");
    assert_eq!(str_at(&located, "/outcome"), "applied");
    assert_eq!(str_at(&located, "/session/state"), "eligible");
    assert_eq!(str_at(&located, "/session/eligibility"), "eligible");
    assert!(located["session"]["distanceMeters"].as_f64().expect("distance") < 1.0);

    // Repeated evaluation does not change the answer.
    for _ in 0..2 {
        let status = sc.request_ok(
            "checkin.status",
            json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-04T08:30:10" }),
        );
        assert_eq!(str_at(&status, "/eligibility"), "eligible");
    }

    let submitted = sc.request_ok(
        "checkin.submit",
        json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-04T08:30:12" }),
    );
    assert_eq!(str_at(&submitted, "/record/lectureId"), LECTURE);
    assert_eq!(str_at(&submitted, "/record/checkedInAt"), "2024-03-04T08:30:12");
    assert_eq!(str_at(&submitted, "/session/state"), "checkedIn");

    let again = sc.request_err(
        "checkin.submit",
        json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-04T08:31:00" }),
    );
    assert_eq!(str_at(&again, "/code"), "already_checked_in");
    assert_eq!(again["details"]["retryable"], json!(false));

    // A fresh selection of the same lecture is immediately recognised.
    let reselected = select(&mut sc, &student, "phone", "2024-03-04T09:00:00");
    assert_eq!(str_at(&reselected, "/session/state"), "alreadyCheckedIn");
    assert_eq!(str_at(&reselected, "/session/eligibility"), "already_checked_in");
}

#[test]
fn out_of_range_is_refused_with_distance() {
    let (mut sc, _admin, student) = world("attendd-checkin-range");
    select(&mut sc, &student, "phone", "2024-03-04T08:30:00");
    let located = locate(&mut sc, &student, "phone", 1, CAMPUS.0 + 0.01, "2024-03-04T08:30:02");
    assert_eq!(str_at(&located, "/session/state"), "outOfRange");
    assert_eq!(str_at(&located, "/session/eligibility"), "out_of_range");
    assert_eq!(str_at(&located, "/session/distanceText"), "1.1 km");

    let refused = sc.request_err(
        "checkin.submit",
        json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-04T08:30:05" }),
    );
    assert_eq!(str_at(&refused, "/code"), "out_of_range");
    let distance = refused["details"]["distanceMeters"].as_f64().expect("distance");
    assert!((distance - 1112.0).abs() < 5.0, "distance {}", distance);
    assert_eq!(refused["details"]["allowedDistanceMeters"], json!(100.0));
}

#[test]
fn stale_fix_is_discarded() {
    let (mut sc, _admin, student) = world("attendd-checkin-stale");
    select(&mut sc, &student, "phone", "2024-03-04T08:30:00");
    let second = select(&mut sc, &student, "phone", "2024-03-04T08:30:01");
    assert_eq!(second["requestId"], json!(2));

    let stale = sc.request_err(
        "checkin.locate",
        json!({
            "studentId": student,
            "deviceId": "phone",
            "requestId": 1,
            "latitude": CAMPUS.0,
            "longitude": CAMPUS.1,
            "now": "2024-03-04T08:30:02"
        }),
    );
    assert_eq!(str_at(&stale, "/code"), "stale_location_request");
    assert_eq!(str_at(&stale, "/details/state"), "locating");

    let located = locate(&mut sc, &student, "phone", 2, CAMPUS.0, "2024-03-04T08:30:03");
    assert_eq!(str_at(&located, "/session/state"), "eligible");
}

#[test]
fn late_fix_and_geolocation_errors_leave_location_unavailable() {
    let (mut sc, _admin, student) = world("attendd-checkin-timeout");
    select(&mut sc, &student, "phone", "2024-03-04T08:30:00");
    let late = locate(&mut sc, &student, "phone", 1, CAMPUS.0, "2024-03-04T08:31:00");
    assert_eq!(str_at(&late, "/outcome"), "timedOut");
    assert_eq!(str_at(&late, "/session/state"), "locationUnavailable");
    assert_eq!(str_at(&late, "/session/locationError"), "timed_out");

    let refused = sc.request_err(
        "checkin.submit",
        json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-04T08:31:01" }),
    );
    assert_eq!(str_at(&refused, "/code"), "location_unavailable");
    assert_eq!(str_at(&refused, "/details/reason"), "timed_out");

    // Status polling alone expires an unanswered request.
    select(&mut sc, &student, "tablet", "2024-03-04T09:00:00");
    let status = sc.request_ok(
        "checkin.status",
        json!({ "studentId": student, "deviceId": "tablet", "now": "2024-03-04T09:00:31" }),
    );
    assert_eq!(str_at(&status, "/state"), "locationUnavailable");

    select(&mut sc, &student, "laptop", "2024-03-04T09:10:00");
    let denied = sc.request_ok(
        "checkin.locate",
        json!({
            "studentId": student,
            "deviceId": "laptop",
            "requestId": 1,
            "error": "permission_denied",
            "now": "2024-03-04T09:10:01"
        }),
    );
    assert_eq!(str_at(&denied, "/session/locationError"), "permission_denied");
    assert_eq!(str_at(&denied, "/session/blocked/code"), "location_unavailable");
}

#[test]
fn second_device_sees_existing_record() {
    let (mut sc, _admin, student) = world("attendd-checkin-race");
    for device in ["phone", "laptop"] {
        select(&mut sc, &student, device, "2024-03-04T08:30:00");
        let located = locate(&mut sc, &student, device, 1, CAMPUS.0, "2024-03-04T08:30:01");
        assert_eq!(str_at(&located, "/session/state"), "eligible");
    }

    sc.request_ok(
        "checkin.submit",
        json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-04T08:30:02" }),
    );
    let loser = sc.request_err(
        "checkin.submit",
        json!({ "studentId": student, "deviceId": "laptop", "now": "2024-03-04T08:30:02" }),
    );
    assert_eq!(str_at(&loser, "/code"), "already_checked_in");
    assert_eq!(str_at(&loser, "/details/state"), "alreadyCheckedIn");

    // The record wins over an out-of-range fix too.
    select(&mut sc, &student, "tablet", "2024-03-04T08:40:00");
    let far = locate(&mut sc, &student, "tablet", 1, CAMPUS.0 + 0.05, "2024-03-04T08:40:01");
    assert_eq!(str_at(&far, "/session/eligibility"), "already_checked_in");

    let counts = sc.request_ok("attendance.dailyCounts", json!({ "studentId": student }));
    assert_eq!(counts["days"], json!([{ "date": "2024-03-04", "count": 1 }]));
}

#[test]
fn guards_report_distinct_reasons() {
    let (mut sc, admin, student) = world("attendd-checkin-guards");

    let none = sc.request_err(
        "checkin.submit",
        json!({ "studentId": student, "now": "2024-03-04T08:30:00" }),
    );
    assert_eq!(str_at(&none, "/code"), "no_lecture_selected");

    let idle = sc.request_ok(
        "checkin.status",
        json!({ "studentId": student, "now": "2024-03-04T08:30:00" }),
    );
    assert_eq!(str_at(&idle, "/state"), "noLecture");

    select(&mut sc, &student, "default", "2024-03-04T08:30:00");
    let locating = sc.request_err(
        "checkin.submit",
        json!({ "studentId": student, "now": "2024-03-04T08:30:01" }),
    );
    assert_eq!(str_at(&locating, "/code"), "location_unknown");

    let ended = sc.request_err(
        "checkin.select",
        json!({ "studentId": student, "lectureId": LECTURE, "now": "2024-03-04T11:00:00" }),
    );
    assert_eq!(str_at(&ended, "/code"), "lecture_not_in_session");

    let pending = register_student(&mut sc, "pending@uni.ac.ug");
    let refused = sc.request_err(
        "checkin.select",
        json!({ "studentId": pending, "lectureId": LECTURE, "now": "2024-03-04T08:30:00" }),
    );
    assert_eq!(str_at(&refused, "/code"), "not_verified");
    assert_eq!(str_at(&refused, "/details/verificationStatus"), "pending");

    let as_admin = sc.request_err(
        "checkin.select",
        json!({ "studentId": admin, "lectureId": LECTURE, "now": "2024-03-04T08:30:00" }),
    );
    assert_eq!(str_at(&as_admin, "/code"), "bad_params");
}

#[test]
fn eligible_fix_does_not_outlive_the_lecture() {
    let (mut sc, _admin, student) = world("attendd-checkin-ended");
    select(&mut sc, &student, "phone", "2024-03-04T08:01:00");
    let located = locate(&mut sc, &student, "phone", 1, CAMPUS.0, "2024-03-04T08:01:05");
    assert_eq!(str_at(&located, "/session/state"), "eligible");

    let late = sc.request_err(
        "checkin.submit",
        json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-05T18:00:00" }),
    );
    assert_eq!(str_at(&late, "/code"), "lecture_ended");
    assert_eq!(late["details"]["retryable"], json!(false));

    let at_close = sc.request_ok(
        "checkin.status",
        json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-04T11:00:00" }),
    );
    assert_eq!(str_at(&at_close, "/blocked/code"), "lecture_ended");

    let counts = sc.request_ok("attendance.dailyCounts", json!({ "studentId": student }));
    assert_eq!(counts["days"], json!([]));
    let history = sc.request_ok(
        "attendance.history",
        json!({ "studentId": student, "date": "2024-03-04", "now": "2024-03-05T18:00:00" }),
    );
    assert_eq!(history["attendedCount"], json!(0));
    assert_eq!(history["missedCount"], json!(1));
}

#[test]
fn finished_sessions_are_evicted() {
    let (mut sc, _admin, student) = world("attendd-checkin-evict");
    select(&mut sc, &student, "phone", "2024-03-04T08:01:00");
    select(&mut sc, &student, "tablet", "2024-03-04T08:02:00");
    let health = sc.request_ok("health", json!({}));
    assert_eq!(health["activeSessions"], json!(2));

    // The caller's own session survives so it can explain the block.
    let status = sc.request_ok(
        "checkin.status",
        json!({ "studentId": student, "deviceId": "phone", "now": "2024-03-04T11:00:01" }),
    );
    assert_eq!(str_at(&status, "/blocked/code"), "lecture_ended");
    let health = sc.request_ok("health", json!({}));
    assert_eq!(health["activeSessions"], json!(1));

    let tablet = sc.request_ok(
        "checkin.status",
        json!({ "studentId": student, "deviceId": "tablet", "now": "2024-03-04T11:00:02" }),
    );
    assert_eq!(str_at(&tablet, "/state"), "noLecture");
}

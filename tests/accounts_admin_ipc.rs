mod common;

use common::{add_slot, bootstrap_admin, register_student, str_at, Sidecar};
use serde_json::json;

#[test]
fn registration_verification_and_notifications() {
    let mut sc = Sidecar::with_workspace("attendd-accounts");
    let admin = bootstrap_admin(&mut sc);
    let code = sc.error_code(
        "admin.bootstrap",
        json!({ "name": "Second", "email": "second@uni.ac.ug" }),
    );
    assert_eq!(code, "admin_exists");

    let student = register_student(&mut sc, "amina@uni.ac.ug");
    let code = sc.error_code(
        "accounts.register",
        json!({ "name": "Dup", "email": "AMINA@uni.ac.ug", "course": "BSc", "year": "1" }),
    );
    assert_eq!(code, "email_taken");
    let code = sc.error_code(
        "accounts.register",
        json!({ "name": "No Mail", "email": "nomail", "course": "BSc", "year": "1" }),
    );
    assert_eq!(code, "bad_params");

    let code = sc.error_code("admin.pending.list", json!({ "adminId": student }));
    assert_eq!(code, "forbidden");
    let pending = sc.request_ok("admin.pending.list", json!({ "adminId": admin }));
    let list = pending["accounts"].as_array().expect("accounts");
    assert_eq!(list.len(), 1);
    assert_eq!(str_at(&list[0], "/id"), student);

    let code = sc.error_code(
        "admin.verify",
        json!({ "adminId": admin, "userId": student, "action": "maybe" }),
    );
    assert_eq!(code, "bad_params");
    let verified = sc.request_ok(
        "admin.verify",
        json!({ "adminId": admin, "userId": student, "action": "approve", "now": "2024-03-02T09:00" }),
    );
    assert_eq!(str_at(&verified, "/account/verificationStatus"), "verified");
    let pending = sc.request_ok("admin.pending.list", json!({ "adminId": admin }));
    assert_eq!(pending["accounts"], json!([]));

    let inbox = sc.request_ok("notifications.list", json!({ "userId": student }));
    assert_eq!(inbox["unreadCount"], json!(1));
    let first = &inbox["notifications"][0];
    assert!(str_at(first, "/message").contains("approved"));
    assert_eq!(first["read"], json!(false));
    let notification_id = str_at(first, "/id").to_string();

    let code = sc.error_code(
        "notifications.markRead",
        json!({ "userId": admin, "notificationId": notification_id }),
    );
    assert_eq!(code, "not_found");
    sc.request_ok(
        "notifications.markRead",
        json!({ "userId": student, "notificationId": notification_id }),
    );
    let inbox = sc.request_ok("notifications.list", json!({ "userId": student, "limit": 5 }));
    assert_eq!(inbox["unreadCount"], json!(0));

    let profile = sc.request_ok(
        "accounts.updateProfile",
        json!({ "userId": student, "patch": { "year": "3", "course": "BSc Software Engineering" } }),
    );
    assert_eq!(str_at(&profile, "/account/year"), "3");
    let fetched = sc.request_ok("accounts.get", json!({ "userId": student }));
    assert_eq!(str_at(&fetched, "/account/course"), "BSc Software Engineering");
    assert_eq!(str_at(&fetched, "/account/email"), "amina@uni.ac.ug");

    let code = sc.error_code("accounts.get", json!({ "userId": "nobody" }));
    assert_eq!(code, "not_found");
}

#[test]
fn schedule_management_is_admin_only_and_rejects_overlaps() {
    let mut sc = Sidecar::with_workspace("attendd-schedule");
    let admin = bootstrap_admin(&mut sc);
    let student = register_student(&mut sc, "amina@uni.ac.ug");

    let code = sc.error_code(
        "schedule.upsertSlot",
        json!({
            "adminId": student,
            "slot": { "day": "monday", "start": "08:00", "end": "11:00", "course": "Maths" }
        }),
    );
    assert_eq!(code, "forbidden");

    add_slot(&mut sc, &admin, "math-a", "monday", "08:00", "11:00", "Mathematics A");
    // Identical window: a parallel section.
    add_slot(&mut sc, &admin, "math-b", "monday", "08:00", "11:00", "Mathematics B");
    // Back-to-back is not an overlap.
    add_slot(&mut sc, &admin, "chem", "monday", "11:00", "13:00", "Chemistry");

    let clash = sc.request_err(
        "schedule.upsertSlot",
        json!({
            "adminId": admin,
            "slot": { "id": "bio", "day": "monday", "start": "10:00", "end": "12:00", "course": "Biology" }
        }),
    );
    assert_eq!(str_at(&clash, "/code"), "schedule_conflict");

    let code = sc.error_code(
        "schedule.upsertSlot",
        json!({
            "adminId": admin,
            "slot": { "day": "monday", "start": "15:00", "end": "14:00", "course": "Backwards" }
        }),
    );
    assert_eq!(code, "bad_params");

    // Moving an existing slot does not clash with itself.
    add_slot(&mut sc, &admin, "chem", "monday", "11:30", "13:30", "Chemistry");

    let monday = sc.request_ok("schedule.list", json!({ "day": "monday" }));
    assert_eq!(monday["slots"].as_array().expect("slots").len(), 3);
    let tuesday = sc.request_ok("schedule.list", json!({ "day": "tuesday" }));
    assert_eq!(tuesday["slots"], json!([]));

    // 2024-03-04 is a Monday.
    let on = sc.request_ok("schedule.lecturesAt", json!({ "now": "2024-03-04T08:00" }));
    let ids: Vec<&str> = on["lectures"]
        .as_array()
        .expect("lectures")
        .iter()
        .map(|l| l["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec!["math-a@2024-03-04", "math-b@2024-03-04"]);
    let gap = sc.request_ok("schedule.lecturesAt", json!({ "now": "2024-03-04T11:00" }));
    assert_eq!(gap["lectures"], json!([]));

    sc.request_ok("schedule.deleteSlot", json!({ "adminId": admin, "slotId": "math-b" }));
    let code = sc.error_code("schedule.deleteSlot", json!({ "adminId": admin, "slotId": "math-b" }));
    assert_eq!(code, "not_found");
}

#[test]
fn admin_stats_counts_students_and_check_ins() {
    let mut sc = Sidecar::with_workspace("attendd-stats");
    let admin = bootstrap_admin(&mut sc);
    let a = register_student(&mut sc, "a@uni.ac.ug");
    let b = register_student(&mut sc, "b@uni.ac.ug");
    register_student(&mut sc, "c@uni.ac.ug");
    sc.request_ok("admin.verify", json!({ "adminId": admin, "userId": a, "action": "approve" }));
    sc.request_ok("admin.verify", json!({ "adminId": admin, "userId": b, "action": "reject" }));
    add_slot(&mut sc, &admin, "math-101", "monday", "08:00", "11:00", "Mathematics");

    sc.request_ok(
        "checkin.select",
        json!({ "studentId": a, "lectureId": "math-101@2024-03-04", "now": "2024-03-04T08:05" }),
    );
    sc.request_ok(
        "checkin.locate",
        json!({ "studentId": a, "requestId": 1, "latitude": common::CAMPUS.0, "longitude": common::CAMPUS.1, "now": "2024-03-04T08:05:10" }),
    );
    sc.request_ok("checkin.submit", json!({ "studentId": a, "now": "2024-03-04T08:05:20" }));

    let code = sc.error_code("admin.stats", json!({ "adminId": a }));
    assert_eq!(code, "forbidden");
    let stats = sc.request_ok("admin.stats", json!({ "adminId": admin }));
    assert_eq!(stats["students"], json!({ "pending": 1, "verified": 1, "rejected": 1 }));
    assert_eq!(stats["totalCheckIns"], json!(1));
    assert_eq!(stats["byCourse"], json!([{ "course": "Mathematics", "count": 1 }]));
    assert_eq!(stats["byDay"], json!([{ "date": "2024-03-04", "count": 1 }]));

    let later = sc.request_ok(
        "admin.stats",
        json!({ "adminId": admin, "from": "2024-03-05", "to": "2024-03-31" }),
    );
    assert_eq!(later["totalCheckIns"], json!(0));
    let code = sc.error_code(
        "admin.stats",
        json!({ "adminId": admin, "from": "2024-03-31", "to": "2024-03-01" }),
    );
    assert_eq!(code, "bad_params");
}

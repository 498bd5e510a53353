mod common;

use common::{str_at, Sidecar};
use serde_json::json;

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let mut sc = Sidecar::spawn();

    let health = sc.request_ok("health", json!({}));
    assert_eq!(health["workspacePath"], json!(null));
    assert_eq!(health["activeSessions"], json!(0));

    let code = sc.error_code("setup.get", json!({}));
    assert_eq!(code, "no_workspace");
    let code = sc.error_code("checkin.status", json!({ "studentId": "s" }));
    assert_eq!(code, "no_workspace");

    let bad = sc.send_raw("{not json");
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(str_at(&bad, "/error/code"), "bad_json");

    let workspace = common::temp_dir("attendd-router-smoke");
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("attendd.sqlite3").is_file());

    let methods = [
        "setup.get",
        "setup.update",
        "admin.bootstrap",
        "accounts.register",
        "accounts.get",
        "accounts.updateProfile",
        "admin.pending.list",
        "admin.verify",
        "admin.stats",
        "schedule.list",
        "schedule.upsertSlot",
        "schedule.deleteSlot",
        "schedule.lecturesAt",
        "checkin.select",
        "checkin.locate",
        "checkin.status",
        "checkin.submit",
        "attendance.history",
        "attendance.dailyCounts",
        "notifications.list",
        "notifications.markRead",
    ];
    for method in methods {
        let resp = sc.request(method, json!({}));
        if resp["ok"] == json!(false) {
            assert_ne!(
                str_at(&resp, "/error/code"),
                "not_implemented",
                "unexpected unknown method for {}",
                method
            );
        }
    }

    let code = sc.error_code("grades.open", json!({}));
    assert_eq!(code, "not_implemented");

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

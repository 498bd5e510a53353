#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

/// Campus coordinate used by the fixtures.
pub const CAMPUS: (f64, f64) = (0.61244, 32.47622);

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    workspace: Option<PathBuf>,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_attendd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn attendd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 1,
            workspace: None,
        }
    }

    /// Spawns the daemon and selects a fresh temporary workspace.
    pub fn with_workspace(prefix: &str) -> Self {
        let mut sidecar = Self::spawn();
        let workspace = temp_dir(prefix);
        sidecar.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        sidecar.workspace = Some(workspace);
        sidecar
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Returns the error object; panics if the call succeeded.
    pub fn request_err(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    pub fn error_code(&mut self, method: &str, params: Value) -> String {
        let error = self.request_err(method, params);
        error
            .get("code")
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(ws) = self.workspace.take() {
            let _ = std::fs::remove_dir_all(ws);
        }
    }
}

pub fn str_at<'a>(v: &'a Value, pointer: &str) -> &'a str {
    v.pointer(pointer)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
}

pub fn bootstrap_admin(sc: &mut Sidecar) -> String {
    let res = sc.request_ok(
        "admin.bootstrap",
        json!({
            "name": "Registrar",
            "email": "registrar@uni.ac.ug",
            "now": "2024-02-01T09:00"
        }),
    );
    str_at(&res, "/account/id").to_string()
}

pub fn register_student(sc: &mut Sidecar, email: &str) -> String {
    let res = sc.request_ok(
        "accounts.register",
        json!({
            "name": "Amina Nakato",
            "email": email,
            "course": "BSc Computer Science",
            "year": "2",
            "now": "2024-03-01T10:00"
        }),
    );
    assert_eq!(str_at(&res, "/account/verificationStatus"), "pending");
    str_at(&res, "/account/id").to_string()
}

pub fn verified_student(sc: &mut Sidecar, admin_id: &str, email: &str) -> String {
    let id = register_student(sc, email);
    sc.request_ok(
        "admin.verify",
        json!({ "adminId": admin_id, "userId": id, "action": "approve" }),
    );
    id
}

pub fn add_slot(
    sc: &mut Sidecar,
    admin_id: &str,
    id: &str,
    day: &str,
    start: &str,
    end: &str,
    course: &str,
) -> Value {
    sc.request_ok(
        "schedule.upsertSlot",
        json!({
            "adminId": admin_id,
            "slot": {
                "id": id,
                "day": day,
                "start": start,
                "end": end,
                "course": course,
                "lecturer": "Dr. Okello",
                "room": "LT1",
                "latitude": CAMPUS.0,
                "longitude": CAMPUS.1
            }
        }),
    )
}

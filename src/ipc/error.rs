use crate::accounts::AccountError;
use crate::checkin::Refusal;
use crate::geo::GeoError;
use crate::schedule::ScheduleError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn update(e: impl std::fmt::Display) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AccountError> for HandlerErr {
    fn from(e: AccountError) -> Self {
        let details = match &e {
            AccountError::NotVerified(status) => {
                Some(json!({ "verificationStatus": status.as_str() }))
            }
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<ScheduleError> for HandlerErr {
    fn from(e: ScheduleError) -> Self {
        let details = match &e {
            ScheduleError::Overlap {
                conflicting_slot_id,
                ..
            } => Some(json!({ "conflictingSlotId": conflicting_slot_id })),
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<GeoError> for HandlerErr {
    fn from(e: GeoError) -> Self {
        Self::bad_params(e.to_string()).with_details(json!({ "reason": e.code() }))
    }
}

impl From<Refusal> for HandlerErr {
    fn from(r: Refusal) -> Self {
        let mut details = json!({ "retryable": r.retryable() });
        match &r {
            Refusal::OutOfRange {
                distance_meters,
                allowed_meters,
            } => {
                details["distanceMeters"] = json!(distance_meters);
                details["allowedDistanceMeters"] = json!(allowed_meters);
            }
            Refusal::LocationUnavailable(reason) => {
                details["reason"] = json!(reason.code());
            }
            _ => {}
        }
        Self {
            code: r.code(),
            message: r.to_string(),
            details: Some(details),
        }
    }
}

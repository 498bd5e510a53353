use crate::config::CheckInPolicy;
use crate::geo::{self, Coordinate};
use crate::schedule::Lecture;
use chrono::{Duration, NaiveDateTime};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationError {
    PermissionDenied,
    Unsupported,
    PositionUnavailable,
    TimedOut,
}

impl LocationError {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "permission_denied" | "denied" => Some(Self::PermissionDenied),
            "unsupported" => Some(Self::Unsupported),
            "position_unavailable" | "unavailable" => Some(Self::PositionUnavailable),
            "timed_out" | "timeout" => Some(Self::TimedOut),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::Unsupported => "unsupported",
            Self::PositionUnavailable => "position_unavailable",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "location permission was denied"),
            Self::Unsupported => write!(f, "geolocation is not supported on this device"),
            Self::PositionUnavailable => write!(f, "unable to retrieve your location"),
            Self::TimedOut => write!(f, "timed out waiting for a location fix"),
        }
    }
}

/// Single-shot position provider.
pub trait LocationSource {
    fn current_position(&mut self) -> Result<Coordinate, LocationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteError {
    /// The store already holds a record for the (student, lecture) pair.
    Conflict,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckInRecord {
    pub student_id: String,
    pub lecture_id: String,
    pub checked_in_at: NaiveDateTime,
    pub coordinate: Coordinate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub student_id: String,
    pub lecture_id: String,
    pub coordinate: Coordinate,
    pub requested_at: NaiveDateTime,
}

pub trait AttendanceStore {
    fn exists(&self, student_id: &str, lecture_id: &str) -> anyhow::Result<bool>;
    /// Must refuse a second record for the same pair with `WriteError::Conflict`.
    fn create(&self, write: &PendingWrite) -> Result<CheckInRecord, WriteError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub coordinate: Coordinate,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateRequest {
    pub id: u64,
    pub deadline: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckInState {
    NoLecture,
    Locating {
        lecture: Lecture,
        request: LocateRequest,
    },
    LocationKnown {
        lecture: Lecture,
        fix: Fix,
    },
    Eligible {
        lecture: Lecture,
        fix: Fix,
    },
    OutOfRange {
        lecture: Lecture,
        fix: Fix,
    },
    AlreadyCheckedIn {
        lecture: Lecture,
    },
    LocationUnavailable {
        lecture: Lecture,
        reason: LocationError,
    },
    CheckInInFlight {
        lecture: Lecture,
        fix: Fix,
    },
    CheckedIn {
        lecture: Lecture,
        record: CheckInRecord,
    },
    CheckInFailed {
        lecture: Lecture,
        fix: Fix,
        error: WriteError,
    },
}

impl CheckInState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoLecture => "noLecture",
            Self::Locating { .. } => "locating",
            Self::LocationKnown { .. } => "locationKnown",
            Self::Eligible { .. } => "eligible",
            Self::OutOfRange { .. } => "outOfRange",
            Self::AlreadyCheckedIn { .. } => "alreadyCheckedIn",
            Self::LocationUnavailable { .. } => "locationUnavailable",
            Self::CheckInInFlight { .. } => "checkInInFlight",
            Self::CheckedIn { .. } => "checkedIn",
            Self::CheckInFailed { .. } => "checkInFailed",
        }
    }

    pub fn lecture(&self) -> Option<&Lecture> {
        match self {
            Self::NoLecture => None,
            Self::Locating { lecture, .. }
            | Self::LocationKnown { lecture, .. }
            | Self::Eligible { lecture, .. }
            | Self::OutOfRange { lecture, .. }
            | Self::AlreadyCheckedIn { lecture }
            | Self::LocationUnavailable { lecture, .. }
            | Self::CheckInInFlight { lecture, .. }
            | Self::CheckedIn { lecture, .. }
            | Self::CheckInFailed { lecture, .. } => Some(lecture),
        }
    }

    pub fn fix(&self) -> Option<&Fix> {
        match self {
            Self::LocationKnown { fix, .. }
            | Self::Eligible { fix, .. }
            | Self::OutOfRange { fix, .. }
            | Self::CheckInInFlight { fix, .. }
            | Self::CheckInFailed { fix, .. } => Some(fix),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    OutOfRange,
    AlreadyCheckedIn,
}

impl Eligibility {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::OutOfRange => "out_of_range",
            Self::AlreadyCheckedIn => "already_checked_in",
        }
    }
}

/// Distance-only classification; `Eligible` iff `distance <= allowed`.
pub fn classify_distance(distance_meters: f64, allowed_meters: f64) -> Eligibility {
    if distance_meters <= allowed_meters {
        Eligibility::Eligible
    } else {
        Eligibility::OutOfRange
    }
}

/// Why a check-in cannot proceed. Each variant has its own remedy.
#[derive(Debug, Clone, PartialEq)]
pub enum Refusal {
    NoLectureSelected,
    LectureEnded,
    LocationUnknown,
    LocationUnavailable(LocationError),
    OutOfRange {
        distance_meters: f64,
        allowed_meters: f64,
    },
    AlreadyCheckedIn,
    InFlight,
    WriteConflict,
    WriteFailed(String),
    StoreUnavailable(String),
}

impl Refusal {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoLectureSelected => "no_lecture_selected",
            Self::LectureEnded => "lecture_ended",
            Self::LocationUnknown => "location_unknown",
            Self::LocationUnavailable(_) => "location_unavailable",
            Self::OutOfRange { .. } => "out_of_range",
            Self::AlreadyCheckedIn => "already_checked_in",
            Self::InFlight => "check_in_in_flight",
            Self::WriteConflict => "write_conflict",
            Self::WriteFailed(_) => "write_failed",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::WriteConflict | Self::WriteFailed(_) | Self::StoreUnavailable(_)
        )
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLectureSelected => write!(f, "select a lecture first"),
            Self::LectureEnded => write!(f, "this lecture has already ended"),
            Self::LocationUnknown => write!(f, "still detecting your location"),
            Self::LocationUnavailable(reason) => write!(f, "{}", reason),
            Self::OutOfRange {
                distance_meters,
                allowed_meters,
            } => write!(
                f,
                "you are {} from the lecture; check-in is allowed within {} m",
                geo::describe_distance(*distance_meters),
                allowed_meters
            ),
            Self::AlreadyCheckedIn => write!(f, "already checked in to this lecture"),
            Self::InFlight => write!(f, "a check-in is already in progress"),
            Self::WriteConflict => write!(f, "the store rejected a duplicate check-in"),
            Self::WriteFailed(msg) => write!(f, "failed to check in ({}); please try again", msg),
            Self::StoreUnavailable(msg) => write!(f, "attendance store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for Refusal {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    Applied,
    /// The fix belongs to an earlier selection and was dropped.
    Stale,
    TimedOut,
    /// Current request, but the session already moved on (e.g. already checked in).
    Ignored,
}

/// Check-in state for one student on one device.
#[derive(Debug, Clone)]
pub struct CheckInSession {
    student_id: String,
    state: CheckInState,
    current_request: Option<u64>,
    next_request: u64,
}

impl CheckInSession {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            state: CheckInState::NoLecture,
            current_request: None,
            next_request: 1,
        }
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn state(&self) -> &CheckInState {
        &self.state
    }

    /// True once the selected lecture's window has closed.
    pub fn lecture_ended(&self, now: NaiveDateTime) -> bool {
        self.state
            .lecture()
            .map(|lecture| now >= lecture.ends_at())
            .unwrap_or(false)
    }

    /// Nothing left to decide: no lecture, or the lecture is over.
    pub fn is_finished(&self, now: NaiveDateTime) -> bool {
        self.state.lecture().is_none() || self.lecture_ended(now)
    }

    fn holds_record(&self) -> bool {
        matches!(
            self.state,
            CheckInState::AlreadyCheckedIn { .. } | CheckInState::CheckedIn { .. }
        )
    }

    pub fn select_lecture(
        &mut self,
        lecture: Lecture,
        now: NaiveDateTime,
        timeout: Duration,
    ) -> LocateRequest {
        let request = LocateRequest {
            id: self.next_request,
            deadline: now + timeout,
        };
        self.next_request += 1;
        self.current_request = Some(request.id);
        self.state = CheckInState::Locating { lecture, request };
        request
    }

    pub fn resolve_location(
        &mut self,
        request_id: u64,
        result: Result<Coordinate, LocationError>,
        now: NaiveDateTime,
    ) -> FixOutcome {
        if self.current_request != Some(request_id) {
            return FixOutcome::Stale;
        }
        let (lecture, request) = match &self.state {
            CheckInState::Locating { lecture, request } => (lecture.clone(), *request),
            _ => return FixOutcome::Ignored,
        };
        if now > request.deadline {
            self.state = CheckInState::LocationUnavailable {
                lecture,
                reason: LocationError::TimedOut,
            };
            return FixOutcome::TimedOut;
        }
        self.state = match result {
            Ok(coordinate) => CheckInState::LocationKnown {
                fix: Fix {
                    coordinate,
                    distance_meters: geo::distance_meters(coordinate, lecture.location),
                },
                lecture,
            },
            Err(reason) => CheckInState::LocationUnavailable { lecture, reason },
        };
        FixOutcome::Applied
    }

    pub fn locate_with<L: LocationSource + ?Sized>(
        &mut self,
        request_id: u64,
        source: &mut L,
        now: NaiveDateTime,
    ) -> FixOutcome {
        let result = source.current_position();
        self.resolve_location(request_id, result, now)
    }

    /// Returns true when a pending locate passed its deadline.
    pub fn expire(&mut self, now: NaiveDateTime) -> bool {
        let CheckInState::Locating { lecture, request } = &self.state else {
            return false;
        };
        if now <= request.deadline {
            return false;
        }
        self.state = CheckInState::LocationUnavailable {
            lecture: lecture.clone(),
            reason: LocationError::TimedOut,
        };
        true
    }

    pub fn observe_existing(&mut self, exists: bool) {
        if !exists || matches!(self.state, CheckInState::CheckedIn { .. }) {
            return;
        }
        if let Some(lecture) = self.state.lecture() {
            self.state = CheckInState::AlreadyCheckedIn {
                lecture: lecture.clone(),
            };
        }
    }

    /// `None` while no decision is possible yet; see `blocking_reason`.
    pub fn classify(&mut self, allowed_meters: f64) -> Option<Eligibility> {
        let (lecture, fix) = match &self.state {
            CheckInState::AlreadyCheckedIn { .. } | CheckInState::CheckedIn { .. } => {
                return Some(Eligibility::AlreadyCheckedIn)
            }
            CheckInState::LocationKnown { lecture, fix }
            | CheckInState::Eligible { lecture, fix }
            | CheckInState::OutOfRange { lecture, fix }
            | CheckInState::CheckInFailed { lecture, fix, .. } => (lecture.clone(), *fix),
            _ => return None,
        };
        let eligibility = classify_distance(fix.distance_meters, allowed_meters);
        self.state = match eligibility {
            Eligibility::Eligible => CheckInState::Eligible { lecture, fix },
            _ => CheckInState::OutOfRange { lecture, fix },
        };
        Some(eligibility)
    }

    pub fn blocking_reason(&self, allowed_meters: f64) -> Option<Refusal> {
        match &self.state {
            CheckInState::NoLecture => Some(Refusal::NoLectureSelected),
            CheckInState::Locating { .. } => Some(Refusal::LocationUnknown),
            CheckInState::LocationUnavailable { reason, .. } => {
                Some(Refusal::LocationUnavailable(*reason))
            }
            CheckInState::AlreadyCheckedIn { .. } | CheckInState::CheckedIn { .. } => {
                Some(Refusal::AlreadyCheckedIn)
            }
            CheckInState::CheckInInFlight { .. } => Some(Refusal::InFlight),
            CheckInState::OutOfRange { fix, .. } => Some(Refusal::OutOfRange {
                distance_meters: fix.distance_meters,
                allowed_meters,
            }),
            CheckInState::LocationKnown { .. }
            | CheckInState::Eligible { .. }
            | CheckInState::CheckInFailed { .. } => None,
        }
    }

    pub fn begin_write(
        &mut self,
        allowed_meters: f64,
        now: NaiveDateTime,
    ) -> Result<PendingWrite, Refusal> {
        if let Some(reason) = self.blocking_reason(allowed_meters) {
            return Err(reason);
        }
        if self.lecture_ended(now) {
            return Err(Refusal::LectureEnded);
        }
        if self.classify(allowed_meters) != Some(Eligibility::Eligible) {
            return Err(self
                .blocking_reason(allowed_meters)
                .unwrap_or(Refusal::LocationUnknown));
        }
        let CheckInState::Eligible { lecture, fix } = &self.state else {
            return Err(Refusal::LocationUnknown);
        };
        let pending = PendingWrite {
            student_id: self.student_id.clone(),
            lecture_id: lecture.id.clone(),
            coordinate: fix.coordinate,
            requested_at: now,
        };
        self.state = CheckInState::CheckInInFlight {
            lecture: lecture.clone(),
            fix: *fix,
        };
        Ok(pending)
    }

    pub fn finish_write(&mut self, result: &Result<CheckInRecord, WriteError>) {
        let CheckInState::CheckInInFlight { lecture, fix } = &self.state else {
            return;
        };
        self.state = match result {
            Ok(record) => CheckInState::CheckedIn {
                lecture: lecture.clone(),
                record: record.clone(),
            },
            Err(error) => CheckInState::CheckInFailed {
                lecture: lecture.clone(),
                fix: *fix,
                error: error.clone(),
            },
        };
    }
}

/// Refreshes the session against the store and classifies it. Repeating this
/// without a write in between yields the same answer. Once the lecture has
/// ended only an existing record is still reported.
pub fn evaluate<S: AttendanceStore + ?Sized>(
    session: &mut CheckInSession,
    store: &S,
    policy: &CheckInPolicy,
    now: NaiveDateTime,
) -> Result<Eligibility, Refusal> {
    session.expire(now);
    if let Some(lecture_id) = session.state().lecture().map(|l| l.id.clone()) {
        let exists = store
            .exists(session.student_id(), &lecture_id)
            .map_err(|e| Refusal::StoreUnavailable(e.to_string()))?;
        session.observe_existing(exists);
    }
    if !session.holds_record() && session.lecture_ended(now) {
        return Err(Refusal::LectureEnded);
    }
    match session.classify(policy.allowed_distance_meters) {
        Some(eligibility) => Ok(eligibility),
        None => Err(session
            .blocking_reason(policy.allowed_distance_meters)
            .unwrap_or(Refusal::LocationUnknown)),
    }
}

/// Runs every guard, then issues the keyed write. A failed write is followed by
/// an existence re-check so a record created by a racing client surfaces as
/// `AlreadyCheckedIn` rather than as a fresh failure.
pub fn submit<S: AttendanceStore + ?Sized>(
    session: &mut CheckInSession,
    store: &S,
    policy: &CheckInPolicy,
    now: NaiveDateTime,
) -> Result<CheckInRecord, Refusal> {
    match evaluate(session, store, policy, now)? {
        Eligibility::Eligible => {}
        Eligibility::AlreadyCheckedIn => return Err(Refusal::AlreadyCheckedIn),
        Eligibility::OutOfRange => {
            return Err(session
                .blocking_reason(policy.allowed_distance_meters)
                .unwrap_or(Refusal::LocationUnknown))
        }
    }

    let pending = session.begin_write(policy.allowed_distance_meters, now)?;
    let result = store.create(&pending);
    session.finish_write(&result);
    let error = match result {
        Ok(record) => return Ok(record),
        Err(error) => error,
    };

    match store.exists(&pending.student_id, &pending.lecture_id) {
        Ok(true) => {
            session.observe_existing(true);
            Err(Refusal::AlreadyCheckedIn)
        }
        Ok(false) => Err(match error {
            WriteError::Conflict => Refusal::WriteConflict,
            WriteError::Failed(msg) => Refusal::WriteFailed(msg),
        }),
        Err(e) => Err(Refusal::StoreUnavailable(e.to_string())),
    }
}

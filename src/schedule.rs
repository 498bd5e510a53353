use crate::geo::Coordinate;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use std::fmt;

/// Wall-clock time of day at minute resolution. `24:00` is allowed as a window end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

const MINUTES_PER_DAY: u16 = 24 * 60;

impl ClockTime {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        let total = hour * 60 + minute;
        if total > MINUTES_PER_DAY as u32 {
            return None;
        }
        Some(Self(total as u16))
    }

    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let bad = || ScheduleError::BadClockTime(raw.to_string());
        let (h, m) = raw.trim().split_once(':').ok_or_else(bad)?;
        if h.is_empty() || m.len() != 2 {
            return Err(bad());
        }
        let hour = h.parse::<u32>().map_err(|_| bad())?;
        let minute = m.parse::<u32>().map_err(|_| bad())?;
        Self::from_hm(hour, minute).ok_or_else(bad)
    }

    /// Truncates seconds.
    pub fn of(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Half-open `[start, end)` window within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeWindow {
    pub fn new(start: ClockTime, end: ClockTime) -> Result<Self, ScheduleError> {
        if end <= start {
            return Err(ScheduleError::EmptyWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: ClockTime) -> bool {
        self.start <= t && t < self.end
    }

    fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleError {
    BadClockTime(String),
    BadWeekday(String),
    EmptyWindow {
        start: ClockTime,
        end: ClockTime,
    },
    Overlap {
        day: Weekday,
        slot_id: String,
        window: TimeWindow,
        conflicting_slot_id: String,
        conflicting_window: TimeWindow,
    },
}

impl ScheduleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadClockTime(_) | Self::BadWeekday(_) | Self::EmptyWindow { .. } => "bad_params",
            Self::Overlap { .. } => "schedule_conflict",
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadClockTime(raw) => write!(f, "time must be HH:MM, got {:?}", raw),
            Self::BadWeekday(raw) => write!(f, "unknown day {:?}", raw),
            Self::EmptyWindow { start, end } => {
                write!(f, "window end {} must be after start {}", end, start)
            }
            Self::Overlap {
                day,
                slot_id,
                window,
                conflicting_slot_id,
                conflicting_window,
            } => write!(
                f,
                "{} {} ({}) overlaps {} ({})",
                weekday_name(*day),
                window,
                slot_id,
                conflicting_window,
                conflicting_slot_id
            ),
        }
    }
}

impl std::error::Error for ScheduleError {}

pub fn parse_weekday(raw: &str) -> Result<Weekday, ScheduleError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        _ => Err(ScheduleError::BadWeekday(raw.to_string())),
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Weekly recurring lecture definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSlot {
    pub id: String,
    pub day: Weekday,
    pub window: TimeWindow,
    pub course: String,
    pub lecturer: String,
    pub room: String,
    pub location: Coordinate,
}

/// One dated session of a slot. `id` is unique per session.
#[derive(Debug, Clone, PartialEq)]
pub struct Lecture {
    pub id: String,
    pub slot_id: String,
    pub date: NaiveDate,
    pub day: Weekday,
    pub window: TimeWindow,
    pub course: String,
    pub lecturer: String,
    pub room: String,
    pub location: Coordinate,
}

impl Lecture {
    pub fn session_id(slot_id: &str, date: NaiveDate) -> String {
        format!("{}@{}", slot_id, date.format("%Y-%m-%d"))
    }

    /// Inverse of `session_id`.
    pub fn split_session_id(id: &str) -> Option<(&str, NaiveDate)> {
        let (slot_id, date) = id.rsplit_once('@')?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
        Some((slot_id, date))
    }

    fn of_slot(slot: &ScheduleSlot, date: NaiveDate) -> Self {
        Self {
            id: Self::session_id(&slot.id, date),
            slot_id: slot.id.clone(),
            date,
            day: slot.day,
            window: slot.window,
            course: slot.course.clone(),
            lecturer: slot.lecturer.clone(),
            room: slot.room.clone(),
            location: slot.location,
        }
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        clock_on(self.date, self.window.end)
    }
}

fn clock_on(date: NaiveDate, t: ClockTime) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap_or_default() + Duration::minutes(t.minutes() as i64)
}

#[derive(Debug, Clone)]
struct WindowEntry {
    window: TimeWindow,
    slots: Vec<ScheduleSlot>,
}

/// Day-of-week to ordered, non-overlapping windows. Slots sharing an identical
/// window are parallel sections.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    days: [Vec<WindowEntry>; 7],
}

impl Schedule {
    pub fn from_slots(mut slots: Vec<ScheduleSlot>) -> Result<Self, ScheduleError> {
        slots.sort_by(|a, b| {
            (a.day.num_days_from_monday(), a.window.start, a.window.end, &a.id).cmp(&(
                b.day.num_days_from_monday(),
                b.window.start,
                b.window.end,
                &b.id,
            ))
        });

        let mut schedule = Schedule::default();
        for slot in slots {
            let entries = &mut schedule.days[slot.day.num_days_from_monday() as usize];
            if let Some(entry) = entries.iter_mut().find(|e| e.window == slot.window) {
                entry.slots.push(slot);
                continue;
            }
            if let Some(clash) = entries.iter().find(|e| e.window.overlaps(&slot.window)) {
                return Err(ScheduleError::Overlap {
                    day: slot.day,
                    slot_id: slot.id.clone(),
                    window: slot.window,
                    conflicting_slot_id: clash
                        .slots
                        .first()
                        .map(|s| s.id.clone())
                        .unwrap_or_default(),
                    conflicting_window: clash.window,
                });
            }
            // Input is sorted by start, so appending keeps the day ordered.
            entries.push(WindowEntry {
                window: slot.window,
                slots: vec![slot],
            });
        }
        Ok(schedule)
    }

    /// Every lecture whose window contains `now`. Empty when nothing is on.
    pub fn resolve(&self, now: NaiveDateTime) -> Vec<Lecture> {
        let date = now.date();
        let t = ClockTime::of(now.time());
        self.days[date.weekday().num_days_from_monday() as usize]
            .iter()
            .filter(|e| e.window.contains(t))
            .flat_map(|e| e.slots.iter().map(move |s| Lecture::of_slot(s, date)))
            .collect()
    }

    pub fn day(&self, day: Weekday) -> Vec<&ScheduleSlot> {
        self.days[day.num_days_from_monday() as usize]
            .iter()
            .flat_map(|e| e.slots.iter())
            .collect()
    }

    pub fn slots(&self) -> impl Iterator<Item = &ScheduleSlot> {
        self.days.iter().flatten().flat_map(|e| e.slots.iter())
    }

    pub fn slot(&self, slot_id: &str) -> Option<&ScheduleSlot> {
        self.slots().find(|s| s.id == slot_id)
    }

    /// Sessions dated within `[from, to]`, in chronological order.
    pub fn occurrences_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<Lecture> {
        let mut out = Vec::new();
        let mut date = from;
        while date <= to {
            for slot in self.day(date.weekday()) {
                out.push(Lecture::of_slot(slot, date));
            }
            let Some(next) = date.succ_opt() else { break };
            date = next;
        }
        out
    }
}

pub trait ScheduleProvider {
    fn lectures_at(&self, now: NaiveDateTime) -> anyhow::Result<Vec<Lecture>>;
}

impl ScheduleProvider for Schedule {
    fn lectures_at(&self, now: NaiveDateTime) -> anyhow::Result<Vec<Lecture>> {
        Ok(self.resolve(now))
    }
}

/// Looks up a lecture by session id among those running at `now`.
pub fn find_current<P: ScheduleProvider + ?Sized>(
    provider: &P,
    now: NaiveDateTime,
    lecture_id: &str,
) -> anyhow::Result<Option<Lecture>> {
    Ok(provider
        .lectures_at(now)?
        .into_iter()
        .find(|l| l.id == lecture_id))
}

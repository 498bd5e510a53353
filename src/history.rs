use crate::db;
use crate::schedule::{Lecture, Schedule, TimeWindow};
use crate::store::StoredCheckIn;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    /// Inclusive date range. Weeks run Sunday through Saturday.
    pub fn range(self, date: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Self::Daily => (date, date),
            Self::Weekly => {
                let start = date - Duration::days(date.weekday().num_days_from_sunday() as i64);
                (start, start + Duration::days(6))
            }
            Self::Monthly => {
                let first = date.with_day(1).unwrap_or(date);
                let (y, m) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                let last = NaiveDate::from_ymd_opt(y, m, 1)
                    .and_then(|d| d.pred_opt())
                    .unwrap_or(date);
                (first, last)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceFilter {
    All,
    Attended,
    Missed,
}

impl AttendanceFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "attended" => Some(Self::Attended),
            "missed" => Some(Self::Missed),
            _ => None,
        }
    }

    fn wants_attended(self) -> bool {
        matches!(self, Self::All | Self::Attended)
    }

    fn wants_missed(self) -> bool {
        matches!(self, Self::All | Self::Missed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryStatus {
    Attended { checked_in_at: NaiveDateTime },
    Missed,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub lecture_id: String,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub course: String,
    pub lecturer: String,
    pub room: String,
    pub status: EntryStatus,
}

impl HistoryEntry {
    fn of(lecture: Lecture, status: EntryStatus) -> Self {
        Self {
            lecture_id: lecture.id,
            date: lecture.date,
            window: lecture.window,
            course: lecture.course,
            lecturer: lecture.lecturer,
            room: lecture.room,
            status,
        }
    }

    pub fn to_json(&self) -> Value {
        let (status, checked_in_at) = match &self.status {
            EntryStatus::Attended { checked_in_at } => {
                ("attended", Value::String(db::format_timestamp(*checked_in_at)))
            }
            EntryStatus::Missed => ("missed", Value::Null),
        };
        json!({
            "lectureId": self.lecture_id,
            "date": self.date.format("%Y-%m-%d").to_string(),
            "start": self.window.start.to_string(),
            "end": self.window.end.to_string(),
            "course": self.course,
            "lecturer": self.lecturer,
            "room": self.room,
            "status": status,
            "checkedInAt": checked_in_at,
        })
    }
}

pub struct HistoryQuery {
    pub period: Period,
    pub date: NaiveDate,
    pub filter: AttendanceFilter,
    pub registered_on: NaiveDate,
    pub now: NaiveDateTime,
}

/// Attended and missed lectures for one student, ordered by date then start.
pub fn history(schedule: &Schedule, records: &[StoredCheckIn], q: &HistoryQuery) -> Vec<HistoryEntry> {
    let (from, to) = q.period.range(q.date);
    let mut out = Vec::new();

    if q.filter.wants_attended() {
        for r in records {
            if r.lecture_date < from || r.lecture_date > to {
                continue;
            }
            // Slot removed since the check-in; nothing to describe it with.
            let Some(slot) = schedule.slot(&r.slot_id) else {
                continue;
            };
            let lecture = Lecture {
                id: r.record.lecture_id.clone(),
                slot_id: slot.id.clone(),
                date: r.lecture_date,
                day: slot.day,
                window: slot.window,
                course: slot.course.clone(),
                lecturer: slot.lecturer.clone(),
                room: slot.room.clone(),
                location: slot.location,
            };
            out.push(HistoryEntry::of(
                lecture,
                EntryStatus::Attended {
                    checked_in_at: r.record.checked_in_at,
                },
            ));
        }
    }

    if q.filter.wants_missed() {
        let attended: HashSet<&str> = records.iter().map(|r| r.record.lecture_id.as_str()).collect();
        let start = from.max(q.registered_on);
        if start <= to {
            for lecture in schedule.occurrences_between(start, to) {
                if lecture.ends_at() > q.now || attended.contains(lecture.id.as_str()) {
                    continue;
                }
                out.push(HistoryEntry::of(lecture, EntryStatus::Missed));
            }
        }
    }

    out.sort_by(|a, b| {
        (a.date, a.window.start, &a.course, &a.lecture_id).cmp(&(
            b.date,
            b.window.start,
            &b.course,
            &b.lecture_id,
        ))
    });
    out
}

/// Check-ins per lecture date, ascending.
pub fn daily_counts(records: &[StoredCheckIn]) -> Vec<(NaiveDate, usize)> {
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for r in records {
        *counts.entry(r.lecture_date).or_default() += 1;
    }
    counts.into_iter().collect()
}

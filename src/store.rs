use crate::checkin::{AttendanceStore, CheckInRecord, PendingWrite, WriteError};
use crate::db;
use crate::geo::Coordinate;
use crate::schedule::{
    ClockTime, Lecture, Schedule, ScheduleProvider, ScheduleSlot, TimeWindow,
};
use anyhow::{anyhow, Context};
use chrono::{NaiveDate, NaiveDateTime, Weekday};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Deterministic storage key for a (student, lecture) pair.
pub fn conflict_key(student_id: &str, lecture_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(student_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(lecture_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

pub struct SqliteAttendanceStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteAttendanceStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl AttendanceStore for SqliteAttendanceStore<'_> {
    fn exists(&self, student_id: &str, lecture_id: &str) -> anyhow::Result<bool> {
        let hit = self
            .conn
            .query_row(
                "SELECT 1 FROM check_ins WHERE student_id = ? AND lecture_id = ?",
                (student_id, lecture_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn create(&self, write: &PendingWrite) -> Result<CheckInRecord, WriteError> {
        let (slot_id, lecture_date) = match Lecture::split_session_id(&write.lecture_id) {
            Some((slot, date)) => (slot.to_string(), date),
            None => (write.lecture_id.clone(), write.requested_at.date()),
        };
        let changed = self
            .conn
            .execute(
                "INSERT INTO check_ins(
                   id, student_id, lecture_id, slot_id, lecture_date,
                   checked_in_at, latitude, longitude
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT DO NOTHING",
                (
                    conflict_key(&write.student_id, &write.lecture_id),
                    &write.student_id,
                    &write.lecture_id,
                    &slot_id,
                    lecture_date.format("%Y-%m-%d").to_string(),
                    db::format_timestamp(write.requested_at),
                    write.coordinate.latitude(),
                    write.coordinate.longitude(),
                ),
            )
            .map_err(|e| WriteError::Failed(e.to_string()))?;
        if changed == 0 {
            return Err(WriteError::Conflict);
        }
        Ok(CheckInRecord {
            student_id: write.student_id.clone(),
            lecture_id: write.lecture_id.clone(),
            checked_in_at: write.requested_at,
            coordinate: write.coordinate,
        })
    }
}

/// A check-in row together with the slot/date it was taken for.
#[derive(Debug, Clone)]
pub struct StoredCheckIn {
    pub record: CheckInRecord,
    pub slot_id: String,
    pub lecture_date: NaiveDate,
}

pub fn check_ins_for_student(
    conn: &Connection,
    student_id: &str,
) -> anyhow::Result<Vec<StoredCheckIn>> {
    let mut stmt = conn.prepare(
        "SELECT lecture_id, slot_id, lecture_date, checked_in_at, latitude, longitude
         FROM check_ins
         WHERE student_id = ?
         ORDER BY checked_in_at",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, f64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (lecture_id, slot_id, date, at, lat, lon) in rows {
        let lecture_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("bad lecture_date {:?} for {}", date, lecture_id))?;
        let checked_in_at: NaiveDateTime = db::parse_timestamp(&at)
            .ok_or_else(|| anyhow!("bad checked_in_at {:?} for {}", at, lecture_id))?;
        out.push(StoredCheckIn {
            record: CheckInRecord {
                student_id: student_id.to_string(),
                lecture_id,
                checked_in_at,
                coordinate: Coordinate::new(lat, lon)?,
            },
            slot_id,
            lecture_date,
        });
    }
    Ok(out)
}

fn weekday_from_index(i: i64) -> Option<Weekday> {
    match i {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn load_slots(conn: &Connection) -> anyhow::Result<Vec<ScheduleSlot>> {
    let mut stmt = conn.prepare(
        "SELECT id, day, start_minute, end_minute, course, lecturer, room, latitude, longitude
         FROM schedule_slots
         ORDER BY day, start_minute, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, f64>(7)?,
                r.get::<_, f64>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut slots = Vec::with_capacity(rows.len());
    for (id, day, start, end, course, lecturer, room, lat, lon) in rows {
        let day = weekday_from_index(day).ok_or_else(|| anyhow!("slot {} has bad day {}", id, day))?;
        let clock = |m: i64| {
            ClockTime::from_hm((m / 60) as u32, (m % 60) as u32)
                .ok_or_else(|| anyhow!("slot {} has bad minute {}", id, m))
        };
        let window = TimeWindow::new(clock(start)?, clock(end)?)?;
        slots.push(ScheduleSlot {
            day,
            window,
            course,
            lecturer,
            room,
            location: Coordinate::new(lat, lon)?,
            id,
        });
    }
    Ok(slots)
}

pub fn load_schedule(conn: &Connection) -> anyhow::Result<Schedule> {
    Ok(Schedule::from_slots(load_slots(conn)?)?)
}

pub fn upsert_slot(conn: &Connection, slot: &ScheduleSlot) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO schedule_slots(
           id, day, start_minute, end_minute, course, lecturer, room, latitude, longitude
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           day = excluded.day,
           start_minute = excluded.start_minute,
           end_minute = excluded.end_minute,
           course = excluded.course,
           lecturer = excluded.lecturer,
           room = excluded.room,
           latitude = excluded.latitude,
           longitude = excluded.longitude",
        (
            &slot.id,
            slot.day.num_days_from_monday() as i64,
            slot.window.start.minutes() as i64,
            slot.window.end.minutes() as i64,
            &slot.course,
            &slot.lecturer,
            &slot.room,
            slot.location.latitude(),
            slot.location.longitude(),
        ),
    )?;
    Ok(())
}

pub fn delete_slot(conn: &Connection, slot_id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM schedule_slots WHERE id = ?", [slot_id])?;
    Ok(n > 0)
}

/// Reads the schedule from the workspace on every lookup.
pub struct SqliteSchedule<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSchedule<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ScheduleProvider for SqliteSchedule<'_> {
    fn lectures_at(&self, now: NaiveDateTime) -> anyhow::Result<Vec<Lecture>> {
        Ok(load_schedule(self.conn)?.resolve(now))
    }
}

use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendanceStats {
    pub pending: i64,
    pub verified: i64,
    pub rejected: i64,
    pub total_check_ins: i64,
    pub by_course: Vec<(String, i64)>,
    pub by_day: Vec<(String, i64)>,
}

impl AttendanceStats {
    pub fn to_json(&self) -> Value {
        json!({
            "students": {
                "pending": self.pending,
                "verified": self.verified,
                "rejected": self.rejected,
            },
            "totalCheckIns": self.total_check_ins,
            "byCourse": self.by_course.iter().map(|(course, count)| json!({
                "course": course,
                "count": count,
            })).collect::<Vec<_>>(),
            "byDay": self.by_day.iter().map(|(date, count)| json!({
                "date": date,
                "count": count,
            })).collect::<Vec<_>>(),
        })
    }
}

fn date_bound(d: Option<NaiveDate>, fallback: &str) -> String {
    d.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Student counts by verification status, and check-ins dated within `[from, to]`.
pub fn collect(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> anyhow::Result<AttendanceStats> {
    let mut stats = AttendanceStats::default();

    let mut stmt = conn.prepare(
        "SELECT verification_status, COUNT(*) FROM accounts
         WHERE role = 'student'
         GROUP BY verification_status",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (status, count) in rows {
        match status.as_str() {
            "pending" => stats.pending = count,
            "verified" => stats.verified = count,
            "rejected" => stats.rejected = count,
            other => log::warn!("unexpected verification status {:?}", other),
        }
    }

    let from = date_bound(from, "0000-01-01");
    let to = date_bound(to, "9999-12-31");

    stats.total_check_ins = conn.query_row(
        "SELECT COUNT(*) FROM check_ins WHERE lecture_date >= ? AND lecture_date <= ?",
        (&from, &to),
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT COALESCE(s.course, ''), COUNT(*)
         FROM check_ins c
         LEFT JOIN schedule_slots s ON s.id = c.slot_id
         WHERE c.lecture_date >= ? AND c.lecture_date <= ?
         GROUP BY 1
         ORDER BY 2 DESC, 1",
    )?;
    stats.by_course = stmt
        .query_map((&from, &to), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT lecture_date, COUNT(*) FROM check_ins
         WHERE lecture_date >= ? AND lecture_date <= ?
         GROUP BY lecture_date
         ORDER BY lecture_date",
    )?;
    stats.by_day = stmt
        .query_map((&from, &to), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(stats)
}

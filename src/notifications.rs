use crate::db;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

pub const DEFAULT_LIST_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub created_at: NaiveDateTime,
    pub read: bool,
}

impl Notification {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "message": self.message,
            "createdAt": db::format_timestamp(self.created_at),
            "read": self.read,
        })
    }
}

pub fn create(
    conn: &Connection,
    user_id: &str,
    message: &str,
    now: NaiveDateTime,
) -> anyhow::Result<Notification> {
    let n = Notification {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        message: message.to_string(),
        created_at: now,
        read: false,
    };
    conn.execute(
        "INSERT INTO notifications(id, user_id, message, created_at, read) VALUES(?, ?, ?, ?, 0)",
        (&n.id, &n.user_id, &n.message, db::format_timestamp(n.created_at)),
    )?;
    Ok(n)
}

/// Newest first, plus the user's total unread count.
pub fn list(
    conn: &Connection,
    user_id: &str,
    limit: usize,
) -> anyhow::Result<(Vec<Notification>, usize)> {
    let mut stmt = conn.prepare(
        "SELECT id, message, created_at, read FROM notifications
         WHERE user_id = ?
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map((user_id, limit as i64), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, message, created_at, read) in rows {
        let Some(created_at) = db::parse_timestamp(&created_at) else {
            log::warn!("skipping notification {} with bad timestamp", id);
            continue;
        };
        out.push(Notification {
            id,
            user_id: user_id.to_string(),
            message,
            created_at,
            read: read != 0,
        });
    }

    let unread: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read = 0",
        [user_id],
        |r| r.get(0),
    )?;
    Ok((out, unread.max(0) as usize))
}

/// Returns false when the notification does not belong to the user.
pub fn mark_read(conn: &Connection, user_id: &str, notification_id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ? AND user_id = ?",
        (notification_id, user_id),
    )?;
    Ok(changed > 0)
}

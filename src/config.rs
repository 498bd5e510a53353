use crate::db;
use crate::geo::Coordinate;
use chrono::Duration;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const DEFAULT_ALLOWED_DISTANCE_METERS: f64 = 100.0;
pub const DEFAULT_LOCATION_TIMEOUT_SECONDS: i64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    CheckIn,
    Campus,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::CheckIn, SetupSection::Campus];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "checkIn" => Some(Self::CheckIn),
            "campus" => Some(Self::Campus),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CheckIn => "checkIn",
            Self::Campus => "campus",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::CheckIn => "setup.checkIn",
            Self::Campus => "setup.campus",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::CheckIn => json!({
            "allowedDistanceMeters": DEFAULT_ALLOWED_DISTANCE_METERS,
            "locationTimeoutSeconds": DEFAULT_LOCATION_TIMEOUT_SECONDS
        }),
        SetupSection::Campus => json!({
            "name": "Main Campus",
            "latitude": 0.6124352,
            "longitude": 32.4762159
        }),
    }
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !n.is_finite() || n < min || n > max {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::CheckIn => match k.as_str() {
                "allowedDistanceMeters" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 1.0, 10_000.0)?));
                }
                "locationTimeoutSeconds" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 600)?));
                }
                _ => return Err(format!("unknown checkIn field: {}", k)),
            },
            SetupSection::Campus => match k.as_str() {
                "name" => {
                    let s = parse_string_max(v, k, 120)?;
                    if s.is_empty() {
                        return Err("name must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "latitude" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, -90.0, 90.0)?));
                }
                "longitude" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_f64_range(v, k, -180.0, 180.0)?),
                    );
                }
                _ => return Err(format!("unknown campus field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed stored value must not block reads.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                log::warn!("ignoring stored {} settings: {}", section.name(), msg);
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckInPolicy {
    pub allowed_distance_meters: f64,
    pub location_timeout_seconds: i64,
}

impl Default for CheckInPolicy {
    fn default() -> Self {
        Self {
            allowed_distance_meters: DEFAULT_ALLOWED_DISTANCE_METERS,
            location_timeout_seconds: DEFAULT_LOCATION_TIMEOUT_SECONDS,
        }
    }
}

impl CheckInPolicy {
    pub fn from_section(v: &Value) -> Self {
        let d = Self::default();
        Self {
            allowed_distance_meters: v
                .get("allowedDistanceMeters")
                .and_then(|x| x.as_f64())
                .unwrap_or(d.allowed_distance_meters),
            location_timeout_seconds: v
                .get("locationTimeoutSeconds")
                .and_then(|x| x.as_i64())
                .unwrap_or(d.location_timeout_seconds),
        }
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        Ok(Self::from_section(&load_section(conn, SetupSection::CheckIn)?))
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::seconds(self.location_timeout_seconds)
    }
}

/// Coordinate used for slots created without one.
pub fn campus_location(conn: &Connection) -> anyhow::Result<Coordinate> {
    let campus = load_section(conn, SetupSection::Campus)?;
    let lat = campus.get("latitude").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let lon = campus.get("longitude").and_then(|v| v.as_f64()).unwrap_or(0.0);
    Ok(Coordinate::new(lat, lon)?)
}

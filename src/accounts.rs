use crate::db;
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Admin => "admin",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub course: String,
    pub year: String,
    pub status: VerificationStatus,
    pub created_at: NaiveDateTime,
}

impl Account {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "role": self.role.as_str(),
            "course": self.course,
            "year": self.year,
            "verificationStatus": self.status.as_str(),
            "createdAt": db::format_timestamp(self.created_at),
        })
    }
}

#[derive(Debug)]
pub enum AccountError {
    Invalid(String),
    EmailTaken,
    NotFound,
    Forbidden,
    NotVerified(VerificationStatus),
    AdminExists,
    Db(anyhow::Error),
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "bad_params",
            Self::EmailTaken => "email_taken",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::NotVerified(_) => "not_verified",
            Self::AdminExists => "admin_exists",
            Self::Db(_) => "db_query_failed",
        }
    }
}

impl fmt::Display for AccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "{}", msg),
            Self::EmailTaken => write!(f, "an account with this email already exists"),
            Self::NotFound => write!(f, "account not found"),
            Self::Forbidden => write!(f, "administrator access required"),
            Self::NotVerified(status) => {
                write!(f, "account is {}; an administrator must approve it first", status.as_str())
            }
            Self::AdminExists => write!(f, "an administrator already exists"),
            Self::Db(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AccountError {}

impl From<anyhow::Error> for AccountError {
    fn from(e: anyhow::Error) -> Self {
        Self::Db(e)
    }
}

impl From<rusqlite::Error> for AccountError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Db(e.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub course: String,
    pub year: String,
}

fn clean_field(raw: &str, key: &str, max_len: usize, required: bool) -> Result<String, AccountError> {
    let s = raw.trim();
    if required && s.is_empty() {
        return Err(AccountError::Invalid(format!("{} must not be empty", key)));
    }
    if s.chars().count() > max_len {
        return Err(AccountError::Invalid(format!(
            "{} length must be <= {}",
            key, max_len
        )));
    }
    Ok(s.to_string())
}

fn clean_email(raw: &str) -> Result<String, AccountError> {
    let email = clean_field(raw, "email", 200, true)?.to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(AccountError::Invalid("email is not valid".into()));
    }
    Ok(email)
}

const ACCOUNT_COLUMNS: &str =
    "id, name, email, role, course, year, verification_status, created_at";

fn row_to_account(r: &rusqlite::Row<'_>) -> rusqlite::Result<(Account, String, String, String)> {
    let role: String = r.get(3)?;
    let status: String = r.get(6)?;
    let created_at: String = r.get(7)?;
    Ok((
        Account {
            id: r.get(0)?,
            name: r.get(1)?,
            email: r.get(2)?,
            role: Role::Student,
            course: r.get(4)?,
            year: r.get(5)?,
            status: VerificationStatus::Pending,
            created_at: NaiveDateTime::default(),
        },
        role,
        status,
        created_at,
    ))
}

fn finish_account(raw: (Account, String, String, String)) -> anyhow::Result<Account> {
    let (mut account, role, status, created_at) = raw;
    account.role = Role::parse(&role)
        .ok_or_else(|| anyhow::anyhow!("account {} has unknown role {:?}", account.id, role))?;
    account.status = VerificationStatus::parse(&status).ok_or_else(|| {
        anyhow::anyhow!("account {} has unknown status {:?}", account.id, status)
    })?;
    account.created_at = db::parse_timestamp(&created_at).ok_or_else(|| {
        anyhow::anyhow!("account {} has bad created_at {:?}", account.id, created_at)
    })?;
    Ok(account)
}

pub fn get(conn: &Connection, id: &str) -> anyhow::Result<Option<Account>> {
    let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
    let raw = conn.query_row(&sql, [id], row_to_account).optional()?;
    raw.map(finish_account).transpose()
}

pub fn require(conn: &Connection, id: &str) -> Result<Account, AccountError> {
    get(conn, id)?.ok_or(AccountError::NotFound)
}

pub fn require_admin(conn: &Connection, id: &str) -> Result<Account, AccountError> {
    let account = get(conn, id)?.ok_or(AccountError::Forbidden)?;
    if account.role != Role::Admin || account.status != VerificationStatus::Verified {
        return Err(AccountError::Forbidden);
    }
    Ok(account)
}

pub fn require_verified_student(conn: &Connection, id: &str) -> Result<Account, AccountError> {
    let account = require(conn, id)?;
    if account.role != Role::Student {
        return Err(AccountError::Invalid("only students check in".into()));
    }
    if account.status != VerificationStatus::Verified {
        return Err(AccountError::NotVerified(account.status));
    }
    Ok(account)
}

fn insert(
    conn: &Connection,
    reg: &Registration,
    role: Role,
    status: VerificationStatus,
    now: NaiveDateTime,
) -> Result<Account, AccountError> {
    let name = clean_field(&reg.name, "name", 120, true)?;
    let email = clean_email(&reg.email)?;
    let course = clean_field(&reg.course, "course", 120, role == Role::Student)?;
    let year = clean_field(&reg.year, "year", 16, role == Role::Student)?;

    let taken = conn
        .query_row("SELECT 1 FROM accounts WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if taken {
        return Err(AccountError::EmailTaken);
    }

    let account = Account {
        id: Uuid::new_v4().to_string(),
        name,
        email,
        role,
        course,
        year,
        status,
        created_at: now,
    };
    conn.execute(
        "INSERT INTO accounts(id, name, email, role, course, year, verification_status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &account.id,
            &account.name,
            &account.email,
            account.role.as_str(),
            &account.course,
            &account.year,
            account.status.as_str(),
            db::format_timestamp(account.created_at),
        ),
    )?;
    Ok(account)
}

/// New students wait in the verification queue.
pub fn register_student(
    conn: &Connection,
    reg: &Registration,
    now: NaiveDateTime,
) -> Result<Account, AccountError> {
    let account = insert(conn, reg, Role::Student, VerificationStatus::Pending, now)?;
    log::info!("registered student {} (pending)", account.id);
    Ok(account)
}

/// Creates the first administrator. Refused once any admin exists.
pub fn bootstrap_admin(
    conn: &Connection,
    reg: &Registration,
    now: NaiveDateTime,
) -> Result<Account, AccountError> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM accounts WHERE role = 'admin'",
        [],
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Err(AccountError::AdminExists);
    }
    let account = insert(conn, reg, Role::Admin, VerificationStatus::Verified, now)?;
    log::info!("bootstrapped administrator {}", account.id);
    Ok(account)
}

pub fn list_pending(conn: &Connection) -> anyhow::Result<Vec<Account>> {
    let sql = format!(
        "SELECT {} FROM accounts
         WHERE verification_status = 'pending' AND role = 'student'
         ORDER BY created_at, name",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map([], row_to_account)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(finish_account).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

pub fn set_verification(
    conn: &Connection,
    user_id: &str,
    verdict: Verdict,
) -> Result<Account, AccountError> {
    let mut account = require(conn, user_id)?;
    if account.role != Role::Student {
        return Err(AccountError::Invalid("only student accounts are verified".into()));
    }
    account.status = match verdict {
        Verdict::Approve => VerificationStatus::Verified,
        Verdict::Reject => VerificationStatus::Rejected,
    };
    conn.execute(
        "UPDATE accounts SET verification_status = ? WHERE id = ?",
        (account.status.as_str(), &account.id),
    )?;
    log::info!("account {} is now {}", account.id, account.status.as_str());
    Ok(account)
}

pub fn update_profile(
    conn: &Connection,
    user_id: &str,
    patch: &Map<String, Value>,
) -> Result<Account, AccountError> {
    let mut account = require(conn, user_id)?;
    for (k, v) in patch {
        let s = v
            .as_str()
            .ok_or_else(|| AccountError::Invalid(format!("{} must be string", k)))?;
        match k.as_str() {
            "name" => account.name = clean_field(s, k, 120, true)?,
            "course" => account.course = clean_field(s, k, 120, false)?,
            "year" => account.year = clean_field(s, k, 16, false)?,
            _ => return Err(AccountError::Invalid(format!("unknown profile field: {}", k))),
        }
    }
    conn.execute(
        "UPDATE accounts SET name = ?, course = ?, year = ? WHERE id = ?",
        (&account.name, &account.course, &account.year, &account.id),
    )?;
    Ok(account)
}

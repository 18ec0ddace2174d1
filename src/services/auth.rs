use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use axum::http::HeaderMap;
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const SESSION_USER_HEADER: &str = "x-session-user";
pub const SESSION_ROLE_HEADER: &str = "x-session-role";
pub const SESSION_ISSUED_HEADER: &str = "x-session-issued-at";

const LOGIN_LOG_HEADER: [&str; 3] = ["Username", "Login Time", "Role"];
const LOGIN_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Analyst,
    Viewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Analyst => "analyst",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "analyst" => Some(Role::Analyst),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn can_profile(self) -> bool {
        matches!(self, Role::Admin | Role::Analyst)
    }

    pub fn can_view_audit(self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub password: String,
    pub role: Role,
}

/// Injected credential policy: a username → {password, role} table loaded
/// from a JSON file named in config. A development-grade placeholder, not a
/// security boundary; swapping the file swaps the policy without touching
/// any handler.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, Credential>,
}

impl CredentialStore {
    pub fn from_users(users: HashMap<String, Credential>) -> Self {
        Self { users }
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            tracing::warn!("no credentials file configured; all logins will be rejected");
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading credentials file {path:?}: {e}"))?;
        let users: HashMap<String, Credential> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing credentials file {path:?}: {e}"))?;
        tracing::info!(users = users.len(), "loaded credential table");
        Ok(Self::from_users(users))
    }

    pub fn verify(&self, username: &str, password: &str) -> Option<Role> {
        self.users
            .get(username)
            .filter(|c| c.password == password)
            .map(|c| c.role)
    }
}

/// Explicit per-request session: issued by login, echoed back by the caller
/// on every request. Replaces the original's process-global session state.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user: String,
    pub role: Role,
    pub issued_at: String,
}

impl Session {
    pub fn issue(user: String, role: Role) -> Self {
        Self {
            user,
            role,
            issued_at: Local::now().format(LOGIN_TIME_FORMAT).to_string(),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let user = header_value(headers, SESSION_USER_HEADER)?;
        let role_raw = header_value(headers, SESSION_ROLE_HEADER)?;
        let role = Role::parse(&role_raw)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown session role '{role_raw}'")))?;
        let issued_at = headers
            .get(SESSION_ISSUED_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            user,
            role,
            issued_at,
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidInput(format!("missing session header '{name}'")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRecord {
    pub username: String,
    pub login_time: String,
    pub role: String,
}

/// Append-only audit trail of successful logins. The file is only ever
/// opened for append, so interleaved writers cannot truncate prior rows.
/// Writes are a best-effort side effect and never fail the login.
#[derive(Debug, Clone)]
pub struct LoginLog {
    path: PathBuf,
}

impl LoginLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn record(&self, session: &Session) {
        if let Err(e) = self.append(session) {
            tracing::warn!(path = %self.path.display(), "login audit write failed: {e}");
        }
    }

    fn append(&self, session: &Session) -> anyhow::Result<()> {
        let needs_header = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(LOGIN_LOG_HEADER)?;
        }
        writer.write_record([
            session.user.as_str(),
            session.issued_at.as_str(),
            session.role.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<LoginRecord>, AppError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .map_err(|e| AppError::Internal(format!("opening login log: {e}")))?;
        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| AppError::Internal(format!("reading login log: {e}")))?;
            records.push(LoginRecord {
                username: row.get(0).unwrap_or_default().to_string(),
                login_time: row.get(1).unwrap_or_default().to_string(),
                role: row.get(2).unwrap_or_default().to_string(),
            });
        }
        Ok(records)
    }
}

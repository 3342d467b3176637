use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::MetadataStore;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    Local,
    Github,
}

/// A principal known to the registry. Credentials are checked elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: UserKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

const USERS_NAMESPACE: &str = "users";

fn decode(username: &str, raw: &str) -> AppResult<User> {
    serde_json::from_str(raw).map_err(|e| AppError::StoreCorruption {
        namespace: USERS_NAMESPACE.to_string(),
        key: username.to_string(),
        reason: e.to_string(),
    })
}

impl MetadataStore {
    /// Insert or replace a user record.
    pub fn create_user(&self, user: &User) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, record) VALUES (?1, ?2)
             ON CONFLICT(username) DO UPDATE SET record = excluded.record",
            params![user.username, serde_json::to_string(user)?],
        )?;
        info!(username = %user.username, role = ?user.role, "stored user");
        Ok(())
    }

    pub fn get_user(&self, username: &str) -> AppResult<User> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT record FROM users WHERE username = ?1",
                [username],
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => decode(username, &raw),
            None => Err(AppError::NotFound(format!("user {username} not found"))),
        }
    }

    pub fn list_users(&self) -> AppResult<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT username, record FROM users ORDER BY username")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        let mut users = Vec::new();
        for row in rows {
            let (username, raw) = row?;
            users.push(decode(&username, &raw)?);
        }
        Ok(users)
    }

    /// Returns whether a record was removed.
    pub fn delete_user(&self, username: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM users WHERE username = ?1", [username])?;
        Ok(removed > 0)
    }
}

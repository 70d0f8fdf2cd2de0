use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use uuid::Uuid;

use crate::db::Database;
use crate::error::GatewayError;

/// Stored user record with its quota state.
///
/// `budget = None` means unlimited; `remaining` is then also `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub budget: Option<f64>,
    pub remaining: Option<f64>,
    pub created_at: String,
}

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            budget: row.get(2)?,
            remaining: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

const USER_COLUMNS: &str = "id, name, budget, remaining, created_at";

/// Create a user. A finite budget starts with `remaining` equal to it.
pub fn create_user(db: &Database, name: &str, budget: Option<f64>) -> Result<User, GatewayError> {
    if budget.is_some_and(|b| b < 0.0 || !b.is_finite()) {
        return Err(GatewayError::InvalidRequest(format!(
            "Invalid budget for '{name}': must be a non-negative number"
        )));
    }

    let id = Uuid::new_v4().to_string();
    let user = db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO users (id, name, budget, remaining) VALUES (?1, ?2, ?3, ?3)",
            params![id, name, budget],
        )?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            User::from_row,
        )
    })?;

    tracing::info!(user_id = %user.id, name = %user.name, budget = ?user.budget, "User created");
    Ok(user)
}

/// Look up a user by id.
pub fn get_user(db: &Database, user_id: &str) -> Result<Option<User>, GatewayError> {
    let user = db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![user_id],
            User::from_row,
        )
        .optional()
    })?;
    Ok(user)
}

/// Set a user's budget and reset `remaining` to it. `None` makes the user
/// unlimited.
pub fn set_budget(db: &Database, user_id: &str, budget: Option<f64>) -> Result<User, GatewayError> {
    let updated = db.with_conn(|conn| {
        conn.execute(
            "UPDATE users SET budget = ?1, remaining = ?1 WHERE id = ?2",
            params![budget, user_id],
        )
    })?;
    if updated == 0 {
        return Err(GatewayError::UserNotFound(user_id.to_string()));
    }

    tracing::info!(user_id = %user_id, budget = ?budget, "User budget set");
    get_user(db, user_id)?.ok_or_else(|| GatewayError::UserNotFound(user_id.to_string()))
}

pub fn list_users(db: &Database) -> Result<Vec<User>, GatewayError> {
    let users = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, name"))?;
        let rows = stmt.query_map([], User::from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
    })?;
    Ok(users)
}

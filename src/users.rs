use crate::error::{Error, Result};
use crate::model::User;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Insert a user row for an externally issued identity. Called by the
/// account collaborator when a profile is provisioned.
pub fn create_user(conn: &Connection, id: Uuid, display_name: &str) -> Result<User> {
    let res = conn.execute(
        "INSERT INTO users (id, display_name, is_online, last_seen) VALUES (?1, ?2, 0, NULL)",
        params![id.to_string(), display_name],
    );
    match res {
        Ok(_) => Ok(User {
            id,
            display_name: display_name.into(),
            is_online: false,
            last_seen: None,
        }),
        Err(e) => {
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) {
                Err(Error::Conflict("user already exists"))
            } else {
                Err(e.into())
            }
        }
    }
}

pub fn user_exists(conn: &Connection, id: Uuid) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn get_user(conn: &Connection, id: Uuid) -> Result<User> {
    let user = conn
        .query_row(
            "SELECT id, display_name, is_online, last_seen FROM users WHERE id = ?1",
            [id.to_string()],
            row_to_user,
        )
        .optional()?;
    user.ok_or(Error::NotFound("user"))
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
        display_name: row.get(1)?,
        is_online: row.get::<_, i64>(2)? != 0,
        last_seen: row.get(3)?,
    })
}

/// Atomically update both presence fields for a user.
pub fn set_presence(conn: &Connection, id: Uuid, is_online: bool, at: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
        params![id.to_string(), is_online as i64, at],
    )?;
    if changed == 0 {
        return Err(Error::NotFound("user"));
    }
    Ok(())
}

/// Mark every user offline. Run once at startup so a crash cannot leave
/// stale online flags behind.
pub fn reset_presence(conn: &Connection) -> Result<usize> {
    let changed = conn.execute("UPDATE users SET is_online = 0", [])?;
    Ok(changed)
}

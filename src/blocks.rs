use crate::db;
use crate::error::{Error, Result};
use crate::model::Block;
use crate::users;
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Persist a block edge. Re-blocking is idempotent, matching the like
/// policy: the original row survives.
pub fn create_block(conn: &Connection, blocker_id: Uuid, blocked_id: Uuid) -> Result<Block> {
    if blocker_id == blocked_id {
        return Err(Error::InvalidArgument("cannot block yourself"));
    }
    if !users::user_exists(conn, blocker_id)? || !users::user_exists(conn, blocked_id)? {
        return Err(Error::NotFound("user"));
    }
    conn.execute(
        "INSERT OR IGNORE INTO blocks (id, blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            Uuid::new_v4().to_string(),
            blocker_id.to_string(),
            blocked_id.to_string(),
            db::now_millis()
        ],
    )?;
    let block = conn.query_row(
        "SELECT id, created_at FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
        params![blocker_id.to_string(), blocked_id.to_string()],
        |row| {
            Ok(Block {
                id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
                blocker_id,
                blocked_id,
                created_at: row.get(1)?,
            })
        },
    )?;
    Ok(block)
}

/// Delete a block edge. Returns whether the edge existed.
pub fn remove_block(conn: &Connection, blocker_id: Uuid, blocked_id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
        params![blocker_id.to_string(), blocked_id.to_string()],
    )?;
    Ok(changed > 0)
}

/// True when a block exists in either direction between the two users.
/// Messaging is suppressed both ways once either party blocks the other.
pub fn block_exists_between(conn: &Connection, a: Uuid, b: Uuid) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM blocks \
         WHERE (blocker_id = ?1 AND blocked_id = ?2) OR (blocker_id = ?2 AND blocked_id = ?1)",
        params![a.to_string(), b.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(conn: &Connection) -> (Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        users::create_user(conn, a, "a").unwrap();
        users::create_user(conn, b, "b").unwrap();
        (a, b)
    }

    #[test]
    fn block_both_directions_and_unblock() {
        let conn = db::init_db(":memory:").unwrap();
        let (a, b) = seed(&conn);
        assert!(!block_exists_between(&conn, a, b).unwrap());
        let block = create_block(&conn, a, b).unwrap();
        assert_eq!(create_block(&conn, a, b).unwrap(), block);
        assert!(block_exists_between(&conn, a, b).unwrap());
        assert!(block_exists_between(&conn, b, a).unwrap());
        assert!(remove_block(&conn, a, b).unwrap());
        assert!(!remove_block(&conn, a, b).unwrap());
        assert!(!block_exists_between(&conn, a, b).unwrap());
    }

    #[test]
    fn block_rejects_self_and_unknown() {
        let conn = db::init_db(":memory:").unwrap();
        let (a, _) = seed(&conn);
        assert!(matches!(
            create_block(&conn, a, a),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            create_block(&conn, a, Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }
}

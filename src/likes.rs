use crate::db;
use crate::error::{Error, Result};
use crate::model::Like;
use crate::users;
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Persist a like edge. Re-liking is idempotent: the original row and its
/// id survive and are returned.
pub fn record_like(conn: &Connection, liker_id: Uuid, liked_id: Uuid) -> Result<Like> {
    if liker_id == liked_id {
        return Err(Error::InvalidArgument("cannot like yourself"));
    }
    if !users::user_exists(conn, liker_id)? || !users::user_exists(conn, liked_id)? {
        return Err(Error::NotFound("user"));
    }
    conn.execute(
        "INSERT OR IGNORE INTO likes (id, liker_id, liked_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            Uuid::new_v4().to_string(),
            liker_id.to_string(),
            liked_id.to_string(),
            db::now_millis()
        ],
    )?;
    let like = conn.query_row(
        "SELECT id, created_at FROM likes WHERE liker_id = ?1 AND liked_id = ?2",
        params![liker_id.to_string(), liked_id.to_string()],
        |row| {
            Ok(Like {
                id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
                liker_id,
                liked_id,
                created_at: row.get(1)?,
            })
        },
    )?;
    Ok(like)
}

fn reverse_edge_exists(conn: &Connection, liker_id: Uuid, liked_id: Uuid) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM likes WHERE liker_id = ?1 AND liked_id = ?2",
        params![liked_id.to_string(), liker_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Persist a like and report whether it completed a mutual pair. Both steps
/// run inside one transaction so two users liking each other at the same
/// instant cannot both observe `is_match == false`.
pub fn like_and_check_match(
    conn: &mut Connection,
    liker_id: Uuid,
    liked_id: Uuid,
) -> Result<(Like, bool)> {
    let tx = conn.transaction()?;
    let like = record_like(&tx, liker_id, liked_id)?;
    let is_match = reverse_edge_exists(&tx, liker_id, liked_id)?;
    tx.commit()?;
    Ok((like, is_match))
}

/// Delete a like edge. Returns whether the edge existed. A previously
/// mutual pair silently stops matching; no notification is sent.
pub fn remove_like(conn: &Connection, liker_id: Uuid, liked_id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM likes WHERE liker_id = ?1 AND liked_id = ?2",
        params![liker_id.to_string(), liked_id.to_string()],
    )?;
    Ok(changed > 0)
}

/// All users with whom `user` currently forms a mutual pair.
pub fn mutual_partners(conn: &Connection, user: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT a.liked_id FROM likes a \
         JOIN likes b ON b.liker_id = a.liked_id AND b.liked_id = a.liker_id \
         WHERE a.liker_id = ?1 ORDER BY a.created_at ASC",
    )?;
    let iter = stmt.query_map([user.to_string()], |row| {
        Ok(Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap())
    })?;
    let mut partners = Vec::new();
    for p in iter {
        partners.push(p?);
    }
    Ok(partners)
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
    fn like_is_idempotent() {
        let conn = db::init_db(":memory:").unwrap();
        let (a, b) = seed(&conn);
        let first = record_like(&conn, a, b).unwrap();
        let second = record_like(&conn, a, b).unwrap();
        assert_eq!(first, second);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM likes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn like_rejects_self_and_unknown() {
        let conn = db::init_db(":memory:").unwrap();
        let (a, _) = seed(&conn);
        assert!(matches!(
            record_like(&conn, a, a),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            record_like(&conn, a, Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn match_requires_both_edges() {
        let mut conn = db::init_db(":memory:").unwrap();
        let (a, b) = seed(&conn);
        let (_, is_match) = like_and_check_match(&mut conn, a, b).unwrap();
        assert!(!is_match);
        let (_, is_match) = like_and_check_match(&mut conn, b, a).unwrap();
        assert!(is_match);
        assert_eq!(mutual_partners(&conn, a).unwrap(), vec![b]);
        assert_eq!(mutual_partners(&conn, b).unwrap(), vec![a]);
    }

    #[test]
    fn unlike_dissolves_match() {
        let mut conn = db::init_db(":memory:").unwrap();
        let (a, b) = seed(&conn);
        like_and_check_match(&mut conn, a, b).unwrap();
        like_and_check_match(&mut conn, b, a).unwrap();
        assert!(remove_like(&conn, a, b).unwrap());
        assert!(!remove_like(&conn, a, b).unwrap());
        assert!(mutual_partners(&conn, a).unwrap().is_empty());
        // the reverse edge is untouched
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM likes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}

use crate::api::AppState;
use crate::error::{Error, Result};
use crate::model::Message;
use crate::{blocks, messages};
use uuid::Uuid;

/// Serialize the push frame announcing a newly persisted message.
pub fn new_message_frame(msg: &Message) -> String {
    serde_json::json!({ "type": "new_message", "data": msg }).to_string()
}

/// Validate, persist and fan out a chat message.
///
/// The persisted row is the source of truth: fan-out is fire-and-forget and
/// a dead connection never fails the send. Both the sender's other devices
/// and the receiver's devices get the same frame, so all converge on one
/// view without a second read. The caller gets the row synchronously.
pub fn send_message(
    state: &AppState,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: &str,
) -> Result<Message> {
    if content.trim().is_empty() {
        return Err(Error::InvalidArgument("empty message"));
    }
    let conn = state.pool.get()?;
    if blocks::block_exists_between(&conn, sender_id, receiver_id)? {
        return Err(Error::Forbidden("messaging is blocked between these users"));
    }
    let msg = messages::record_message(&conn, sender_id, receiver_id, content)?;
    drop(conn);

    let frame = new_message_frame(&msg);
    let mut targets = state.presence.connections_for(sender_id);
    if receiver_id != sender_id {
        targets.extend(state.presence.connections_for(receiver_id));
    }
    for tx in targets {
        // stale connections are cleaned up by their own socket task
        let _ = tx.send(frame.clone());
    }
    Ok(msg)
}

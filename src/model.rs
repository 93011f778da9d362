use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as the core sees it: an externally issued identity plus the
/// presence fields owned by this service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub is_online: bool,
    pub last_seen: Option<i64>,
}

/// A chat message. Immutable once created except for the receiver-only
/// `is_read` transition.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: i64,
}

/// A directed like edge between two users.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Like {
    pub id: Uuid,
    pub liker_id: Uuid,
    pub liked_id: Uuid,
    pub created_at: i64,
}

/// A directed block edge between two users.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: Uuid,
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub created_at: i64,
}

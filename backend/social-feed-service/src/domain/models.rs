use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Post entity
///
/// `points` is the signed sum of all stored votes for the post. It is only
/// ever changed by a vote transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub title: String,
    pub text: String,
    pub points: i32,
    pub created_at: DateTime<Utc>,
}

/// User entity (public fields only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for a post that has not been stored yet
#[derive(Debug, Clone)]
pub struct NewPost {
    pub creator_id: Uuid,
    pub title: String,
    pub text: String,
}

/// Up or down. There is no neutral value: absence of a vote is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    /// Normalize a signed request value; only the sign matters.
    /// Zero carries no direction.
    pub fn from_signed(value: i32) -> Option<Self> {
        match value.signum() {
            1 => Some(VoteDirection::Up),
            -1 => Some(VoteDirection::Down),
            _ => None,
        }
    }

    pub fn value(self) -> i16 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl From<VoteDirection> for i16 {
    fn from(direction: VoteDirection) -> Self {
        direction.value()
    }
}

impl TryFrom<i16> for VoteDirection {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteDirection::Up),
            -1 => Ok(VoteDirection::Down),
            other => Err(format!("vote value must be 1 or -1, got {}", other)),
        }
    }
}

/// Vote entity, unique per (user_id, post_id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: Uuid,
    pub post_id: Uuid,
    pub value: VoteDirection,
}

impl Vote {
    pub fn key(&self) -> VoteKey {
        VoteKey {
            user_id: self.user_id,
            post_id: self.post_id,
        }
    }
}

/// Composite identity of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteKey {
    pub user_id: Uuid,
    pub post_id: Uuid,
}

/// Outcome of comparing the stored vote with the requested direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    /// No vote was stored; insert one with this direction
    Cast(VoteDirection),
    /// The same direction was already stored; delete it
    Retract(VoteDirection),
    /// The opposite direction was stored; overwrite with this direction
    Flip(VoteDirection),
}

impl VoteTransition {
    pub fn decide(current: Option<VoteDirection>, requested: VoteDirection) -> Self {
        match current {
            None => VoteTransition::Cast(requested),
            Some(held) if held == requested => VoteTransition::Retract(requested),
            Some(_) => VoteTransition::Flip(requested),
        }
    }

    /// Relative change to the post's points
    pub fn points_delta(self) -> i32 {
        match self {
            VoteTransition::Cast(d) => i32::from(d.value()),
            VoteTransition::Retract(d) => -i32::from(d.value()),
            VoteTransition::Flip(d) => 2 * i32::from(d.value()),
        }
    }

    /// The caller's vote after the transition is applied
    pub fn resulting_status(self) -> Option<VoteDirection> {
        match self {
            VoteTransition::Cast(d) | VoteTransition::Flip(d) => Some(d),
            VoteTransition::Retract(_) => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VoteTransition::Cast(_) => "cast",
            VoteTransition::Retract(_) => "retract",
            VoteTransition::Flip(_) => "flip",
        }
    }
}

/// Result of a successfully applied vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    #[serde(skip)]
    pub transition: VoteTransition,
    /// Post points after commit
    pub points: i32,
    pub vote_status: Option<VoteDirection>,
}

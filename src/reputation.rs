//! Vote and reputation arithmetic shared by every repository backend.
//!
//! A user holds at most one vote per target. Whenever that vote changes the
//! target's author gains `next - previous` reputation, with a missing vote
//! counting as zero. Authors never earn reputation from their own votes.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum VoteValue {
    Up,
    Down,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("vote value must be 1 (upvote) or -1 (downvote), got {0}")]
pub struct InvalidVoteValue(pub i64);

impl VoteValue {
    pub fn as_i64(self) -> i64 {
        match self {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }
}

impl TryFrom<i64> for VoteValue {
    type Error = InvalidVoteValue;
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(VoteValue::Up),
            -1 => Ok(VoteValue::Down),
            other => Err(InvalidVoteValue(other)),
        }
    }
}

impl From<VoteValue> for i64 {
    fn from(v: VoteValue) -> i64 { v.as_i64() }
}

/// The thing being voted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteTarget {
    Thread(Id),
    Comment(Id),
}

impl VoteTarget {
    /// Build a target from the two optional request ids; exactly one must be set.
    pub fn from_ids(thread_id: Option<Id>, comment_id: Option<Id>) -> Option<Self> {
        match (thread_id, comment_id) {
            (Some(t), None) => Some(VoteTarget::Thread(t)),
            (None, Some(c)) => Some(VoteTarget::Comment(c)),
            _ => None,
        }
    }

    pub fn thread_id(self) -> Option<Id> {
        match self { VoteTarget::Thread(id) => Some(id), VoteTarget::Comment(_) => None }
    }

    pub fn comment_id(self) -> Option<Id> {
        match self { VoteTarget::Comment(id) => Some(id), VoteTarget::Thread(_) => None }
    }

    /// Metric label.
    pub fn kind(self) -> &'static str {
        match self { VoteTarget::Thread(_) => "thread", VoteTarget::Comment(_) => "comment" }
    }
}

/// Change in the author's reputation when a vote moves from `previous` to `next`.
pub fn reputation_delta(previous: Option<VoteValue>, next: Option<VoteValue>) -> i64 {
    next.map_or(0, VoteValue::as_i64) - previous.map_or(0, VoteValue::as_i64)
}

/// Delta actually applied to the author, zero for self-votes.
pub fn author_delta(voter: Id, author: Id, previous: Option<VoteValue>, next: Option<VoteValue>) -> i64 {
    if voter == author { 0 } else { reputation_delta(previous, next) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub upvotes: i64,
    pub downvotes: i64,
    pub score: i64,
}

impl VoteTally {
    pub fn new(upvotes: i64, downvotes: i64) -> Self {
        Self { upvotes, downvotes, score: upvotes - downvotes }
    }

    pub fn from_values<I: IntoIterator<Item = VoteValue>>(values: I) -> Self {
        let (mut up, mut down) = (0, 0);
        for v in values {
            match v {
                VoteValue::Up => up += 1,
                VoteValue::Down => down += 1,
            }
        }
        Self::new(up, down)
    }
}

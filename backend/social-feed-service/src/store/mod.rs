//! Store gateway: every read and write the service makes goes through
//! [`StoreGateway`]. `PgStore` is the production implementation,
//! `MemoryStore` a substitutable in-process one.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use uuid::Uuid;

use crate::domain::{NewPost, Post, User, Vote, VoteKey};
use crate::error::ServiceResult;
use crate::services::feed::FeedCursor;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Interface onto the durable store.
#[async_trait::async_trait]
pub trait StoreGateway: Send + Sync {
    /// Point read of a post
    async fn get_post(&self, post_id: Uuid) -> ServiceResult<Option<Post>>;

    /// Bulk read of users; ids not found are absent from the map
    async fn bulk_get_users(&self, user_ids: &[Uuid]) -> ServiceResult<HashMap<Uuid, User>>;

    /// Bulk read of votes by composite key; keys not found are absent from the map
    async fn bulk_get_votes(&self, keys: &[VoteKey]) -> ServiceResult<HashMap<VoteKey, Vote>>;

    /// Up to `take` posts strictly older than `cursor`, ordered by
    /// `created_at DESC, id DESC`
    async fn posts_before(
        &self,
        cursor: Option<&FeedCursor>,
        take: i64,
    ) -> ServiceResult<Vec<Post>>;

    /// Insert a post with zero points
    async fn create_post(&self, post: NewPost) -> ServiceResult<Post>;

    /// Update title/text of a post owned by `creator_id`.
    /// Returns `None` if no such post is owned by that user.
    async fn update_post(
        &self,
        post_id: Uuid,
        creator_id: Uuid,
        title: &str,
        text: &str,
    ) -> ServiceResult<Option<Post>>;

    /// Delete a post owned by `creator_id` together with its votes.
    /// Returns whether a row was deleted.
    async fn delete_post(&self, post_id: Uuid, creator_id: Uuid) -> ServiceResult<bool>;

    /// Delete a user with their posts and votes. Posts the user voted on
    /// give back that vote's points in the same unit of work.
    /// Returns whether the user existed.
    async fn delete_user(&self, user_id: Uuid) -> ServiceResult<bool>;

    /// Open an atomic unit of work for a vote transition
    async fn begin(&self) -> ServiceResult<Box<dyn VoteTransaction>>;
}

/// Atomic unit of work covering one vote transition.
///
/// Nothing becomes visible until [`VoteTransaction::commit`] succeeds.
/// Dropping the transaction without committing rolls every write back.
#[async_trait::async_trait]
pub trait VoteTransaction: Send {
    /// Lock the post row for the rest of the transaction.
    /// Returns `false` if the post does not exist.
    async fn lock_post(&mut self, post_id: Uuid) -> ServiceResult<bool>;

    /// Current vote of `user_id` on `post_id`, read after the post lock
    async fn current_vote(&mut self, user_id: Uuid, post_id: Uuid) -> ServiceResult<Option<Vote>>;

    async fn insert_vote(&mut self, vote: Vote) -> ServiceResult<()>;

    async fn update_vote(&mut self, vote: Vote) -> ServiceResult<()>;

    async fn delete_vote(&mut self, user_id: Uuid, post_id: Uuid) -> ServiceResult<()>;

    /// `points = points + delta`, returning the new value
    async fn increment_points(&mut self, post_id: Uuid, delta: i32) -> ServiceResult<i32>;

    async fn commit(self: Box<Self>) -> ServiceResult<()>;
}

//! Request-scoped loaders for per-post fields.
//!
//! Resolving N posts' creators and vote statuses one by one costs 2N point
//! queries; through [`RequestLoaders`] it is one bulk query per field.

pub mod batcher;

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

pub use batcher::{BatchLoader, KeyBatcher, DEFAULT_MAX_BATCH_SIZE};

use crate::domain::{Post, User, VoteDirection, VoteKey};
use crate::error::ServiceResult;
use crate::store::StoreGateway;

/// Batch loads users by id (post creators)
pub struct UserLoader {
    store: Arc<dyn StoreGateway>,
}

impl UserLoader {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl BatchLoader for UserLoader {
    type Key = Uuid;
    type Value = User;

    fn name(&self) -> &'static str {
        "user"
    }

    async fn load(&self, keys: &[Uuid]) -> ServiceResult<HashMap<Uuid, User>> {
        self.store.bulk_get_users(keys).await
    }
}

/// Batch loads the direction of a user's vote on a post
pub struct VoteStatusLoader {
    store: Arc<dyn StoreGateway>,
}

impl VoteStatusLoader {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl BatchLoader for VoteStatusLoader {
    type Key = VoteKey;
    type Value = VoteDirection;

    fn name(&self) -> &'static str {
        "vote_status"
    }

    async fn load(&self, keys: &[VoteKey]) -> ServiceResult<HashMap<VoteKey, VoteDirection>> {
        let votes = self.store.bulk_get_votes(keys).await?;
        Ok(votes.into_iter().map(|(key, vote)| (key, vote.value)).collect())
    }
}

/// The loaders one request uses. Build it in the handler, drop it with the
/// response; it is deliberately not `Clone`.
pub struct RequestLoaders {
    pub users: KeyBatcher<UserLoader>,
    pub vote_status: KeyBatcher<VoteStatusLoader>,
}

impl RequestLoaders {
    pub fn new(store: Arc<dyn StoreGateway>, max_batch_size: usize) -> Self {
        Self {
            users: KeyBatcher::with_max_batch_size(UserLoader::new(store.clone()), max_batch_size),
            vote_status: KeyBatcher::with_max_batch_size(
                VoteStatusLoader::new(store),
                max_batch_size,
            ),
        }
    }

    /// Creator of `post`; `None` if the account no longer exists
    pub async fn creator(&self, post: &Post) -> ServiceResult<Option<User>> {
        self.users.load(post.creator_id).await
    }

    /// How `viewer` voted on `post_id`. Anonymous viewers and users without
    /// a vote both get `None`.
    pub async fn vote_status(
        &self,
        viewer: Option<Uuid>,
        post_id: Uuid,
    ) -> ServiceResult<Option<VoteDirection>> {
        match viewer {
            Some(user_id) => self.vote_status.load(VoteKey { user_id, post_id }).await,
            None => Ok(None),
        }
    }
}

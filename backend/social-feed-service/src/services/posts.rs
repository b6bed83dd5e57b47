use std::sync::Arc;

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::vote_engine::VotePolicy;
use crate::domain::{NewPost, Post};
use crate::error::{ServiceError, ServiceResult};
use crate::store::StoreGateway;

const SNIPPET_CHARS: usize = 50;

/// Title and body of a post, as submitted
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PostInput {
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    #[validate(length(min = 1, max = 40000))]
    pub text: String,
}

impl PostInput {
    fn check(&self) -> ServiceResult<()> {
        self.validate()?;
        if self.title.trim().is_empty() || self.text.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "title and text must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// First 50 characters of a post body, with "..." when cut
pub fn text_snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Post CRUD. Never touches `points`.
#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn StoreGateway>,
    policy: VotePolicy,
}

impl PostService {
    pub fn new(store: Arc<dyn StoreGateway>, policy: VotePolicy) -> Self {
        Self { store, policy }
    }

    pub async fn get_post(&self, post_id: Uuid) -> ServiceResult<Option<Post>> {
        self.store.get_post(post_id).await
    }

    pub async fn create_post(&self, user_id: Uuid, input: PostInput) -> ServiceResult<Post> {
        self.policy.check(user_id)?;
        input.check()?;

        let post = self
            .store
            .create_post(NewPost {
                creator_id: user_id,
                title: input.title,
                text: input.text,
            })
            .await?;

        info!(post_id = %post.id, creator_id = %user_id, "Post created");
        Ok(post)
    }

    /// `None` when the post does not exist or belongs to someone else
    pub async fn update_post(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        input: PostInput,
    ) -> ServiceResult<Option<Post>> {
        input.check()?;
        self.store
            .update_post(post_id, user_id, &input.title, &input.text)
            .await
    }

    /// `Ok(false)` when the post is already gone
    pub async fn delete_post(&self, post_id: Uuid, user_id: Uuid) -> ServiceResult<bool> {
        let Some(post) = self.store.get_post(post_id).await? else {
            return Ok(false);
        };
        if post.creator_id != user_id {
            return Err(ServiceError::Unauthorized(format!(
                "post {} belongs to another user",
                post_id
            )));
        }

        let deleted = self.store.delete_post(post_id, user_id).await?;
        if deleted {
            info!(%post_id, "Post deleted");
        }
        Ok(deleted)
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Vote, VoteDirection, VoteOutcome, VoteTransition};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::{VOTES_APPLIED_TOTAL, VOTE_FAILURES_TOTAL};
use crate::store::{StoreGateway, VoteTransaction};

/// Rules layered on top of authentication
#[derive(Debug, Clone, Default)]
pub struct VotePolicy {
    /// Shared read-only demo account; it may browse but not vote
    pub demo_user_id: Option<Uuid>,
}

impl VotePolicy {
    pub fn check(&self, user_id: Uuid) -> ServiceResult<()> {
        if self.demo_user_id == Some(user_id) {
            return Err(ServiceError::Unauthorized(
                "demo account is read-only".to_string(),
            ));
        }
        Ok(())
    }
}

/// Applies vote transitions and keeps post points in step with stored votes.
///
/// Each call is one transaction: lock post, read current vote, write the
/// vote change and the relative points adjustment, commit. A failure or
/// timeout before commit leaves both untouched and is retryable; a commit
/// that times out reports `Internal` since it may still have landed. No
/// retries here.
#[derive(Clone)]
pub struct VoteEngine {
    store: Arc<dyn StoreGateway>,
    policy: VotePolicy,
    timeout: Duration,
}

impl VoteEngine {
    pub fn new(store: Arc<dyn StoreGateway>, policy: VotePolicy, timeout: Duration) -> Self {
        Self {
            store,
            policy,
            timeout,
        }
    }

    /// Vote on `post_id` as `user_id`. Only the sign of `value` matters.
    ///
    /// Same direction as the stored vote removes it; the opposite direction
    /// flips it; no stored vote casts one.
    #[instrument(skip(self))]
    pub async fn apply_vote(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        value: i32,
    ) -> ServiceResult<VoteOutcome> {
        let result = self.try_apply(user_id, post_id, value).await;

        match &result {
            Ok(outcome) => {
                VOTES_APPLIED_TOTAL
                    .with_label_values(&[outcome.transition.label()])
                    .inc();
                info!(
                    transition = outcome.transition.label(),
                    points = outcome.points,
                    "Vote applied"
                );
            }
            Err(e) => {
                VOTE_FAILURES_TOTAL.with_label_values(&[e.kind()]).inc();
                warn!(error = %e, "Vote not applied");
            }
        }

        result
    }

    async fn try_apply(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        value: i32,
    ) -> ServiceResult<VoteOutcome> {
        let direction = VoteDirection::from_signed(value).ok_or_else(|| {
            ServiceError::InvalidInput("vote value must be non-zero".to_string())
        })?;
        self.policy.check(user_id)?;

        // Dropping the transaction on timeout rolls it back
        let (tx, outcome) =
            tokio::time::timeout(self.timeout, self.prepare(user_id, post_id, direction))
                .await
                .map_err(|_| {
                    ServiceError::TransientStore(format!(
                        "vote on post {} timed out after {:?}",
                        post_id, self.timeout
                    ))
                })??;

        // A commit cut short may still land, so a retry could undo the vote
        tokio::time::timeout(self.timeout, tx.commit())
            .await
            .map_err(|_| {
                ServiceError::Internal(format!(
                    "commit of vote on post {} timed out; outcome unknown",
                    post_id
                ))
            })??;

        Ok(outcome)
    }

    /// Everything up to commit: lock, read, decide, write
    async fn prepare(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        direction: VoteDirection,
    ) -> ServiceResult<(Box<dyn VoteTransaction>, VoteOutcome)> {
        let mut tx = self.store.begin().await?;

        if !tx.lock_post(post_id).await? {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }

        let current = tx.current_vote(user_id, post_id).await?.map(|v| v.value);
        let transition = VoteTransition::decide(current, direction);
        let vote = Vote {
            user_id,
            post_id,
            value: direction,
        };

        match transition {
            VoteTransition::Cast(_) => tx.insert_vote(vote).await?,
            VoteTransition::Retract(_) => tx.delete_vote(user_id, post_id).await?,
            VoteTransition::Flip(_) => tx.update_vote(vote).await?,
        }
        let points = tx
            .increment_points(post_id, transition.points_delta())
            .await?;

        Ok((
            tx,
            VoteOutcome {
                transition,
                points,
                vote_status: transition.resulting_status(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewPost;
    use crate::store::MemoryStore;

    async fn setup(policy: VotePolicy) -> (MemoryStore, VoteEngine, Uuid, Uuid) {
        let store = MemoryStore::new();
        let author = store.insert_user("author").await;
        let post = store
            .create_post(NewPost {
                creator_id: author.id,
                title: "hello".into(),
                text: "world".into(),
            })
            .await
            .unwrap();
        let engine = VoteEngine::new(Arc::new(store.clone()), policy, Duration::from_secs(5));
        (store, engine, author.id, post.id)
    }

    #[tokio::test]
    async fn test_zero_value_rejected() {
        let (store, engine, user_id, post_id) = setup(VotePolicy::default()).await;
        let err = engine.apply_vote(user_id, post_id, 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert_eq!(store.vote_count().await, 0);
    }

    #[tokio::test]
    async fn test_demo_user_rejected_before_store() {
        let demo = Uuid::new_v4();
        let (store, engine, _, post_id) = setup(VotePolicy {
            demo_user_id: Some(demo),
        })
        .await;

        let err = engine.apply_vote(demo, post_id, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        assert_eq!(store.vote_count().await, 0);
    }

    #[tokio::test]
    async fn test_slow_commit_is_not_retryable() {
        let (store, _, user_id, post_id) = setup(VotePolicy::default()).await;
        let engine = VoteEngine::new(
            Arc::new(store.clone()),
            VotePolicy::default(),
            Duration::from_millis(50),
        );

        store.delay_next_commit(Duration::from_millis(500));
        let err = engine.apply_vote(user_id, post_id, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_magnitude_ignored() {
        let (store, engine, user_id, post_id) = setup(VotePolicy::default()).await;
        let outcome = engine.apply_vote(user_id, post_id, 5).await.unwrap();
        assert_eq!(outcome.points, 1);
        assert_eq!(outcome.vote_status, Some(VoteDirection::Up));

        let outcome = engine.apply_vote(user_id, post_id, -40).await.unwrap();
        assert_eq!(outcome.transition, VoteTransition::Flip(VoteDirection::Down));
        assert_eq!(outcome.points, -1);
        assert_eq!(store.vote_sum(post_id).await, -1);
    }
}

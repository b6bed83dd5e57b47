//! In-memory store gateway.
//!
//! Backs the test suites and local runs without Postgres. One mutex guards
//! the whole state; a vote transaction holds it from `begin` until commit or
//! drop, works on a staged copy, and swaps it in on commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{StoreGateway, VoteTransaction};
use crate::domain::{NewPost, Post, User, Vote, VoteKey};
use crate::error::{ServiceError, ServiceResult};
use crate::services::feed::FeedCursor;

#[derive(Debug, Default, Clone)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    posts: HashMap<Uuid, Post>,
    votes: HashMap<VoteKey, Vote>,
    last_created_at: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Millisecond-precision, strictly increasing creation time
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now);
        let created_at = match self.last_created_at {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_created_at = Some(created_at);
        created_at
    }

    /// Remove a user, their posts, and their votes on other posts. Points of
    /// posts that lose a vote move by the vote's value.
    fn remove_user_cascade(&mut self, user_id: Uuid) -> bool {
        if self.users.remove(&user_id).is_none() {
            return false;
        }
        let owned: Vec<Uuid> = self
            .posts
            .values()
            .filter(|p| p.creator_id == user_id)
            .map(|p| p.id)
            .collect();
        for post_id in owned {
            self.remove_post_cascade(post_id);
        }

        let cast: Vec<Vote> = self
            .votes
            .values()
            .filter(|v| v.user_id == user_id)
            .copied()
            .collect();
        for vote in cast {
            self.votes.remove(&vote.key());
            if let Some(post) = self.posts.get_mut(&vote.post_id) {
                post.points -= i32::from(vote.value.value());
            }
        }
        true
    }

    fn remove_post_cascade(&mut self, post_id: Uuid) -> bool {
        let removed = self.posts.remove(&post_id).is_some();
        if removed {
            self.votes.retain(|key, _| key.post_id != post_id);
        }
        removed
    }
}

/// Fault injection and call accounting shared with open transactions
#[derive(Debug, Default)]
struct Probes {
    fail_next_commit: AtomicBool,
    commit_delay_ms: AtomicU64,
    fail_bulk_reads: AtomicBool,
    bulk_vote_calls: AtomicUsize,
    bulk_vote_keys: AtomicUsize,
    bulk_user_calls: AtomicUsize,
    bulk_user_keys: AtomicUsize,
}

impl Probes {
    fn check_bulk_read(&self) -> ServiceResult<()> {
        if self.fail_bulk_reads.load(Ordering::SeqCst) {
            return Err(ServiceError::TransientStore(
                "injected bulk read failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    probes: Arc<Probes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Seeding ==========

    pub async fn insert_user(&self, username: &str) -> User {
        let mut state = self.state.lock().await;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: state.next_created_at(),
        };
        state.users.insert(user.id, user.clone());
        user
    }

    /// Insert a post with an explicit id and creation time
    pub async fn insert_post_at(
        &self,
        post_id: Uuid,
        creator_id: Uuid,
        title: &str,
        created_at: DateTime<Utc>,
    ) -> Post {
        let post = Post {
            id: post_id,
            creator_id,
            title: title.to_string(),
            text: String::new(),
            points: 0,
            created_at,
        };
        self.state.lock().await.posts.insert(post.id, post.clone());
        post
    }

    // ========== Inspection ==========

    /// Signed sum of stored votes for a post
    pub async fn vote_sum(&self, post_id: Uuid) -> i32 {
        self.state
            .lock()
            .await
            .votes
            .values()
            .filter(|v| v.post_id == post_id)
            .map(|v| i32::from(v.value.value()))
            .sum()
    }

    pub async fn vote_count(&self) -> usize {
        self.state.lock().await.votes.len()
    }

    pub async fn stored_vote(&self, user_id: Uuid, post_id: Uuid) -> Option<Vote> {
        self.state
            .lock()
            .await
            .votes
            .get(&VoteKey { user_id, post_id })
            .copied()
    }

    pub fn bulk_vote_calls(&self) -> usize {
        self.probes.bulk_vote_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_vote_keys(&self) -> usize {
        self.probes.bulk_vote_keys.load(Ordering::SeqCst)
    }

    pub fn bulk_user_calls(&self) -> usize {
        self.probes.bulk_user_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_user_keys(&self) -> usize {
        self.probes.bulk_user_keys.load(Ordering::SeqCst)
    }

    // ========== Fault injection ==========

    /// Make the next transaction commit fail with a transient error
    pub fn fail_next_commit(&self) {
        self.probes.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make the next transaction commit stall for `delay` before applying
    pub fn delay_next_commit(&self, delay: std::time::Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.probes.commit_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn set_fail_bulk_reads(&self, fail: bool) {
        self.probes.fail_bulk_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StoreGateway for MemoryStore {
    async fn get_post(&self, post_id: Uuid) -> ServiceResult<Option<Post>> {
        Ok(self.state.lock().await.posts.get(&post_id).cloned())
    }

    async fn bulk_get_users(&self, user_ids: &[Uuid]) -> ServiceResult<HashMap<Uuid, User>> {
        self.probes.bulk_user_calls.fetch_add(1, Ordering::SeqCst);
        self.probes
            .bulk_user_keys
            .fetch_add(user_ids.len(), Ordering::SeqCst);
        self.probes.check_bulk_read()?;

        let state = self.state.lock().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id).map(|u| (*id, u.clone())))
            .collect())
    }

    async fn bulk_get_votes(&self, keys: &[VoteKey]) -> ServiceResult<HashMap<VoteKey, Vote>> {
        self.probes.bulk_vote_calls.fetch_add(1, Ordering::SeqCst);
        self.probes
            .bulk_vote_keys
            .fetch_add(keys.len(), Ordering::SeqCst);
        self.probes.check_bulk_read()?;

        let state = self.state.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| state.votes.get(key).map(|v| (*key, *v)))
            .collect())
    }

    async fn posts_before(
        &self,
        cursor: Option<&FeedCursor>,
        take: i64,
    ) -> ServiceResult<Vec<Post>> {
        let state = self.state.lock().await;
        let mut posts: Vec<Post> = state
            .posts
            .values()
            .filter(|p| cursor.map_or(true, |c| c.is_after(p.created_at, p.id)))
            .cloned()
            .collect();

        posts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        posts.truncate(usize::try_from(take).unwrap_or(0));

        Ok(posts)
    }

    async fn create_post(&self, post: NewPost) -> ServiceResult<Post> {
        let mut state = self.state.lock().await;
        let created = Post {
            id: Uuid::new_v4(),
            creator_id: post.creator_id,
            title: post.title,
            text: post.text,
            points: 0,
            created_at: state.next_created_at(),
        };
        state.posts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_post(
        &self,
        post_id: Uuid,
        creator_id: Uuid,
        title: &str,
        text: &str,
    ) -> ServiceResult<Option<Post>> {
        let mut state = self.state.lock().await;
        match state.posts.get_mut(&post_id) {
            Some(post) if post.creator_id == creator_id => {
                post.title = title.to_string();
                post.text = text.to_string();
                Ok(Some(post.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_post(&self, post_id: Uuid, creator_id: Uuid) -> ServiceResult<bool> {
        let mut state = self.state.lock().await;
        let owned = state
            .posts
            .get(&post_id)
            .map_or(false, |p| p.creator_id == creator_id);
        Ok(owned && state.remove_post_cascade(post_id))
    }

    async fn delete_user(&self, user_id: Uuid) -> ServiceResult<bool> {
        Ok(self.state.lock().await.remove_user_cascade(user_id))
    }

    async fn begin(&self) -> ServiceResult<Box<dyn VoteTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryVoteTransaction {
            guard,
            staged,
            probes: self.probes.clone(),
        }))
    }
}

/// Holds the store lock for its whole lifetime; writes land in `staged`
pub struct MemoryVoteTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    probes: Arc<Probes>,
}

#[async_trait::async_trait]
impl VoteTransaction for MemoryVoteTransaction {
    async fn lock_post(&mut self, post_id: Uuid) -> ServiceResult<bool> {
        Ok(self.staged.posts.contains_key(&post_id))
    }

    async fn current_vote(&mut self, user_id: Uuid, post_id: Uuid) -> ServiceResult<Option<Vote>> {
        Ok(self
            .staged
            .votes
            .get(&VoteKey { user_id, post_id })
            .copied())
    }

    async fn insert_vote(&mut self, vote: Vote) -> ServiceResult<()> {
        if self.staged.votes.contains_key(&vote.key()) {
            return Err(ServiceError::Internal(format!(
                "duplicate vote for user {} on post {}",
                vote.user_id, vote.post_id
            )));
        }
        self.staged.votes.insert(vote.key(), vote);
        Ok(())
    }

    async fn update_vote(&mut self, vote: Vote) -> ServiceResult<()> {
        let stored = self.staged.votes.get_mut(&vote.key()).ok_or_else(|| {
            ServiceError::Internal(format!(
                "no vote to update for user {} on post {}",
                vote.user_id, vote.post_id
            ))
        })?;
        stored.value = vote.value;
        Ok(())
    }

    async fn delete_vote(&mut self, user_id: Uuid, post_id: Uuid) -> ServiceResult<()> {
        self.staged.votes.remove(&VoteKey { user_id, post_id });
        Ok(())
    }

    async fn increment_points(&mut self, post_id: Uuid, delta: i32) -> ServiceResult<i32> {
        let post = self
            .staged
            .posts
            .get_mut(&post_id)
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))?;
        post.points += delta;
        Ok(post.points)
    }

    async fn commit(self: Box<Self>) -> ServiceResult<()> {
        if self.probes.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::TransientStore(
                "injected commit failure".to_string(),
            ));
        }
        let delay = self.probes.commit_delay_ms.swap(0, Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let MemoryVoteTransaction {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}

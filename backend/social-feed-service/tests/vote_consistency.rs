use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use social_feed_service::domain::{NewPost, VoteDirection, VoteTransition};
use social_feed_service::services::{VoteEngine, VotePolicy};
use social_feed_service::store::{MemoryStore, StoreGateway};
use social_feed_service::ServiceError;
use uuid::Uuid;

struct Fixture {
    store: MemoryStore,
    engine: VoteEngine,
    post_id: Uuid,
}

async fn fixture(timeout: Duration) -> Fixture {
    let store = MemoryStore::new();
    let author = store.insert_user("author").await;
    let post = store
        .create_post(NewPost {
            creator_id: author.id,
            title: "first".into(),
            text: "body".into(),
        })
        .await
        .unwrap();
    let engine = VoteEngine::new(Arc::new(store.clone()), VotePolicy::default(), timeout);

    Fixture {
        store,
        engine,
        post_id: post.id,
    }
}

async fn points(store: &MemoryStore, post_id: Uuid) -> i32 {
    store.get_post(post_id).await.unwrap().unwrap().points
}

async fn assert_points_match_votes(store: &MemoryStore, post_id: Uuid) {
    assert_eq!(points(store, post_id).await, store.vote_sum(post_id).await);
}

#[tokio::test]
async fn test_upvote_twice_toggles_off() {
    let f = fixture(Duration::from_secs(5)).await;
    let voter = f.store.insert_user("voter").await.id;

    let outcome = f.engine.apply_vote(voter, f.post_id, 1).await.unwrap();
    assert_eq!(outcome.transition, VoteTransition::Cast(VoteDirection::Up));
    assert_eq!(outcome.points, 1);
    assert_eq!(outcome.vote_status, Some(VoteDirection::Up));
    assert_points_match_votes(&f.store, f.post_id).await;

    let outcome = f.engine.apply_vote(voter, f.post_id, 1).await.unwrap();
    assert_eq!(outcome.transition, VoteTransition::Retract(VoteDirection::Up));
    assert_eq!(outcome.points, 0);
    assert_eq!(outcome.vote_status, None);
    assert!(f.store.stored_vote(voter, f.post_id).await.is_none());
    assert_points_match_votes(&f.store, f.post_id).await;
}

#[tokio::test]
async fn test_flip_moves_points_by_two() {
    let f = fixture(Duration::from_secs(5)).await;
    let voter = f.store.insert_user("voter").await.id;

    f.engine.apply_vote(voter, f.post_id, -1).await.unwrap();
    assert_eq!(points(&f.store, f.post_id).await, -1);

    let outcome = f.engine.apply_vote(voter, f.post_id, 1).await.unwrap();
    assert_eq!(outcome.transition, VoteTransition::Flip(VoteDirection::Up));
    assert_eq!(outcome.points, 1);
    assert_eq!(
        f.store.stored_vote(voter, f.post_id).await.unwrap().value,
        VoteDirection::Up
    );

    let outcome = f.engine.apply_vote(voter, f.post_id, -1).await.unwrap();
    assert_eq!(outcome.points, -1);
    assert_eq!(f.store.vote_count().await, 1);
    assert_points_match_votes(&f.store, f.post_id).await;
}

#[tokio::test]
async fn test_concurrent_distinct_voters_all_counted() {
    let f = fixture(Duration::from_secs(5)).await;
    let mut voters = Vec::new();
    for i in 0..20 {
        voters.push(f.store.insert_user(&format!("voter{}", i)).await.id);
    }

    let engine = f.engine.clone();
    let post_id = f.post_id;
    let handles: Vec<_> = voters
        .iter()
        .enumerate()
        .map(|(i, &voter)| {
            let engine = engine.clone();
            let value = if i % 4 == 0 { -1 } else { 1 };
            tokio::spawn(async move { engine.apply_vote(voter, post_id, value).await })
        })
        .collect();

    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    // 5 down, 15 up
    assert_eq!(points(&f.store, f.post_id).await, 10);
    assert_eq!(f.store.vote_count().await, 20);
    assert_points_match_votes(&f.store, f.post_id).await;
}

#[tokio::test]
async fn test_concurrent_same_user_serializes() {
    let f = fixture(Duration::from_secs(5)).await;
    let voter = f.store.insert_user("voter").await.id;

    let results = join_all((0..9).map(|_| f.engine.apply_vote(voter, f.post_id, 1))).await;
    for result in results {
        result.unwrap();
    }

    // odd number of toggles leaves one upvote
    assert_eq!(f.store.vote_count().await, 1);
    assert_eq!(points(&f.store, f.post_id).await, 1);
    assert_points_match_votes(&f.store, f.post_id).await;
}

#[tokio::test]
async fn test_vote_on_missing_post_creates_nothing() {
    let f = fixture(Duration::from_secs(5)).await;
    let voter = f.store.insert_user("voter").await.id;

    let err = f
        .engine
        .apply_vote(voter, Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert_eq!(f.store.vote_count().await, 0);
}

#[tokio::test]
async fn test_failed_commit_applies_nothing() {
    let f = fixture(Duration::from_secs(5)).await;
    let voter = f.store.insert_user("voter").await.id;
    f.engine.apply_vote(voter, f.post_id, 1).await.unwrap();

    f.store.fail_next_commit();
    let err = f.engine.apply_vote(voter, f.post_id, -1).await.unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(points(&f.store, f.post_id).await, 1);
    assert_eq!(
        f.store.stored_vote(voter, f.post_id).await.unwrap().value,
        VoteDirection::Up
    );

    // the same request succeeds on retry
    let outcome = f.engine.apply_vote(voter, f.post_id, -1).await.unwrap();
    assert_eq!(outcome.points, -1);
    assert_points_match_votes(&f.store, f.post_id).await;
}

#[tokio::test]
async fn test_store_timeout_is_transient() {
    let f = fixture(Duration::from_millis(50)).await;
    let voter = f.store.insert_user("voter").await.id;

    // an open transaction holds the store until dropped
    let blocker = f.store.begin().await.unwrap();
    let err = f.engine.apply_vote(voter, f.post_id, 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::TransientStore(_)));
    drop(blocker);

    assert_eq!(f.store.vote_count().await, 0);
    assert_eq!(points(&f.store, f.post_id).await, 0);
}

#[tokio::test]
async fn test_deleting_voter_gives_back_points() {
    let f = fixture(Duration::from_secs(5)).await;
    let voter = f.store.insert_user("voter").await.id;
    let other = f.store.insert_user("other").await.id;
    f.engine.apply_vote(voter, f.post_id, 1).await.unwrap();
    f.engine.apply_vote(other, f.post_id, -1).await.unwrap();
    f.engine.apply_vote(other, f.post_id, 1).await.unwrap();
    assert_eq!(points(&f.store, f.post_id).await, 2);

    assert!(f.store.delete_user(voter).await.unwrap());
    assert!(f.store.stored_vote(voter, f.post_id).await.is_none());
    assert_eq!(f.store.vote_count().await, 1);
    assert_eq!(points(&f.store, f.post_id).await, 1);
    assert_points_match_votes(&f.store, f.post_id).await;

    // voting keeps working from the adjusted total
    f.engine.apply_vote(other, f.post_id, 1).await.unwrap();
    assert_eq!(points(&f.store, f.post_id).await, 0);
    assert_points_match_votes(&f.store, f.post_id).await;
}

#[tokio::test]
async fn test_deleting_post_removes_votes() {
    let f = fixture(Duration::from_secs(5)).await;
    let voter = f.store.insert_user("voter").await.id;
    f.engine.apply_vote(voter, f.post_id, 1).await.unwrap();

    let post = f.store.get_post(f.post_id).await.unwrap().unwrap();
    assert!(f.store.delete_post(post.id, post.creator_id).await.unwrap());
    assert_eq!(f.store.vote_count().await, 0);
}

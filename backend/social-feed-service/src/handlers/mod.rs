//! HTTP handlers.
//!
//! Thin adapters: extract caller and input, call one service, map the result.
//! Every request that renders posts builds its own [`RequestLoaders`].

pub mod posts;
pub mod votes;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use tracing::error;

use crate::config::{FeedConfig, VoteConfig};
use crate::loaders::RequestLoaders;
use crate::metrics;
use crate::services::{FeedPaginator, PostService, VoteEngine, VotePolicy};
use crate::store::StoreGateway;

pub use posts::PostView;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StoreGateway>,
    pub votes: VoteEngine,
    pub feed: FeedPaginator,
    pub posts: PostService,
    pub loader_max_batch_size: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn StoreGateway>, feed: &FeedConfig, vote: &VoteConfig) -> Self {
        let policy = VotePolicy {
            demo_user_id: vote.demo_user_id,
        };

        Self {
            votes: VoteEngine::new(
                store.clone(),
                policy.clone(),
                Duration::from_millis(vote.store_timeout_ms),
            ),
            feed: FeedPaginator::new(store.clone(), feed.max_limit),
            posts: PostService::new(store.clone(), policy),
            loader_max_batch_size: feed.loader_max_batch_size,
            store,
        }
    }

    /// Fresh loaders for one request
    pub fn loaders(&self) -> RequestLoaders {
        RequestLoaders::new(self.store.clone(), self.loader_max_batch_size)
    }
}

async fn metrics_handler() -> HttpResponse {
    match metrics::gather_text() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Register health, metrics and API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(|| async { "OK" }))
        .route("/ready", web::get().to(|| async { "READY" }))
        .route("/metrics", web::get().to(metrics_handler))
        .service(posts::get_feed)
        .service(posts::create_post)
        .service(posts::get_post)
        .service(posts::update_post)
        .service(posts::delete_post)
        .service(votes::vote);
}

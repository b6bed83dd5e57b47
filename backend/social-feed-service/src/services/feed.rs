//! Reverse-chronological feed with keyset cursors.
//!
//! Order is `created_at DESC, id DESC`. A cursor is the ordering key of the
//! last post on the previous page and the next page starts strictly after it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::Post;
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::FEED_PAGES_TOTAL;
use crate::store::StoreGateway;

/// Default hard cap on page size
pub const DEFAULT_MAX_LIMIT: i64 = 50;

/// Position in the feed.
///
/// Text form is `<unix millis>` or `<unix millis>:<post uuid>`. The bare
/// form excludes every post at that timestamp; the tie-aware form only
/// excludes posts at or before `(created_at, post_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCursor {
    pub created_at: DateTime<Utc>,
    pub post_id: Option<Uuid>,
}

impl FeedCursor {
    /// Cursor pointing at `post`, used as `next_cursor`
    pub fn after_post(post: &Post) -> Self {
        Self {
            created_at: post.created_at,
            post_id: Some(post.id),
        }
    }

    /// Whether a post with this ordering key comes after the cursor
    pub fn is_after(&self, created_at: DateTime<Utc>, post_id: Uuid) -> bool {
        match self.post_id {
            None => created_at < self.created_at,
            Some(cursor_id) => (created_at, post_id) < (self.created_at, cursor_id),
        }
    }
}

impl FromStr for FeedCursor {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ServiceError::InvalidInput(format!("invalid cursor: {}", reason));

        let (millis, post_id) = match s.split_once(':') {
            Some((millis, id)) => {
                let id = Uuid::parse_str(id).map_err(|_| invalid("bad post id"))?;
                (millis, Some(id))
            }
            None => (s, None),
        };

        let millis: i64 = millis
            .trim()
            .parse()
            .map_err(|_| invalid("timestamp is not an integer"))?;
        let created_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| invalid("timestamp out of range"))?;

        Ok(Self {
            created_at,
            post_id,
        })
    }
}

impl fmt::Display for FeedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.post_id {
            Some(id) => write!(f, "{}:{}", self.created_at.timestamp_millis(), id),
            None => write!(f, "{}", self.created_at.timestamp_millis()),
        }
    }
}

/// One page of the feed
#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Clone)]
pub struct FeedPaginator {
    store: Arc<dyn StoreGateway>,
    max_limit: i64,
}

impl FeedPaginator {
    pub fn new(store: Arc<dyn StoreGateway>, max_limit: i64) -> Self {
        Self {
            store,
            max_limit: max_limit.max(1),
        }
    }

    /// Next page of posts older than `cursor`.
    ///
    /// `limit` above the cap is clamped; zero or negative is rejected, as is
    /// an unparseable cursor, before the store is queried.
    #[instrument(skip(self))]
    pub async fn page(&self, limit: i64, cursor: Option<&str>) -> ServiceResult<FeedPage> {
        if limit <= 0 {
            return Err(ServiceError::InvalidInput(format!(
                "limit must be positive, got {}",
                limit
            )));
        }
        let cursor = cursor.map(FeedCursor::from_str).transpose()?;

        let limit = limit.min(self.max_limit);
        let take = limit + 1;
        let mut posts = self.store.posts_before(cursor.as_ref(), take).await?;

        let has_more = posts.len() as i64 == take;
        posts.truncate(limit as usize);
        let next_cursor = if has_more {
            posts.last().map(|p| FeedCursor::after_post(p).to_string())
        } else {
            None
        };

        FEED_PAGES_TOTAL.inc();
        debug!(returned = posts.len(), has_more, "Feed page served");

        Ok(FeedPage {
            posts,
            has_more,
            next_cursor,
        })
    }
}

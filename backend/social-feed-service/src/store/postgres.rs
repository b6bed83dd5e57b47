use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::{StoreGateway, VoteTransaction};
use crate::config::DatabaseConfig;
use crate::domain::{NewPost, Post, User, Vote, VoteDirection, VoteKey};
use crate::error::{ServiceError, ServiceResult};
use crate::services::feed::FeedCursor;

const POST_COLUMNS: &str = "id, creator_id, title, text, points, created_at";

/// PostgreSQL-backed store gateway
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build the connection pool and verify it with a round-trip
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        // Prepared statement caching off for PgBouncer transaction mode
        let connect_options =
            PgConnectOptions::from_str(&config.url)?.statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect_with(connect_options)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool created and verified"
        );

        Ok(Self::new(pool))
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn vote_from_row((user_id, post_id, value): (Uuid, Uuid, i16)) -> ServiceResult<Vote> {
    let value = VoteDirection::try_from(value).map_err(ServiceError::Internal)?;
    Ok(Vote {
        user_id,
        post_id,
        value,
    })
}

#[async_trait::async_trait]
impl StoreGateway for PgStore {
    async fn get_post(&self, post_id: Uuid) -> ServiceResult<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "SELECT {} FROM posts WHERE id = $1",
            POST_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }

    async fn bulk_get_users(&self, user_ids: &[Uuid]) -> ServiceResult<HashMap<Uuid, User>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }

    async fn bulk_get_votes(&self, keys: &[VoteKey]) -> ServiceResult<HashMap<VoteKey, Vote>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let user_ids: Vec<Uuid> = keys.iter().map(|k| k.user_id).collect();
        let post_ids: Vec<Uuid> = keys.iter().map(|k| k.post_id).collect();

        let rows = sqlx::query_as::<_, (Uuid, Uuid, i16)>(
            r#"
            SELECT v.user_id, v.post_id, v.value
            FROM votes v
            JOIN UNNEST($1::uuid[], $2::uuid[]) AS k(user_id, post_id)
              ON v.user_id = k.user_id AND v.post_id = k.post_id
            "#,
        )
        .bind(&user_ids)
        .bind(&post_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| vote_from_row(row).map(|v| (v.key(), v)))
            .collect()
    }

    async fn posts_before(
        &self,
        cursor: Option<&FeedCursor>,
        take: i64,
    ) -> ServiceResult<Vec<Post>> {
        let posts = match cursor {
            None => {
                sqlx::query_as::<_, Post>(&format!(
                    "SELECT {} FROM posts ORDER BY created_at DESC, id DESC LIMIT $1",
                    POST_COLUMNS
                ))
                .bind(take)
                .fetch_all(&self.pool)
                .await?
            }
            Some(FeedCursor {
                created_at,
                post_id: None,
            }) => {
                sqlx::query_as::<_, Post>(&format!(
                    r#"
                    SELECT {} FROM posts
                    WHERE created_at < $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                    POST_COLUMNS
                ))
                .bind(created_at)
                .bind(take)
                .fetch_all(&self.pool)
                .await?
            }
            Some(FeedCursor {
                created_at,
                post_id: Some(post_id),
            }) => {
                sqlx::query_as::<_, Post>(&format!(
                    r#"
                    SELECT {} FROM posts
                    WHERE (created_at, id) < ($1, $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#,
                    POST_COLUMNS
                ))
                .bind(created_at)
                .bind(post_id)
                .bind(take)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(posts)
    }

    async fn create_post(&self, post: NewPost) -> ServiceResult<Post> {
        let created = sqlx::query_as::<_, Post>(&format!(
            r#"
            INSERT INTO posts (creator_id, title, text)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            POST_COLUMNS
        ))
        .bind(post.creator_id)
        .bind(&post.title)
        .bind(&post.text)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update_post(
        &self,
        post_id: Uuid,
        creator_id: Uuid,
        title: &str,
        text: &str,
    ) -> ServiceResult<Option<Post>> {
        let updated = sqlx::query_as::<_, Post>(&format!(
            r#"
            UPDATE posts SET title = $3, text = $4, updated_at = now()
            WHERE id = $1 AND creator_id = $2
            RETURNING {}
            "#,
            POST_COLUMNS
        ))
        .bind(post_id)
        .bind(creator_id)
        .bind(title)
        .bind(text)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn delete_post(&self, post_id: Uuid, creator_id: Uuid) -> ServiceResult<bool> {
        // votes go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND creator_id = $2")
            .bind(post_id)
            .bind(creator_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, user_id: Uuid) -> ServiceResult<bool> {
        let mut tx = self.pool.begin().await?;

        // FOR UPDATE conflicts with the KEY SHARE lock a vote insert takes on
        // the user row, so no new vote by this user can land after this point
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(false);
        }

        // Give back the user's votes before the cascade removes them
        let adjusted = sqlx::query(
            r#"
            UPDATE posts p SET points = p.points - v.value
            FROM votes v
            WHERE v.post_id = p.id AND v.user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(%user_id, posts_adjusted = adjusted.rows_affected(), "User deleted");
        Ok(true)
    }

    async fn begin(&self) -> ServiceResult<Box<dyn VoteTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgVoteTransaction { tx }))
    }
}

/// Vote transition running inside a Postgres transaction
pub struct PgVoteTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl VoteTransaction for PgVoteTransaction {
    async fn lock_post(&mut self, post_id: Uuid) -> ServiceResult<bool> {
        // FOR NO KEY UPDATE: same lock the points UPDATE would take, taken
        // early so the vote read below sees any competing commit
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM posts WHERE id = $1 FOR NO KEY UPDATE")
                .bind(post_id)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(locked.is_some())
    }

    async fn current_vote(&mut self, user_id: Uuid, post_id: Uuid) -> ServiceResult<Option<Vote>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, i16)>(
            "SELECT user_id, post_id, value FROM votes WHERE user_id = $1 AND post_id = $2",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(vote_from_row).transpose()
    }

    async fn insert_vote(&mut self, vote: Vote) -> ServiceResult<()> {
        sqlx::query("INSERT INTO votes (user_id, post_id, value) VALUES ($1, $2, $3)")
            .bind(vote.user_id)
            .bind(vote.post_id)
            .bind(vote.value.value())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn update_vote(&mut self, vote: Vote) -> ServiceResult<()> {
        let result =
            sqlx::query("UPDATE votes SET value = $3 WHERE user_id = $1 AND post_id = $2")
                .bind(vote.user_id)
                .bind(vote.post_id)
                .bind(vote.value.value())
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::Internal(format!(
                "no vote to update for user {} on post {}",
                vote.user_id, vote.post_id
            )));
        }
        Ok(())
    }

    async fn delete_vote(&mut self, user_id: Uuid, post_id: Uuid) -> ServiceResult<()> {
        sqlx::query("DELETE FROM votes WHERE user_id = $1 AND post_id = $2")
            .bind(user_id)
            .bind(post_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn increment_points(&mut self, post_id: Uuid, delta: i32) -> ServiceResult<i32> {
        let points: i32 =
            sqlx::query_scalar("UPDATE posts SET points = points + $2 WHERE id = $1 RETURNING points")
                .bind(post_id)
                .bind(delta)
                .fetch_one(&mut *self.tx)
                .await?;

        debug!(%post_id, delta, points, "Post points adjusted");
        Ok(points)
    }

    async fn commit(self: Box<Self>) -> ServiceResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

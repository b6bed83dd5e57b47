use actix_web::{delete, get, post, put, web, HttpResponse};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::domain::{Post, User, VoteDirection};
use crate::error::{ServiceError, ServiceResult};
use crate::loaders::RequestLoaders;
use crate::middleware::AuthenticatedUser;
use crate::services::{text_snippet, PostInput};

const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

/// Post as rendered to a viewer
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub text_snippet: String,
    pub creator: Option<User>,
    pub vote_status: Option<VoteDirection>,
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub posts: Vec<PostView>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Resolve creator and vote status of every post. All lookups are issued
/// together so each field costs one bulk fetch.
pub async fn resolve_views(
    loaders: &RequestLoaders,
    viewer: Option<Uuid>,
    posts: Vec<Post>,
) -> ServiceResult<Vec<PostView>> {
    let views = join_all(posts.into_iter().map(|post| async move {
        let (creator, vote_status) = futures::try_join!(
            loaders.creator(&post),
            loaders.vote_status(viewer, post.id)
        )?;
        Ok::<_, ServiceError>(PostView {
            text_snippet: text_snippet(&post.text),
            post,
            creator,
            vote_status,
        })
    }))
    .await;

    views.into_iter().collect()
}

#[get("/api/v1/posts")]
pub async fn get_feed(
    state: web::Data<AppState>,
    viewer: Option<AuthenticatedUser>,
    query: web::Query<FeedQuery>,
) -> ServiceResult<HttpResponse> {
    let query = query.into_inner();
    let page = state
        .feed
        .page(
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.cursor.as_deref(),
        )
        .await?;

    let loaders = state.loaders();
    let posts = resolve_views(&loaders, viewer.map(|u| u.0), page.posts).await?;

    Ok(HttpResponse::Ok().json(FeedResponse {
        posts,
        has_more: page.has_more,
        next_cursor: page.next_cursor,
    }))
}

#[get("/api/v1/posts/{id}")]
pub async fn get_post(
    state: web::Data<AppState>,
    viewer: Option<AuthenticatedUser>,
    path: web::Path<Uuid>,
) -> ServiceResult<HttpResponse> {
    let post_id = path.into_inner();
    let post = state
        .posts
        .get_post(post_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))?;

    let loaders = state.loaders();
    let mut views = resolve_views(&loaders, viewer.map(|u| u.0), vec![post]).await?;

    match views.pop() {
        Some(view) => Ok(HttpResponse::Ok().json(view)),
        None => Err(ServiceError::Internal("post view not resolved".to_string())),
    }
}

#[post("/api/v1/posts")]
pub async fn create_post(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<PostInput>,
) -> ServiceResult<HttpResponse> {
    let post = state.posts.create_post(user.0, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(post))
}

#[put("/api/v1/posts/{id}")]
pub async fn update_post(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    body: web::Json<PostInput>,
) -> ServiceResult<HttpResponse> {
    let post_id = path.into_inner();
    match state
        .posts
        .update_post(post_id, user.0, body.into_inner())
        .await?
    {
        Some(post) => Ok(HttpResponse::Ok().json(post)),
        None => Err(ServiceError::NotFound(format!(
            "post {} not found for this user",
            post_id
        ))),
    }
}

#[delete("/api/v1/posts/{id}")]
pub async fn delete_post(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> ServiceResult<HttpResponse> {
    let post_id = path.into_inner();
    if state.posts.delete_post(post_id, user.0).await? {
        Ok(HttpResponse::Ok().json(serde_json::json!({"success": true})))
    } else {
        Err(ServiceError::NotFound(format!("post {}", post_id)))
    }
}

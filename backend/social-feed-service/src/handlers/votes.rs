use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::error::ServiceResult;
use crate::middleware::AuthenticatedUser;

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    /// Only the sign is used
    pub value: i32,
}

#[post("/api/v1/posts/{id}/vote")]
pub async fn vote(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    body: web::Json<VoteBody>,
) -> ServiceResult<HttpResponse> {
    let outcome = state
        .votes
        .apply_vote(user.0, path.into_inner(), body.value)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "points": outcome.points,
        "vote_status": outcome.vote_status,
    })))
}

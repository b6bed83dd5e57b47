//! Caller identity.
//!
//! Authentication happens upstream; the gateway forwards the verified user
//! id in `X-User-Id`. Handlers take [`AuthenticatedUser`] to require it, or
//! `Option<AuthenticatedUser>` for anonymous-friendly reads.

use actix_web::{dev::Payload, error::ErrorUnauthorized, Error, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let user_id = req
            .headers()
            .get(USER_ID_HEADER)
            .ok_or_else(|| ErrorUnauthorized("Missing X-User-Id header"))
            .and_then(|h| h.to_str().map_err(|_| ErrorUnauthorized("Invalid user ID")))
            .and_then(|raw| {
                Uuid::parse_str(raw.trim()).map_err(|_| ErrorUnauthorized("Invalid user ID"))
            })
            .map(AuthenticatedUser);

        ready(user_id)
    }
}

//! Bearer JWT authentication.
//!
//! Validates an HS256-signed token against [`crate::config::JwtConfig`] and
//! extracts its `sub` claim as the caller's [`UserId`]. This is intentionally
//! minimal — a stand-in for the full OIDC flow the out-of-scope platform uses
//! elsewhere, enough to exercise ownership-checked engine endpoints.

use crate::error::ApiError;
use adgraph_core::UserId;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Shared decoding state, cloned into axum's router state.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: Arc<DecodingKey>,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    fn verify(&self, token: &str) -> Result<UserId, ApiError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::new(jsonwebtoken::Algorithm::HS256))
            .map_err(|_| ApiError::Unauthorized)?
            .claims;
        UserId::from_str(&claims.sub).map_err(|_| ApiError::Unauthorized)
    }
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
}

/// The authenticated caller, extracted from the `Authorization: Bearer` header.
pub struct AuthenticatedUser(pub UserId);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    JwtVerifier: axum::extract::FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>> =
            TypedHeader::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::Unauthorized)?;
        let verifier = JwtVerifier::from_ref(state);
        let user_id = verifier.verify(bearer.token())?;
        Ok(Self(user_id))
    }
}

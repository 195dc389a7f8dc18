//! Authorization seam.
//!
//! The server only understands a single static bearer token today, but every
//! handler goes through the [`Authorizer`] trait so a real policy backend can
//! be dropped in without touching the routes.

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use uuid::Uuid;

use scanforge_core::{Error, Result};

use crate::error::ApiError;
use crate::state::AppState;

/// What a request wants to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Edit,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Check whether the presented token may perform `action`, optionally
    /// scoped to a project.
    async fn authorize(
        &self,
        token: Option<&str>,
        project_id: Option<Uuid>,
        action: Action,
    ) -> Result<()>;
}

/// Static-token authorizer. With no token configured every request passes.
pub struct TokenAuthorizer {
    token: Option<String>,
}

impl TokenAuthorizer {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Authorizer for TokenAuthorizer {
    async fn authorize(
        &self,
        token: Option<&str>,
        _project_id: Option<Uuid>,
        _action: Action,
    ) -> Result<()> {
        match &self.token {
            None => Ok(()),
            Some(expected) if token == Some(expected.as_str()) => Ok(()),
            Some(_) if token.is_none() => {
                Err(Error::Unauthorized("missing bearer token".into()))
            }
            Some(_) => Err(Error::Forbidden("invalid bearer token".into())),
        }
    }
}

/// Extract the bearer token from request headers, if any.
pub fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

/// Handler-side authorization check.
pub async fn require(
    state: &AppState,
    headers: &HeaderMap,
    project_id: Option<Uuid>,
    action: Action,
) -> std::result::Result<(), ApiError> {
    let token = bearer(headers);
    state
        .authorizer
        .authorize(token.as_deref(), project_id, action)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_configured_token_allows_everything() {
        let auth = TokenAuthorizer::new(None);
        assert!(auth.authorize(None, None, Action::Edit).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_token_is_forbidden_and_missing_is_unauthorized() {
        let auth = TokenAuthorizer::new(Some("s3cret".into()));
        assert!(matches!(
            auth.authorize(Some("nope"), None, Action::Edit).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            auth.authorize(None, None, Action::View).await,
            Err(Error::Unauthorized(_))
        ));
        assert!(auth.authorize(Some("s3cret"), None, Action::Edit).await.is_ok());
    }

    #[test]
    fn bearer_header_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer(&headers).as_deref(), Some("abc"));

        let mut bad = HeaderMap::new();
        bad.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer(&bad), None);
    }
}

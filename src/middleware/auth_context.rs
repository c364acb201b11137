use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AppState, Role};

/// The authenticated caller, taken from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::token_missing())?;

            let claims = state.tokens.verify(authz.token()).map_err(|e| {
                tracing::debug!(error = %e, "rejected bearer token");
                ApiError::token_invalid()
            })?;

            Ok(AuthContext {
                user_id: claims.sub,
                email: claims.email,
                role: claims.role,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenKeys;
    use axum::http::{Request, StatusCode, header};
    use chrono::Duration;
    use sqlx::postgres::PgPoolOptions;

    fn state_with(keys: TokenKeys) -> AppState {
        let db = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        AppState { db, tokens: keys }
    }

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/appointments");
        if let Some(v) = value {
            builder = builder.header(header::AUTHORIZATION, v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn valid_token_yields_caller() {
        let keys = TokenKeys::new("extractor-secret", Duration::hours(1));
        let id = Uuid::new_v4();
        let (token, _) = keys.issue(id, "pat@example.com", Role::Patient).unwrap();
        let state = state_with(keys);

        let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));
        let auth = AuthContext::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(auth.user_id, id);
        assert_eq!(auth.role, Role::Patient);
        assert_eq!(auth.email, "pat@example.com");
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let state = state_with(TokenKeys::new("extractor-secret", Duration::hours(1)));
        let mut parts = parts_with_auth(None);
        let err = AuthContext::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_or_expired_token_is_forbidden() {
        let state = state_with(TokenKeys::new("extractor-secret", Duration::hours(1)));

        let mut parts = parts_with_auth(Some("Bearer definitely-not-a-jwt"));
        let err = AuthContext::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let stale = TokenKeys::new("extractor-secret", Duration::hours(-3));
        let (token, _) = stale.issue(Uuid::new_v4(), "old@example.com", Role::Doctor).unwrap();
        let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));
        let err = AuthContext::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }
}

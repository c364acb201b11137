use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::{
    auth::{hash_password, verify_password},
    error::{ApiError, db_error, user_write_error},
    middleware::auth_context::AuthContext,
    models::*,
    routes::user_routes::{
        ensure_email_free, load_public_user, normalize_email, normalize_full_name, normalize_phone, validate_password,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify", get(verify))
}

/// Self-service sign up. Admin accounts are only created from the admin panel
/// or the `create_admin` tool.
fn self_service_role(requested: Option<&str>) -> Role {
    match requested.map(str::trim) {
        Some(r) if r.eq_ignore_ascii_case("doctor") => Role::Doctor,
        _ => Role::Patient,
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiOk<RegisterData>>), ApiError> {
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;
    let full_name = normalize_full_name(&req.full_name)?;
    let phone = normalize_phone(req.phone.as_deref());
    let role = self_service_role(req.role.as_deref());

    ensure_email_free(&state, &email, None).await?;

    let pw_hash = hash_password(&req.password).map_err(ApiError::Internal)?;

    let user_id: uuid::Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO users (email, password_hash, full_name, phone, role)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(&email)
    .bind(&pw_hash)
    .bind(&full_name)
    .bind(phone.as_deref())
    .bind(role)
    .fetch_one(&state.db)
    .await
    .map_err(user_write_error)?;

    tracing::info!(%user_id, role = role.as_str(), "account registered");

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::with_message(
            "Account created",
            RegisterData { user_id },
        )),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginData>>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, email, password_hash, full_name, phone, role, created_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        tracing::warn!(user_id = %user.id, "failed login");
        return Err(ApiError::invalid_credentials());
    }

    let (token, expires_at) = state
        .tokens
        .issue(user.id, &user.email, user.role)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(ApiOk::with_message(
        "Login successful",
        LoginData {
            token,
            expires_at,
            user: user.into_public(),
        },
    )))
}

pub async fn verify(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UserData>>, ApiError> {
    let user = load_public_user(&state, auth.user_id).await?;
    Ok(Json(ApiOk::new(UserData { user })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_service_never_grants_admin() {
        assert_eq!(self_service_role(None), Role::Patient);
        assert_eq!(self_service_role(Some("patient")), Role::Patient);
        assert_eq!(self_service_role(Some(" Doctor ")), Role::Doctor);
        assert_eq!(self_service_role(Some("admin")), Role::Patient);
        assert_eq!(self_service_role(Some("superuser")), Role::Patient);
    }
}

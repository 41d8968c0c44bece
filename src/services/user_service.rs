use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::auth::{
        ForgotPasswordRequest, ResetPasswordRequest, UpdateProfileRequest, UpdateUserRoleRequest,
        UserList,
    },
    email::ResetNotifier,
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::User,
    response::{ApiResponse, Meta},
    services::auth_service::hash_password,
};

/// Reset links stay valid this long after the request.
const RESET_TOKEN_TTL_MINUTES: i64 = 30;

/// Only the SHA-256 of a reset token is stored; the raw token travels in the
/// emailed link and nowhere else.
pub fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub async fn get_profile(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let profile: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(pool)
        .await?;
    match profile {
        Some(u) => Ok(ApiResponse::success("Profile", u, None)),
        None => Err(AppError::NotFound),
    }
}

/// Partial update of the caller's own name/phone, with an optional password
/// change (re-hashed here, never stored raw).
pub async fn update_profile(
    pool: &DbPool,
    user: &AuthUser,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<User>> {
    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(pool)
        .await?;
    let existing = match existing {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let name = payload.name.unwrap_or(existing.name);
    let phone = payload.phone.or(existing.phone);
    let password_hash = match payload.password.as_deref() {
        Some(password) => hash_password(password)?,
        None => existing.password_hash,
    };

    let updated: User = sqlx::query_as(
        "UPDATE users SET name = $2, phone = $3, password_hash = $4 WHERE id = $1 RETURNING *",
    )
    .bind(user.user_id)
    .bind(name)
    .bind(phone)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "profile_updated",
        Some("users"),
        Some(serde_json::json!({ "user_id": updated.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Profile updated",
        updated,
        Some(Meta::empty()),
    ))
}

/// Issue a single-use reset token and email the link. The raw token is only
/// ever part of that link; the database holds its hash and expiry. If the
/// email cannot be sent the token is cleared again so no live token exists
/// that was never delivered.
pub async fn forgot_password<N: ResetNotifier>(
    pool: &DbPool,
    notifier: &N,
    client_url: &str,
    payload: ForgotPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(payload.email.as_str())
        .fetch_optional(pool)
        .await?;
    let user = match user {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let token = Uuid::new_v4().simple().to_string();
    let expires = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);
    sqlx::query("UPDATE users SET reset_token_hash = $2, reset_token_expires = $3 WHERE id = $1")
        .bind(user.id)
        .bind(hash_reset_token(&token))
        .bind(expires)
        .execute(pool)
        .await?;

    let reset_url = format!(
        "{}/reset-password/{}",
        client_url.trim_end_matches('/'),
        token
    );
    if let Err(err) = notifier.send_password_reset(&user.email, &reset_url).await {
        tracing::error!(error = %err, user_id = %user.id, "password reset email failed");
        sqlx::query(
            "UPDATE users SET reset_token_hash = NULL, reset_token_expires = NULL WHERE id = $1",
        )
        .bind(user.id)
        .execute(pool)
        .await?;
        return Err(AppError::Internal(anyhow::anyhow!(
            "Email could not be sent"
        )));
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.id),
        "password_reset_requested",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Email sent",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Consume a reset token: one conditional update matches the token hash,
/// checks expiry, installs the new password hash, and clears the token so it
/// cannot be replayed.
pub async fn reset_password(
    pool: &DbPool,
    token: &str,
    payload: ResetPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let password_hash = hash_password(&payload.password)?;

    let updated: Option<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE users
        SET password_hash = $2, reset_token_hash = NULL, reset_token_expires = NULL
        WHERE reset_token_hash = $1 AND reset_token_expires > now()
        RETURNING id
        "#,
    )
    .bind(hash_reset_token(token))
    .bind(password_hash)
    .fetch_optional(pool)
    .await?;
    let (user_id,) = match updated {
        Some(row) => row,
        None => return Err(AppError::BadRequest("Invalid or expired token".into())),
    };

    if let Err(err) = log_audit(
        pool,
        Some(user_id),
        "password_reset",
        Some("users"),
        Some(serde_json::json!({ "user_id": user_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Password reset successful",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn list_users(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<UserList>> {
    ensure_admin(user)?;

    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at")
        .fetch_all(pool)
        .await?;

    let total = users.len() as i64;
    Ok(ApiResponse::success(
        "Users",
        UserList { items: users },
        Some(Meta::unpaged(total)),
    ))
}

pub async fn get_user(pool: &DbPool, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;

    let found: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match found {
        Some(u) => Ok(ApiResponse::success("User", u, None)),
        None => Err(AppError::NotFound),
    }
}

pub async fn update_user_role(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateUserRoleRequest,
) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;

    if !matches!(payload.role.as_str(), "customer" | "admin") {
        return Err(AppError::BadRequest(format!(
            "Unknown role {}",
            payload.role
        )));
    }

    let updated: Option<User> =
        sqlx::query_as("UPDATE users SET role = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(payload.role)
            .fetch_optional(pool)
            .await?;
    let updated = match updated {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "user_role_updated",
        Some("users"),
        Some(serde_json::json!({ "user_id": updated.id, "role": updated.role })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Role updated",
        updated,
        Some(Meta::empty()),
    ))
}

pub async fn delete_user(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "user_deleted",
        Some("users"),
        Some(serde_json::json!({ "user_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "User removed",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_token_hash_is_deterministic() {
        let token = "3f2c9a6d0b8e4f17a5c2d9e1b4a7c0f3";
        assert_eq!(hash_reset_token(token), hash_reset_token(token));
    }

    #[test]
    fn reset_token_hash_differs_per_token() {
        assert_ne!(hash_reset_token("token-a"), hash_reset_token("token-b"));
    }

    #[test]
    fn reset_token_hash_is_hex_sha256() {
        let hash = hash_reset_token("anything");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

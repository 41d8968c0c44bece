use std::sync::Mutex;

use axum_course_commerce_api::{
    db::{DbPool, create_pool},
    dto::auth::{
        ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
        UpdateProfileRequest, UpdateUserRoleRequest,
    },
    email::ResetNotifier,
    error::AppError,
    middleware::auth::AuthUser,
    services::{auth_service, user_service},
};
use uuid::Uuid;

/// Captures reset emails instead of talking to an SMTP relay.
#[derive(Default)]
struct CapturingResetNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl ResetNotifier for CapturingResetNotifier {
    async fn send_password_reset(&self, email: &str, reset_url: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), reset_url.to_string()));
        Ok(())
    }
}

/// A notifier whose sends always fail, for the email-failure path.
struct FailingResetNotifier;

impl ResetNotifier for FailingResetNotifier {
    async fn send_password_reset(&self, _email: &str, _reset_url: &str) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("relay unreachable"))
    }
}

// Register, edit the profile, run the forgot/reset loop end to end, and
// exercise the admin user-management surface.
#[tokio::test]
async fn profile_and_password_reset_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(());
            }
        };

    unsafe { std::env::set_var("JWT_SECRET", "user_flow_secret") };

    let pool = setup_pool(&database_url).await?;

    let registered = auth_service::register_user(
        &pool,
        RegisterRequest {
            name: "Ravi".into(),
            email: "ravi@example.com".into(),
            phone: None,
            password: "original-pass".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(registered.role, "customer");

    let caller = AuthUser {
        user_id: registered.id,
        role: registered.role.clone(),
    };

    // Own profile is visible and partially updatable.
    let profile = user_service::get_profile(&pool, &caller).await?.data.unwrap();
    assert_eq!(profile.email, "ravi@example.com");

    let updated = user_service::update_profile(
        &pool,
        &caller,
        UpdateProfileRequest {
            name: Some("Ravi K".into()),
            phone: Some("9876543210".into()),
            password: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(updated.name, "Ravi K");
    assert_eq!(updated.phone.as_deref(), Some("9876543210"));

    // A failed reset email must not leave a live token behind.
    let failed = user_service::forgot_password(
        &pool,
        &FailingResetNotifier,
        "https://shop.example.com",
        ForgotPasswordRequest {
            email: "ravi@example.com".into(),
        },
    )
    .await;
    assert!(matches!(failed, Err(AppError::Internal(_))));
    let (token_hash,): (Option<String>,) =
        sqlx::query_as("SELECT reset_token_hash FROM users WHERE id = $1")
            .bind(registered.id)
            .fetch_one(&pool)
            .await?;
    assert!(token_hash.is_none());

    // Successful forgot: the emailed link carries the raw token.
    let notifier = CapturingResetNotifier::default();
    user_service::forgot_password(
        &pool,
        &notifier,
        "https://shop.example.com",
        ForgotPasswordRequest {
            email: "ravi@example.com".into(),
        },
    )
    .await?;

    let reset_url = {
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ravi@example.com");
        sent[0].1.clone()
    };
    assert!(reset_url.starts_with("https://shop.example.com/reset-password/"));
    let token = reset_url.rsplit('/').next().unwrap().to_string();

    // A wrong token is rejected without consuming the real one.
    let bad = user_service::reset_password(
        &pool,
        "not-the-token",
        ResetPasswordRequest {
            password: "attacker-pass".into(),
        },
    )
    .await;
    assert!(matches!(bad, Err(AppError::BadRequest(_))));

    user_service::reset_password(
        &pool,
        &token,
        ResetPasswordRequest {
            password: "fresh-pass".into(),
        },
    )
    .await?;

    // The token is single-use.
    let replay = user_service::reset_password(
        &pool,
        &token,
        ResetPasswordRequest {
            password: "another-pass".into(),
        },
    )
    .await;
    assert!(matches!(replay, Err(AppError::BadRequest(_))));

    // Old password no longer works, the new one does.
    let old_login = auth_service::login_user(
        &pool,
        LoginRequest {
            email: "ravi@example.com".into(),
            password: "original-pass".into(),
        },
    )
    .await;
    assert!(old_login.is_err());
    auth_service::login_user(
        &pool,
        LoginRequest {
            email: "ravi@example.com".into(),
            password: "fresh-pass".into(),
        },
    )
    .await?;

    // An expired token is rejected even when the hash matches.
    user_service::forgot_password(
        &pool,
        &notifier,
        "https://shop.example.com",
        ForgotPasswordRequest {
            email: "ravi@example.com".into(),
        },
    )
    .await?;
    let expired_token = {
        let sent = notifier.sent.lock().unwrap();
        sent.last().unwrap().1.rsplit('/').next().unwrap().to_string()
    };
    sqlx::query("UPDATE users SET reset_token_expires = now() - interval '1 minute' WHERE id = $1")
        .bind(registered.id)
        .execute(&pool)
        .await?;
    let expired = user_service::reset_password(
        &pool,
        &expired_token,
        ResetPasswordRequest {
            password: "too-late".into(),
        },
    )
    .await;
    assert!(matches!(expired, Err(AppError::BadRequest(_))));

    // Admin surface: a customer is refused, an admin can manage users.
    let refused = user_service::list_users(&pool, &caller).await;
    assert!(matches!(refused, Err(AppError::Forbidden)));

    let admin_id = create_user(&pool, "Owner", "owner@example.com", "admin").await?;
    let admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };

    let users = user_service::list_users(&pool, &admin).await?.data.unwrap();
    assert_eq!(users.items.len(), 2);

    let fetched = user_service::get_user(&pool, &admin, registered.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.email, "ravi@example.com");

    let bad_role = user_service::update_user_role(
        &pool,
        &admin,
        registered.id,
        UpdateUserRoleRequest {
            role: "owner".into(),
        },
    )
    .await;
    assert!(matches!(bad_role, Err(AppError::BadRequest(_))));

    let promoted = user_service::update_user_role(
        &pool,
        &admin,
        registered.id,
        UpdateUserRoleRequest {
            role: "admin".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(promoted.role, "admin");

    let extra_id = create_user(&pool, "Temp", "temp@example.com", "customer").await?;
    user_service::delete_user(&pool, &admin, extra_id).await?;
    let gone = user_service::get_user(&pool, &admin, extra_id).await;
    assert!(matches!(gone, Err(AppError::NotFound)));

    Ok(())
}

async fn setup_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let pool = create_pool(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    sqlx::query(
        "TRUNCATE TABLE order_items, orders, audit_logs, courses, products, users RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

async fn create_user(pool: &DbPool, name: &str, email: &str, role: &str) -> anyhow::Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, password_hash, role)
        VALUES ($1, $2, $3, 'dummy', $4)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(role)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

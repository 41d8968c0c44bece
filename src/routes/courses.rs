use axum::{
    Json, Router,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::{
    dto::courses::{CourseList, CreateCourseRequest, UpdateCourseRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Course,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", axum::routing::get(list_courses))
        .route("/", axum::routing::post(create_course))
        .route("/{id}", axum::routing::get(get_course))
        .route("/{id}", axum::routing::put(update_course))
        .route("/{id}", axum::routing::delete(delete_course))
}

#[utoipa::path(
    get,
    path = "/api/courses",
    responses(
        (status = 200, description = "List courses", body = ApiResponse<CourseList>)
    ),
    tag = "Courses"
)]
pub async fn list_courses(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<CourseList>>> {
    let items = sqlx::query_as::<_, Course>("SELECT * FROM courses ORDER BY created_at")
        .fetch_all(&state.pool)
        .await?;

    let total = items.len() as i64;
    let meta = Meta::unpaged(total);
    Ok(Json(ApiResponse::success(
        "Courses",
        CourseList { items },
        Some(meta),
    )))
}

#[utoipa::path(
    get,
    path = "/api/courses/{id}",
    params(
        ("id" = Uuid, Path, description = "Course ID")
    ),
    responses(
        (status = 200, description = "Get course", body = ApiResponse<Course>),
        (status = 404, description = "Course not found"),
    ),
    tag = "Courses"
)]
pub async fn get_course(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Course>>> {
    let course = sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    let course = match course {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };
    Ok(Json(ApiResponse::success("Course", course, None)))
}

#[utoipa::path(
    post,
    path = "/api/courses",
    request_body = CreateCourseRequest,
    responses(
        (status = 201, description = "Create course", body = ApiResponse<Course>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Courses"
)]
pub async fn create_course(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateCourseRequest>,
) -> AppResult<Json<ApiResponse<Course>>> {
    ensure_admin(&user)?;

    let course = sqlx::query_as::<_, Course>(
        r#"
        INSERT INTO courses (id, title, level, description, price, group_link)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.title)
    .bind(payload.level)
    .bind(payload.description)
    .bind(payload.price)
    .bind(payload.group_link)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(
        "Course created",
        course,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    put,
    path = "/api/courses/{id}",
    params(
        ("id" = Uuid, Path, description = "Course ID")
    ),
    request_body = UpdateCourseRequest,
    responses(
        (status = 200, description = "Updated course", body = ApiResponse<Course>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Courses"
)]
pub async fn update_course(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCourseRequest>,
) -> AppResult<Json<ApiResponse<Course>>> {
    ensure_admin(&user)?;

    let existing = sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    let existing = match existing {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let title = payload.title.unwrap_or(existing.title);
    let level = payload.level.or(existing.level);
    let description = payload.description.or(existing.description);
    let price = payload.price.unwrap_or(existing.price);
    let group_link = payload.group_link.unwrap_or(existing.group_link);

    let course = sqlx::query_as::<_, Course>(
        r#"
        UPDATE courses
        SET title = $2, level = $3, description = $4, price = $5, group_link = $6
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(level)
    .bind(description)
    .bind(price)
    .bind(group_link)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(
        "Updated",
        course,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    delete,
    path = "/api/courses/{id}",
    params(
        ("id" = Uuid, Path, description = "Course ID")
    ),
    responses(
        (status = 200, description = "Deleted course"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Courses"
)]
pub async fn delete_course(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    ensure_admin(&user)?;

    let result = sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(Json(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    )))
}

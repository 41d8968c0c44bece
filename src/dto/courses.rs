use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Course;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCourseRequest {
    pub title: String,
    pub level: Option<String>,
    pub description: Option<String>,
    pub price: i64,
    pub group_link: String,
}

/// Partial update. Absent fields keep their stored value, so the nullable
/// `level` and `description` cannot be cleared back to NULL through this
/// endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCourseRequest {
    pub title: Option<String>,
    pub level: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub group_link: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseList {
    pub items: Vec<Course>,
}

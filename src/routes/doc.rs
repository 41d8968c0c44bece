use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{
            ForgotPasswordRequest, ResetPasswordRequest, UpdateProfileRequest,
            UpdateUserRoleRequest, UserList,
        },
        courses::CourseList,
        orders::{OrderList, OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest},
        payments::{CreateIntentRequest, CreateIntentResponse},
        products::ProductList,
    },
    models::{Course, Order, OrderItem, Product, User},
    response::{ApiResponse, Meta},
    routes::{admin, auth, courses, health, orders, payments, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        auth::profile,
        auth::update_profile,
        auth::forgot_password,
        auth::reset_password,
        products::list_products,
        products::create_product,
        products::get_product,
        products::update_product,
        products::delete_product,
        courses::list_courses,
        courses::create_course,
        courses::get_course,
        courses::update_course,
        courses::delete_course,
        orders::place_order,
        orders::list_my_orders,
        orders::get_order,
        admin::list_all_orders,
        admin::update_order_status,
        admin::list_users,
        admin::get_user,
        admin::update_user_role,
        admin::delete_user,
        payments::create_intent,
        payments::webhook
    ),
    components(
        schemas(
            User,
            Product,
            Course,
            Order,
            OrderItem,
            ProductList,
            CourseList,
            OrderList,
            OrderWithItems,
            PlaceOrderRequest,
            UpdateOrderStatusRequest,
            UpdateProfileRequest,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            UpdateUserRoleRequest,
            UserList,
            CreateIntentRequest,
            CreateIntentResponse,
            Meta,
            ApiResponse<Product>,
            ApiResponse<Course>,
            ApiResponse<ProductList>,
            ApiResponse<CourseList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<CreateIntentResponse>,
            ApiResponse<User>,
            ApiResponse<UserList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Product catalog"),
        (name = "Courses", description = "Course catalog"),
        (name = "Orders", description = "Order placement and lookup"),
        (name = "Admin", description = "Admin order management"),
        (name = "Payments", description = "Gateway intents and webhook settlement"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

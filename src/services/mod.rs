pub mod auth_service;
pub mod order_service;
pub mod settlement;
pub mod user_service;

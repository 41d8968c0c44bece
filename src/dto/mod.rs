pub mod auth;
pub mod courses;
pub mod orders;
pub mod payments;
pub mod products;

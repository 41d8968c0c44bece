pub mod gateway;
pub mod signature;

pub mod error;
pub mod factory;
pub mod gateway;
pub mod providers;
pub mod types;
pub mod verify;

pub mod gateway;
pub mod persist;
pub mod settings;
pub mod store;

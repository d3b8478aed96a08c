pub mod controller;
pub mod keys;

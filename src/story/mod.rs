pub mod graph;
pub mod validate;
pub mod visual;

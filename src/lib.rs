pub mod api;
pub mod editor;
pub mod gui;
pub mod persistence;
pub mod play;
pub mod story;

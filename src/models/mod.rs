pub mod api;
pub mod document;

pub mod date;
pub mod file;
pub mod preprocess;

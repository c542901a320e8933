pub mod catalog;
pub mod core;
pub mod results;
pub mod results_upload;
pub mod setup;

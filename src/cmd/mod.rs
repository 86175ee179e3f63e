pub mod build;
pub mod clean;
pub mod dev;
pub mod schema;

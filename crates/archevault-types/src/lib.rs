pub mod api;
pub mod events;
pub mod models;
pub mod profile;
pub mod validate;

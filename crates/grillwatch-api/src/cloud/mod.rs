mod auth;
mod client;
mod grills;
pub mod models;

pub use auth::LoginSession;
pub use client::{CloudClient, DEFAULT_API_URL};

pub mod auth;
pub mod error;
pub mod events;
pub mod middleware;
pub mod threads;

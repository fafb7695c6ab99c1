pub mod auth;
pub mod chat;
pub mod error;
pub mod images;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod state;

pub mod auth;
pub mod connection;
pub mod messages;
pub mod transport;

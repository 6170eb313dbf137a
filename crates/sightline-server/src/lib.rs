pub mod admin;
pub mod app;
pub mod error;
pub mod geo;
pub mod mailer;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod webhook;

pub mod events;
pub mod funnels;
pub mod goals;
pub mod projects;
pub mod webhooks;

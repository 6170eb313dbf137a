pub mod collect;
pub mod health;
pub mod reports;

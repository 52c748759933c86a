pub mod health;
pub mod hit;
pub mod query;

pub mod health;
pub mod list;
pub mod punch;
pub mod time;

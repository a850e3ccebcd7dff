pub mod covers;
pub mod health;

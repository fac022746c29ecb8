pub mod cooldown;
pub mod display;
pub mod health;
pub mod metrics;
pub mod reading;
pub mod topics;

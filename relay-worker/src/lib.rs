pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod providers;
pub mod quote;
pub mod sink;

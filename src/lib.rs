pub mod api;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

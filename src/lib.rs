pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod segment;
pub mod state;
pub mod stream;
pub mod tags;

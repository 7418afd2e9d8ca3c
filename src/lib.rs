pub mod admin;
pub mod balancer;
pub mod config;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod proxy;
pub mod server;

pub use config::Config;

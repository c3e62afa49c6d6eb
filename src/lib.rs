pub mod aranet;
pub mod config;
pub mod fleet;
pub mod homekit;
pub mod metrics;

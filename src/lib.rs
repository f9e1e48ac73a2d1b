pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod session;
pub mod store;

pub use client::Agent;
pub use config::ClaudiaConfig;
pub use error::{CoreError, CoreResult};
pub use store::Store;

pub mod activity;
pub mod api;
pub mod config;
pub mod cron;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod logs;
pub mod payload;
pub mod store;

pub use config::Config;
pub use error::StoreError;
pub use payload::Payload;
pub use store::{MemoryOpsDb, OpsDb, PgOpsDb};

pub mod allocation;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod hysteresis;
pub mod persistence;
pub mod profiler;
pub mod scoring;
pub mod service;
pub mod session;
pub mod types;

pub use config::AdmConfig;
pub use engine::AdaptiveDifficultyManager;
pub use error::{AdmError, AdmResult};
pub use persistence::{FileStateStore, MemoryStateStore, PersistenceGateway, StateStore};
pub use service::{AdmService, ServiceOptions};
pub use types::*;

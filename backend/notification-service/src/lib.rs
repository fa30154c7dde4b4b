pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod stream;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::{DispatchOrchestrator, DispatchSettings, EligibilityResolver};
pub use stream::{ConnectionRegistry, StreamMessage};

//! Lighthouse: keeps running containers on the latest pull of their image.
//!
//! Three triggers (a timer, manual calls and an authenticated webhook)
//! feed one pipeline in [`engine::Engine`]: gate on the exclusion list,
//! detect staleness by pulling, replace the container in place, then
//! record the outcome in the status cache and audit history and notify.

pub mod cache;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod history;
pub mod notify;
mod persist;
pub mod registry;
pub mod replacer;
pub mod runtime;
pub mod scheduler;
pub mod settings;
pub mod types;

pub use engine::Engine;
pub use error::{RuntimeError, SettingsError, UpdateError, WebhookError};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use scheduler::Scheduler;
pub use settings::{Settings, SettingsStore};

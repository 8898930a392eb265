//! Provider health, intent preferences and candidate selection
//!
//! Everything here is in-memory and synchronous; the only suspension points in
//! a routed request live inside the provider adapters.

pub mod health;
pub mod intent;
pub mod reporter;
pub mod scheduler;
pub mod selector;

pub use health::{HealthSnapshot, ProviderHealth};
pub use intent::{Candidate, IntentMatrix};
pub use reporter::HealthReporter;
pub use selector::ModelSelector;

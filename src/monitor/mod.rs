// Certificate check runs
//
// A run resolves every check of a configuration once:
// - checks are grouped by notification recipient
// - a bounded worker pool retrieves and verifies certificates
// - identical targets share one retrieval through the single-flight cache
// - a single aggregator writes results back and notifies failed groups

pub mod alerts;
pub mod cache;
pub mod config;
pub mod report;
pub mod scheduler;
pub mod types;
pub mod verifier;

// Re-export commonly used types
pub use alerts::{EmailNotifier, Notifier};
pub use cache::SingleFlight;
pub use config::{CheckConfig, MailConfig, RunSettings, parse_check_config};
pub use report::{Reporter, RunSeverity};
pub use scheduler::{CheckRunner, RunSummary};
pub use types::{CheckTarget, NotificationGroup, Protocol, ServerCheck};
pub use verifier::Verifier;

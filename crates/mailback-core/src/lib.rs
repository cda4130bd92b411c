pub mod bootstrap;
pub mod config;
pub mod dedup;
pub mod gmail;
pub mod mail;
pub mod processor;
pub mod reply;
pub mod scheduler;
pub mod telemetry;

pub use bootstrap::{ReplyIdentity, authorize, build_processor, resolve_reply_identity};
pub use config::Config;
pub use dedup::DedupGate;
pub use mail::{MailService, RemoteServiceError};
pub use processor::{CycleReport, MailProcessor, ProcessorConfig, ProcessorError};
pub use scheduler::{SchedulerConfig, SchedulerError, run_scheduler};
pub use telemetry::{TelemetryError, TelemetryGuard, init_logging, init_telemetry};

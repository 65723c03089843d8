pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod normalize;
pub mod notify;
pub mod source;
pub mod transform;

pub use batch::{BatchDriver, BatchReport, FileFailure, FileOutcome};
pub use config::{AppConfig, ConfigError, Directories};
pub use error::{ErrorKind, PipelineError};
pub use gateway::{Lookup, LookupGateway};
pub use normalize::EnrichmentResult;
pub use notify::{Notifier, RunSummary, SmtpNotifier};
pub use source::{FixtureRouteSource, PgRouteSource, RouteSource};
pub use transform::OutputRow;

/// Notification dispatch services
///
/// - `directory` / `pg_directory`: device preferences and read receipts
/// - `eligibility`: who should receive a push
/// - `dispatcher`: batched delivery through the push gateway
/// - `orchestrator`: broadcast + push entry points for producers
/// - `maintenance`: retention sweeper
pub mod content;
pub mod directory;
pub mod dispatcher;
pub mod eligibility;
pub mod maintenance;
pub mod orchestrator;
pub mod pg_directory;

pub use directory::{DeviceDirectory, EligibilityCriteria, InMemoryDirectory, ReadReceiptStore};
pub use dispatcher::{BatchDispatcher, DeliveryFailure, DispatchReport, DEFAULT_BATCH_SIZE};
pub use eligibility::EligibilityResolver;
pub use maintenance::{RetentionSweeper, SweepReport};
pub use orchestrator::{
    BulkSummary, DispatchOrchestrator, DispatchSettings, NotifyOutcome, PushOutcome,
};
pub use pg_directory::PgDirectory;

pub mod backup;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod pending;
pub mod restore;
pub mod scheduler;
pub mod state_machine;
pub mod status;
pub mod store;
pub mod validation;
pub mod watch;

pub use backup::{BackupAgentHandler, BackupOperatorHandler};
pub use context::Context;
pub use engine::{DEFAULT_CACHE_SYNC_TIMEOUT, DEFAULT_MAX_RETRIES, Engine, RetryPolicy, SyncHandler};
pub use error::{BackoffConfig, Error, Result};
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher, reasons};
pub use pending::PendingOutcomes;
pub use restore::{RestoreAgentHandler, RestoreOperatorHandler};
pub use scheduler::schedule_member;
pub use state_machine::{TransitionResult, WorkEvent, WorkPhase, WorkStateMachine};
pub use status::{ConditionBuilder, is_running, is_scheduled, is_terminal, set_condition};
pub use store::{FIELD_MANAGER, KubeStore, ResourceStore};
pub use validation::{FieldError, FieldErrorKind, FieldErrors, validate_backup_spec, validate_restore_spec};
pub use watch::{EventFilter, ObjectKey, agent_filter, object_key, operator_filter};

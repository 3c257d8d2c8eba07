use ixsync_client::StoreError;
use ixsync_core::ValidationError;

/// Errors surfaced by loading, planning and executing a sync.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("duplicate index definition {scope}.{collection}.{name}")]
    DuplicateDefinition { scope: String, collection: String, name: String },
    /// The store rejected the dry-run statement for this definition.
    #[error("invalid index definition {name}: {source}")]
    InvalidDefinition {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("{origin}: {message}")]
    Load { origin: String, message: String },
    #[error("index store: {0}")]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}", plan_failure_message(.errors, .skipped))]
    PlanFailure { errors: usize, skipped: usize },
}

impl SyncError {
    pub fn load(origin: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Load { origin: origin.into(), message: message.into() }
    }
}

fn plan_failure_message(errors: &usize, skipped: &usize) -> String {
    if *skipped == 0 {
        format!("plan completed with {} errors", errors)
    } else {
        format!("plan failed with {} errors, {} mutations skipped", errors, skipped)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

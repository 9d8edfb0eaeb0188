//! Progress reporting and cooperative cancellation for long-running imports.

/// Represents a snapshot of the progress during a long-running operation.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// A description of the current stage (e.g., "Resolving relations").
    pub stage_description: String,
    /// Number of items processed in the current stage.
    pub current_item: u64,
    /// Total number of items expected in the current stage (if calculable).
    pub total_items: Option<u64>,
    /// An optional message providing more context (e.g., "42 pending relations").
    pub message: Option<String>,
}

/// Type alias for the progress callback function.
///
/// The callback receives a `ProgressUpdate` and returns `true` to continue, or
/// `false` to stop before the next phase starts. Work already applied is kept.
pub type ProgressCallback = Box<dyn FnMut(ProgressUpdate) -> bool + Send + Sync>;

/// The fixed points at which an import reports progress and checks for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    MainPass,
    Relations,
    EntryRefs,
    OrphanCleanup,
}

impl Checkpoint {
    pub const ALL: [Checkpoint; 4] = [
        Checkpoint::MainPass,
        Checkpoint::Relations,
        Checkpoint::EntryRefs,
        Checkpoint::OrphanCleanup,
    ];

    pub fn description(self) -> &'static str {
        match self {
            Checkpoint::MainPass => "Importing entries",
            Checkpoint::Relations => "Resolving relations",
            Checkpoint::EntryRefs => "Resolving entry references",
            Checkpoint::OrphanCleanup => "Removing orphans",
        }
    }

    /// One-based position among the checkpoints.
    pub fn ordinal(self) -> u64 {
        match self {
            Checkpoint::MainPass => 1,
            Checkpoint::Relations => 2,
            Checkpoint::EntryRefs => 3,
            Checkpoint::OrphanCleanup => 4,
        }
    }
}

impl ProgressUpdate {
    /// Creates a new progress update for the start of a stage.
    pub fn new_stage(description: String, total_items: Option<u64>) -> Self {
        ProgressUpdate {
            stage_description: description,
            current_item: 0,
            total_items,
            message: None,
        }
    }

    /// Creates the update sent when an import reaches `checkpoint`.
    pub fn checkpoint(checkpoint: Checkpoint, message: Option<String>) -> Self {
        ProgressUpdate {
            stage_description: "Import".to_string(),
            current_item: checkpoint.ordinal(),
            total_items: Some(Checkpoint::ALL.len() as u64),
            message: Some(message.unwrap_or_else(|| checkpoint.description().to_string())),
        }
    }
}

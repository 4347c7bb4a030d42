//! Pipeline-specific error types.

use thiserror::Error;

/// Lifecycle phase in which a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    Initialize,
    Prepare,
    Execute,
    Finish,
}

impl std::fmt::Display for StagePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StagePhase::Initialize => write!(f, "initialize"),
            StagePhase::Prepare => write!(f, "prepare"),
            StagePhase::Execute => write!(f, "execute"),
            StagePhase::Finish => write!(f, "finish"),
        }
    }
}

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Dimension '{name}' is already registered as {existing}, cannot redefine as {requested}")]
    DimensionConflict {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Point index {index} out of range (size {size})")]
    OutOfRange { index: usize, size: usize },

    #[error("Point index {index} exceeds buffer capacity {capacity}")]
    CapacityExceeded { index: usize, capacity: usize },

    #[error("Unknown option '{0}'")]
    UnknownOption(String),

    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    #[error("Cycle detected in pipeline graph")]
    CyclicPipeline,

    #[error("Missing dimension '{0}'")]
    MissingDimension(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A writer failed partway through a chunk after durably writing
    /// `committed` of its points.
    #[error("{source} ({committed} points of the chunk written)")]
    PartialWrite {
        committed: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Stage '{stage}' failed during {phase} ({committed} points committed): {source}")]
    Stage {
        stage: String,
        phase: StagePhase,
        committed: u64,
        #[source]
        source: Box<PipelineError>,
    },
}

/// Discriminant of a [`PipelineError`], seen through any stage wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DimensionConflict,
    TypeMismatch,
    OutOfRange,
    CapacityExceeded,
    UnknownOption,
    UnknownStage,
    CyclicPipeline,
    MissingDimension,
    Resource,
    InvalidState,
    Script,
    InvalidPipeline,
    Io,
}

impl PipelineError {
    /// Wrap an error with the stage and phase it escaped from. An error that
    /// is already wrapped keeps its original attribution.
    pub fn in_stage(self, stage: impl Into<String>, phase: StagePhase, committed: u64) -> Self {
        match self {
            wrapped @ PipelineError::Stage { .. } => wrapped,
            other => PipelineError::Stage {
                stage: stage.into(),
                phase,
                committed,
                source: Box::new(other),
            },
        }
    }

    /// Mark a writer failure as having written `committed` points of the
    /// chunk before it happened.
    pub fn partial(self, committed: usize) -> Self {
        PipelineError::PartialWrite {
            committed,
            source: Box::new(self),
        }
    }

    /// The innermost error.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } | PipelineError::PartialWrite { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            PipelineError::DimensionConflict { .. } => ErrorKind::DimensionConflict,
            PipelineError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            PipelineError::OutOfRange { .. } => ErrorKind::OutOfRange,
            PipelineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            PipelineError::UnknownOption(_) => ErrorKind::UnknownOption,
            PipelineError::UnknownStage(_) => ErrorKind::UnknownStage,
            PipelineError::CyclicPipeline => ErrorKind::CyclicPipeline,
            PipelineError::MissingDimension(_) => ErrorKind::MissingDimension,
            PipelineError::Resource(_) => ErrorKind::Resource,
            PipelineError::InvalidState(_) => ErrorKind::InvalidState,
            PipelineError::Script(_) => ErrorKind::Script,
            PipelineError::InvalidPipeline(_) => ErrorKind::InvalidPipeline,
            PipelineError::Io(_) => ErrorKind::Io,
            PipelineError::Stage { .. } | PipelineError::PartialWrite { .. } => {
                unreachable!("root() unwraps wrapper errors")
            }
        }
    }

    /// Stage name and phase, if this error was attributed to a stage.
    pub fn stage(&self) -> Option<(&str, StagePhase)> {
        match self {
            PipelineError::Stage { stage, phase, .. } => Some((stage.as_str(), *phase)),
            _ => None,
        }
    }

    /// Points durably committed by writers before the failure.
    pub fn committed(&self) -> u64 {
        match self {
            PipelineError::Stage { committed, .. } => *committed,
            _ => 0,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

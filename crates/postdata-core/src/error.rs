// crates/postdata-core/src/error.rs

use std::fmt;
use std::path::PathBuf;

use postdata_parser::ParserError;
use serde::Serialize;
use thiserror::Error;

/// Stable identifiers for the classes of failure the job can hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RowSkip,
    FileIo,
    DestinationIo,
    InputShape,
    ExternalService,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RowSkip => "row_skip",
            ErrorKind::FileIo => "file_io",
            ErrorKind::DestinationIo => "destination_io",
            ErrorKind::InputShape => "input_shape",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to list input directory {path}: {source}")]
    ListInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read input file {path}: {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("input file {path} is not valid CSV: {source}")]
    MalformedInput {
        path: PathBuf,
        #[source]
        source: ParserError,
    },

    #[error("input file {path} has an unusable header: {source}")]
    InputShape {
        path: PathBuf,
        #[source]
        source: ParserError,
    },

    #[error("failed to prepare directory {path}: {source}")]
    PrepareDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    EncodeArtifact {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to move {from} to {to}: {source}")]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn from_parser(path: PathBuf, source: ParserError) -> Self {
        match source {
            ParserError::MissingColumns { .. } => PipelineError::InputShape { path, source },
            other => PipelineError::MalformedInput {
                path,
                source: other,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ListInput { .. }
            | PipelineError::ReadInput { .. }
            | PipelineError::MalformedInput { .. } => ErrorKind::FileIo,
            PipelineError::InputShape { .. } => ErrorKind::InputShape,
            PipelineError::PrepareDirectory { .. }
            | PipelineError::WriteArtifact { .. }
            | PipelineError::EncodeArtifact { .. }
            | PipelineError::Relocate { .. } => ErrorKind::DestinationIo,
        }
    }

    /// Fatal errors abort the whole batch; the rest only abort the current file.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::ReadInput { .. } | PipelineError::MalformedInput { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

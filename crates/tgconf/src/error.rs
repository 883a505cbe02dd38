use crate::collaborators::CollaboratorError;
use crate::interpolation::EvalError;
use crate::loader::LoadError;
use std::path::PathBuf;

/// Errors of type level checks on a merged configuration
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MergeError {
    #[error("remote_state requires a backend")]
    RemoteStateWithoutBackend,
    #[error("assume_role_duration_hours must be positive, got {0}")]
    InvalidRoleDuration(i64),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unable to decode {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    #[error("{}: include requires a path or a source", .0.display())]
    MissingIncludeTarget(PathBuf),
    #[error("{}: evaluation failed", path.display())]
    Evaluation {
        path: PathBuf,
        #[source]
        source: EvalError,
    },
    #[error("{}: {reason}", path.display())]
    CycleOrDepthExceeded { path: PathBuf, reason: String },
    #[error("{}: no configuration found", .0.display())]
    NoConfigurationFound(PathBuf),
    #[error("{}: invalid configuration", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: MergeError,
    },
    #[error("{}: collaborator failed", path.display())]
    Collaborator {
        path: PathBuf,
        #[source]
        source: CollaboratorError,
    },
    #[error("resolution cancelled")]
    Cancelled,
}

impl From<LoadError> for ConfigError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Evaluation {
                path,
                source: EvalError::TooManyParentFolders { max, .. },
            } => ConfigError::CycleOrDepthExceeded {
                path,
                reason: format!("more than {max} parent folders searched"),
            },
            LoadError::Evaluation {
                source: EvalError::Collaborator {
                    source: CollaboratorError::Cancelled,
                    ..
                },
                ..
            }
            | LoadError::Fetch {
                source: CollaboratorError::Cancelled,
                ..
            } => ConfigError::Cancelled,
            LoadError::Evaluation { path, source } => ConfigError::Evaluation { path, source },
            LoadError::Fetch { source_uri, source } => ConfigError::Collaborator {
                path: PathBuf::from(source_uri),
                source,
            },
            LoadError::NoConfigurationFound(path) => ConfigError::NoConfigurationFound(path),
            LoadError::Io { ref path, .. }
            | LoadError::HclParseFailed { ref path, .. }
            | LoadError::StructuredParseFailed { ref path, .. } => ConfigError::Decode {
                path: path.clone(),
                source: err,
            },
            LoadError::Decode(ref decode) => ConfigError::Decode {
                path: decode.path.clone(),
                source: err,
            },
        }
    }
}

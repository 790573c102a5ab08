use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Template resolution errors, raised before any engine call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template reference {{{{{path}}}}} in {location}")]
    UnresolvedReference { path: String, location: String },

    #[error("template reference {{{{{path}}}}} in {location} does not point at a scalar value")]
    NotAScalar { path: String, location: String },

    #[error("circular template reference {{{{{path}}}}} detected in {location}")]
    CircularReference { path: String, location: String },
}

/// Container engine boundary errors.
///
/// Adapters classify and report; they never retry. Whatever retry policy
/// exists belongs to callers, and the orchestration engine deliberately has
/// none.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("engine command timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to pull image {image}: {detail}")]
    ImagePull { image: String, detail: String },

    #[error("failed to create group {group}: {detail}")]
    GroupCreate { group: String, detail: String },

    #[error("failed to start container {container}: {detail}")]
    ContainerStart { container: String, detail: String },

    #[error("engine command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("unknown service(s): {requested}. available: {available}")]
    UnknownService { requested: String, available: String },

    #[error("invalid service spec: {0}")]
    InvalidSpec(String),

    #[error("secret store error: {0}")]
    Secret(String),

    #[error("{failed} service(s) failed to start")]
    ServicesFailed { failed: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<dialoguer::Error> for Error {
    fn from(err: dialoguer::Error) -> Self {
        // dialoguer::Error wraps an IO error
        Error::Io(std::io::Error::other(err.to_string()))
    }
}

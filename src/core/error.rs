use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("no principal with arn: {0}")]
    PrincipalNotFound(String),

    #[error("no resource with arn: {0}")]
    ResourceNotFound(String),

    #[error("unable to resolve action: {0}")]
    UnknownAction(String),

    #[error("too many matches for {arn}: {}", matches.join(", "))]
    AmbiguousArn { arn: String, matches: Vec<String> },

    #[error("{entity} references unresolved {reference}")]
    UnresolvedReference { entity: String, reference: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Unknown condition operator: {0}")]
    UnknownConditionOperator(String),

    #[error("Worker pool stopped before all jobs completed")]
    PoolStopped,

    #[error("Simulation timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

use crate::model::NetNsId;
use crate::model::link::LgrId;

#[derive(Debug, thiserror::Error)]
pub enum SmcError {
    #[error("network namespace {0} is not registered")]
    UnknownNamespace(NetNsId),
    #[error("network namespace {0} is already registered")]
    NamespaceExists(NetNsId),
    #[error("cannot allocate state for network namespace {0}")]
    ResourceExhausted(NetNsId),
    #[error("unknown tunable: {0}")]
    UnknownTunable(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{name} must be at least {min}, got {value}")]
    BelowMinimum {
        name: &'static str,
        min: i64,
        value: i64,
    },
    #[error("link group {0} is already registered")]
    LinkGroupExists(LgrId),
    #[error("unknown link group {0}")]
    UnknownLinkGroup(String),
    #[error("link index {0} out of range")]
    InvalidLinkIndex(usize),
    #[error("state file error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[source] std::io::Error),
}

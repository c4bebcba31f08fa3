use std::fmt;

use crate::model::Id;

/// Which kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Item,
    Booking,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::User => "user",
            Entity::Item => "item",
            Entity::Booking => "booking",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, Id),
    /// The acting user has no rights for the requested action.
    Forbidden(String),
    InvalidInput(String),
    /// The requested status change conflicts with the current status.
    InvalidState(String),
    AlreadyExists(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} with id {id} does not exist"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            EngineError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

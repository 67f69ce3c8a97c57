use crate::participant::{ParticipantId, Year};
use crate::validator::Lookback;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("A pool of {size} participant(s) cannot be drawn, at least two are required")]
    InvalidPool { size: usize },
    #[error(
        "No valid assignment found for {pool_size} participants with a lookback of {lookback} after {attempts} attempts"
    )]
    Exhausted {
        pool_size: usize,
        lookback: Lookback,
        attempts: usize,
    },
    #[error("No valid assignment exists for {pool_size} participants with a lookback of {lookback}")]
    Infeasible { pool_size: usize, lookback: Lookback },
    #[error("Draw was cancelled after {attempts} attempts")]
    Cancelled { attempts: usize },
}

impl GenerationError {
    /// True when the round failed because of the constraints rather than the caller's input.
    pub fn is_constraint_failure(&self) -> bool {
        matches!(
            self,
            GenerationError::Exhausted { .. } | GenerationError::Infeasible { .. }
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DataIntegrityError {
    #[error("Participant {giver} is recorded as their own receiver in {year}")]
    SelfInHistory { giver: ParticipantId, year: Year },
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Receiver {receiver} is already assigned for {year}")]
    DuplicateReceiver { receiver: ParticipantId, year: Year },
    #[error("Giver {giver} already has a receiver for {year}")]
    GiverAlreadyAssigned { giver: ParticipantId, year: Year },
    #[error("Giver {giver} has no assignment for {year}")]
    NoAssignment { giver: ParticipantId, year: Year },
    #[error("Unknown participant {0}")]
    UnknownParticipant(ParticipantId),
    #[error("A participant named {0:?} already exists")]
    DuplicateName(String),
    #[error("Malformed entry in tree {tree}")]
    Corrupt { tree: &'static str },
    #[error(transparent)]
    Integrity(#[from] DataIntegrityError),
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<std::convert::Infallible>),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum IdError {
    #[error("Invalid bech32 participant id: {0}")]
    Bech32(#[from] bech32::DecodeError),
    #[error("Participant id must use the {expected:?} prefix, found {found:?}")]
    WrongPrefix { expected: String, found: String },
    #[error("Participant id must be 16 bytes, found {0}")]
    WrongLength(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read draw policy: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse draw policy: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid draw policy: {0}")]
    Invalid(String),
}

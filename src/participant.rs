//! Participants, their identifiers and historical assignment records
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Utc};
use uuid7::uuid7;

use super::error::IdError;
use super::utils;

/// Calendar year a round belongs to.
pub type Year = i32;

/// The year the clock currently reads, used when the caller does not pick one.
pub fn current_year() -> Year {
    Utc::now().year()
}

// opaque id, the algorithm never looks at display names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId([u8; 16]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Role {
    #[n(0)]
    Admin,
    #[n(1)]
    Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Participant {
    #[n(0)]
    pub id: ParticipantId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub role: Role,
}

/// One giver -> receiver pairing from a completed round. Never mutated once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct HistoryRecord {
    #[n(0)]
    pub giver: ParticipantId,
    #[n(1)]
    pub receiver: ParticipantId,
    #[n(2)]
    pub year: Year,
}

impl ParticipantId {
    pub fn new() -> Self {
        Self(*uuid7().as_bytes())
    }
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = utils::id_to_bech32(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

impl FromStr for ParticipantId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        utils::id_from_bech32(s).map(ParticipantId)
    }
}

impl Participant {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            id: ParticipantId::new(),
            name: name.into(),
            role,
        }
    }
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl HistoryRecord {
    pub fn new(giver: ParticipantId, receiver: ParticipantId, year: Year) -> Self {
        Self {
            giver,
            receiver,
            year,
        }
    }
}

impl<C> minicbor::Encode<C> for ParticipantId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for ParticipantId {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes: [u8; 16] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("participant id must be 16 bytes"))?;

        Ok(ParticipantId(bytes))
    }
}

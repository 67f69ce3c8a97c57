//! Utility functions for encoding participant ids

use bech32::{Bech32m, Hrp};

use super::error::IdError;

pub const ID_PREFIX: &str = "santa";

const HRP: Hrp = Hrp::parse_unchecked(ID_PREFIX);

// encode raw id bytes using bech32m with the santa prefix
pub fn id_to_bech32(bytes: &[u8; 16]) -> Result<String, bech32::EncodeError> {
    bech32::encode::<Bech32m>(HRP, bytes)
}

pub fn id_from_bech32(encoded: &str) -> Result<[u8; 16], IdError> {
    let (hrp, data) = bech32::decode(encoded)?;
    if hrp != HRP {
        return Err(IdError::WrongPrefix {
            expected: ID_PREFIX.to_string(),
            found: hrp.to_string(),
        });
    }

    let len = data.len();
    data.try_into().map_err(|_| IdError::WrongLength(len))
}

//! Serde adapters keeping byte fields textual, so signatures and account
//! keys stay readable in the canonical encoding.

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn to_hex<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&hex::encode(bytes))
}

pub fn from_hex<'de, D>(de: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(de)?;
    hex::decode(&text).map_err(|e| D::Error::custom(format!("expected hex-encoded bytes: {e}")))
}

pub fn array_from_hex<'de, D, const N: usize>(de: D) -> Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(de)?;
    let mut bytes = [0u8; N];
    hex::decode_to_slice(&text, &mut bytes)
        .map_err(|e| D::Error::custom(format!("expected {} hex characters: {e}", 2 * N)))?;
    Ok(bytes)
}

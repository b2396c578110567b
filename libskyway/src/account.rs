use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// A ledger sequence number.
pub type SequenceNumber = u64;

/// A ledger account identifier: the account's ed25519 public key, rendered as
/// lowercase hex. All protocol signatures by a party are verified against the
/// key embedded in one of its account identifiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(
    #[serde(serialize_with = "crate::helpers::to_hex", deserialize_with = "crate::helpers::array_from_hex")]
    [u8; 32],
);

impl AccountId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        AccountId(bytes)
    }

    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        AccountId(key.to_bytes())
    }

    pub fn from_hex(address: &str) -> Result<Self, AccountError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(address, &mut bytes).map_err(|_| AccountError::MalformedAddress(address.into()))?;
        Ok(AccountId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Recovers the verification key. Fails if the bytes are not a valid
    /// curve point, which can only happen for addresses that never belonged
    /// to a real keypair.
    pub fn verifying_key(&self) -> Result<VerifyingKey, AccountError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| AccountError::NotAKey(self.to_hex()))
    }

    /// The signature hint: the trailing 4 bytes of the public key, carried on
    /// detached signatures so a verifier can pick the right key.
    pub fn sig_hint(&self) -> [u8; 4] {
        let mut hint = [0u8; 4];
        hint.copy_from_slice(&self.0[28..]);
        hint
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountId({})", self.to_hex())
    }
}

impl FromStr for AccountId {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountId::from_hex(s)
    }
}

/// The party's primary wallet account on the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAcct {
    pub address: AccountId,
    pub seqnum: SequenceNumber,
}

impl WalletAcct {
    pub fn new(address: AccountId, seqnum: SequenceNumber) -> Self {
        WalletAcct { address, seqnum }
    }
}

#[derive(Clone, Debug, Error)]
pub enum AccountError {
    #[error("malformed account address {0}")]
    MalformedAddress(String),
    #[error("account address {0} is not a valid verification key")]
    NotAKey(String),
}

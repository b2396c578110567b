use crate::account::AccountId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A detached signature: the raw ed25519 signature plus a 4-byte hint
/// identifying the tail of the signing public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedSig {
    #[serde(serialize_with = "crate::helpers::to_hex", deserialize_with = "crate::helpers::array_from_hex")]
    hint: [u8; 4],
    #[serde(serialize_with = "crate::helpers::to_hex", deserialize_with = "crate::helpers::from_hex")]
    signature: Vec<u8>,
}

impl DetachedSig {
    pub fn hint(&self) -> [u8; 4] {
        self.hint
    }

    pub fn signature_bytes(&self) -> &[u8] {
        &self.signature
    }
}

/// Signs raw bytes with `key`, producing a detached signature hinted with the
/// key's own address.
pub fn sign_bytes(bytes: &[u8], key: &SigningKey) -> DetachedSig {
    let account = AccountId::from_verifying_key(&key.verifying_key());
    DetachedSig { hint: account.sig_hint(), signature: key.sign(bytes).to_bytes().to_vec() }
}

/// Signs a 32-byte transaction hash.
pub fn sign_tx_hash(hash: &[u8; 32], key: &SigningKey) -> DetachedSig {
    sign_bytes(hash, key)
}

/// Verifies a detached signature over `bytes` against the key embedded in
/// `account`.
pub fn verify_bytes(bytes: &[u8], account: &AccountId, sig: &DetachedSig) -> Result<(), SigVerifyError> {
    if sig.hint != account.sig_hint() {
        return Err(SigVerifyError::HintMismatch);
    }
    let key = account.verifying_key().map_err(|_| SigVerifyError::NotAKey(account.to_hex()))?;
    let signature = Signature::from_slice(&sig.signature).map_err(|_| SigVerifyError::Malformed)?;
    key.verify(bytes, &signature).map_err(|_| SigVerifyError::BadSignature)
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SigVerifyError {
    #[error("signature hint does not match the verification key")]
    HintMismatch,
    #[error("account address {0} is not a valid verification key")]
    NotAKey(String),
    #[error("malformed signature bytes")]
    Malformed,
    #[error("signature does not verify")]
    BadSignature,
}

#[cfg(test)]
mod test {
    use crate::crypto::keys::{derive_account, derive_key, Seed};
    use crate::crypto::sig::{sign_bytes, verify_bytes, SigVerifyError};

    #[test]
    fn sign_verify_round_trip() {
        let seed = Seed::from_bytes([5u8; 32]);
        let key = derive_key(&seed, 1);
        let account = derive_account(&seed, 1);
        let sig = sign_bytes(b"settlement payload", &key);
        assert!(verify_bytes(b"settlement payload", &account, &sig).is_ok());
    }

    #[test]
    fn rejects_wrong_message() {
        let seed = Seed::from_bytes([5u8; 32]);
        let key = derive_key(&seed, 1);
        let account = derive_account(&seed, 1);
        let sig = sign_bytes(b"settlement payload", &key);
        assert_eq!(verify_bytes(b"another payload", &account, &sig), Err(SigVerifyError::BadSignature));
    }

    #[test]
    fn rejects_wrong_key() {
        let seed = Seed::from_bytes([5u8; 32]);
        let sig = sign_bytes(b"payload", &derive_key(&seed, 1));
        let other = derive_account(&seed, 2);
        // A different key almost always changes the hint as well.
        let err = verify_bytes(b"payload", &other, &sig).unwrap_err();
        assert!(matches!(err, SigVerifyError::HintMismatch | SigVerifyError::BadSignature));
    }
}

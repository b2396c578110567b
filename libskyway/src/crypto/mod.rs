pub mod keys;
pub mod sig;

pub use keys::{derive_account, derive_key, derive_primary, Seed, PRIMARY_KEY_INDEX};
pub use sig::{sign_bytes, sign_tx_hash, verify_bytes, DetachedSig, SigVerifyError};

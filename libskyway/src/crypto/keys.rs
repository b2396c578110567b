use crate::account::AccountId;
use blake2::Blake2b512;
use digest::Digest;
use ed25519_dalek::SigningKey;

/// Key index of the wallet's primary account key.
pub const PRIMARY_KEY_INDEX: u32 = 0;

/// Wallet entropy from which every signing key is derived. A channel reserves
/// three consecutive indices starting at its `key_index`: escrow,
/// host-ratchet and guest-ratchet.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed([u8; 32]);

impl Seed {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Seed(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seed(****)")
    }
}

/// Derives the signing key at `index` from the wallet seed.
pub fn derive_key(seed: &Seed, index: u32) -> SigningKey {
    let mut hasher = Blake2b512::new();
    hasher.update(b"skyway/key");
    hasher.update(seed.as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&digest[..32]);
    SigningKey::from_bytes(&key_bytes)
}

/// The wallet's primary account key.
pub fn derive_primary(seed: &Seed) -> SigningKey {
    derive_key(seed, PRIMARY_KEY_INDEX)
}

/// The ledger address of the key at `index`.
pub fn derive_account(seed: &Seed, index: u32) -> AccountId {
    AccountId::from_verifying_key(&derive_key(seed, index).verifying_key())
}

#[cfg(test)]
mod test {
    use crate::crypto::keys::{derive_account, derive_key, Seed};

    #[test]
    fn derivation_is_deterministic() {
        let seed = Seed::from_bytes([42u8; 32]);
        let a = derive_key(&seed, 3);
        let b = derive_key(&seed, 3);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn indices_yield_distinct_keys() {
        let seed = Seed::from_bytes([42u8; 32]);
        assert_ne!(derive_account(&seed, 0), derive_account(&seed, 1));
        assert_ne!(derive_account(&seed, 1), derive_account(&seed, 2));
    }

    #[test]
    fn seeds_yield_distinct_keys() {
        let a = derive_account(&Seed::from_bytes([1u8; 32]), 0);
        let b = derive_account(&Seed::from_bytes([2u8; 32]), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn random_seeds_do_not_collide() {
        use rand::RngCore;
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        rand::rng().fill_bytes(&mut a);
        rand::rng().fill_bytes(&mut b);
        assert_ne!(derive_account(&Seed::from_bytes(a), 0), derive_account(&Seed::from_bytes(b), 0));
    }
}

use crate::account::{AccountId, SequenceNumber, WalletAcct};
use crate::amount::{Amount, LedgerTime};
use crate::channel::Channel;
use crate::crypto::sig::DetachedSig;
use blake2::Blake2b512;
use digest::Digest;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Minimum balance a freshly created ledger account must carry.
pub const BASE_RESERVE: Amount = Amount::from_stroops(10_000_000);

/// The protocol role a transaction plays. The FSM treats the transaction
/// content as opaque bytes to sign; the role is what it dispatches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRole {
    Funding,
    SetupAccount,
    Ratchet,
    SettleWithGuest,
    SettleWithHost,
    SettleOnlyWithHost,
    CooperativeClose,
    TopUp,
    Cleanup,
}

impl Display for TxRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxRole::Funding => "funding",
            TxRole::SetupAccount => "setup-account",
            TxRole::Ratchet => "ratchet",
            TxRole::SettleWithGuest => "settle-with-guest",
            TxRole::SettleWithHost => "settle-with-host",
            TxRole::SettleOnlyWithHost => "settle-only-with-host",
            TxRole::CooperativeClose => "cooperative-close",
            TxRole::TopUp => "top-up",
            TxRole::Cleanup => "cleanup",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    CreateAccount { dest: AccountId, starting_balance: Amount },
    Pay { dest: AccountId, amount: Amount },
    BumpSequence { account: AccountId, to: SequenceNumber },
    MergeAccount { account: AccountId, dest: AccountId },
}

/// A ledger transaction in canonical form. `payload()` is the byte sequence
/// covered by detached signatures; re-serialization is deterministic because
/// field order follows declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub role: TxRole,
    pub source: AccountId,
    pub seqnum: SequenceNumber,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_time: Option<LedgerTime>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_time: Option<LedgerTime>,
    pub ops: Vec<Op>,
}

impl Tx {
    pub fn payload(&self) -> Result<Vec<u8>, ron::Error> {
        ron::to_string(self).map(String::into_bytes)
    }

    /// The 32-byte hash signatures cover. The network passphrase is mixed in
    /// so transactions cannot be replayed across networks.
    pub fn hash(&self, passphrase: &str) -> Result<[u8; 32], ron::Error> {
        let mut hasher = Blake2b512::new();
        hasher.update(passphrase.as_bytes());
        hasher.update(self.payload()?);
        let digest = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest[..32]);
        Ok(hash)
    }
}

/// A transaction plus the detached signatures gathered for it, in publishable
/// form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEnvelope {
    pub tx: Tx,
    pub sigs: Vec<DetachedSig>,
}

impl TxEnvelope {
    pub fn new(tx: Tx, sigs: Vec<DetachedSig>) -> Self {
        TxEnvelope { tx, sigs }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TxBuildError {
    #[error("sequence number overflow")]
    SeqnumOverflow,
    #[error("amount overflow")]
    AmountOverflow,
}

fn escrow_seq(ch: &Channel, offset: u64) -> Result<SequenceNumber, TxBuildError> {
    ch.round_number
        .checked_mul(2)
        .and_then(|n| ch.base_sequence_number.checked_add(n))
        .and_then(|n| n.checked_add(offset))
        .ok_or(TxBuildError::SeqnumOverflow)
}

/// The transaction moving the host's stake into escrow, also topping the
/// ratchet accounts up with fee money. Consumes the host wallet's current
/// sequence number.
pub fn build_funding_tx(ch: &Channel, wallet: &WalletAcct) -> Result<Tx, TxBuildError> {
    let ratchet_feed = BASE_RESERVE.checked_add(ch.channel_feerate).ok_or(TxBuildError::AmountOverflow)?;
    let escrow_total = ch
        .host_amount
        .checked_add(BASE_RESERVE)
        .and_then(|a| a.checked_add(ch.channel_feerate))
        .ok_or(TxBuildError::AmountOverflow)?;
    Ok(Tx {
        role: TxRole::Funding,
        source: ch.host_acct,
        seqnum: wallet.seqnum,
        min_time: None,
        max_time: None,
        ops: vec![
            Op::Pay { dest: ch.escrow_acct, amount: escrow_total },
            Op::Pay { dest: ch.host_ratchet_acct, amount: ratchet_feed },
            Op::Pay { dest: ch.guest_ratchet_acct, amount: ratchet_feed },
        ],
    })
}

/// Creates one of the three channel accounts from the host wallet.
pub fn build_setup_account_tx(ch: &Channel, target: AccountId, seqnum: SequenceNumber) -> Tx {
    Tx {
        role: TxRole::SetupAccount,
        source: ch.host_acct,
        seqnum,
        min_time: None,
        max_time: None,
        ops: vec![Op::CreateAccount { dest: target, starting_balance: BASE_RESERVE }],
    }
}

/// The round's ratchet transaction: sourced from `ratchet_acct`, it bumps the
/// escrow sequence so only the current round's settlement pair can ever be
/// published. Expires once the round it protects is stale.
pub fn build_ratchet_tx(
    ch: &Channel,
    t: LedgerTime,
    ratchet_acct: AccountId,
    seq: SequenceNumber,
) -> Result<Tx, TxBuildError> {
    let bump_to = escrow_seq(ch, 0)?;
    Ok(Tx {
        role: TxRole::Ratchet,
        source: ratchet_acct,
        seqnum: seq.checked_add(1).ok_or(TxBuildError::SeqnumOverflow)?,
        min_time: None,
        max_time: Some(t + ch.finality_delay + ch.max_round_duration),
        ops: vec![Op::BumpSequence { account: ch.escrow_acct, to: bump_to }],
    })
}

/// First half of the settlement pair: pays the guest its balance.
pub fn build_settle_with_guest_tx(ch: &Channel, t: LedgerTime) -> Result<Tx, TxBuildError> {
    Ok(Tx {
        role: TxRole::SettleWithGuest,
        source: ch.escrow_acct,
        seqnum: escrow_seq(ch, 1)?,
        min_time: Some(t + ch.finality_delay),
        max_time: None,
        ops: vec![Op::Pay { dest: ch.guest_acct, amount: ch.guest_amount }],
    })
}

/// Second half of the settlement pair: returns everything left in escrow to
/// the host.
pub fn build_settle_with_host_tx(ch: &Channel, t: LedgerTime) -> Result<Tx, TxBuildError> {
    Ok(Tx {
        role: TxRole::SettleWithHost,
        source: ch.escrow_acct,
        seqnum: escrow_seq(ch, 2)?,
        min_time: Some(t + ch.finality_delay),
        max_time: None,
        ops: vec![Op::MergeAccount { account: ch.escrow_acct, dest: ch.host_acct }],
    })
}

/// The single settlement used while the guest balance is zero.
pub fn build_settle_only_with_host_tx(ch: &Channel, t: LedgerTime) -> Result<Tx, TxBuildError> {
    Ok(Tx {
        role: TxRole::SettleOnlyWithHost,
        source: ch.escrow_acct,
        seqnum: escrow_seq(ch, 1)?,
        min_time: Some(t + ch.finality_delay),
        max_time: None,
        ops: vec![Op::MergeAccount { account: ch.escrow_acct, dest: ch.host_acct }],
    })
}

/// Single-transaction dissolution at the current balances. Valid only while
/// the escrow sequence is still at its base, i.e. no ratchet has fired.
pub fn build_cooperative_close_tx(ch: &Channel) -> Result<Tx, TxBuildError> {
    let mut ops = Vec::with_capacity(2);
    if !ch.guest_amount.is_zero() {
        ops.push(Op::Pay { dest: ch.guest_acct, amount: ch.guest_amount });
    }
    ops.push(Op::MergeAccount { account: ch.escrow_acct, dest: ch.host_acct });
    Ok(Tx {
        role: TxRole::CooperativeClose,
        source: ch.escrow_acct,
        seqnum: ch.base_sequence_number.checked_add(1).ok_or(TxBuildError::SeqnumOverflow)?,
        min_time: None,
        max_time: None,
        ops,
    })
}

/// Adds funds to escrow mid-channel from the host wallet.
pub fn build_top_up_tx(ch: &Channel, wallet: &WalletAcct, amount: Amount) -> Result<Tx, TxBuildError> {
    Ok(Tx {
        role: TxRole::TopUp,
        source: ch.host_acct,
        seqnum: wallet.seqnum,
        min_time: None,
        max_time: None,
        ops: vec![Op::Pay { dest: ch.escrow_acct, amount }],
    })
}

/// Tears the channel accounts back down after a setup that never completed.
pub fn build_cleanup_tx(ch: &Channel, wallet: &WalletAcct) -> Result<Tx, TxBuildError> {
    Ok(Tx {
        role: TxRole::Cleanup,
        source: ch.host_acct,
        seqnum: wallet.seqnum,
        min_time: None,
        max_time: None,
        ops: vec![
            Op::MergeAccount { account: ch.host_ratchet_acct, dest: ch.host_acct },
            Op::MergeAccount { account: ch.guest_ratchet_acct, dest: ch.host_acct },
            Op::MergeAccount { account: ch.escrow_acct, dest: ch.host_acct },
        ],
    })
}

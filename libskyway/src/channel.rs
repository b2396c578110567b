use crate::account::{AccountId, SequenceNumber, WalletAcct};
use crate::amount::{Amount, LedgerTime};
use crate::crypto::keys::{derive_account, derive_key, Seed, PRIMARY_KEY_INDEX};
use crate::crypto::sig::{sign_tx_hash, verify_bytes, DetachedSig};
use crate::error::ProtocolError;
use crate::msg::ChannelProposeMsg;
use crate::tx::{Tx, TxEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const DEFAULT_MAX_ROUND_DURATION: Duration = Duration::from_secs(3600);
pub const DEFAULT_FINALITY_DELAY: Duration = Duration::from_secs(3600);

/// Which side of the channel we are. The host funds and initiates; the guest
/// responds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    pub fn other(&self) -> Self {
        match self {
            Role::Host => Role::Guest,
            Role::Guest => Role::Host,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Role::Host)
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Role::Guest)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => write!(f, "Host"),
            Role::Guest => write!(f, "Guest"),
        }
    }
}

/// The channel's position in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Start,
    SettingUp,
    ChannelProposed,
    AwaitingFunding,
    AwaitingCleanup,
    Funded,
    Open,
    PaymentProposed,
    PaymentAccepted,
    AwaitingPaymentMerge,
    AwaitingClose,
    AwaitingSettlementMintime,
    AwaitingSettlement,
    Closed,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

impl Display for ChannelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelState::Start => "Start",
            ChannelState::SettingUp => "SettingUp",
            ChannelState::ChannelProposed => "ChannelProposed",
            ChannelState::AwaitingFunding => "AwaitingFunding",
            ChannelState::AwaitingCleanup => "AwaitingCleanup",
            ChannelState::Funded => "Funded",
            ChannelState::Open => "Open",
            ChannelState::PaymentProposed => "PaymentProposed",
            ChannelState::PaymentAccepted => "PaymentAccepted",
            ChannelState::AwaitingPaymentMerge => "AwaitingPaymentMerge",
            ChannelState::AwaitingClose => "AwaitingClose",
            ChannelState::AwaitingSettlementMintime => "AwaitingSettlementMintime",
            ChannelState::AwaitingSettlement => "AwaitingSettlement",
            ChannelState::Closed => "Closed",
        };
        write!(f, "{name}")
    }
}

/// Which of the three setup accounts have been observed on the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupProgress {
    pub host_ratchet: bool,
    pub guest_ratchet: bool,
    pub escrow: bool,
}

impl SetupProgress {
    pub fn complete(&self) -> bool {
        self.host_ratchet && self.guest_ratchet && self.escrow
    }
}

/// Parameters for a host-side `CreateChannel` command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub guest_acct: AccountId,
    pub host_amount: Amount,
    pub feerate: Amount,
    pub max_round_duration: Duration,
    pub finality_delay: Duration,
    pub funding_time: LedgerTime,
    /// First of the three consecutive seed indices reserved for this channel.
    pub key_index: u32,
    pub passphrase: String,
    pub counterparty_address: String,
}

/// The per-channel record. Exclusively owned by the updater for the duration
/// of a transition; drivers snapshot it between events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// The escrow account address, doubling as the channel identifier.
    pub(crate) id: String,
    pub(crate) role: Role,
    pub(crate) host_acct: AccountId,
    pub(crate) guest_acct: AccountId,
    pub(crate) escrow_acct: AccountId,
    pub(crate) host_ratchet_acct: AccountId,
    pub(crate) guest_ratchet_acct: AccountId,
    pub(crate) host_amount: Amount,
    pub(crate) guest_amount: Amount,
    pub(crate) channel_feerate: Amount,
    pub(crate) max_round_duration: Duration,
    pub(crate) finality_delay: Duration,
    pub(crate) funding_time: LedgerTime,
    /// Time of the last completed payment round.
    pub(crate) payment_time: LedgerTime,
    pub(crate) pending_payment_time: LedgerTime,
    /// The escrow account's starting sequence number, learned when the
    /// account appears on the ledger.
    pub(crate) base_sequence_number: SequenceNumber,
    pub(crate) round_number: u64,
    pub(crate) host_ratchet_acct_seqnum: SequenceNumber,
    pub(crate) guest_ratchet_acct_seqnum: SequenceNumber,
    pub(crate) funding_tx_seqnum: SequenceNumber,
    pub(crate) cleanup_tx_seqnum: SequenceNumber,
    pub(crate) pending_amount_sent: Amount,
    pub(crate) pending_amount_received: Amount,
    pub(crate) pending_top_up: Option<(SequenceNumber, Amount)>,
    pub(crate) setup_progress: SetupProgress,
    /// Fully signed transactions enabling unilateral close of the most
    /// recently completed round.
    pub(crate) current_ratchet_tx: Option<TxEnvelope>,
    /// Whether the published ratchet has been observed included; the
    /// settlement pair is held back until it has.
    pub(crate) ratchet_tx_included: bool,
    pub(crate) current_settle_with_guest_tx: Option<TxEnvelope>,
    pub(crate) current_settle_with_host_tx: Option<TxEnvelope>,
    /// The counterparty's just-proposed settlement pair, held while a payment
    /// round is open and promoted on completion.
    pub(crate) counterparty_latest_settle_with_guest_tx: Option<TxEnvelope>,
    pub(crate) counterparty_latest_settle_with_host_tx: Option<TxEnvelope>,
    pub(crate) counterparty_coop_close_sig: Option<DetachedSig>,
    pub(crate) last_msg_index: u64,
    pub(crate) key_index: u32,
    /// Ledger network identifier, mixed into every transaction hash.
    pub(crate) passphrase: String,
    pub(crate) counterparty_address: String,
    pub(crate) state: ChannelState,
}

impl Channel {
    /// A host-side channel, fresh out of a `CreateChannel` command. The
    /// escrow and ratchet accounts are derived from the wallet seed at the
    /// config's key index.
    pub fn new_host(cfg: &ChannelConfig, wallet: &WalletAcct, seed: &Seed) -> Self {
        let escrow_acct = derive_account(seed, cfg.key_index);
        let host_ratchet_acct = derive_account(seed, cfg.key_index + 1);
        let guest_ratchet_acct = derive_account(seed, cfg.key_index + 2);
        Channel {
            id: escrow_acct.to_hex(),
            role: Role::Host,
            host_acct: wallet.address,
            guest_acct: cfg.guest_acct,
            escrow_acct,
            host_ratchet_acct,
            guest_ratchet_acct,
            host_amount: cfg.host_amount,
            guest_amount: Amount::ZERO,
            channel_feerate: cfg.feerate,
            max_round_duration: cfg.max_round_duration,
            finality_delay: cfg.finality_delay,
            funding_time: cfg.funding_time,
            payment_time: cfg.funding_time,
            pending_payment_time: cfg.funding_time,
            base_sequence_number: 0,
            round_number: 1,
            host_ratchet_acct_seqnum: 0,
            guest_ratchet_acct_seqnum: 0,
            funding_tx_seqnum: 0,
            cleanup_tx_seqnum: 0,
            pending_amount_sent: Amount::ZERO,
            pending_amount_received: Amount::ZERO,
            pending_top_up: None,
            setup_progress: SetupProgress::default(),
            current_ratchet_tx: None,
            ratchet_tx_included: false,
            current_settle_with_guest_tx: None,
            current_settle_with_host_tx: None,
            counterparty_latest_settle_with_guest_tx: None,
            counterparty_latest_settle_with_host_tx: None,
            counterparty_coop_close_sig: None,
            last_msg_index: 0,
            key_index: cfg.key_index,
            passphrase: cfg.passphrase.clone(),
            counterparty_address: cfg.counterparty_address.clone(),
            state: ChannelState::Start,
        }
    }

    /// A guest-side skeleton, waiting in `Start` for a channel proposal. The
    /// sequence numbers are the guest's own observations of the setup
    /// accounts; they are kept when a proposal is adopted.
    pub fn new_guest(
        guest_acct: AccountId,
        passphrase: impl Into<String>,
        counterparty_address: impl Into<String>,
        base_sequence_number: SequenceNumber,
        host_ratchet_acct_seqnum: SequenceNumber,
        guest_ratchet_acct_seqnum: SequenceNumber,
    ) -> Self {
        Channel {
            id: String::new(),
            role: Role::Guest,
            host_acct: guest_acct,
            guest_acct,
            escrow_acct: guest_acct,
            host_ratchet_acct: guest_acct,
            guest_ratchet_acct: guest_acct,
            host_amount: Amount::ZERO,
            guest_amount: Amount::ZERO,
            channel_feerate: Amount::ZERO,
            max_round_duration: DEFAULT_MAX_ROUND_DURATION,
            finality_delay: DEFAULT_FINALITY_DELAY,
            funding_time: LedgerTime::from_unix(0),
            payment_time: LedgerTime::from_unix(0),
            pending_payment_time: LedgerTime::from_unix(0),
            base_sequence_number,
            round_number: 0,
            host_ratchet_acct_seqnum,
            guest_ratchet_acct_seqnum,
            funding_tx_seqnum: 0,
            cleanup_tx_seqnum: 0,
            pending_amount_sent: Amount::ZERO,
            pending_amount_received: Amount::ZERO,
            pending_top_up: None,
            setup_progress: SetupProgress::default(),
            current_ratchet_tx: None,
            ratchet_tx_included: false,
            current_settle_with_guest_tx: None,
            current_settle_with_host_tx: None,
            counterparty_latest_settle_with_guest_tx: None,
            counterparty_latest_settle_with_host_tx: None,
            counterparty_coop_close_sig: None,
            last_msg_index: 0,
            key_index: PRIMARY_KEY_INDEX,
            passphrase: passphrase.into(),
            counterparty_address: counterparty_address.into(),
            state: ChannelState::Start,
        }
    }

    /// The guest-side channel record seeded from an inbound proposal. Our own
    /// ledger observations (base and ratchet sequence numbers) survive; the
    /// rest comes from the proposal.
    pub(crate) fn from_proposal(&self, channel_id: &str, escrow_acct: AccountId, propose: &ChannelProposeMsg) -> Self {
        Channel {
            id: channel_id.to_string(),
            role: Role::Guest,
            host_acct: propose.host_acct,
            guest_acct: self.guest_acct,
            escrow_acct,
            host_ratchet_acct: propose.host_ratchet_acct,
            guest_ratchet_acct: propose.guest_ratchet_acct,
            host_amount: propose.host_amount,
            guest_amount: Amount::ZERO,
            channel_feerate: propose.feerate,
            max_round_duration: propose.max_round_duration,
            finality_delay: propose.finality_delay,
            funding_time: propose.funding_time,
            payment_time: propose.funding_time,
            pending_payment_time: propose.funding_time,
            base_sequence_number: self.base_sequence_number,
            round_number: 1,
            host_ratchet_acct_seqnum: self.host_ratchet_acct_seqnum,
            guest_ratchet_acct_seqnum: self.guest_ratchet_acct_seqnum,
            funding_tx_seqnum: 0,
            cleanup_tx_seqnum: 0,
            pending_amount_sent: Amount::ZERO,
            pending_amount_received: Amount::ZERO,
            pending_top_up: None,
            setup_progress: SetupProgress::default(),
            current_ratchet_tx: None,
            ratchet_tx_included: false,
            current_settle_with_guest_tx: None,
            current_settle_with_host_tx: None,
            counterparty_latest_settle_with_guest_tx: None,
            counterparty_latest_settle_with_host_tx: None,
            counterparty_coop_close_sig: None,
            last_msg_index: self.last_msg_index,
            key_index: PRIMARY_KEY_INDEX,
            passphrase: self.passphrase.clone(),
            counterparty_address: self.counterparty_address.clone(),
            state: self.state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn host_amount(&self) -> Amount {
        self.host_amount
    }

    pub fn guest_amount(&self) -> Amount {
        self.guest_amount
    }

    pub fn round_number(&self) -> u64 {
        self.round_number
    }

    pub fn payment_time(&self) -> LedgerTime {
        self.payment_time
    }

    pub fn pending_amount_sent(&self) -> Amount {
        self.pending_amount_sent
    }

    pub fn pending_amount_received(&self) -> Amount {
        self.pending_amount_received
    }

    pub fn my_balance(&self) -> Amount {
        match self.role {
            Role::Host => self.host_amount,
            Role::Guest => self.guest_amount,
        }
    }

    pub fn counterparty_balance(&self) -> Amount {
        match self.role {
            Role::Host => self.guest_amount,
            Role::Guest => self.host_amount,
        }
    }

    /// The account whose key verifies the counterparty's signatures: the host
    /// signs with the escrow key, the guest with its own account key.
    pub(crate) fn counterparty_verify_acct(&self) -> &AccountId {
        match self.role {
            Role::Guest => &self.escrow_acct,
            Role::Host => &self.guest_acct,
        }
    }

    pub(crate) fn my_ratchet(&self) -> (AccountId, SequenceNumber) {
        match self.role {
            Role::Host => (self.host_ratchet_acct, self.host_ratchet_acct_seqnum),
            Role::Guest => (self.guest_ratchet_acct, self.guest_ratchet_acct_seqnum),
        }
    }

    pub(crate) fn counterparty_ratchet(&self) -> (AccountId, SequenceNumber) {
        match self.role {
            Role::Host => (self.guest_ratchet_acct, self.guest_ratchet_acct_seqnum),
            Role::Guest => (self.host_ratchet_acct, self.host_ratchet_acct_seqnum),
        }
    }

    /// The hypothetical channel after receiving `amount` from the
    /// counterparty. Returns `None` on balance overflow or underflow.
    pub(crate) fn with_inbound_payment(&self, amount: Amount, bump_round: bool) -> Option<Channel> {
        let mut ch = self.clone();
        if bump_round {
            ch.round_number += 1;
        }
        match ch.role {
            Role::Guest => {
                ch.guest_amount = ch.guest_amount.checked_add(amount)?;
                ch.host_amount = ch.host_amount.checked_sub(amount)?;
            }
            Role::Host => {
                ch.host_amount = ch.host_amount.checked_add(amount)?;
                ch.guest_amount = ch.guest_amount.checked_sub(amount)?;
            }
        }
        Some(ch)
    }

    /// The hypothetical channel after paying `amount` to the counterparty.
    pub(crate) fn with_outbound_payment(&self, amount: Amount) -> Option<Channel> {
        let mut ch = self.clone();
        match ch.role {
            Role::Guest => {
                ch.guest_amount = ch.guest_amount.checked_sub(amount)?;
                ch.host_amount = ch.host_amount.checked_add(amount)?;
            }
            Role::Host => {
                ch.host_amount = ch.host_amount.checked_sub(amount)?;
                ch.guest_amount = ch.guest_amount.checked_add(amount)?;
            }
        }
        Some(ch)
    }

    /// Signs a transaction with this channel's signing key (escrow key for
    /// the host, primary account key for the guest).
    pub(crate) fn sign_tx(&self, tx: &Tx, seed: Option<&Seed>) -> Result<DetachedSig, ProtocolError> {
        let seed = seed.ok_or(ProtocolError::NoSeed)?;
        let key = derive_key(seed, self.key_index);
        let hash = tx.hash(&self.passphrase)?;
        Ok(sign_tx_hash(&hash, &key))
    }

    pub(crate) fn verify_counterparty_sig(
        &self,
        tx: &Tx,
        sig: &DetachedSig,
        label: &'static str,
    ) -> Result<(), ProtocolError> {
        let hash = tx.hash(&self.passphrase)?;
        verify_bytes(&hash, self.counterparty_verify_acct(), sig).map_err(|e| ProtocolError::sig_verify(label, e))
    }

    /// Stores the counterparty's proposed settlement pair, co-signed with our
    /// own key so the stored envelopes are complete.
    pub(crate) fn set_counterparty_settlement_txes(
        &mut self,
        guest_tx: Option<Tx>,
        host_tx: Tx,
        guest_sig: Option<DetachedSig>,
        host_sig: DetachedSig,
        seed: Option<&Seed>,
    ) -> Result<(), ProtocolError> {
        self.counterparty_latest_settle_with_guest_tx = match (guest_tx, guest_sig) {
            (Some(tx), Some(their_sig)) => {
                let ours = self.sign_tx(&tx, seed)?;
                Some(TxEnvelope::new(tx, vec![ours, their_sig]))
            }
            _ => None,
        };
        let ours = self.sign_tx(&host_tx, seed)?;
        self.counterparty_latest_settle_with_host_tx = Some(TxEnvelope::new(host_tx, vec![ours, host_sig]));
        Ok(())
    }

    /// Stores a settlement pair as both the counterparty-latest and the
    /// current publishable pair.
    pub(crate) fn set_latest_settlement_txes(
        &mut self,
        guest_tx: Option<Tx>,
        host_tx: Tx,
        guest_sig: Option<DetachedSig>,
        host_sig: DetachedSig,
        seed: Option<&Seed>,
    ) -> Result<(), ProtocolError> {
        self.set_counterparty_settlement_txes(guest_tx, host_tx, guest_sig, host_sig, seed)?;
        self.current_settle_with_guest_tx = self.counterparty_latest_settle_with_guest_tx.clone();
        self.current_settle_with_host_tx = self.counterparty_latest_settle_with_host_tx.clone();
        Ok(())
    }

    /// Stores the round's ratchet transaction with both signatures.
    pub(crate) fn sign_ratchet_tx(
        &mut self,
        tx: Tx,
        counterparty_sig: DetachedSig,
        seed: Option<&Seed>,
    ) -> Result<(), ProtocolError> {
        let ours = self.sign_tx(&tx, seed)?;
        self.current_ratchet_tx = Some(TxEnvelope::new(tx, vec![ours, counterparty_sig]));
        Ok(())
    }

    /// The time lock on the current settlement pair, if one is held.
    pub(crate) fn settlement_min_time(&self) -> Option<LedgerTime> {
        self.current_settle_with_host_tx.as_ref().and_then(|env| env.tx.min_time)
    }
}

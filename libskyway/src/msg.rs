use crate::account::{AccountId, SequenceNumber};
use crate::amount::{Amount, LedgerTime};
use crate::crypto::keys::{derive_primary, Seed};
use crate::crypto::sig::{sign_bytes, verify_bytes, DetachedSig};
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current protocol version. A received message with any other version is
/// rejected outright.
pub const VERSION: u32 = 2;

/// The protocol message envelope. Exactly one of the submessages is set.
///
/// `signature` is a detached signature by the sender's primary wallet key
/// over the canonical encoding of the message with the signature field empty;
/// canonical means RON with fields in declaration order and absent
/// submessages omitted, so both parties re-serialize to identical bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel_id: String,
    pub msg_num: u64,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub channel_propose: Option<ChannelProposeMsg>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub channel_accept: Option<ChannelAcceptMsg>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payment_propose: Option<PaymentProposeMsg>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payment_accept: Option<PaymentAcceptMsg>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payment_complete: Option<PaymentCompleteMsg>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub close: Option<CloseMsg>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<DetachedSig>,
}

impl Message {
    pub fn unsigned(channel_id: impl Into<String>, msg_num: u64) -> Self {
        Message {
            channel_id: channel_id.into(),
            msg_num,
            version: VERSION,
            channel_propose: None,
            channel_accept: None,
            payment_propose: None,
            payment_accept: None,
            payment_complete: None,
            close: None,
            signature: None,
        }
    }

    /// The canonical bytes covered by the envelope signature.
    pub fn bytes_to_sign(&self) -> Result<Vec<u8>, ron::Error> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        ron::to_string(&unsigned).map(String::into_bytes)
    }

    /// Signs the envelope with the sender's primary wallet key.
    pub fn sign(mut self, seed: Option<&Seed>) -> Result<Message, ProtocolError> {
        let seed = seed.ok_or(ProtocolError::NoSeed)?;
        let bytes = self.bytes_to_sign()?;
        self.signature = Some(sign_bytes(&bytes, &derive_primary(seed)));
        Ok(self)
    }

    /// Verifies the envelope signature against the sender's primary account.
    pub fn verify(&self, sender: &AccountId) -> Result<(), ProtocolError> {
        let sig = self.signature.as_ref().ok_or(ProtocolError::EmptyMessage)?;
        let bytes = self.bytes_to_sign()?;
        verify_bytes(&bytes, sender, sig).map_err(|e| ProtocolError::sig_verify("message envelope", e))
    }

    /// The submessage kind, for logging.
    pub fn kind(&self) -> &'static str {
        if self.channel_propose.is_some() {
            "ChannelPropose"
        } else if self.channel_accept.is_some() {
            "ChannelAccept"
        } else if self.payment_propose.is_some() {
            "PaymentPropose"
        } else if self.payment_accept.is_some() {
            "PaymentAccept"
        } else if self.payment_complete.is_some() {
            "PaymentComplete"
        } else if self.close.is_some() {
            "Close"
        } else {
            "Empty"
        }
    }
}

/// Host's offer to open a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelProposeMsg {
    pub host_acct: AccountId,
    pub guest_acct: AccountId,
    pub host_ratchet_acct: AccountId,
    pub guest_ratchet_acct: AccountId,
    pub max_round_duration: Duration,
    pub finality_delay: Duration,
    pub base_sequence_number: SequenceNumber,
    pub host_amount: Amount,
    pub feerate: Amount,
    pub funding_time: LedgerTime,
}

/// Guest's signatures accepting a channel proposal: the round-1 ratchet and
/// the round-1 settle-only-with-host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelAcceptMsg {
    pub guest_ratchet_round1_sig: DetachedSig,
    pub guest_settle_only_with_host_sig: DetachedSig,
}

/// Proposes a channel payment. The settle-with-guest signature is absent
/// exactly when the proposed round leaves the guest balance at zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentProposeMsg {
    pub round_number: u64,
    pub payment_time: LedgerTime,
    pub payment_amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_settle_with_guest_sig: Option<DetachedSig>,
    pub sender_settle_with_host_sig: DetachedSig,
}

/// Accepts a proposed channel payment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentAcceptMsg {
    pub round_number: u64,
    pub recipient_ratchet_sig: DetachedSig,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recipient_settle_with_guest_sig: Option<DetachedSig>,
    pub recipient_settle_with_host_sig: DetachedSig,
}

/// Acknowledges a payment acceptance, completing the round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentCompleteMsg {
    pub round_number: u64,
    pub sender_ratchet_sig: DetachedSig,
}

/// Proposes cooperative closure at the current balances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseMsg {
    pub cooperative_close_sig: DetachedSig,
}

use crate::account::WalletAcct;
use crate::amount::Amount;
use crate::channel::Channel;
use crate::crypto::keys::{derive_key, Seed, PRIMARY_KEY_INDEX};
use crate::crypto::sig::sign_tx_hash;
use crate::error::ProtocolError;
use crate::msg::{
    ChannelAcceptMsg, ChannelProposeMsg, CloseMsg, Message, PaymentAcceptMsg, PaymentCompleteMsg, PaymentProposeMsg,
};
use crate::tx::{
    build_cleanup_tx, build_cooperative_close_tx, build_funding_tx, build_ratchet_tx, build_settle_only_with_host_tx,
    build_settle_with_guest_tx, build_settle_with_host_tx, build_setup_account_tx, build_top_up_tx, Tx, TxEnvelope,
};

/// Receives the side effects of a transition: messages for the peer and
/// transactions for the ledger. Emission is best-effort durable; everything
/// published is idempotent under re-submission because ledger transactions
/// are sequence-numbered.
pub trait Outputter {
    fn output_msg(&mut self, msg: Message);
    fn output_tx(&mut self, tx: TxEnvelope);
}

/// An in-memory sink, accumulating effects for a driver (or a test) to drain.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    pub msgs: Vec<Message>,
    pub txs: Vec<TxEnvelope>,
}

impl Outputter for MemoryOutput {
    fn output_msg(&mut self, msg: Message) {
        self.msgs.push(msg);
    }

    fn output_tx(&mut self, tx: TxEnvelope) {
        self.txs.push(tx);
    }
}

/// Allocates the next message number on the channel.
fn next_msg(ch: &mut Channel) -> Message {
    ch.last_msg_index += 1;
    Message::unsigned(ch.id.clone(), ch.last_msg_index)
}

/// Signs a transaction with the keys at the given seed indices, producing a
/// publishable envelope.
fn envelope_with_keys(
    tx: Tx,
    passphrase: &str,
    seed: Option<&Seed>,
    indices: &[u32],
) -> Result<TxEnvelope, ProtocolError> {
    let seed = seed.ok_or(ProtocolError::NoSeed)?;
    let hash = tx.hash(passphrase)?;
    let sigs = indices.iter().map(|&i| sign_tx_hash(&hash, &derive_key(seed, i))).collect();
    Ok(TxEnvelope::new(tx, sigs))
}

pub(crate) fn create_channel_propose_msg(ch: &mut Channel, seed: Option<&Seed>) -> Result<Message, ProtocolError> {
    let mut m = next_msg(ch);
    m.channel_propose = Some(ChannelProposeMsg {
        host_acct: ch.host_acct,
        guest_acct: ch.guest_acct,
        host_ratchet_acct: ch.host_ratchet_acct,
        guest_ratchet_acct: ch.guest_ratchet_acct,
        max_round_duration: ch.max_round_duration,
        finality_delay: ch.finality_delay,
        base_sequence_number: ch.base_sequence_number,
        host_amount: ch.host_amount,
        feerate: ch.channel_feerate,
        funding_time: ch.funding_time,
    });
    m.sign(seed)
}

pub(crate) fn create_channel_accept_msg(ch: &mut Channel, seed: Option<&Seed>) -> Result<Message, ProtocolError> {
    let settle_only_tx = build_settle_only_with_host_tx(ch, ch.funding_time)
        .map_err(|e| ProtocolError::build_tx("settle-only-with-host", e))?;
    let settle_only_sig = ch.sign_tx(&settle_only_tx, seed)?;
    let ratchet_tx = build_ratchet_tx(ch, ch.funding_time, ch.host_ratchet_acct, ch.host_ratchet_acct_seqnum)
        .map_err(|e| ProtocolError::build_tx("ratchet", e))?;
    let ratchet_sig = ch.sign_tx(&ratchet_tx, seed)?;
    let mut m = next_msg(ch);
    m.channel_accept = Some(ChannelAcceptMsg {
        guest_ratchet_round1_sig: ratchet_sig,
        guest_settle_only_with_host_sig: settle_only_sig,
    });
    m.sign(seed)
}

pub(crate) fn create_payment_propose_msg(ch: &mut Channel, seed: Option<&Seed>) -> Result<Message, ProtocolError> {
    // Signatures are constructed against the balances the payment will
    // produce, not the current ones.
    let ch2 = ch.with_outbound_payment(ch.pending_amount_sent).ok_or(ProtocolError::Arithmetic)?;
    let (settle_with_guest_sig, settle_with_host_sig) = if ch2.guest_amount.is_zero() {
        let tx = build_settle_only_with_host_tx(&ch2, ch2.pending_payment_time)
            .map_err(|e| ProtocolError::build_tx("settle-only-with-host", e))?;
        (None, ch.sign_tx(&tx, seed)?)
    } else {
        let guest_tx = build_settle_with_guest_tx(&ch2, ch2.pending_payment_time)
            .map_err(|e| ProtocolError::build_tx("settle-with-guest", e))?;
        let host_tx = build_settle_with_host_tx(&ch2, ch2.pending_payment_time)
            .map_err(|e| ProtocolError::build_tx("settle-with-host", e))?;
        (Some(ch.sign_tx(&guest_tx, seed)?), ch.sign_tx(&host_tx, seed)?)
    };
    let mut m = next_msg(ch);
    m.payment_propose = Some(PaymentProposeMsg {
        round_number: ch.round_number,
        payment_time: ch.pending_payment_time,
        payment_amount: ch.pending_amount_sent,
        sender_settle_with_guest_sig: settle_with_guest_sig,
        sender_settle_with_host_sig: settle_with_host_sig,
    });
    m.sign(seed)
}

pub(crate) fn create_payment_accept_msg(ch: &mut Channel, seed: Option<&Seed>) -> Result<Message, ProtocolError> {
    let (ratchet_acct, ratchet_seqnum) = ch.my_ratchet();
    let ratchet_tx = build_ratchet_tx(ch, ch.pending_payment_time, ratchet_acct, ratchet_seqnum)
        .map_err(|e| ProtocolError::build_tx("ratchet", e))?;
    let ratchet_sig = ch.sign_tx(&ratchet_tx, seed)?;
    // The pair to co-sign is the one the proposal carried; a missing
    // settle-with-guest means this round zeroes the guest balance.
    let settle_with_guest_sig = match &ch.counterparty_latest_settle_with_guest_tx {
        Some(env) => Some(ch.sign_tx(&env.tx, seed)?),
        None => None,
    };
    let host_env = ch
        .counterparty_latest_settle_with_host_tx
        .clone()
        .ok_or(ProtocolError::MissingChannelArtifact("counterparty settle-with-host tx"))?;
    let settle_with_host_sig = ch.sign_tx(&host_env.tx, seed)?;
    let mut m = next_msg(ch);
    m.payment_accept = Some(PaymentAcceptMsg {
        round_number: ch.round_number,
        recipient_ratchet_sig: ratchet_sig,
        recipient_settle_with_guest_sig: settle_with_guest_sig,
        recipient_settle_with_host_sig: settle_with_host_sig,
    });
    m.sign(seed)
}

pub(crate) fn create_payment_complete_msg(ch: &mut Channel, seed: Option<&Seed>) -> Result<Message, ProtocolError> {
    let (ratchet_acct, ratchet_seqnum) = ch.my_ratchet();
    let ratchet_tx = build_ratchet_tx(ch, ch.pending_payment_time, ratchet_acct, ratchet_seqnum)
        .map_err(|e| ProtocolError::build_tx("ratchet", e))?;
    let ratchet_sig = ch.sign_tx(&ratchet_tx, seed)?;
    let mut m = next_msg(ch);
    m.payment_complete = Some(PaymentCompleteMsg { round_number: ch.round_number, sender_ratchet_sig: ratchet_sig });
    m.sign(seed)
}

pub(crate) fn create_close_msg(ch: &mut Channel, seed: Option<&Seed>) -> Result<Message, ProtocolError> {
    let coop_close_tx =
        build_cooperative_close_tx(ch).map_err(|e| ProtocolError::build_tx("cooperative-close", e))?;
    let coop_close_sig = ch.sign_tx(&coop_close_tx, seed)?;
    let mut m = next_msg(ch);
    m.close = Some(CloseMsg { cooperative_close_sig: coop_close_sig });
    m.sign(seed)
}

/// The funding envelope. Consumes the next wallet sequence number and records
/// it so inclusion can be recognized later.
pub(crate) fn funding_tx_envelope(
    ch: &mut Channel,
    wallet: &mut WalletAcct,
    seed: Option<&Seed>,
) -> Result<TxEnvelope, ProtocolError> {
    wallet.seqnum += 1;
    ch.funding_tx_seqnum = wallet.seqnum;
    let tx = build_funding_tx(ch, wallet).map_err(|e| ProtocolError::build_tx("funding", e))?;
    envelope_with_keys(
        tx,
        &ch.passphrase,
        seed,
        &[PRIMARY_KEY_INDEX, ch.key_index, ch.key_index + 1, ch.key_index + 2],
    )
}

/// The three account-creation envelopes, consuming the three consecutive
/// wallet sequence numbers ending at `wallet.seqnum`.
pub(crate) fn setup_account_envelopes(
    ch: &Channel,
    wallet: &WalletAcct,
    seed: Option<&Seed>,
) -> Result<[TxEnvelope; 3], ProtocolError> {
    let host_ratchet = build_setup_account_tx(ch, ch.host_ratchet_acct, wallet.seqnum - 2);
    let guest_ratchet = build_setup_account_tx(ch, ch.guest_ratchet_acct, wallet.seqnum - 1);
    let escrow = build_setup_account_tx(ch, ch.escrow_acct, wallet.seqnum);
    Ok([
        envelope_with_keys(host_ratchet, &ch.passphrase, seed, &[PRIMARY_KEY_INDEX])?,
        envelope_with_keys(guest_ratchet, &ch.passphrase, seed, &[PRIMARY_KEY_INDEX])?,
        envelope_with_keys(escrow, &ch.passphrase, seed, &[PRIMARY_KEY_INDEX])?,
    ])
}

/// The combined cooperative-close envelope: our signature plus the stored
/// counterparty signature.
pub(crate) fn coop_close_envelope(ch: &Channel, seed: Option<&Seed>) -> Result<TxEnvelope, ProtocolError> {
    let tx = build_cooperative_close_tx(ch).map_err(|e| ProtocolError::build_tx("cooperative-close", e))?;
    let ours = ch.sign_tx(&tx, seed)?;
    let theirs = ch
        .counterparty_coop_close_sig
        .clone()
        .ok_or(ProtocolError::MissingChannelArtifact("counterparty cooperative-close signature"))?;
    Ok(TxEnvelope::new(tx, vec![ours, theirs]))
}

pub(crate) fn top_up_envelope(
    ch: &mut Channel,
    wallet: &mut WalletAcct,
    amount: Amount,
    seed: Option<&Seed>,
) -> Result<TxEnvelope, ProtocolError> {
    wallet.seqnum += 1;
    ch.pending_top_up = Some((wallet.seqnum, amount));
    let tx = build_top_up_tx(ch, wallet, amount).map_err(|e| ProtocolError::build_tx("top-up", e))?;
    envelope_with_keys(tx, &ch.passphrase, seed, &[PRIMARY_KEY_INDEX])
}

pub(crate) fn cleanup_envelope(
    ch: &mut Channel,
    wallet: &mut WalletAcct,
    seed: Option<&Seed>,
) -> Result<TxEnvelope, ProtocolError> {
    wallet.seqnum += 1;
    ch.cleanup_tx_seqnum = wallet.seqnum;
    let tx = build_cleanup_tx(ch, wallet).map_err(|e| ProtocolError::build_tx("cleanup", e))?;
    envelope_with_keys(
        tx,
        &ch.passphrase,
        seed,
        &[PRIMARY_KEY_INDEX, ch.key_index, ch.key_index + 1, ch.key_index + 2],
    )
}

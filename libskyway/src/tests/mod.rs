//! End-to-end scenarios driving a host and a guest against each other
//! through in-memory sinks.

mod channel_lifecycle;
mod force_close;

use crate::account::WalletAcct;
use crate::amount::{Amount, LedgerTime};
use crate::channel::{Channel, ChannelConfig, ChannelState};
use crate::crypto::keys::{derive_account, Seed, PRIMARY_KEY_INDEX};
use crate::error::ProtocolError;
use crate::msg::Message;
use crate::output::MemoryOutput;
use crate::state_machine::{Command, InputEvent, LedgerEvent, Updater};
use crate::tx::TxEnvelope;
use std::time::Duration;

pub const PASSPHRASE: &str = "skyway standalone network ; jul 2026";
pub const FUNDING_TIME: u64 = 1_000;
pub const MAX_ROUND_DURATION: Duration = Duration::from_secs(3_600);
pub const FINALITY_DELAY: Duration = Duration::from_secs(3_600);

pub const HOST_RATCHET_START_SEQNUM: u64 = 200;
pub const GUEST_RATCHET_START_SEQNUM: u64 = 210;
pub const ESCROW_START_SEQNUM: u64 = 300;

pub fn units(s: &str) -> Amount {
    Amount::from_units(s).unwrap()
}

pub fn host_config(guest_acct: crate::account::AccountId, host_amount: Amount) -> ChannelConfig {
    ChannelConfig {
        guest_acct,
        host_amount,
        feerate: Amount::from_stroops(100),
        max_round_duration: MAX_ROUND_DURATION,
        finality_delay: FINALITY_DELAY,
        funding_time: LedgerTime::from_unix(FUNDING_TIME),
        key_index: 1,
        passphrase: PASSPHRASE.into(),
        counterparty_address: "guest.example:9735".into(),
    }
}

/// One side of a channel: its record, wallet, seed and sink.
pub struct Party {
    pub channel: Channel,
    pub wallet: WalletAcct,
    pub seed: Seed,
    pub sink: MemoryOutput,
    pub ledger_time: LedgerTime,
}

impl Party {
    pub fn host() -> Party {
        let seed = Seed::from_bytes([1u8; 32]);
        let guest_seed = Seed::from_bytes([2u8; 32]);
        let wallet = WalletAcct::new(derive_account(&seed, PRIMARY_KEY_INDEX), 100);
        let cfg = host_config(derive_account(&guest_seed, PRIMARY_KEY_INDEX), units("1000"));
        // The record starts in `Start`; CreateChannel replaces it wholesale.
        let channel = Channel::new_host(&cfg, &wallet, &seed);
        Party { channel, wallet, seed, sink: MemoryOutput::default(), ledger_time: LedgerTime::from_unix(FUNDING_TIME) }
    }

    pub fn guest() -> Party {
        let seed = Seed::from_bytes([2u8; 32]);
        let wallet = WalletAcct::new(derive_account(&seed, PRIMARY_KEY_INDEX), 500);
        let channel = Channel::new_guest(
            derive_account(&seed, PRIMARY_KEY_INDEX),
            PASSPHRASE,
            "host.example:9735",
            ESCROW_START_SEQNUM,
            HOST_RATCHET_START_SEQNUM,
            GUEST_RATCHET_START_SEQNUM,
        );
        Party { channel, wallet, seed, sink: MemoryOutput::default(), ledger_time: LedgerTime::from_unix(FUNDING_TIME) }
    }

    pub fn handle(&mut self, event: InputEvent) -> Result<(), ProtocolError> {
        let mut updater =
            Updater::new(&mut self.channel, &mut self.wallet, Some(&self.seed), self.ledger_time, &mut self.sink);
        updater.handle(event)
    }

    pub fn command(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        self.handle(InputEvent::LocalCommand(cmd))
    }

    pub fn receive(&mut self, msg: Message) -> Result<(), ProtocolError> {
        self.handle(InputEvent::InboundMsg(Box::new(msg)))
    }

    pub fn observe(&mut self, event: LedgerEvent) -> Result<(), ProtocolError> {
        self.handle(InputEvent::LedgerObserved(event))
    }

    pub fn advance_time(&mut self, unix: u64) -> Result<(), ProtocolError> {
        self.ledger_time = LedgerTime::from_unix(unix);
        self.observe(LedgerEvent::TimeAdvanced(LedgerTime::from_unix(unix)))
    }

    pub fn drain_msgs(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.sink.msgs)
    }

    pub fn drain_txs(&mut self) -> Vec<TxEnvelope> {
        std::mem::take(&mut self.sink.txs)
    }

    pub fn take_msg(&mut self) -> Message {
        let mut msgs = self.drain_msgs();
        assert_eq!(msgs.len(), 1, "expected exactly one outbound message, got {}", msgs.len());
        msgs.remove(0)
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn set_time(&mut self, unix: u64) {
        self.ledger_time = LedgerTime::from_unix(unix);
    }
}

/// Drives both parties through setup, proposal, acceptance and funding,
/// leaving the channel `Open` on both sides with the host holding 1000 units.
pub fn open_channel() -> (Party, Party) {
    env_logger::try_init().ok();
    let mut host = Party::host();
    let mut guest = Party::guest();

    host.command(Command::CreateChannel(Box::new(host_config(guest.channel.guest_acct, units("1000"))))).unwrap();
    assert_eq!(host.state(), ChannelState::SettingUp);
    assert_eq!(host.drain_txs().len(), 3);

    let (host_ratchet, guest_ratchet, escrow) =
        (host.channel.host_ratchet_acct, host.channel.guest_ratchet_acct, host.channel.escrow_acct);
    host.observe(LedgerEvent::AccountExists { account: host_ratchet, seqnum: HOST_RATCHET_START_SEQNUM }).unwrap();
    host.observe(LedgerEvent::AccountExists { account: guest_ratchet, seqnum: GUEST_RATCHET_START_SEQNUM }).unwrap();
    assert_eq!(host.state(), ChannelState::SettingUp);
    host.observe(LedgerEvent::AccountExists { account: escrow, seqnum: ESCROW_START_SEQNUM }).unwrap();
    assert_eq!(host.state(), ChannelState::ChannelProposed);

    let propose = host.take_msg();
    let funding = host.drain_txs();
    assert_eq!(funding.len(), 1);
    let funding_seqnum = funding[0].tx.seqnum;

    guest.receive(propose).unwrap();
    assert_eq!(guest.state(), ChannelState::AwaitingFunding);
    let accept = guest.take_msg();

    host.receive(accept).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingFunding);

    let host_acct = host.channel.host_acct;
    host.observe(LedgerEvent::TxIncluded { source: host_acct, seqnum: funding_seqnum }).unwrap();
    guest.observe(LedgerEvent::TxIncluded { source: host_acct, seqnum: funding_seqnum }).unwrap();
    assert_eq!(host.state(), ChannelState::Open);
    assert_eq!(guest.state(), ChannelState::Open);
    assert_eq!(host.channel.host_amount(), units("1000"));
    assert_eq!(guest.channel.host_amount(), units("1000"));
    assert_eq!(guest.channel.guest_amount(), Amount::ZERO);

    (host, guest)
}

/// Runs one full payment round from `payer` to `payee` at ledger time `t`.
pub fn pay(payer: &mut Party, payee: &mut Party, amount: Amount, t: u64) {
    payer.set_time(t);
    payee.set_time(t);
    payer.command(Command::ProposePayment(amount)).unwrap();
    assert_eq!(payer.state(), ChannelState::PaymentProposed);
    let propose = payer.take_msg();

    payee.receive(propose).unwrap();
    assert_eq!(payee.state(), ChannelState::PaymentAccepted);
    let accept = payee.take_msg();

    payer.receive(accept).unwrap();
    assert_eq!(payer.state(), ChannelState::Open);
    let complete = payer.take_msg();

    payee.receive(complete).unwrap();
    assert_eq!(payee.state(), ChannelState::Open);
}

/// Both parties must agree on the committed balances.
pub fn assert_balances(host: &Party, guest: &Party, host_amount: Amount, guest_amount: Amount) {
    assert_eq!(host.channel.host_amount(), host_amount);
    assert_eq!(host.channel.guest_amount(), guest_amount);
    assert_eq!(guest.channel.host_amount(), host_amount);
    assert_eq!(guest.channel.guest_amount(), guest_amount);
}

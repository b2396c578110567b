use crate::account::{AccountId, SequenceNumber};
use crate::amount::{Amount, LedgerTime};
use crate::channel::ChannelConfig;
use crate::msg::Message;
use std::fmt::{Display, Formatter};

/// One input to the updater. Each event is dispatched to exactly one handler
/// and processed to completion before the next is accepted.
#[derive(Clone, Debug)]
pub enum InputEvent {
    InboundMsg(Box<Message>),
    TimerFired(Timer),
    LedgerObserved(LedgerEvent),
    LocalCommand(Command),
}

impl Display for InputEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InputEvent::InboundMsg(m) => write!(f, "InboundMsg({})", m.kind()),
            InputEvent::TimerFired(t) => write!(f, "TimerFired({t:?})"),
            InputEvent::LedgerObserved(ev) => write!(f, "LedgerObserved({ev})"),
            InputEvent::LocalCommand(cmd) => write!(f, "LocalCommand({cmd})"),
        }
    }
}

/// The only intrinsic timer is the round timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timer {
    Round,
}

/// Facts the ledger driver reports about the outside world.
#[derive(Clone, Debug)]
pub enum LedgerEvent {
    /// An account appeared on the ledger, with its starting sequence number.
    AccountExists { account: AccountId, seqnum: SequenceNumber },
    /// A transaction from `source` consuming `seqnum` was included.
    TxIncluded { source: AccountId, seqnum: SequenceNumber },
    /// An included transaction from `source` deposited `amount` into the
    /// escrow account.
    EscrowDeposit { source: AccountId, seqnum: SequenceNumber, amount: Amount },
    /// The ledger clock advanced.
    TimeAdvanced(LedgerTime),
}

impl Display for LedgerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerEvent::AccountExists { account, .. } => write!(f, "AccountExists({account})"),
            LedgerEvent::TxIncluded { source, seqnum } => write!(f, "TxIncluded({source}, {seqnum})"),
            LedgerEvent::EscrowDeposit { source, amount, .. } => write!(f, "EscrowDeposit({source}, {amount})"),
            LedgerEvent::TimeAdvanced(t) => write!(f, "TimeAdvanced({t})"),
        }
    }
}

/// Commands from the local wallet owner.
#[derive(Clone, Debug)]
pub enum Command {
    /// Open a new channel (host only).
    CreateChannel(Box<ChannelConfig>),
    ProposePayment(Amount),
    TopUp(Amount),
    CloseChannel,
    ForceClose,
    CleanUp,
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::CreateChannel(_) => write!(f, "CreateChannel"),
            Command::ProposePayment(amount) => write!(f, "ProposePayment({amount})"),
            Command::TopUp(amount) => write!(f, "TopUp({amount})"),
            Command::CloseChannel => write!(f, "CloseChannel"),
            Command::ForceClose => write!(f, "ForceClose"),
            Command::CleanUp => write!(f, "CleanUp"),
        }
    }
}

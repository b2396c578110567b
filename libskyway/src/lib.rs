pub mod account;
pub mod amount;
pub mod channel;
pub mod crypto;
pub mod error;
pub mod helpers;
pub mod msg;
pub mod output;
pub mod state_machine;
pub mod tx;

#[cfg(test)]
mod tests;

pub use account::{AccountId, SequenceNumber, WalletAcct};
pub use amount::{Amount, Delta, LedgerTime};
pub use channel::{Channel, ChannelConfig, ChannelState, Role};
pub use error::ProtocolError;
pub use msg::Message;
pub use output::{MemoryOutput, Outputter};
pub use state_machine::{Command, InputEvent, LedgerEvent, Timer, Updater};

use crate::account::AccountError;
use crate::channel::ChannelState;
use crate::crypto::sig::SigVerifyError;
use crate::tx::TxBuildError;
use thiserror::Error;

/// Errors surfaced to the driver. A handler that returns one of these has not
/// changed the channel: the updater restores the pre-event snapshot and drops
/// any staged output before propagating.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message has no handler in state {0}")]
    UnexpectedState(ChannelState),
    #[error("channel already exists")]
    ChannelExists,
    #[error("counterparty sent a settle-with-guest signature for a zero guest balance")]
    UnusedSettleWithGuestSig,
    #[error("cannot sign without a wallet seed")]
    NoSeed,
    #[error("signature verification failed on {tx} tx")]
    SigVerify {
        tx: &'static str,
        #[source]
        source: SigVerifyError,
    },
    #[error("failed to build {tx} tx")]
    BuildTx {
        tx: &'static str,
        #[source]
        source: TxBuildError,
    },
    #[error("unsupported protocol version {0}")]
    Version(u32),
    #[error("message carries no submessage")]
    EmptyMessage,
    #[error("insufficient balance for the requested amount")]
    InsufficientBalance,
    #[error("command is only valid for the {0} role")]
    WrongRole(crate::channel::Role),
    #[error("balance arithmetic overflowed")]
    Arithmetic,
    #[error("channel record is missing a required {0}")]
    MissingChannelArtifact(&'static str),
    #[error("canonical encoding failed: {0}")]
    Encoding(#[from] ron::Error),
    #[error(transparent)]
    Account(#[from] AccountError),
}

impl ProtocolError {
    pub(crate) fn sig_verify(tx: &'static str, source: SigVerifyError) -> Self {
        ProtocolError::SigVerify { tx, source }
    }

    pub(crate) fn build_tx(tx: &'static str, source: TxBuildError) -> Self {
        ProtocolError::BuildTx { tx, source }
    }
}

//! Opening, paying and cooperatively closing a channel.

use crate::channel::{ChannelState, Role};
use crate::crypto::keys::{derive_account, Seed};
use crate::error::ProtocolError;
use crate::msg::VERSION;
use crate::state_machine::{Command, LedgerEvent};
use crate::tests::{assert_balances, host_config, open_channel, pay, units, Party, FUNDING_TIME};
use crate::tx::{Op, TxRole};

#[test]
fn open_pay_and_cooperatively_close() {
    let (mut host, mut guest) = open_channel();

    pay(&mut host, &mut guest, units("100"), 1_010);
    assert_balances(&host, &guest, units("900"), units("100"));
    assert_eq!(host.channel.round_number(), 2);
    assert_eq!(guest.channel.round_number(), 2);

    host.set_time(1_020);
    guest.set_time(1_020);
    host.command(Command::CloseChannel).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingClose);
    let close_msg = host.take_msg();

    guest.receive(close_msg).unwrap();
    assert_eq!(guest.state(), ChannelState::AwaitingClose);
    let published = guest.drain_txs();
    assert_eq!(published.len(), 1);
    let coop_close = &published[0];
    assert_eq!(coop_close.tx.role, TxRole::CooperativeClose);
    assert_eq!(coop_close.sigs.len(), 2);
    assert!(coop_close.tx.ops.contains(&Op::Pay { dest: guest.channel.guest_acct, amount: units("100") }));

    let escrow = host.channel.escrow_acct;
    let coop_seqnum = coop_close.tx.seqnum;
    host.observe(LedgerEvent::TxIncluded { source: escrow, seqnum: coop_seqnum }).unwrap();
    guest.observe(LedgerEvent::TxIncluded { source: escrow, seqnum: coop_seqnum }).unwrap();
    assert_eq!(host.state(), ChannelState::Closed);
    assert_eq!(guest.state(), ChannelState::Closed);
}

#[test]
fn guest_accepts_close_while_payment_proposed() {
    let (mut host, mut guest) = open_channel();
    pay(&mut host, &mut guest, units("100"), 1_010);

    // A guest proposal the host never answers; the host's close still lands
    // because close is acceptable in PaymentProposed.
    guest.set_time(1_020);
    guest.command(Command::ProposePayment(units("25"))).unwrap();
    guest.drain_msgs();
    assert_eq!(guest.state(), ChannelState::PaymentProposed);

    host.set_time(1_021);
    host.command(Command::CloseChannel).unwrap();
    let close_msg = host.take_msg();
    guest.receive(close_msg).unwrap();
    assert_eq!(guest.state(), ChannelState::AwaitingClose);
    assert_eq!(guest.drain_txs().len(), 1);
}

#[test]
fn version_mismatch_is_rejected() {
    let (mut host, mut guest) = open_channel();
    host.set_time(1_010);
    guest.set_time(1_010);
    host.command(Command::ProposePayment(units("10"))).unwrap();
    let mut propose = host.take_msg();
    propose.version = VERSION + 1;

    let before = guest.channel.clone();
    let err = guest.receive(propose).unwrap_err();
    assert!(matches!(err, ProtocolError::Version(v) if v == VERSION + 1));
    assert_eq!(guest.channel, before);
}

/// Drives a fresh host through setup to its channel proposal.
fn host_with_proposal(guest_acct: crate::account::AccountId) -> (Party, crate::msg::Message) {
    let mut host = Party::host();
    host.command(Command::CreateChannel(Box::new(host_config(guest_acct, units("1000"))))).unwrap();
    host.drain_txs();
    let (hr, gr, escrow) =
        (host.channel.host_ratchet_acct, host.channel.guest_ratchet_acct, host.channel.escrow_acct);
    host.observe(LedgerEvent::AccountExists { account: hr, seqnum: 200 }).unwrap();
    host.observe(LedgerEvent::AccountExists { account: gr, seqnum: 210 }).unwrap();
    host.observe(LedgerEvent::AccountExists { account: escrow, seqnum: 300 }).unwrap();
    host.drain_txs();
    let propose = host.take_msg();
    (host, propose)
}

#[test]
fn stray_proposal_for_another_guest_is_dropped() {
    env_logger::try_init().ok();
    let mut guest = Party::guest();
    let stranger = derive_account(&Seed::from_bytes([9u8; 32]), 0);
    let (_host, propose) = host_with_proposal(stranger);

    let before = guest.channel.clone();
    guest.receive(propose).unwrap();
    assert_eq!(guest.state(), ChannelState::Start);
    assert_eq!(guest.channel, before);
    assert!(guest.drain_msgs().is_empty());
}

#[test]
fn propose_into_existing_channel_is_an_error() {
    let (_host, mut guest) = open_channel();
    let (_second_host, propose) = host_with_proposal(guest.channel.guest_acct);

    let before = guest.channel.clone();
    let err = guest.receive(propose).unwrap_err();
    assert!(matches!(err, ProtocolError::ChannelExists));
    assert_eq!(guest.channel, before);
}

#[test]
fn top_up_credits_both_sides_after_inclusion() {
    let (mut host, mut guest) = open_channel();
    host.set_time(1_010);
    guest.set_time(1_010);
    host.command(Command::TopUp(units("50"))).unwrap();
    let published = host.drain_txs();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].tx.role, TxRole::TopUp);
    // Not credited until the ledger confirms the deposit.
    assert_eq!(host.channel.host_amount(), units("1000"));

    let host_acct = host.channel.host_acct;
    let deposit =
        LedgerEvent::EscrowDeposit { source: host_acct, seqnum: published[0].tx.seqnum, amount: units("50") };
    host.observe(deposit.clone()).unwrap();
    guest.observe(deposit).unwrap();
    assert_eq!(host.channel.host_amount(), units("1050"));
    assert_eq!(guest.channel.host_amount(), units("1050"));

    // The channel keeps working at the new balance.
    pay(&mut host, &mut guest, units("100"), 1_020);
    assert_eq!(host.channel.host_amount(), units("950"));
    assert_eq!(guest.channel.host_amount(), units("950"));
}

#[test]
fn funding_deposit_is_not_mistaken_for_a_top_up() {
    let (_host, mut guest) = open_channel();
    guest.set_time(1_010);
    // A late replay of the funding deposit observation must not inflate the
    // balances the guest already accounts for.
    let host_acct = guest.channel.host_acct;
    let funding_seqnum = guest.channel.funding_tx_seqnum;
    guest
        .observe(LedgerEvent::EscrowDeposit { source: host_acct, seqnum: funding_seqnum, amount: units("1001") })
        .unwrap();
    assert_eq!(guest.channel.host_amount(), units("1000"));
}

#[test]
fn guest_cannot_top_up() {
    let (_host, mut guest) = open_channel();
    guest.set_time(1_010);
    let err = guest.command(Command::TopUp(units("5"))).unwrap_err();
    assert!(matches!(err, ProtocolError::WrongRole(Role::Host)));
}

#[test]
fn setup_timeout_publishes_cleanup() {
    env_logger::try_init().ok();
    let mut host = Party::host();
    let guest_acct = host.channel.guest_acct;
    host.command(Command::CreateChannel(Box::new(host_config(guest_acct, units("1000"))))).unwrap();
    host.drain_txs();

    // The setup accounts never all appear; the window lapses.
    host.advance_time(FUNDING_TIME + 3_601).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingCleanup);
    let published = host.drain_txs();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].tx.role, TxRole::Cleanup);

    let host_acct = host.channel.host_acct;
    host.observe(LedgerEvent::TxIncluded { source: host_acct, seqnum: published[0].tx.seqnum }).unwrap();
    assert_eq!(host.state(), ChannelState::Closed);
}

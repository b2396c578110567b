//! Round timeouts and the unilateral close sequence.

use crate::amount::LedgerTime;
use crate::channel::ChannelState;
use crate::state_machine::{Command, InputEvent, LedgerEvent, Timer};
use crate::tests::{open_channel, pay, units, ESCROW_START_SEQNUM};
use crate::tx::{Op, TxRole};

#[test]
fn round_timeout_publishes_ratchet_then_settlement() {
    let (mut host, mut guest) = open_channel();
    pay(&mut host, &mut guest, units("100"), 1_010);

    // A proposal the guest never answers.
    host.set_time(2_000);
    host.command(Command::ProposePayment(units("50"))).unwrap();
    host.drain_msgs();
    assert_eq!(host.state(), ChannelState::PaymentProposed);

    // The round expires: the ratchet for the last completed round goes out.
    host.advance_time(2_000 + 3_601).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingSettlementMintime);
    let published = host.drain_txs();
    assert_eq!(published.len(), 1);
    let ratchet = &published[0];
    assert_eq!(ratchet.tx.role, TxRole::Ratchet);
    assert_eq!(ratchet.sigs.len(), 2);
    // Round 2 pins the escrow sequence past its base.
    assert_eq!(
        ratchet.tx.ops,
        vec![Op::BumpSequence { account: host.channel.escrow_acct, to: ESCROW_START_SEQNUM + 4 }]
    );

    // The time lock alone is not enough; the pair waits for the ratchet to
    // actually land on the ledger.
    host.advance_time(5_700).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingSettlementMintime);
    assert!(host.drain_txs().is_empty());

    // Once it does, the pair for 900/100 follows.
    host.observe(LedgerEvent::TxIncluded { source: ratchet.tx.source, seqnum: ratchet.tx.seqnum }).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingSettlement);
    let published = host.drain_txs();
    assert_eq!(published.len(), 2);
    let settle_guest = &published[0];
    let settle_host = &published[1];
    assert_eq!(settle_guest.tx.role, TxRole::SettleWithGuest);
    assert_eq!(settle_host.tx.role, TxRole::SettleWithHost);
    assert_eq!(settle_guest.tx.seqnum, ESCROW_START_SEQNUM + 5);
    assert_eq!(settle_host.tx.seqnum, ESCROW_START_SEQNUM + 6);
    assert_eq!(settle_guest.tx.min_time, Some(LedgerTime::from_unix(1_010 + 3_600)));
    assert_eq!(settle_guest.tx.ops, vec![Op::Pay { dest: host.channel.guest_acct, amount: units("100") }]);

    let escrow = host.channel.escrow_acct;
    host.observe(LedgerEvent::TxIncluded { source: escrow, seqnum: settle_host.tx.seqnum }).unwrap();
    assert_eq!(host.state(), ChannelState::Closed);
}

#[test]
fn round_timer_event_triggers_the_same_close() {
    let (mut host, mut guest) = open_channel();
    pay(&mut host, &mut guest, units("100"), 1_010);

    guest.set_time(2_000);
    host.set_time(2_000);
    host.command(Command::ProposePayment(units("50"))).unwrap();
    let propose = host.take_msg();
    guest.receive(propose).unwrap();
    guest.drain_msgs();
    assert_eq!(guest.state(), ChannelState::PaymentAccepted);

    // The accepting side also force-closes when the completion never comes.
    guest.set_time(2_000 + 3_601);
    guest.handle(InputEvent::TimerFired(Timer::Round)).unwrap();
    assert_eq!(guest.state(), ChannelState::AwaitingSettlementMintime);
    let published = guest.drain_txs();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].tx.role, TxRole::Ratchet);
}

#[test]
fn unanswered_close_times_out_into_force_close() {
    let (mut host, mut guest) = open_channel();
    pay(&mut host, &mut guest, units("100"), 1_010);

    host.set_time(2_000);
    host.command(Command::CloseChannel).unwrap();
    host.drain_msgs();
    assert_eq!(host.state(), ChannelState::AwaitingClose);

    host.advance_time(2_000 + 3_601).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingSettlementMintime);
    assert_eq!(host.drain_txs().len(), 1);
}

#[test]
fn timer_before_the_deadline_changes_nothing() {
    let (mut host, mut guest) = open_channel();
    pay(&mut host, &mut guest, units("100"), 1_010);

    host.set_time(2_000);
    host.command(Command::ProposePayment(units("50"))).unwrap();
    host.drain_msgs();

    let before = host.channel.clone();
    host.advance_time(2_000 + 3_599).unwrap();
    assert_eq!(host.channel, before);
    assert!(host.drain_txs().is_empty());
}

#[test]
fn force_close_command_uses_the_current_round() {
    let (mut host, mut guest) = open_channel();
    pay(&mut host, &mut guest, units("100"), 1_010);

    host.set_time(1_020);
    host.command(Command::ForceClose).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingSettlementMintime);
    let published = host.drain_txs();
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].tx.ops,
        vec![Op::BumpSequence { account: host.channel.escrow_acct, to: ESCROW_START_SEQNUM + 4 }]
    );

    // The ratchet lands well before the settlement time lock opens; nothing
    // moves until the clock catches up.
    host.observe(LedgerEvent::TxIncluded { source: published[0].tx.source, seqnum: published[0].tx.seqnum })
        .unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingSettlementMintime);
    assert!(host.drain_txs().is_empty());

    host.advance_time(1_010 + 3_600 + 1).unwrap();
    assert_eq!(host.state(), ChannelState::AwaitingSettlement);
    assert_eq!(host.drain_txs().len(), 2);
}

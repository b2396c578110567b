use crate::account::{AccountId, SequenceNumber, WalletAcct};
use crate::amount::{Amount, LedgerTime};
use crate::channel::{Channel, ChannelConfig, ChannelState, Role};
use crate::crypto::keys::Seed;
use crate::crypto::sig::SigVerifyError;
use crate::error::ProtocolError;
use crate::msg::{
    ChannelAcceptMsg, ChannelProposeMsg, CloseMsg, Message, PaymentAcceptMsg, PaymentCompleteMsg, PaymentProposeMsg,
    VERSION,
};
use crate::output::{
    cleanup_envelope, coop_close_envelope, create_channel_accept_msg, create_channel_propose_msg, create_close_msg,
    create_payment_accept_msg, create_payment_complete_msg, create_payment_propose_msg, funding_tx_envelope,
    setup_account_envelopes, top_up_envelope, Outputter,
};
use crate::state_machine::events::{Command, InputEvent, LedgerEvent, Timer};
use crate::tx::{
    build_cooperative_close_tx, build_ratchet_tx, build_settle_only_with_host_tx, build_settle_with_guest_tx,
    build_settle_with_host_tx, TxEnvelope,
};
use log::{debug, info, warn};

enum Effect {
    Msg(Message),
    Tx(TxEnvelope),
}

/// The transition engine. One updater drives one channel, one event at a
/// time: an event is validated, the channel mutated, and side effects staged;
/// the sink sees the effects only after the handler returns successfully. On
/// error the channel and wallet are restored to their pre-event snapshots, so
/// a failed transition observably never happened.
pub struct Updater<'a, O: Outputter> {
    channel: &'a mut Channel,
    wallet: &'a mut WalletAcct,
    seed: Option<&'a Seed>,
    ledger_time: LedgerTime,
    sink: &'a mut O,
    staged: Vec<Effect>,
}

impl<'a, O: Outputter> Updater<'a, O> {
    pub fn new(
        channel: &'a mut Channel,
        wallet: &'a mut WalletAcct,
        seed: Option<&'a Seed>,
        ledger_time: LedgerTime,
        sink: &'a mut O,
    ) -> Self {
        Updater { channel, wallet, seed, ledger_time, sink, staged: Vec::new() }
    }

    pub fn ledger_time(&self) -> LedgerTime {
        self.ledger_time
    }

    /// Processes one input event to completion.
    pub fn handle(&mut self, event: InputEvent) -> Result<(), ProtocolError> {
        debug!("channel {}: handling {event}", self.channel.id);
        let channel_snapshot = self.channel.clone();
        let wallet_snapshot = *self.wallet;
        match self.dispatch(event) {
            Ok(()) => {
                for effect in self.staged.drain(..) {
                    match effect {
                        Effect::Msg(m) => self.sink.output_msg(m),
                        Effect::Tx(tx) => self.sink.output_tx(tx),
                    }
                }
                Ok(())
            }
            Err(e) => {
                *self.channel = channel_snapshot;
                *self.wallet = wallet_snapshot;
                self.staged.clear();
                Err(e)
            }
        }
    }

    fn dispatch(&mut self, event: InputEvent) -> Result<(), ProtocolError> {
        match event {
            InputEvent::InboundMsg(m) => self.handle_msg(*m),
            InputEvent::TimerFired(Timer::Round) => self.check_timers(),
            InputEvent::LedgerObserved(ev) => self.handle_ledger_event(ev),
            InputEvent::LocalCommand(cmd) => self.handle_command(cmd),
        }
    }

    fn stage_msg(&mut self, m: Message) {
        self.staged.push(Effect::Msg(m));
    }

    fn stage_tx(&mut self, tx: TxEnvelope) {
        self.staged.push(Effect::Tx(tx));
    }

    /// Moves the channel to `to`, staging the state's entry effects.
    fn transition_to(&mut self, to: ChannelState) -> Result<(), ProtocolError> {
        let from = self.channel.state;
        info!("channel {}: {from} -> {to}", self.channel.id);
        self.channel.state = to;
        match to {
            ChannelState::SettingUp => {
                self.wallet.seqnum += 3;
                let envs = setup_account_envelopes(self.channel, self.wallet, self.seed)?;
                for env in envs {
                    self.stage_tx(env);
                }
            }
            ChannelState::ChannelProposed => {
                let m = create_channel_propose_msg(self.channel, self.seed)?;
                self.stage_msg(m);
                let env = funding_tx_envelope(self.channel, self.wallet, self.seed)?;
                self.stage_tx(env);
            }
            ChannelState::AwaitingFunding if self.channel.role.is_guest() => {
                let m = create_channel_accept_msg(self.channel, self.seed)?;
                self.stage_msg(m);
            }
            ChannelState::Funded => return self.transition_to(ChannelState::Open),
            ChannelState::PaymentProposed => {
                let m = create_payment_propose_msg(self.channel, self.seed)?;
                self.stage_msg(m);
            }
            ChannelState::PaymentAccepted => {
                let m = create_payment_accept_msg(self.channel, self.seed)?;
                self.stage_msg(m);
            }
            ChannelState::AwaitingClose => {
                if self.channel.counterparty_coop_close_sig.is_some() {
                    let env = coop_close_envelope(self.channel, self.seed)?;
                    self.stage_tx(env);
                } else {
                    let m = create_close_msg(self.channel, self.seed)?;
                    self.stage_msg(m);
                }
            }
            ChannelState::AwaitingSettlementMintime => {
                let env = self
                    .channel
                    .current_ratchet_tx
                    .clone()
                    .ok_or(ProtocolError::MissingChannelArtifact("ratchet tx"))?;
                self.stage_tx(env);
            }
            ChannelState::AwaitingSettlement => {
                if let Some(env) = self.channel.current_settle_with_guest_tx.clone() {
                    self.stage_tx(env);
                }
                let env = self
                    .channel
                    .current_settle_with_host_tx
                    .clone()
                    .ok_or(ProtocolError::MissingChannelArtifact("settle-with-host tx"))?;
                self.stage_tx(env);
            }
            ChannelState::AwaitingCleanup => {
                let env = cleanup_envelope(self.channel, self.wallet, self.seed)?;
                self.stage_tx(env);
            }
            _ => {}
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Inbound messages
    // ---------------------------------------------------------------------

    fn handle_msg(&mut self, m: Message) -> Result<(), ProtocolError> {
        if m.version != VERSION {
            return Err(ProtocolError::Version(m.version));
        }
        if let Some(propose) = m.channel_propose.clone() {
            self.handle_channel_propose(&m, propose)
        } else if let Some(accept) = m.channel_accept.clone() {
            self.handle_channel_accept(accept)
        } else if let Some(payment) = m.payment_propose.clone() {
            self.handle_payment_propose(payment)
        } else if let Some(accept) = m.payment_accept.clone() {
            self.handle_payment_accept(accept)
        } else if let Some(complete) = m.payment_complete.clone() {
            self.handle_payment_complete(complete)
        } else if let Some(close) = m.close.clone() {
            self.handle_close(close)
        } else {
            Err(ProtocolError::EmptyMessage)
        }
    }

    fn handle_channel_propose(&mut self, m: &Message, propose: ChannelProposeMsg) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Start {
            return Err(ProtocolError::ChannelExists);
        }
        if propose.guest_acct != self.channel.guest_acct {
            debug!(
                "dropped message: proposed guest acct {} doesn't match channel guest acct {}",
                propose.guest_acct, self.channel.guest_acct
            );
            return Ok(());
        }
        let escrow_acct = AccountId::from_hex(&m.channel_id)?;
        *self.channel = self.channel.from_proposal(&m.channel_id, escrow_acct, &propose);
        self.transition_to(ChannelState::AwaitingFunding)
    }

    fn handle_channel_accept(&mut self, accept: ChannelAcceptMsg) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::ChannelProposed {
            return Err(ProtocolError::UnexpectedState(self.channel.state));
        }
        if !self.channel.role.is_host() {
            debug!("dropped message: only the host can be accepted");
            return Ok(());
        }
        if self.ledger_time.after(self.channel.funding_time + self.channel.max_round_duration) {
            debug!(
                "dropped message: ledger time {} past funding time {} with max round duration {:?}",
                self.ledger_time, self.channel.funding_time, self.channel.max_round_duration
            );
            return Ok(());
        }

        let ratchet_tx = build_ratchet_tx(
            self.channel,
            self.channel.funding_time,
            self.channel.host_ratchet_acct,
            self.channel.host_ratchet_acct_seqnum,
        )
        .map_err(|e| ProtocolError::build_tx("ratchet", e))?;
        self.channel.verify_counterparty_sig(&ratchet_tx, &accept.guest_ratchet_round1_sig, "round 1 ratchet")?;
        self.channel.sign_ratchet_tx(ratchet_tx, accept.guest_ratchet_round1_sig, self.seed)?;

        let settle_only_tx = build_settle_only_with_host_tx(self.channel, self.channel.funding_time)
            .map_err(|e| ProtocolError::build_tx("settle-only-with-host", e))?;
        self.channel.verify_counterparty_sig(
            &settle_only_tx,
            &accept.guest_settle_only_with_host_sig,
            "round 1 settlement",
        )?;
        self.channel.set_latest_settlement_txes(
            None,
            settle_only_tx,
            None,
            accept.guest_settle_only_with_host_sig,
            self.seed,
        )?;

        self.transition_to(ChannelState::AwaitingFunding)
    }

    fn handle_payment_propose(&mut self, payment: PaymentProposeMsg) -> Result<(), ProtocolError> {
        let state = self.channel.state;
        match state {
            ChannelState::Open | ChannelState::PaymentProposed | ChannelState::AwaitingPaymentMerge => {}
            _ => return Err(ProtocolError::UnexpectedState(state)),
        }
        if payment.payment_amount > self.channel.counterparty_balance() {
            debug!(
                "dropped message: payment amount {} exceeds counterparty balance {}",
                payment.payment_amount,
                self.channel.counterparty_balance()
            );
            return Ok(());
        }
        if state == ChannelState::PaymentProposed {
            // Concurrent proposals must name the same round to be mergeable.
            if payment.round_number != self.channel.round_number {
                debug!(
                    "dropped message: payment round {} for channel round {}",
                    payment.round_number, self.channel.round_number
                );
                return Ok(());
            }
        } else {
            if payment.round_number <= self.channel.round_number {
                debug!(
                    "dropped message: payment round {} for channel round {}",
                    payment.round_number, self.channel.round_number
                );
                return Ok(());
            }
            if self.ledger_time.after(payment.payment_time + self.channel.max_round_duration)
                || self.ledger_time.before(payment.payment_time - self.channel.max_round_duration)
            {
                debug!(
                    "dropped message: payment time {} with duration {:?} at ledger time {}",
                    payment.payment_time, self.channel.max_round_duration, self.ledger_time
                );
                return Ok(());
            }
            if payment.payment_time.before(self.channel.payment_time) {
                debug!(
                    "dropped message: payment time {} precedes most recent completed payment time {}",
                    payment.payment_time, self.channel.payment_time
                );
                return Ok(());
            }
            if state == ChannelState::AwaitingPaymentMerge {
                let expected = self.channel.pending_amount_received.checked_sub(self.channel.pending_amount_sent);
                if expected != Some(payment.payment_amount) {
                    debug!("dropped message: invalid merge payment amount {}", payment.payment_amount);
                    return Ok(());
                }
            }
        }

        // The hypothetical channel the proposal describes; the sender's
        // signatures must verify against transactions built from it.
        let bump_round = matches!(state, ChannelState::Open | ChannelState::AwaitingPaymentMerge);
        let Some(ch2) = self.channel.with_inbound_payment(payment.payment_amount, bump_round) else {
            debug!("dropped message: payment amount {} does not fit the balances", payment.payment_amount);
            return Ok(());
        };

        let (settle_with_guest_tx, settle_with_host_tx) = if ch2.guest_amount().is_zero() {
            if payment.sender_settle_with_guest_sig.is_some() {
                return Err(ProtocolError::UnusedSettleWithGuestSig);
            }
            let host_tx = build_settle_only_with_host_tx(&ch2, payment.payment_time)
                .map_err(|e| ProtocolError::build_tx("settle-only-with-host", e))?;
            (None, host_tx)
        } else {
            let guest_tx = build_settle_with_guest_tx(&ch2, payment.payment_time)
                .map_err(|e| ProtocolError::build_tx("settle-with-guest", e))?;
            let guest_sig = payment
                .sender_settle_with_guest_sig
                .as_ref()
                .ok_or(ProtocolError::sig_verify("settle-with-guest", SigVerifyError::Malformed))?;
            self.channel.verify_counterparty_sig(&guest_tx, guest_sig, "settle-with-guest")?;
            let host_tx = build_settle_with_host_tx(&ch2, payment.payment_time)
                .map_err(|e| ProtocolError::build_tx("settle-with-host", e))?;
            (Some(guest_tx), host_tx)
        };
        self.channel.verify_counterparty_sig(
            &settle_with_host_tx,
            &payment.sender_settle_with_host_sig,
            "settle-with-host",
        )?;

        if state == ChannelState::PaymentProposed {
            // Both sides proposed concurrently; resolve deterministically.
            let ours = self.channel.pending_amount_sent;
            let wins = ours > payment.payment_amount
                || (ours == payment.payment_amount && self.channel.role.is_host());
            if wins {
                self.channel.round_number += 1;
                self.channel.pending_amount_sent =
                    ours.checked_sub(payment.payment_amount).ok_or(ProtocolError::Arithmetic)?;
                return self.transition_to(ChannelState::PaymentProposed);
            }
            self.channel.pending_amount_received = payment.payment_amount;
            return self.transition_to(ChannelState::AwaitingPaymentMerge);
        }

        if state == ChannelState::Open {
            self.channel.pending_amount_received = payment.payment_amount;
        }
        self.channel.set_counterparty_settlement_txes(
            settle_with_guest_tx,
            settle_with_host_tx,
            payment.sender_settle_with_guest_sig,
            payment.sender_settle_with_host_sig,
            self.seed,
        )?;
        self.channel.pending_payment_time = payment.payment_time;
        self.channel.round_number += 1;
        self.transition_to(ChannelState::PaymentAccepted)
    }

    fn handle_payment_accept(&mut self, accept: PaymentAcceptMsg) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::PaymentProposed {
            return Err(ProtocolError::UnexpectedState(self.channel.state));
        }
        *self.channel = self
            .channel
            .with_outbound_payment(self.channel.pending_amount_sent)
            .ok_or(ProtocolError::Arithmetic)?;

        let (recipient_ratchet_acct, recipient_ratchet_seqnum) = self.channel.counterparty_ratchet();
        let ratchet_tx = build_ratchet_tx(
            self.channel,
            self.channel.pending_payment_time,
            recipient_ratchet_acct,
            recipient_ratchet_seqnum,
        )
        .map_err(|e| ProtocolError::build_tx("ratchet", e))?;
        self.channel.verify_counterparty_sig(&ratchet_tx, &accept.recipient_ratchet_sig, "ratchet")?;

        let host_tx = if self.channel.guest_amount().is_zero() {
            build_settle_only_with_host_tx(self.channel, self.channel.pending_payment_time)
                .map_err(|e| ProtocolError::build_tx("settle-only-with-host", e))?
        } else {
            build_settle_with_host_tx(self.channel, self.channel.pending_payment_time)
                .map_err(|e| ProtocolError::build_tx("settle-with-host", e))?
        };
        self.channel.verify_counterparty_sig(
            &host_tx,
            &accept.recipient_settle_with_host_sig,
            "settle-with-host",
        )?;

        let guest_tx = if self.channel.guest_amount().is_zero() {
            if accept.recipient_settle_with_guest_sig.is_some() {
                return Err(ProtocolError::UnusedSettleWithGuestSig);
            }
            None
        } else {
            let tx = build_settle_with_guest_tx(self.channel, self.channel.pending_payment_time)
                .map_err(|e| ProtocolError::build_tx("settle-with-guest", e))?;
            let sig = accept
                .recipient_settle_with_guest_sig
                .as_ref()
                .ok_or(ProtocolError::sig_verify("settle-with-guest", SigVerifyError::Malformed))?;
            self.channel.verify_counterparty_sig(&tx, sig, "settle-with-guest")?;
            Some(tx)
        };

        self.channel.set_latest_settlement_txes(
            guest_tx,
            host_tx,
            accept.recipient_settle_with_guest_sig,
            accept.recipient_settle_with_host_sig.clone(),
            self.seed,
        )?;
        self.channel.sign_ratchet_tx(ratchet_tx, accept.recipient_ratchet_sig, self.seed)?;

        self.channel.payment_time = self.channel.pending_payment_time;
        self.channel.pending_amount_sent = Amount::ZERO;
        self.channel.pending_amount_received = Amount::ZERO;
        let complete = create_payment_complete_msg(self.channel, self.seed)?;
        self.stage_msg(complete);
        self.transition_to(ChannelState::Open)
    }

    fn handle_payment_complete(&mut self, complete: PaymentCompleteMsg) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::PaymentAccepted {
            return Err(ProtocolError::UnexpectedState(self.channel.state));
        }
        let delta = self.channel.pending_amount_received.delta_from(self.channel.pending_amount_sent);
        match self.channel.role {
            Role::Guest => {
                self.channel.guest_amount =
                    self.channel.guest_amount.checked_apply(delta).ok_or(ProtocolError::Arithmetic)?;
                self.channel.host_amount =
                    self.channel.host_amount.checked_apply(-delta).ok_or(ProtocolError::Arithmetic)?;
            }
            Role::Host => {
                self.channel.host_amount =
                    self.channel.host_amount.checked_apply(delta).ok_or(ProtocolError::Arithmetic)?;
                self.channel.guest_amount =
                    self.channel.guest_amount.checked_apply(-delta).ok_or(ProtocolError::Arithmetic)?;
            }
        }

        let (sender_ratchet_acct, sender_ratchet_seqnum) = self.channel.counterparty_ratchet();
        let ratchet_tx = build_ratchet_tx(
            self.channel,
            self.channel.pending_payment_time,
            sender_ratchet_acct,
            sender_ratchet_seqnum,
        )
        .map_err(|e| ProtocolError::build_tx("ratchet", e))?;
        self.channel.verify_counterparty_sig(&ratchet_tx, &complete.sender_ratchet_sig, "ratchet")?;

        // The counterparty's pair becomes the channel's publishable pair.
        self.channel.current_settle_with_guest_tx = self.channel.counterparty_latest_settle_with_guest_tx.clone();
        self.channel.current_settle_with_host_tx = self.channel.counterparty_latest_settle_with_host_tx.clone();
        self.channel.sign_ratchet_tx(ratchet_tx, complete.sender_ratchet_sig, self.seed)?;

        self.channel.payment_time = self.channel.pending_payment_time;
        self.channel.pending_amount_sent = Amount::ZERO;
        self.channel.pending_amount_received = Amount::ZERO;
        self.transition_to(ChannelState::Open)
    }

    fn handle_close(&mut self, close: CloseMsg) -> Result<(), ProtocolError> {
        match self.channel.state {
            ChannelState::Open | ChannelState::PaymentProposed | ChannelState::AwaitingClose => {}
            state => return Err(ProtocolError::UnexpectedState(state)),
        }
        let coop_close_tx = build_cooperative_close_tx(self.channel)
            .map_err(|e| ProtocolError::build_tx("cooperative-close", e))?;
        self.channel.verify_counterparty_sig(&coop_close_tx, &close.cooperative_close_sig, "cooperative-close")?;
        self.channel.counterparty_coop_close_sig = Some(close.cooperative_close_sig);
        if self.channel.state != ChannelState::AwaitingClose {
            self.channel.pending_payment_time = self.ledger_time;
        }
        self.transition_to(ChannelState::AwaitingClose)
    }

    // ---------------------------------------------------------------------
    // Local commands
    // ---------------------------------------------------------------------

    fn handle_command(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        match cmd {
            Command::CreateChannel(cfg) => self.handle_create_channel(*cfg),
            Command::ProposePayment(amount) => self.handle_propose_payment(amount),
            Command::TopUp(amount) => self.handle_top_up(amount),
            Command::CloseChannel => self.handle_close_command(),
            Command::ForceClose => self.handle_force_close_command(),
            Command::CleanUp => self.handle_cleanup_command(),
        }
    }

    fn handle_create_channel(&mut self, cfg: ChannelConfig) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Start {
            return Err(ProtocolError::ChannelExists);
        }
        let seed = self.seed.ok_or(ProtocolError::NoSeed)?;
        *self.channel = Channel::new_host(&cfg, self.wallet, seed);
        self.transition_to(ChannelState::SettingUp)
    }

    fn handle_propose_payment(&mut self, amount: Amount) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Open {
            return Err(ProtocolError::UnexpectedState(self.channel.state));
        }
        if amount > self.channel.my_balance() {
            return Err(ProtocolError::InsufficientBalance);
        }
        self.channel.pending_amount_sent = amount;
        self.channel.pending_payment_time = self.ledger_time;
        self.channel.round_number += 1;
        self.transition_to(ChannelState::PaymentProposed)
    }

    fn handle_top_up(&mut self, amount: Amount) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Open {
            return Err(ProtocolError::UnexpectedState(self.channel.state));
        }
        if !self.channel.role.is_host() {
            return Err(ProtocolError::WrongRole(Role::Host));
        }
        let env = top_up_envelope(self.channel, self.wallet, amount, self.seed)?;
        self.stage_tx(env);
        Ok(())
    }

    fn handle_close_command(&mut self) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::Open {
            return Err(ProtocolError::UnexpectedState(self.channel.state));
        }
        // Arms the round timer for the close handshake.
        self.channel.pending_payment_time = self.ledger_time;
        self.transition_to(ChannelState::AwaitingClose)
    }

    fn handle_force_close_command(&mut self) -> Result<(), ProtocolError> {
        match self.channel.state {
            ChannelState::AwaitingFunding
            | ChannelState::Open
            | ChannelState::PaymentProposed
            | ChannelState::PaymentAccepted
            | ChannelState::AwaitingPaymentMerge
            | ChannelState::AwaitingClose => self.force_close(),
            state => Err(ProtocolError::UnexpectedState(state)),
        }
    }

    fn handle_cleanup_command(&mut self) -> Result<(), ProtocolError> {
        match self.channel.state {
            ChannelState::SettingUp | ChannelState::ChannelProposed => {
                self.transition_to(ChannelState::AwaitingCleanup)
            }
            state => Err(ProtocolError::UnexpectedState(state)),
        }
    }

    // ---------------------------------------------------------------------
    // Ledger observations and timers
    // ---------------------------------------------------------------------

    fn handle_ledger_event(&mut self, event: LedgerEvent) -> Result<(), ProtocolError> {
        match event {
            LedgerEvent::AccountExists { account, seqnum } => self.handle_account_exists(account, seqnum),
            LedgerEvent::TxIncluded { source, seqnum } => self.handle_tx_included(source, seqnum),
            LedgerEvent::EscrowDeposit { source, seqnum, amount } => self.handle_escrow_deposit(source, seqnum, amount),
            LedgerEvent::TimeAdvanced(t) => {
                self.ledger_time = t;
                self.check_timers()
            }
        }
    }

    fn handle_account_exists(&mut self, account: AccountId, seqnum: SequenceNumber) -> Result<(), ProtocolError> {
        if self.channel.state != ChannelState::SettingUp {
            debug!("dropped observation: account {account} in state {}", self.channel.state);
            return Ok(());
        }
        if account == self.channel.host_ratchet_acct {
            self.channel.setup_progress.host_ratchet = true;
            self.channel.host_ratchet_acct_seqnum = seqnum;
        } else if account == self.channel.guest_ratchet_acct {
            self.channel.setup_progress.guest_ratchet = true;
            self.channel.guest_ratchet_acct_seqnum = seqnum;
        } else if account == self.channel.escrow_acct {
            self.channel.setup_progress.escrow = true;
            self.channel.base_sequence_number = seqnum;
        } else {
            debug!("dropped observation: account {account} is not a channel account");
            return Ok(());
        }
        if self.channel.setup_progress.complete() {
            return self.transition_to(ChannelState::ChannelProposed);
        }
        Ok(())
    }

    fn handle_tx_included(&mut self, source: AccountId, seqnum: SequenceNumber) -> Result<(), ProtocolError> {
        match self.channel.state {
            ChannelState::AwaitingFunding
                if source == self.channel.host_acct
                    && (self.channel.funding_tx_seqnum == 0 || seqnum == self.channel.funding_tx_seqnum) =>
            {
                // The guest never learns the host wallet's sequence numbers,
                // so any host-wallet transaction seen while awaiting funding
                // is the funding tx. Record it so the funding deposit is not
                // later mistaken for a top-up.
                self.channel.funding_tx_seqnum = seqnum;
                self.transition_to(ChannelState::Funded)
            }
            ChannelState::AwaitingClose
                if source == self.channel.escrow_acct && seqnum == self.channel.base_sequence_number + 1 =>
            {
                self.transition_to(ChannelState::Closed)
            }
            ChannelState::AwaitingSettlementMintime
                if self
                    .channel
                    .current_ratchet_tx
                    .as_ref()
                    .is_some_and(|env| env.tx.source == source && env.tx.seqnum == seqnum) =>
            {
                self.channel.ratchet_tx_included = true;
                // The settlement time lock may already have passed.
                self.check_timers()
            }
            ChannelState::AwaitingSettlement if source == self.channel.escrow_acct => {
                match &self.channel.current_settle_with_host_tx {
                    Some(env) if env.tx.seqnum == seqnum => self.transition_to(ChannelState::Closed),
                    _ => Ok(()),
                }
            }
            ChannelState::AwaitingCleanup
                if source == self.channel.host_acct && seqnum == self.channel.cleanup_tx_seqnum =>
            {
                self.transition_to(ChannelState::Closed)
            }
            state => {
                debug!("dropped observation: tx from {source} at seqnum {seqnum} in state {state}");
                Ok(())
            }
        }
    }

    /// A confirmed deposit into escrow raises the host balance: our own
    /// pending top-up, or one the counterparty published.
    fn handle_escrow_deposit(
        &mut self,
        source: AccountId,
        seqnum: SequenceNumber,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if let Some((topup_seqnum, pending)) = self.channel.pending_top_up {
            if source == self.channel.host_acct && seqnum == topup_seqnum {
                if amount != pending {
                    warn!(
                        "channel {}: top-up deposit {amount} differs from published amount {pending}",
                        self.channel.id
                    );
                }
                self.channel.host_amount =
                    self.channel.host_amount.checked_add(amount).ok_or(ProtocolError::Arithmetic)?;
                self.channel.pending_top_up = None;
                return Ok(());
            }
        }
        // The funding deposit was already accounted for at channel creation.
        if self.channel.state == ChannelState::Open
            && source == self.channel.host_acct
            && seqnum != self.channel.funding_tx_seqnum
        {
            self.channel.host_amount =
                self.channel.host_amount.checked_add(amount).ok_or(ProtocolError::Arithmetic)?;
            return Ok(());
        }
        debug!(
            "dropped observation: escrow deposit of {amount} from {source} in state {}",
            self.channel.state
        );
        Ok(())
    }

    fn check_timers(&mut self) -> Result<(), ProtocolError> {
        match self.channel.state {
            ChannelState::PaymentProposed
            | ChannelState::PaymentAccepted
            | ChannelState::AwaitingPaymentMerge
            | ChannelState::AwaitingClose => {
                let deadline = self.channel.pending_payment_time + self.channel.max_round_duration;
                if self.ledger_time.after(deadline) {
                    info!(
                        "channel {}: round open since {} expired at ledger time {}",
                        self.channel.id, self.channel.pending_payment_time, self.ledger_time
                    );
                    return self.force_close();
                }
            }
            ChannelState::SettingUp | ChannelState::ChannelProposed => {
                let deadline = self.channel.funding_time + self.channel.max_round_duration;
                if self.ledger_time.after(deadline) {
                    info!("channel {}: setup expired at ledger time {}", self.channel.id, self.ledger_time);
                    return self.transition_to(ChannelState::AwaitingCleanup);
                }
            }
            ChannelState::AwaitingSettlementMintime => {
                // The settlement pair goes out once the ratchet is on the
                // ledger and its time lock has passed.
                if let Some(min_time) = self.channel.settlement_min_time() {
                    if self.channel.ratchet_tx_included && !self.ledger_time.before(min_time) {
                        return self.transition_to(ChannelState::AwaitingSettlement);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Unilateral close: publish the ratchet, then the settlement pair once
    /// its time lock passes.
    fn force_close(&mut self) -> Result<(), ProtocolError> {
        if self.channel.current_ratchet_tx.is_some() {
            self.transition_to(ChannelState::AwaitingSettlementMintime)
        } else {
            // Nothing ratcheted means nothing of ours is locked up; there is
            // no settlement to force.
            warn!("channel {}: force close with no ratchet tx, abandoning", self.channel.id);
            self.transition_to(ChannelState::Closed)
        }
    }
}

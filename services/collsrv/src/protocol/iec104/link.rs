//! Link-layer state: sequence numbers, flow-control windows, pending
//! commands and the protocol timers
//!
//! [`LinkState`] is pure bookkeeping so the sequencing rules are testable
//! without sockets; the device actor owns the I/O around it. Sequence
//! numbers are 15-bit, modulo 32768; a forward distance below 20000 counts
//! as "ahead", anything else as "behind" (wraparound-safe, kept for
//! compatibility with peers the collector was validated against).

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::asdu::{Cause, TypeId};
use super::frame::{Apci, Frame};
use crate::error::{CollSrvError, Result};

/// Sequence number modulus (15-bit counters)
pub const SEQ_MODULO: u16 = 1 << 15;
/// Forward distances below this count as "ahead"
pub const SEQ_AHEAD_WINDOW: u16 = 20_000;

/// Next sequence number, wrapping at 32768
pub fn seq_next(n: u16) -> u16 {
    (n + 1) % SEQ_MODULO
}

/// Forward distance from `from` to `to` in sequence space
pub fn seq_distance(from: u16, to: u16) -> u16 {
    (to + SEQ_MODULO - from) % SEQ_MODULO
}

/// True when `n` lies ahead of `of` (within the forward window)
pub fn seq_is_ahead(n: u16, of: u16) -> bool {
    let distance = seq_distance(of, n);
    distance != 0 && distance < SEQ_AHEAD_WINDOW
}

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    /// TCP established, STARTDT not yet confirmed
    ConnectedStopped,
    /// Data transfer running
    ConnectedStarted,
}

/// Per-connection sequencing and pending-command state
#[derive(Debug)]
pub struct LinkState {
    pub phase: LinkPhase,
    /// Next send sequence number
    pub ssn: u16,
    /// Next expected receive sequence number
    pub rsn: u16,
    /// Unacknowledged I-frames we have sent
    pub k: u16,
    /// Received I-frames not yet acknowledged by us
    pub w: u16,
    k_max: u16,
    w_max: u16,
    /// Outstanding commands awaiting confirmation, head first
    pub send_list: VecDeque<Frame>,
}

impl LinkState {
    pub fn new(k_max: u16, w_max: u16) -> Self {
        Self {
            phase: LinkPhase::Disconnected,
            ssn: 0,
            rsn: 0,
            k: 0,
            w: 0,
            k_max,
            w_max,
            send_list: VecDeque::new(),
        }
    }

    /// Reset counters and pending commands (connection teardown)
    pub fn reset(&mut self) {
        self.phase = LinkPhase::Disconnected;
        self.ssn = 0;
        self.rsn = 0;
        self.k = 0;
        self.w = 0;
        self.send_list.clear();
    }

    /// True when the send window is saturated: sending must suspend
    pub fn window_full(&self) -> bool {
        self.k >= self.k_max
    }

    /// Stamp an outgoing I-frame: returns (ssn, rsn) to put on the wire,
    /// then advances the counters. Must be called atomically with emission.
    pub fn stamp_outgoing_i(&mut self) -> (u16, u16) {
        let stamped = (self.ssn, self.rsn);
        self.ssn = seq_next(self.ssn);
        self.k += 1;
        self.w = 0;
        stamped
    }

    /// Bookkeeping for an outgoing S-frame
    pub fn note_s_sent(&mut self) {
        self.w = 0;
    }

    /// Process the acknowledge field of a received I/S frame
    ///
    /// The peer acknowledging more than we ever sent is a fatal sequence
    /// error; otherwise `k` becomes the distance from the ack to `ssn`.
    pub fn accept_ack(&mut self, ack: u16) -> Result<()> {
        let outstanding = seq_distance(ack, self.ssn);
        if outstanding > self.k {
            return Err(CollSrvError::sequence(format!(
                "peer acked {ack} ahead of ssn {} (k={})",
                self.ssn, self.k
            )));
        }
        self.k = outstanding;
        Ok(())
    }

    /// Process the send sequence number of a received I-frame
    ///
    /// Returns true when `w` reached the window and an S-frame must be
    /// emitted before the next receive completes.
    pub fn accept_i_arrival(&mut self, peer_send: u16) -> Result<bool> {
        if peer_send != self.rsn {
            return Err(CollSrvError::sequence(format!(
                "peer ssn {peer_send} does not match expected rsn {}",
                self.rsn
            )));
        }
        self.rsn = seq_next(self.rsn);
        self.w += 1;
        Ok(self.w >= self.w_max)
    }

    // ========== Pending command queue ==========

    pub fn push_pending(&mut self, frame: Frame) {
        self.send_list.push_back(frame);
    }

    pub fn pending_head(&self) -> Option<&Frame> {
        self.send_list.front()
    }

    /// Pop the head of the pending queue when `reply` answers it
    ///
    /// A U-frame confirmation answers a pending U-frame activation; an
    /// I-frame answers a pending command of the same type identifier, and a
    /// `Request`-cause reply answers a pending read command.
    pub fn pop_matching(&mut self, reply: &Frame) -> Option<Frame> {
        let head = self.send_list.front()?;
        let matches = match (&reply.apci, reply.asdu()) {
            (Apci::U(kind), _) if kind.is_con() => matches!(head.apci, Apci::U(_)),
            (_, Some(asdu)) => match head.asdu() {
                Some(pending) => {
                    pending.type_id == asdu.type_id
                        || (asdu.cause == Cause::Request && pending.type_id == TypeId::ReadCommand)
                },
                None => false,
            },
            _ => false,
        };
        if matches {
            self.send_list.pop_front()
        } else {
            None
        }
    }
}

/// The four protocol timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTimer {
    /// Confirmation timeout; expiry closes the connection
    T1,
    /// Receive-side delayed acknowledge; expiry sends an S-frame
    T2,
    /// Idle timeout; expiry sends TESTFR act
    T3,
}

const TIMER_COUNT: usize = 3;

/// One-shot deadline bank for T1/T2/T3
///
/// (T0 bounds the connect attempt itself and is handled inline with a
/// `tokio::time::timeout` around the TCP connect.)
pub struct TimerBank {
    deadlines: Mutex<[Option<Instant>; TIMER_COUNT]>,
    changed: Notify,
}

impl Default for TimerBank {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBank {
    pub fn new() -> Self {
        Self {
            deadlines: Mutex::new([None; TIMER_COUNT]),
            changed: Notify::new(),
        }
    }

    /// (Re)start a timer; any previous deadline is replaced
    pub fn start(&self, timer: LinkTimer, after: Duration) {
        self.deadlines.lock()[timer as usize] = Some(Instant::now() + after);
        self.changed.notify_one();
    }

    pub fn stop(&self, timer: LinkTimer) {
        self.deadlines.lock()[timer as usize] = None;
        self.changed.notify_one();
    }

    pub fn stop_all(&self) {
        *self.deadlines.lock() = [None; TIMER_COUNT];
        self.changed.notify_one();
    }

    pub fn is_running(&self, timer: LinkTimer) -> bool {
        self.deadlines.lock()[timer as usize].is_some()
    }

    fn next_due(&self) -> Option<(LinkTimer, Instant)> {
        const TIMERS: [LinkTimer; TIMER_COUNT] = [LinkTimer::T1, LinkTimer::T2, LinkTimer::T3];
        let deadlines = self.deadlines.lock();
        TIMERS
            .iter()
            .filter_map(|&t| deadlines[t as usize].map(|at| (t, at)))
            .min_by_key(|&(_, at)| at)
    }

    /// Wait for the next timer to expire; the fired timer is cleared
    pub async fn expired(&self) -> LinkTimer {
        loop {
            let notified = self.changed.notified();
            match self.next_due() {
                Some((timer, at)) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {
                            let mut deadlines = self.deadlines.lock();
                            // Only fire if nobody rearmed or cancelled meanwhile
                            if deadlines[timer as usize] == Some(at) {
                                deadlines[timer as usize] = None;
                                return timer;
                            }
                        },
                        _ = notified => {},
                    }
                },
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::iec104::asdu::{Asdu, InfoObject, ObjectData};
    use crate::protocol::iec104::frame::UFrameKind;

    fn act_frame(type_id: TypeId) -> Frame {
        let data = match type_id {
            TypeId::ReadCommand => ObjectData::ReadCommand,
            TypeId::ClockSyncCommand => ObjectData::ClockSyncCommand {
                time: chrono::NaiveDate::from_ymd_opt(2026, 8, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            },
            TypeId::MeasFloat => ObjectData::MeasFloat {
                value: 0.0,
                quality: Default::default(),
            },
            _ => ObjectData::InterrogationCommand { qualifier: 20 },
        };
        Frame::i(
            0,
            0,
            Asdu::single(type_id, Cause::Activation, 1, InfoObject::new(0, data)),
        )
    }

    fn reply_frame(type_id: TypeId, cause: Cause) -> Frame {
        let mut frame = act_frame(type_id);
        frame.asdu.as_mut().unwrap().cause = cause;
        frame
    }

    #[test]
    fn sequence_arithmetic_wraps() {
        assert_eq!(seq_next(0), 1);
        assert_eq!(seq_next(32767), 0);
        assert_eq!(seq_distance(32767, 0), 1);
        assert_eq!(seq_distance(0, 32767), 32767);
        assert!(seq_is_ahead(1, 0));
        assert!(seq_is_ahead(0, 32767));
        assert!(!seq_is_ahead(0, 0));
        // Distances beyond the window count as "behind"
        assert!(!seq_is_ahead(25000, 0));
    }

    #[test]
    fn stamping_advances_counters() {
        let mut link = LinkState::new(12, 8);
        link.w = 3;
        let (ssn, rsn) = link.stamp_outgoing_i();
        assert_eq!((ssn, rsn), (0, 0));
        assert_eq!(link.ssn, 1);
        assert_eq!(link.k, 1);
        assert_eq!(link.w, 0);
    }

    #[test]
    fn ssn_wraps_at_modulus() {
        let mut link = LinkState::new(32768, 8);
        link.ssn = 32767;
        let (ssn, _) = link.stamp_outgoing_i();
        assert_eq!(ssn, 32767);
        assert_eq!(link.ssn, 0);
    }

    #[test]
    fn ack_reduces_outstanding_count() {
        let mut link = LinkState::new(12, 8);
        for _ in 0..5 {
            link.stamp_outgoing_i();
        }
        assert_eq!(link.k, 5);
        link.accept_ack(3).unwrap();
        assert_eq!(link.k, 2);
        link.accept_ack(5).unwrap();
        assert_eq!(link.k, 0);
    }

    #[test]
    fn ack_beyond_sent_is_fatal() {
        let mut link = LinkState::new(12, 8);
        link.stamp_outgoing_i();
        let err = link.accept_ack(2).unwrap_err();
        assert!(matches!(err, CollSrvError::Sequence(_)));
    }

    #[test]
    fn ack_across_wraparound() {
        let mut link = LinkState::new(12, 8);
        link.ssn = 32766;
        for _ in 0..4 {
            link.stamp_outgoing_i();
        }
        assert_eq!(link.ssn, 2);
        assert_eq!(link.k, 4);
        // Peer acks through the wrap point
        link.accept_ack(1).unwrap();
        assert_eq!(link.k, 1);
    }

    #[test]
    fn window_blocks_at_k() {
        let mut link = LinkState::new(2, 8);
        assert!(!link.window_full());
        link.stamp_outgoing_i();
        link.stamp_outgoing_i();
        assert!(link.window_full());
        link.accept_ack(1).unwrap();
        assert!(!link.window_full());
    }

    #[test]
    fn mismatched_peer_ssn_is_fatal() {
        let mut link = LinkState::new(12, 8);
        assert!(link.accept_i_arrival(0).is_ok());
        assert!(matches!(
            link.accept_i_arrival(5),
            Err(CollSrvError::Sequence(_))
        ));
    }

    #[test]
    fn w_window_demands_s_frame() {
        let mut link = LinkState::new(12, 2);
        assert!(!link.accept_i_arrival(0).unwrap());
        assert!(link.accept_i_arrival(1).unwrap());
        link.note_s_sent();
        assert_eq!(link.w, 0);
        assert!(!link.accept_i_arrival(2).unwrap());
    }

    #[test]
    fn u_confirmation_pops_pending_u_activation() {
        let mut link = LinkState::new(12, 8);
        link.push_pending(Frame::u(UFrameKind::StartDtAct));
        let popped = link.pop_matching(&Frame::u(UFrameKind::StartDtCon));
        assert_eq!(popped, Some(Frame::u(UFrameKind::StartDtAct)));
        assert!(link.send_list.is_empty());
    }

    #[test]
    fn confirmation_matches_head_by_type() {
        let mut link = LinkState::new(12, 8);
        link.push_pending(act_frame(TypeId::ClockSyncCommand));
        link.push_pending(act_frame(TypeId::InterrogationCommand));

        // A confirmation for the wrong type leaves the queue untouched
        let reply = reply_frame(TypeId::InterrogationCommand, Cause::ActivationConfirmation);
        assert!(link.pop_matching(&reply).is_none());

        let reply = reply_frame(TypeId::ClockSyncCommand, Cause::ActivationConfirmation);
        assert!(link.pop_matching(&reply).is_some());
        assert_eq!(link.send_list.len(), 1);
    }

    #[test]
    fn request_reply_answers_pending_read() {
        let mut link = LinkState::new(12, 8);
        link.push_pending(act_frame(TypeId::ReadCommand));
        let reply = reply_frame(TypeId::MeasFloat, Cause::Request);
        assert!(link.pop_matching(&reply).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_bank_fires_earliest() {
        let bank = TimerBank::new();
        bank.start(LinkTimer::T1, Duration::from_secs(15));
        bank.start(LinkTimer::T2, Duration::from_secs(10));
        let fired = bank.expired().await;
        assert_eq!(fired, LinkTimer::T2);
        assert!(bank.is_running(LinkTimer::T1));
        let fired = bank.expired().await;
        assert_eq!(fired, LinkTimer::T1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_does_not_fire() {
        let bank = TimerBank::new();
        bank.start(LinkTimer::T2, Duration::from_secs(10));
        bank.start(LinkTimer::T3, Duration::from_secs(20));
        bank.stop(LinkTimer::T2);
        let fired = bank.expired().await;
        assert_eq!(fired, LinkTimer::T3);
    }
}

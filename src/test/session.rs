use crate::session::{Session, SessionOpts};
use crate::tcp::{SenderStateKind, TcpVariant, MSS};

/// A buffer large enough that the drop-tail queue never overflows;
/// losses then only happen when the tests force them.
const BIG_BUFFER: i64 = 1 << 20;

fn opts(variant: TcpVariant) -> SessionOpts {
    SessionOpts {
        variant,
        iterations: 16,
        loss_rate: 0.0,
        buffer_capacity: BIG_BUFFER,
        rng_seed: Some(7),
        ..SessionOpts::default()
    }
}

/// The invariants of the core state machines, checked after every round.
fn check_invariants(session: &Session) {
    let sender = session.sender();
    let receiver = session.receiver();
    let router = session.router();

    assert!(receiver.current_rcv_window() >= 0);
    assert!(receiver.current_rcv_window() <= receiver.max_rcv_window());

    assert!(sender.last_byte_acked() <= sender.last_byte_sent());
    assert!(sender.cong_window() >= MSS);

    let occupancy: i64 = router.buffered().map(|s| s.len).sum();
    assert_eq!(occupancy, router.buffer_occupancy());
    assert!(occupancy <= router.buffer_capacity());

    for seg in receiver.buffered_segments() {
        assert!(seg.seq > receiver.next_byte_expected());
    }
    for a in receiver.buffered_segments() {
        for b in receiver.buffered_segments() {
            if a.seq != b.seq {
                assert!(a.seq + a.len <= b.seq || b.seq + b.len <= a.seq);
            }
        }
    }
}

#[test]
fn tahoe_slow_start_doubles_until_congestion_avoidance() {
    let mut session = Session::new(opts(TcpVariant::Tahoe));

    for _ in 0..=16 {
        session.tick().expect("tick");
        check_invariants(&session);
    }

    // Exponential growth while the bottleneck is not yet limiting:
    // 1, 2, 4, ... MSS per round.
    let metrics = session.metrics();
    for i in 0..8 {
        assert_eq!(
            metrics[i].cong_window,
            MSS << i,
            "round {} should double the congestion window",
            i + 1
        );
    }

    // No loss: the threshold never moves, and once the window passes
    // it the sender sits in congestion avoidance.
    assert!(metrics.iter().all(|m| m.ss_thresh == 65535));
    assert_eq!(session.sender().ss_thresh(), 65535);
    assert_eq!(
        session.sender().state(),
        SenderStateKind::CongestionAvoidance
    );
    assert_eq!(session.sender().stats.retransmissions, 0);

    let report = session.report();
    assert!(report.utilization_percent > 0);
    assert!(report.utilization_percent <= 100);
}

#[test]
fn zero_loss_run_acknowledges_every_byte() {
    let mut session = Session::new(SessionOpts {
        variant: TcpVariant::Tahoe,
        iterations: 10,
        total_bytes: 10 * MSS,
        rng_seed: Some(7),
        ..SessionOpts::default()
    });

    for _ in 0..=10 {
        session.tick().expect("tick");
        check_invariants(&session);
    }

    // Cumulative-ACK correctness under zero loss.
    let sender = session.sender();
    assert_eq!(sender.last_byte_sent(), 10 * MSS - 1);
    assert_eq!(sender.last_byte_acked(), sender.last_byte_sent());
    assert_eq!(
        session.receiver().next_byte_expected(),
        sender.last_byte_acked() + 1
    );
    assert!(session.receiver().buffered_segments().is_empty());
}

#[test]
fn reno_single_loss_triggers_fast_retransmit_and_recovery() {
    let mut session = Session::new(opts(TcpVariant::Reno));

    // Four clean rounds: bursts of 1, 2, 4 and 8 segments.
    for _ in 0..4 {
        session.tick().expect("tick");
    }
    assert_eq!(session.sender().cong_window(), 8 * MSS);

    // Lose the first segment of round 5's burst of 16.
    session.router_mut().force_error_next(1);
    session.tick().expect("tick");
    check_invariants(&session);

    // Round 6: the duplicate ACKs arrive. The third one fires the
    // fast retransmit; flight was 2048 bytes, so ssthresh = 1024 and
    // cwnd = 1024 + 3 MSS, inflated by the 12 further duplicates.
    session.tick().expect("tick");
    check_invariants(&session);
    let sender = session.sender();
    assert_eq!(sender.state(), SenderStateKind::FastRecovery);
    assert_eq!(sender.stats.retransmissions, 1);
    assert_eq!(sender.ss_thresh(), 1024);
    assert_eq!(sender.cong_window(), 1024 + 3 * MSS + 12 * MSS);
    assert!(sender.ss_thresh() >= 2 * MSS);

    // Round 7: the retransmission is acknowledged; the new ACK exits
    // fast recovery into congestion avoidance and the window deflates
    // to the threshold.
    session.tick().expect("tick");
    check_invariants(&session);
    let sender = session.sender();
    assert_eq!(sender.state(), SenderStateKind::CongestionAvoidance);
    assert_eq!(sender.cong_window(), sender.ss_thresh());
    assert_eq!(sender.stats.retransmissions, 1);
}

#[test]
fn newreno_recovers_from_two_losses_in_one_window() {
    let mut session = Session::new(opts(TcpVariant::NewReno));

    for _ in 0..4 {
        session.tick().expect("tick");
    }

    // Lose the first two segments of round 5's burst.
    session.router_mut().force_error_next(2);
    session.tick().expect("tick");
    check_invariants(&session);

    // Round 6: fast retransmit of the first hole.
    session.tick().expect("tick");
    check_invariants(&session);
    assert_eq!(session.sender().state(), SenderStateKind::FastRecovery);
    assert_eq!(session.sender().stats.retransmissions, 1);

    // Round 7: the partial ACK retransmits the second hole; the
    // sender stays in fast recovery because the recovery point is
    // not yet covered.
    session.tick().expect("tick");
    check_invariants(&session);
    assert_eq!(session.sender().state(), SenderStateKind::FastRecovery);
    assert_eq!(session.sender().stats.retransmissions, 2);

    // Round 8: the full ACK ends the recovery.
    session.tick().expect("tick");
    check_invariants(&session);
    let sender = session.sender();
    assert_eq!(sender.state(), SenderStateKind::CongestionAvoidance);
    assert_eq!(sender.cong_window(), sender.ss_thresh());
    assert_eq!(sender.last_byte_sent_before_3dup(), -1);
}

#[test]
fn losing_the_whole_first_burst_recovers_via_rto() {
    let mut session = Session::new(opts(TcpVariant::Tahoe));

    // The very first burst is a single segment; corrupt it. With no
    // later packets there are no duplicate ACKs, so only the RTO
    // timer can recover (tail loss).
    session.router_mut().force_error_next(1);

    // The initial timeout interval is 6 ticks: rounds 1..6 stall.
    for _ in 0..6 {
        session.tick().expect("tick");
        check_invariants(&session);
        assert_eq!(session.sender().stats.rto_timeouts, 0);
        assert_eq!(session.sender().last_byte_acked(), -1);
    }
    let metrics = session.metrics();
    assert!(metrics[1..].iter().all(|m| m.flight_size == MSS));

    // Round 7: the timer fires, the oldest segment is retransmitted
    // with the RTT-sampling suppressed, the window collapses to one
    // MSS and the backoff doubles.
    session.tick().expect("tick");
    check_invariants(&session);
    let sender = session.sender();
    assert_eq!(sender.stats.rto_timeouts, 1);
    assert_eq!(sender.stats.retransmissions, 1);
    assert_eq!(sender.rto_estimator().backoff(), 2);
    assert_eq!(sender.ss_thresh(), 2 * MSS);
    assert_eq!(session.metrics().last().map(|m| m.cong_window), Some(MSS));

    // Round 8: the retransmission is acknowledged. Its timestamp was
    // -1, so the backoff survives until a fresh sample arrives.
    session.tick().expect("tick");
    check_invariants(&session);
    let sender = session.sender();
    assert_eq!(sender.last_byte_acked(), MSS - 1);
    assert_eq!(sender.rto_estimator().backoff(), 2);
}

#[test]
fn random_loss_run_keeps_the_invariants() {
    // Default bottleneck buffer plus random corruption: drops, dup
    // ACKs, retransmissions and timeouts all mixed together.
    let mut session = Session::new(SessionOpts {
        variant: TcpVariant::Reno,
        iterations: 50,
        loss_rate: 0.05,
        rng_seed: Some(42),
        ..SessionOpts::default()
    });

    for _ in 0..=50 {
        session.tick().expect("tick");
        check_invariants(&session);
    }

    // The run made progress and the utilization report is computable.
    assert!(session.sender().last_byte_acked() > 0);
    let report = session.report();
    assert!(report.actual_bytes > 0);
    assert!(report.potential_bytes > 0);
}

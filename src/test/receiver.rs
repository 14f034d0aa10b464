use crate::net::{Link, LinkMode, NodeId, Segment};
use crate::sim::{SimClock, SimTime, TimerOwner, TimerRole};
use crate::tcp::{Receiver, MSS};

const RECEIVER: NodeId = NodeId(1);
const SENDER: NodeId = NodeId(0);
const ROUTER: NodeId = NodeId(2);

fn harness() -> (Receiver, SimClock, Link) {
    let receiver = Receiver::new(RECEIVER, SENDER, 65536);
    let clock = SimClock::default();
    let link = Link::new(RECEIVER, ROUTER, 0.01, 0.001);
    (receiver, clock, link)
}

fn data(seq: i64, timestamp: f64) -> Segment {
    let mut seg = Segment::data(RECEIVER, 65536, seq, MSS);
    seg.timestamp = timestamp;
    seg
}

/// Fire the delayed-ACK timer the way the endpoint does at the end of
/// a round.
fn fire_delayed_ack(receiver: &mut Receiver, clock: &mut SimClock, link: &mut Link) {
    let owner = TimerOwner {
        node: RECEIVER,
        role: TimerRole::Receiver,
    };
    for kind in clock.check_expired_timers(owner) {
        receiver.timer_expired(kind, clock, link);
    }
}

/// Drain everything the receiver put on the wire towards the router.
fn sent_acks(link: &mut Link, at: f64) -> Vec<Segment> {
    link.process(LinkMode::N1ToN2, SimTime(at))
        .into_iter()
        .map(|d| d.segment)
        .collect()
}

#[test]
fn in_order_segments_coalesce_into_one_cumulative_ack() {
    let (mut receiver, mut clock, mut link) = harness();

    receiver.handle(data(0, 1.0), &mut clock, &mut link);
    receiver.handle(data(128, 1.0), &mut clock, &mut link);
    assert_eq!(receiver.next_byte_expected(), 256);

    // Nothing on the wire until the delayed-ACK timer fires.
    assert_eq!(link.in_flight(LinkMode::N1ToN2), 0);
    fire_delayed_ack(&mut receiver, &mut clock, &mut link);

    let acks = sent_acks(&mut link, 2.0);
    assert_eq!(acks.len(), 1);
    assert!(acks[0].is_ack);
    assert_eq!(acks[0].ack_seq, 256);
    // The cumulative ACK echoes the data timestamp for RTT sampling.
    assert_eq!(acks[0].timestamp, 1.0);
    assert_eq!(acks[0].rcv_window, 65536);
}

#[test]
fn reordered_delivery_emits_duplicate_then_cumulative_ack() {
    // Deliver segments [0, 2, 1].
    let (mut receiver, mut clock, mut link) = harness();

    receiver.handle(data(0, 1.0), &mut clock, &mut link);
    // Segment 2 is out of order: the pending cumulative ACK for
    // segment 0 is flushed, then a duplicate ACK goes out immediately.
    receiver.handle(data(2 * 128, 1.0), &mut clock, &mut link);

    let acks = sent_acks(&mut link, 2.0);
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0].ack_seq, 128);
    assert_eq!(acks[1].ack_seq, 128);
    // The duplicate ACK is not usable for RTT sampling.
    assert_eq!(acks[1].timestamp, -1.0);
    // One buffered segment shrinks the advertised window by
    // last_byte_received - next_byte_expected = 383 - 128.
    assert_eq!(acks[1].rcv_window, 65536 - 255);
    assert_eq!(receiver.buffered_segments().len(), 1);

    // Segment 1 fills the gap: the next cumulative ACK covers through
    // the end of segment 2.
    receiver.handle(data(128, 2.0), &mut clock, &mut link);
    assert_eq!(receiver.next_byte_expected(), 384);
    assert!(receiver.buffered_segments().is_empty());
    assert_eq!(receiver.current_rcv_window(), 65536);

    fire_delayed_ack(&mut receiver, &mut clock, &mut link);
    let acks = sent_acks(&mut link, 3.0);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].ack_seq, 384);
}

#[test]
fn corrupted_segments_are_silently_discarded() {
    let (mut receiver, mut clock, mut link) = harness();

    let mut seg = data(0, 1.0);
    seg.in_error = true;
    receiver.handle(seg, &mut clock, &mut link);

    assert_eq!(receiver.next_byte_expected(), 0);
    assert_eq!(receiver.last_byte_received(), -1);
    fire_delayed_ack(&mut receiver, &mut clock, &mut link);
    assert!(sent_acks(&mut link, 2.0).is_empty());
}

#[test]
fn buffered_segments_stay_beyond_the_expected_byte_and_disjoint() {
    let (mut receiver, mut clock, mut link) = harness();

    // A gap at segment 0, then segments 2, 3 and a duplicate of 2.
    receiver.handle(data(2 * 128, 1.0), &mut clock, &mut link);
    receiver.handle(data(3 * 128, 1.0), &mut clock, &mut link);
    receiver.handle(data(2 * 128, 1.0), &mut clock, &mut link);

    let buffered = receiver.buffered_segments();
    assert_eq!(buffered.len(), 2);
    for seg in buffered {
        assert!(seg.seq > receiver.next_byte_expected());
    }
    // Pairwise disjoint byte ranges.
    for a in buffered {
        for b in buffered {
            if a.seq != b.seq {
                assert!(a.seq + a.len <= b.seq || b.seq + b.len <= a.seq);
            }
        }
    }
    // Every arrival still produced a duplicate ACK.
    assert_eq!(sent_acks(&mut link, 2.0).len(), 3);
}

#[test]
fn receive_window_shrinks_while_reordered_data_is_buffered() {
    let (mut receiver, mut clock, mut link) = harness();

    receiver.handle(data(0, 1.0), &mut clock, &mut link);
    assert_eq!(receiver.current_rcv_window(), 65536);

    receiver.handle(data(3 * 128, 1.0), &mut clock, &mut link);
    // last_byte_received = 511, next expected = 128.
    assert_eq!(receiver.current_rcv_window(), 65536 - 383);
    assert!(receiver.current_rcv_window() <= receiver.max_rcv_window());
    assert!(receiver.current_rcv_window() >= 0);
}

use crate::tcp::RtoEstimator;

#[test]
fn first_sample_seeds_estimate_and_half_deviation() {
    let mut rto = RtoEstimator::new(1.0);
    rto.update_rtt(5.0, 2.0);

    // RFC 6298: first measurement sets EstimatedRTT = sample and
    // DevRTT = sample / 2.
    assert_eq!(rto.estimated_rtt(), 3);
    assert_eq!(rto.dev_rtt(), 1);
    // TimeoutInterval = 3 + max(1, 4 * 1) = 7
    assert_eq!(rto.get_timeout_interval(), 7.0);
}

#[test]
fn samples_are_rounded_and_floored_to_one_tick() {
    let mut rto = RtoEstimator::new(1.0);
    // Sub-tick sample rounds up to the 1-tick floor.
    rto.update_rtt(1.2, 1.0);
    assert_eq!(rto.estimated_rtt(), 1);
    assert_eq!(rto.dev_rtt(), 0);
    // base = 1 + max(1, 0) = 2
    assert_eq!(rto.get_timeout_interval(), 2.0);
}

#[test]
fn retransmitted_segments_are_ignored() {
    let mut rto = RtoEstimator::new(1.0);
    rto.update_rtt(5.0, 2.0);
    rto.timer_backoff();
    let before = rto.get_timeout_interval();

    // Timestamp -1 marks a retransmission: no sample, no backoff reset.
    rto.update_rtt(10.0, -1.0);
    assert_eq!(rto.estimated_rtt(), 3);
    assert_eq!(rto.backoff(), 2);
    assert_eq!(rto.get_timeout_interval(), before);
}

#[test]
fn new_sample_resets_backoff() {
    let mut rto = RtoEstimator::new(1.0);
    rto.update_rtt(2.0, 1.0);
    rto.timer_backoff();
    rto.timer_backoff();
    assert!(rto.backoff() > 1);

    rto.update_rtt(3.0, 2.0);
    assert_eq!(rto.backoff(), 1);
}

#[test]
fn backoff_is_monotone_and_bounded() {
    let mut rto = RtoEstimator::new(1.0);
    // Initial base interval is 6.0 ticks, the cap 240 ticks.
    let mut last = rto.get_timeout_interval();
    for _ in 0..20 {
        rto.timer_backoff();
        let next = rto.get_timeout_interval();
        assert!(next >= last, "timeout interval must not shrink");
        assert!(next <= 240.0, "timeout interval must stay under the cap");
        last = next;
    }
    assert_eq!(last, 240.0);
}

#[test]
fn smoothing_follows_the_ewma_shifts() {
    let mut rto = RtoEstimator::new(1.0);
    rto.update_rtt(9.0, 1.0); // sample 8: est = 8, dev = 4
    rto.update_rtt(25.0, 9.0); // sample 16
    // err = 8: est += 8 >> 3 = 1 -> 9; dev += (8 - 4) >> 2 = 1 -> 5
    assert_eq!(rto.estimated_rtt(), 9);
    assert_eq!(rto.dev_rtt(), 5);
    // base = 9 + max(1, 20) = 29
    assert_eq!(rto.get_timeout_interval(), 29.0);
}

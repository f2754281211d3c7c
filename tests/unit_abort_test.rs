use faultline::core::builder::AbortCriterion;

#[test]
fn test_starts_idle_and_quiet_cycles_keep_it_idle() {
    let mut criterion = AbortCriterion::new(3, 0.5);
    assert!(!criterion.is_active());
    for _ in 0..10 {
        assert!(!criterion.observe(0));
        assert!(!criterion.is_active());
    }
}

#[test]
fn test_abort_is_never_emitted_while_idle() {
    let mut criterion = AbortCriterion::new(2, 10.0);
    // Even wildly varying counts below the threshold cannot abort from idle.
    for count in [5, 0, 9, 0, 3] {
        assert!(!criterion.observe(count));
    }
    assert!(!criterion.is_active());
}

#[test]
fn test_crossing_the_threshold_activates_without_aborting() {
    let mut criterion = AbortCriterion::new(3, 0.5);
    assert!(!criterion.observe(2));
    assert!(criterion.is_active());
}

#[test]
fn test_activation_restarts_the_window() {
    let mut criterion = AbortCriterion::new(3, 0.5);
    criterion.observe(2);
    assert!(criterion.is_active());

    // The pre-activation count of 2 no longer weighs in: one quiet cycle
    // after one busy cycle averages 0.5 and already ends the incident.
    assert!(!criterion.observe(1));
    assert!(criterion.observe(0));
    assert!(!criterion.is_active());
}

#[test]
fn test_active_stays_active_above_the_threshold() {
    let mut criterion = AbortCriterion::new(1, 0.5);
    criterion.observe(3);
    assert!(criterion.is_active());
    assert!(!criterion.observe(2));
    assert!(!criterion.observe(1));
    assert!(criterion.is_active());
}

#[test]
fn test_single_value_window_activates_on_the_first_busy_cycle() {
    let mut criterion = AbortCriterion::new(1, 0.01);
    assert!(!criterion.observe(1));
    assert!(criterion.is_active());
    // The next quiet cycle aborts immediately.
    assert!(criterion.observe(0));
    assert!(!criterion.is_active());
}

#[test]
fn test_full_cycle_can_repeat() {
    let mut criterion = AbortCriterion::new(1, 0.01);
    for _ in 0..3 {
        assert!(!criterion.observe(4));
        assert!(criterion.is_active());
        assert!(criterion.observe(0));
        assert!(!criterion.is_active());
        assert!(!criterion.observe(0));
    }
}

#[test]
#[should_panic]
fn test_empty_window_is_rejected() {
    let _ = AbortCriterion::new(0, 0.5);
}

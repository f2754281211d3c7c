use faultline::core::ring::CircularBuffer;
use proptest::prelude::*;

/// Reference statistics over the samples a ring of `capacity` retains after
/// pushing `samples` in order: the trailing `min(len, capacity)` values.
fn retained(samples: &[f64], capacity: usize) -> Vec<f64> {
    let keep = samples.len().min(capacity);
    samples[samples.len() - keep..].to_vec()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * (1.0 + b.abs())
}

proptest! {
    #[test]
    fn prop_len_is_bounded_by_capacity(
        samples in proptest::collection::vec(-1e6..1e6f64, 0..64),
        capacity in 2usize..16,
    ) {
        let mut buffer = CircularBuffer::new(capacity);
        for &value in &samples {
            buffer.push(value);
            prop_assert!(buffer.len() <= buffer.max_size());
        }
        prop_assert_eq!(buffer.len(), samples.len().min(capacity));
        prop_assert_eq!(buffer.is_full(), samples.len() >= capacity);
    }

    #[test]
    fn prop_current_is_the_last_push(
        samples in proptest::collection::vec(-1e6..1e6f64, 1..64),
        capacity in 2usize..16,
    ) {
        let mut buffer = CircularBuffer::new(capacity);
        for &value in &samples {
            buffer.push(value);
            prop_assert_eq!(buffer.current(), value);
        }
    }

    #[test]
    fn prop_mean_matches_the_retained_samples(
        samples in proptest::collection::vec(-1e6..1e6f64, 1..64),
        capacity in 2usize..16,
    ) {
        let mut buffer = CircularBuffer::new(capacity);
        for &value in &samples {
            buffer.push(value);
        }
        let stored = retained(&samples, capacity);
        let expected = stored.iter().sum::<f64>() / stored.len() as f64;
        prop_assert!(close(buffer.mean(), expected));
    }

    #[test]
    fn prop_std_dev_matches_the_population_formula(
        samples in proptest::collection::vec(-1e6..1e6f64, 1..64),
        capacity in 2usize..16,
    ) {
        let mut buffer = CircularBuffer::new(capacity);
        for &value in &samples {
            buffer.push(value);
        }
        let stored = retained(&samples, capacity);
        let mean = stored.iter().sum::<f64>() / stored.len() as f64;
        let expected =
            (stored.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / stored.len() as f64)
                .sqrt();
        prop_assert!(close(buffer.std_dev(buffer.mean()), expected));
    }

    #[test]
    fn prop_reset_then_refill_behaves_like_fresh(
        samples in proptest::collection::vec(-1e6..1e6f64, 1..32),
        capacity in 2usize..16,
    ) {
        let mut reused = CircularBuffer::new(capacity);
        for &value in &samples {
            reused.push(value);
        }
        reused.reset();

        let mut fresh = CircularBuffer::new(capacity);
        for &value in &samples {
            reused.push(value);
            fresh.push(value);
        }
        prop_assert_eq!(reused.len(), fresh.len());
        prop_assert!(close(reused.mean(), fresh.mean()));
        prop_assert_eq!(reused.current(), fresh.current());
    }
}

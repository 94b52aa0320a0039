// Scenario from §8: width-8 Bitonic network, 100 traversals fed from 8
// threads each drawing a random input index; the output histogram must be a
// step sequence (counts differ by at most one across all outputs).

use concur_toolkit::counting_network::Bitonic;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn bitonic_width_8_histogram_is_a_step_sequence() {
    const WIDTH: usize = 8;
    const THREADS: usize = 8;
    const TRAVERSALS: usize = 100;

    let network = Arc::new(Bitonic::new(WIDTH).unwrap());
    let counts: Arc<Vec<AtomicUsize>> = Arc::new((0..WIDTH).map(|_| AtomicUsize::new(0)).collect());

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let network = network.clone();
        let counts = counts.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            for _ in 0..TRAVERSALS {
                let input = rng.random_range(0..WIDTH);
                let out = network.route(input);
                counts[out].fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let totals: Vec<usize> = counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    let total: usize = totals.iter().sum();
    assert_eq!(total, THREADS * TRAVERSALS);

    let max = *totals.iter().max().unwrap();
    let min = *totals.iter().min().unwrap();
    assert!(
        max - min <= 1,
        "step property violated: histogram {totals:?} spans more than one count"
    );

    let expected_high = total % WIDTH;
    let high_count = totals.iter().filter(|&&c| c == max).count();
    if expected_high == 0 {
        assert_eq!(min, max, "a multiple of width should spread evenly: {totals:?}");
    } else {
        assert_eq!(
            high_count, expected_high,
            "exactly total % width outputs should carry the extra token: {totals:?}"
        );
    }
}

#[test]
fn bitonic_rejects_invalid_width() {
    assert!(Bitonic::new(0).is_err());
    assert!(Bitonic::new(3).is_err());
    assert!(Bitonic::new(16).is_ok());
}

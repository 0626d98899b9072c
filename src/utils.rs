use crate::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::ops::RangeInclusive;

thread_local! {
    // timing randomness: idle holds, filler counts, backpressure
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
}

pub async fn clock_cycles(signal: SimObject, n_cycles: u64) -> TbResult {
    for _ in 0..n_cycles {
        signal.rising_edge().await;
    }
    Ok(Val::None)
}

/// Reseeds the timing generator of the current thread.
pub fn seed(seed: u64) {
    RNG.with(|r| *r.borrow_mut() = StdRng::seed_from_u64(seed));
}

#[inline]
pub fn rand() -> f32 {
    RNG.with(|r| r.borrow_mut().gen::<f32>())
}

#[inline]
pub fn rand_int(ceil: u32) -> u32 {
    RNG.with(|r| r.borrow_mut().gen_range(0..ceil.max(1)))
}

#[inline]
pub fn rand_range(range: RangeInclusive<u64>) -> u64 {
    RNG.with(|r| r.borrow_mut().gen_range(range))
}

#[inline]
pub fn coin() -> bool {
    RNG.with(|r| r.borrow_mut().gen::<bool>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reseeding_repeats_the_stream() {
        seed(42);
        let a: Vec<u64> = (0..8).map(|_| rand_range(0..=100)).collect();
        seed(42);
        let b: Vec<u64> = (0..8).map(|_| rand_range(0..=100)).collect();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| *v <= 100));
    }

    #[test]
    fn rand_int_stays_below_ceiling() {
        seed(1);
        assert!((0..100).all(|_| rand_int(3) < 3));
        assert_eq!(rand_int(0), 0);
    }
}

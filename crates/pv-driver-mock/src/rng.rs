//! Seeded RNG wrapper for reproducible noise and fault injection.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded random number generator owned by one simulated instrument.
pub struct MockRng {
    inner: ChaCha8Rng,
}

impl MockRng {
    /// Generator for `seed`; `None` seeds from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let inner = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { inner }
    }

    /// Whether an event with probability `rate` happens this time.
    pub fn should_fail(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.gen::<f64>() < rate
    }

    /// Uniform sample in `[-amplitude, amplitude)`; zero when amplitude is zero.
    pub fn symmetric(&mut self, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.inner.gen_range(-amplitude..amplitude)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<ChaCha8Rng>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_is_deterministic() {
        let mut a = MockRng::new(Some(42));
        let mut b = MockRng::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.symmetric(1.0), b.symmetric(1.0));
        }
    }

    #[test]
    fn rate_extremes() {
        let mut rng = MockRng::new(Some(7));
        for _ in 0..100 {
            assert!(!rng.should_fail(0.0));
            assert!(rng.should_fail(1.0));
        }
    }

    #[test]
    fn rate_is_roughly_respected() {
        let mut rng = MockRng::new(Some(42));
        let failures = (0..10_000).filter(|_| rng.should_fail(0.3)).count();
        assert!(failures > 2700 && failures < 3300, "got {failures}");
    }

    #[test]
    fn symmetric_noise_bounds() {
        let mut rng = MockRng::new(Some(1));
        assert_eq!(rng.symmetric(0.0), 0.0);
        for _ in 0..100 {
            let x = rng.symmetric(1e-6);
            assert!((-1e-6..1e-6).contains(&x));
        }
    }
}

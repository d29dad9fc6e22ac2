//! Seeded RNG wrapper for reproducible behavior.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded RNG wrapper for reproducible random behavior
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG with optional seed.
    /// If seed is None, uses a random seed from the OS.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Check if an operation should fail based on the given failure rate.
    ///
    /// `rate` is a probability from 0.0 (never fail) to 1.0 (always fail).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Fill `out` with values in `0..=amplitude`.
    pub fn fill_noise(&self, out: &mut [u16], amplitude: u16) {
        let mut rng = self.inner.lock();
        for sample in out {
            *sample = rng.gen_range(0..=amplitude);
        }
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
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let a = MockRng::new(Some(42));
        let b = MockRng::new(Some(42));
        let mut x = vec![0u16; 64];
        let mut y = vec![0u16; 64];
        a.fill_noise(&mut x, 1000);
        b.fill_noise(&mut y, 1000);
        assert_eq!(x, y);
        assert!(x.iter().all(|&v| v <= 1000));
    }

    #[test]
    fn test_failure_rate_bounds() {
        let rng = MockRng::new(Some(1));
        assert!(!rng.should_fail(0.0));
        assert!(rng.should_fail(1.0));
    }
}

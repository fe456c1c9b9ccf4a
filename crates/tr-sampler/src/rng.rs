//! 64-bit xorshift* generator with explicit mutable state.
//!
//! Sampling must be reproducible across runs for a fixed seed, so the
//! generator is pinned to this exact recurrence rather than delegating to an
//! external RNG whose stream could change between versions.

/// xorshift* PRNG over a 64-bit state.
#[derive(Debug, Clone)]
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    /// Seed the generator. A zero seed would lock the recurrence at zero, so
    /// it is mapped to a fixed nonzero constant.
    pub fn new(seed: u64) -> Self {
        XorShiftRng {
            state: if seed == 0 { 0x9E3779B97F4A7C15 } else { seed },
        }
    }

    /// Next 32 uniformly distributed bits.
    pub fn next_u32(&mut self) -> u32 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        (self.state.wrapping_mul(0x2545F4914F6CDD1D) >> 32) as u32
    }

    /// Uniform f32 in `[0, 1)`: the top 24 bits of `next_u32` scaled down.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / 16777216.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = XorShiftRng::new(1337);
        let mut b = XorShiftRng::new(1337);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = XorShiftRng::new(1);
        let mut b = XorShiftRng::new(2);
        let same = (0..16).filter(|_| a.next_u32() == b.next_u32()).count();
        assert!(same < 16);
    }

    #[test]
    fn test_f32_stays_in_unit_interval() {
        let mut rng = XorShiftRng::new(7);
        for _ in 0..1000 {
            let x = rng.next_f32();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_zero_seed_does_not_stall() {
        let mut rng = XorShiftRng::new(0);
        let a = rng.next_u32();
        let b = rng.next_u32();
        assert!(a != 0 || b != 0);
    }
}

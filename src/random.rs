use ring::rand::{SecureRandom, SystemRandom};

/// Source of uniformly distributed random numbers.
pub trait RandomSource: Send + Sync {
    fn next_u32(&self) -> u32;

    /// Uniform in `[0, 1)`.
    fn next_f64(&self) -> f64 {
        self.next_u32() as f64 / (u32::MAX as f64 + 1.0)
    }

    /// Uniform integer in `[low, high]`.
    fn in_range(&self, low: u32, high: u32) -> u32 {
        let span = (high - low) as f64 + 1.0;
        low + (self.next_f64() * span) as u32
    }
}

#[derive(Clone)]
pub struct SystemRng {
    rng: SystemRandom,
}

impl SystemRng {
    pub fn new() -> Self {
        SystemRng {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SystemRng {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SystemRng {
    fn next_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        if self.rng.fill(&mut bytes).is_err() {
            log::warn!("System random source unavailable");
        }
        u32::from_le_bytes(bytes)
    }
}

/// Always yields the same value; for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub u32);

impl RandomSource for FixedRandom {
    fn next_u32(&self) -> u32 {
        self.0
    }
}

// Small seeded PRNG owned by the network.
//
// Not cryptographically secure. It drives weight init, mutation and growth
// decisions, and must be reproducible under a fixed seed.

use std::time::{SystemTime, UNIX_EPOCH};

const ZERO_STATE_REPLACEMENT: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        Self::from_state(seed)
    }

    /// Seed from the wall clock. Used when no seed is configured.
    pub fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(ZERO_STATE_REPLACEMENT);
        Self::from_state(nanos ^ (nanos >> 17))
    }

    pub(crate) fn from_state(state: u64) -> Self {
        // xorshift never leaves the zero state.
        let state = if state == 0 {
            ZERO_STATE_REPLACEMENT
        } else {
            state
        };
        Self { state }
    }

    pub(crate) fn state(&self) -> u64 {
        self.state
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform in [0, 1).
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        // 24 high bits keep the result strictly below 1.0 after rounding.
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    #[inline]
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    #[inline]
    pub fn gen_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        (self.next_u32() % len as u32) as usize
    }

    /// True with probability `p`.
    #[inline]
    pub fn gen_bool(&mut self, p: f32) -> bool {
        self.next_f32() < p
    }

    #[inline]
    pub fn gen_sign(&mut self) -> f32 {
        if self.gen_bool(0.5) {
            1.0
        } else {
            -1.0
        }
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            items.get(self.gen_index(items.len()))
        }
    }
}

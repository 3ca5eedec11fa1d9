//! PCG32 pseudorandom number generator (PCG-XSH-RR).
//!
//! Every random draw in scene generation goes through one `Pcg32`, so a
//! run is reproducible from its `(seed, stream)` pair. Processes that
//! split an index range should use the same seed with distinct streams
//! to get uncorrelated outputs.

const MULTIPLIER: u64 = 6_364_136_223_846_793_005;

#[derive(Debug, Clone)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    pub fn new(seed: u64, stream: u64) -> Self {
        let inc = (stream << 1) | 1;
        let mut rng = Pcg32 { state: 0, inc };
        rng.advance();
        rng.state = rng.state.wrapping_add(seed);
        rng.advance();
        rng
    }

    fn advance(&mut self) {
        self.state = self
            .state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(self.inc);
    }

    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.advance();
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        (xorshifted >> rot) | (xorshifted << (rot.wrapping_neg() & 31))
    }

    /// Uniform in [0, 1).
    pub fn next_float(&mut self) -> f64 {
        self.next_u32() as f64 / (u32::MAX as f64 + 1.0)
    }

    /// Uniform integer in the closed range [lo, hi].
    pub fn next_int(&mut self, lo: u32, hi: u32) -> u32 {
        match (hi - lo).checked_add(1) {
            Some(span) => lo + self.next_u32() % span,
            None => self.next_u32(),
        }
    }

    /// Uniform in [lo, hi).
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_float()
    }

    /// Uniform index into a collection of `len` items, `None` when empty.
    pub fn next_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.next_int(0, (len - 1) as u32) as usize)
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        self.next_index(items.len()).map(|i| &items[i])
    }

    /// Symmetric offset in (-magnitude, magnitude).
    pub fn jitter(&mut self, magnitude: f64) -> f64 {
        2.0 * magnitude * (self.next_float() - 0.5)
    }
}

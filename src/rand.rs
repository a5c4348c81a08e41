//! A small internal PRNG, used only to pick initial sequence numbers and to
//! jitter the ephemeral-port search cursor. Not cryptographically strong;
//! just enough to avoid handing out predictable ISNs across restarts with the
//! same seed. Kept in-crate (rather than pulling the `rand` crate into the
//! dependency tree) since the only consumer is this one xorshift generator.

#[derive(Debug, Clone, Copy)]
pub struct Rand {
    state: u64,
}

impl Rand {
    pub const fn new(seed: u64) -> Rand {
        Rand {
            state: if seed == 0 { 0x9e3779b97f4a7c15 } else { seed },
        }
    }

    pub fn rand_u32(&mut self) -> u32 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        (x.wrapping_mul(0x2545F4914F6CDD1D) >> 32) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_varying_output() {
        let mut r = Rand::new(1);
        let a = r.rand_u32();
        let b = r.rand_u32();
        assert_ne!(a, b);
    }
}

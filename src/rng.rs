/// Xorshift32 stream driving every random choice in the arena simulator, so
/// a seed replays the same match bit for bit.
#[derive(Clone, Copy, Debug)]
pub struct SeededRng {
    state: u32,
}

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0xDEAD_BEEF } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    pub fn next_int(&mut self, max: u32) -> u32 {
        self.next_u32() % max.max(1)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        f64::from(self.next_u32()) / (f64::from(u32::MAX) + 1.0)
    }

    /// Uniform in `[min, max)`.
    pub fn next_f64(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.next_unit()
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.next_unit() < p
    }
}

use std::cell::Cell;

/// Thread-local xorshift128 PRNG with a four-word state. Not
/// cryptographically secure and not meant to be — distribution hot paths
/// (reservoir sampling, target-quantile updates) call this millions of
/// times a second and need speed, not unpredictability.
#[derive(Debug, Clone, Copy)]
pub struct Rng {
    x: u32,
    y: u32,
    z: u32,
    w: u32,
}

impl Rng {
    pub fn seeded(seed: u64) -> Self {
        // Splitmix-style spread so a small/zero seed doesn't hand xorshift
        // an all-zero (fixed-point) state.
        let mut s = seed ^ 0x9e3779b97f4a7c15;
        let mut next = || {
            s = s.wrapping_add(0x9e3779b97f4a7c15);
            let mut z = s;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
            (z ^ (z >> 31)) as u32
        };
        let mut x = next();
        if x == 0 {
            x = 0x1234_5678;
        }
        Self {
            x,
            y: next(),
            z: next(),
            w: next(),
        }
    }

    /// Advances the state and returns the next pseudo-random `u32`.
    pub fn gen(&mut self) -> u32 {
        let t = self.x ^ (self.x << 11);
        self.x = self.y;
        self.y = self.z;
        self.z = self.w;
        self.w = self.w ^ (self.w >> 19) ^ t ^ (t >> 8);
        self.w
    }

    /// Returns a `u64` by combining two draws.
    pub fn gen_u64(&mut self) -> u64 {
        (self.gen() as u64) << 32 | self.gen() as u64
    }

    /// Returns a value in `[lo, hi)`. `hi` must be greater than `lo`.
    pub fn gen_range(&mut self, lo: u64, hi: u64) -> u64 {
        assert!(hi > lo, "Rng::gen_range: empty range");
        let span = hi - lo;
        lo + (self.gen_u64() % span)
    }

    /// Returns `true` with probability `p` (clamped to `[0, 1]`).
    pub fn gen_prob(&mut self, p: f64) -> bool {
        let p = p.clamp(0.0, 1.0);
        let draw = self.gen() as f64 / u32::MAX as f64;
        draw < p
    }
}

thread_local! {
    static THREAD_RNG: Cell<Option<Rng>> = Cell::new(None);
}

fn with_thread_rng<R>(f: impl FnOnce(&mut Rng) -> R) -> R {
    THREAD_RNG.with(|cell| {
        let mut rng = cell.take().unwrap_or_else(|| {
            let seed = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0)
                ^ (cell as *const Cell<Option<Rng>> as u64);
            Rng::seeded(seed)
        });
        let result = f(&mut rng);
        cell.set(Some(rng));
        result
    })
}

/// Draws from the process's lazily-initialized thread-local generator.
pub fn gen() -> u32 {
    with_thread_rng(Rng::gen)
}

pub fn gen_range(lo: u64, hi: u64) -> u64 {
    with_thread_rng(|rng| rng.gen_range(lo, hi))
}

pub fn gen_prob(p: f64) -> bool {
    with_thread_rng(|rng| rng.gen_prob(p))
}

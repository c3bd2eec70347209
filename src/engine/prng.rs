//! Deterministic PRNG for respondent-visible ordering
//!
//! Shuffles must be stable across page refreshes, processes, and servers, so
//! randomization never touches the process RNG. Streams are seeded from a
//! 32-bit FNV-1a hash of `sessionId|pageId|groupId|questionId|bucket` with
//! null parts omitted, then advanced with a linear-congruential generator.

/// Seed material identifying one shuffle context.
#[derive(Debug, Clone, Default)]
pub struct SeedParts<'a> {
    pub session_id: Option<&'a str>,
    pub page_id: Option<&'a str>,
    pub group_id: Option<&'a str>,
    pub question_id: Option<&'a str>,
    pub bucket: Option<&'a str>,
}

impl<'a> SeedParts<'a> {
    fn concat(&self) -> String {
        [
            self.session_id,
            self.page_id,
            self.group_id,
            self.question_id,
            self.bucket,
        ]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join("|")
    }
}

/// Splittable deterministic generator.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    state: u32,
}

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

impl DeterministicRng {
    pub fn from_parts(parts: &SeedParts<'_>) -> Self {
        Self::from_seed_string(&parts.concat())
    }

    pub fn from_seed_string(seed: &str) -> Self {
        let mut hash = FNV_OFFSET;
        for byte in seed.as_bytes() {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        // A zero state would collapse the LCG stream
        Self {
            state: if hash == 0 { FNV_OFFSET } else { hash },
        }
    }

    /// Derive an independent stream for a child context.
    pub fn split(&self, label: &str) -> Self {
        let mut child = Self::from_seed_string(label);
        child.state ^= self.state.rotate_left(13);
        if child.state == 0 {
            child.state = FNV_OFFSET;
        }
        child
    }

    /// Next raw value (Numerical Recipes LCG constants).
    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.state
    }

    /// Uniform value in `[0, bound)`; 0 when bound is 0.
    pub fn next_below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.next_u32() as usize) % bound
    }

    /// Uniform float in `[0, 1)`.
    fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / f64::from(u32::MAX)
    }

    /// In-place Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        if items.len() < 2 {
            return;
        }
        for i in (1..items.len()).rev() {
            let j = self.next_below(i + 1);
            items.swap(i, j);
        }
    }

    /// Index of a weighted pick; missing or non-positive weights count as 0.
    /// Falls back to uniform choice when all weights are 0.
    pub fn weighted_pick(&mut self, weights: &[f64]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }
        let total: f64 = weights.iter().map(|w| w.max(0.0)).sum();
        if total <= 0.0 {
            return Some(self.next_below(weights.len()));
        }
        let mut target = self.next_f64() * total;
        for (i, w) in weights.iter().enumerate() {
            let w = w.max(0.0);
            if target < w {
                return Some(i);
            }
            target -= w;
        }
        Some(weights.len() - 1)
    }

    /// Take up to `n` elements without replacement, in shuffled order.
    pub fn sample_without_replacement<T: Clone>(&mut self, items: &[T], n: usize) -> Vec<T> {
        let mut pool: Vec<T> = items.to_vec();
        self.shuffle(&mut pool);
        pool.truncate(n.min(items.len()));
        pool
    }
}

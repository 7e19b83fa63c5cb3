//! Sampler (spec §4.8): greedy, top-k, top-p, temperature, with a
//! seedable deterministic source so the same seed reproduces the same
//! token stream for identical inputs.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::kernels::reduce::{argmax, softmax, top_k as top_k_indices};
use crate::utils::error::{DopplerError, Result};

const TEMPERATURE_EPS: f32 = 1e-2;

/// Generation options recognized at the boundary with callers (spec
/// §6.4). Mirrors the teacher's `SamplingParams` validation style but
/// scoped to what this core's sampler actually consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub stop_token_ids: Vec<u32>,
    pub seed: Option<u64>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            stop_token_ids: Vec::new(),
            seed: None,
        }
    }
}

impl SamplingOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(DopplerError::ManifestInvalid(
                "max_tokens must be greater than 0".into(),
            ));
        }
        if self.temperature < 0.0 {
            return Err(DopplerError::ManifestInvalid(format!(
                "temperature must be non-negative, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(DopplerError::ManifestInvalid(format!(
                "top_p must be between 0.0 and 1.0, got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// Greedy argmax, lowest index on ties.
pub fn greedy(logits: &[f32]) -> u32 {
    argmax(logits) as u32
}

/// Restrict to the top `k` logits (by value), renormalize, sample.
pub fn top_k(logits: &[f32], k: u32, rng: &mut ChaCha8Rng) -> u32 {
    if k == 0 || k as usize >= logits.len() {
        return sample_all(logits, rng);
    }
    let candidates = top_k_indices(logits, k as usize);
    let mut probs: Vec<f32> = candidates.iter().map(|&(_, v)| v).collect();
    softmax(&mut probs);
    let pick = weighted_pick(&probs, rng);
    candidates[pick].0 as u32
}

/// Nucleus sampling: take the smallest prefix of sorted candidates whose
/// cumulative probability reaches `p`, then sample within it.
pub fn top_p(logits: &[f32], p: f32, rng: &mut ChaCha8Rng) -> u32 {
    let mut probs = logits.to_vec();
    softmax(&mut probs);

    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));

    let mut cumulative = 0.0;
    let mut cutoff = indexed.len();
    for (i, &(_, prob)) in indexed.iter().enumerate() {
        cumulative += prob;
        if cumulative >= p {
            cutoff = i + 1;
            break;
        }
    }
    indexed.truncate(cutoff);

    let mut renorm: Vec<f32> = indexed.iter().map(|&(_, v)| v).collect();
    let sum: f32 = renorm.iter().sum();
    if sum > 0.0 {
        for v in renorm.iter_mut() {
            *v /= sum;
        }
    }

    let pick = weighted_pick(&renorm, rng);
    indexed[pick].0 as u32
}

/// Divide logits by `T`, promoting to greedy when `T < eps` (spec §4.8).
pub fn temperature(logits: &[f32], t: f32) -> Vec<f32> {
    if t < TEMPERATURE_EPS {
        let mut out = vec![f32::NEG_INFINITY; logits.len()];
        out[argmax(logits)] = 0.0;
        out
    } else {
        logits.iter().map(|v| v / t).collect()
    }
}

fn sample_all(logits: &[f32], rng: &mut ChaCha8Rng) -> u32 {
    let mut probs = logits.to_vec();
    softmax(&mut probs);
    weighted_pick(&probs, rng) as u32
}

fn weighted_pick(probs: &[f32], rng: &mut ChaCha8Rng) -> usize {
    let total: f32 = probs.iter().sum();
    if total <= 0.0 {
        return 0;
    }
    let mut target = rng.gen::<f32>() * total;
    for (i, &p) in probs.iter().enumerate() {
        target -= p;
        if target <= 0.0 {
            return i;
        }
    }
    probs.len() - 1
}

/// Build a deterministic RNG from an optional seed (0 if unset — callers
/// wanting nondeterminism should pass a host-entropy-derived seed).
pub fn rng_from_seed(seed: Option<u64>) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_picks_lowest_index_on_ties() {
        let logits = [1.0f32, 5.0, 5.0, 2.0];
        assert_eq!(greedy(&logits), 1);
    }

    #[test]
    fn temperature_below_eps_promotes_to_greedy() {
        let logits = [1.0f32, 9.0, 3.0];
        let out = temperature(&logits, 0.0);
        assert_eq!(argmax(&out), 1);
        assert_eq!(out[0], f32::NEG_INFINITY);
    }

    #[test]
    fn same_seed_yields_identical_sequence() {
        let logits = [1.0f32, 2.0, 3.0, 0.5];
        let mut rng_a = rng_from_seed(Some(42));
        let mut rng_b = rng_from_seed(Some(42));

        let seq_a: Vec<u32> = (0..5).map(|_| top_k(&logits, 2, &mut rng_a)).collect();
        let seq_b: Vec<u32> = (0..5).map(|_| top_k(&logits, 2, &mut rng_b)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn top_p_one_includes_all_candidates() {
        let logits = [1.0f32, 2.0, 3.0];
        let mut rng = rng_from_seed(Some(7));
        // p=1.0 never excludes the lowest-probability candidate outright;
        // run many draws and confirm every index is reachable.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(top_p(&logits, 1.0, &mut rng));
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn validate_rejects_zero_max_tokens() {
        let mut opts = SamplingOptions::default();
        opts.max_tokens = 0;
        assert!(opts.validate().is_err());
    }
}

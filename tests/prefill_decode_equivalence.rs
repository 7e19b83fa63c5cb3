//! Spec §8 property 7 / scenario F: prefill-then-decode must agree with
//! an equivalent single larger prefill. Feeding a known continuation
//! token-by-token through `decode_logits` after a short prefill must
//! produce the same final-position logits as prefilling the whole
//! sequence at once, since both describe the same causal computation
//! over the same tokens.

mod common;

use doppler_core::{EngineConfig, Pipeline};

fn fresh_pipeline() -> Pipeline {
    let mut manifest = common::toy_manifest(16, 8, 2, 4, 2);
    let weights = common::build_toy_weights(&mut manifest);
    Pipeline::new(manifest, weights, EngineConfig::default()).unwrap()
}

#[test]
fn incremental_decode_matches_full_prefill() {
    let tokens = [1u32, 5, 9, 2, 7];
    let prefix_len = 3;

    // A: short prefill, then teacher-forced decode over the remainder.
    let mut incremental = fresh_pipeline();
    incremental.prefill_logits(&tokens[..prefix_len]).unwrap();
    let mut last = None;
    for &t in &tokens[prefix_len..] {
        last = Some(incremental.decode_logits(t).unwrap());
    }
    let incremental_logits = last.expect("at least one decode step");

    // B: one prefill over the whole sequence.
    let mut full = fresh_pipeline();
    let full_logits = full.prefill_logits(&tokens).unwrap();

    assert_eq!(incremental_logits.len(), full_logits.len());
    for (a, b) in incremental_logits.iter().zip(full_logits.iter()) {
        assert!((a - b).abs() < 1e-3, "incremental={a} full={b}");
    }
}

#[test]
fn single_token_prefill_matches_itself_as_decode_seed() {
    // Degenerate case: prefix length 1, everything else via decode.
    let tokens = [4u32, 11, 6];

    let mut incremental = fresh_pipeline();
    incremental.prefill_logits(&tokens[..1]).unwrap();
    let mid = incremental.decode_logits(tokens[1]).unwrap();
    let last = incremental.decode_logits(tokens[2]).unwrap();
    assert_eq!(mid.len(), last.len());

    let mut full = fresh_pipeline();
    let full_logits = full.prefill_logits(&tokens).unwrap();
    for (a, b) in last.iter().zip(full_logits.iter()) {
        assert!((a - b).abs() < 1e-3, "incremental={a} full={b}");
    }
}

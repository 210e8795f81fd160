// ============================================================
// Layer 5 — Decoding
// ============================================================
// Autoregressive decoding for one prompt at a time:
//
//   greedy    num_beams == 1, do_sample == false
//   beam      num_beams  > 1
//   sampling  do_sample == true, num_beams == 1
//
// Logit processing happens on the host on plain `Vec<f32>` rows:
//
//   raw logits ─▶ repetition penalty ─▶ min-length ─▶ bad words
//                                                        │
//                              sampling only: temperature → top-k → top-p
//
// The model side is hidden behind `StepModel`, which scores the
// next token for a set of rows and carries an opaque KV cache that
// beam search reorders when beams are re-ranked.

use std::collections::HashSet;

use anyhow::{Context, Result};
use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use serde::{Deserialize, Serialize};

// ─── GenerationConfig ────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Prompt + generated tokens
    pub max_length:         usize,
    /// Overrides `max_length` when set
    pub max_new_tokens:     Option<usize>,
    /// EOS is suppressed while the sequence (prompt included) is shorter
    pub min_length:         usize,
    pub temperature:        f64,
    pub do_sample:          bool,
    /// 0 disables top-k filtering
    pub top_k:              usize,
    pub top_p:              f64,
    pub repetition_penalty: f64,
    pub num_beams:          usize,
    pub length_penalty:     f64,
    pub bad_words_ids:      Option<Vec<Vec<u32>>>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length:         512,
            max_new_tokens:     None,
            min_length:         5,
            temperature:        1.0,
            do_sample:          false,
            top_k:              0,
            top_p:              0.9,
            repetition_penalty: 1.0,
            num_beams:          5,
            length_penalty:     1.0,
            bad_words_ids:      None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Greedy,
    Beam,
    Sample,
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.num_beams >= 1, "num_beams must be at least 1");
        anyhow::ensure!(
            !(self.do_sample && self.num_beams > 1),
            "beam sampling is not supported: set num_beams = 1 when do_sample is on"
        );
        anyhow::ensure!(self.temperature > 0.0, "temperature must be positive, got {}", self.temperature);
        anyhow::ensure!(
            self.top_p > 0.0 && self.top_p <= 1.0,
            "top_p must be in (0, 1], got {}", self.top_p
        );
        anyhow::ensure!(
            self.repetition_penalty > 0.0,
            "repetition_penalty must be positive, got {}", self.repetition_penalty
        );
        if let Some(bad) = &self.bad_words_ids {
            anyhow::ensure!(bad.iter().all(|w| !w.is_empty()), "bad_words_ids entries must not be empty");
        }
        Ok(())
    }

    pub fn strategy(&self) -> Strategy {
        match (self.do_sample, self.num_beams) {
            (true, _)  => Strategy::Sample,
            (false, 1) => Strategy::Greedy,
            _          => Strategy::Beam,
        }
    }

    /// Length limit for the whole sequence, prompt included.
    pub fn max_total_len(&self, prompt_len: usize) -> usize {
        match self.max_new_tokens {
            Some(n) => prompt_len + n,
            None    => self.max_length,
        }
    }
}

// ─── StepModel ───────────────────────────────────────────────────────────────
/// Anything that can score the next token for a batch of rows.
pub trait StepModel {
    type Cache;

    /// `inputs[r]` are the new tokens for row r: the whole prompt on the
    /// first call, one token afterwards. Returns next-token logits per row.
    fn step(&self, inputs: &[Vec<u32>], cache: Option<Self::Cache>) -> Result<(Vec<Vec<f32>>, Self::Cache)>;

    /// New cache whose row i is old row `rows[i]`.
    fn reorder(&self, cache: Self::Cache, rows: &[usize]) -> Result<Self::Cache>;
}

/// Generates a continuation of `prompt`. The result excludes the prompt
/// and stops before EOS.
pub fn generate<M: StepModel>(
    model:  &M,
    prompt: &[u32],
    cfg:    &GenerationConfig,
    eos:    u32,
) -> Result<Vec<u32>> {
    generate_with_rng(model, prompt, cfg, eos, &mut rand::thread_rng())
}

pub fn generate_with_rng<M: StepModel, R: Rng>(
    model:  &M,
    prompt: &[u32],
    cfg:    &GenerationConfig,
    eos:    u32,
    rng:    &mut R,
) -> Result<Vec<u32>> {
    cfg.validate()?;
    anyhow::ensure!(!prompt.is_empty(), "cannot generate from an empty prompt");

    let max_total = cfg.max_total_len(prompt.len());
    if prompt.len() >= max_total {
        tracing::warn!(
            "Prompt length {} already reaches the length limit {}; nothing generated",
            prompt.len(), max_total
        );
        return Ok(Vec::new());
    }

    let processor = LogitsProcessor::new(cfg, eos);
    match cfg.strategy() {
        Strategy::Greedy => decode_single(model, prompt, max_total, &processor, None::<(&GenerationConfig, &mut R)>),
        Strategy::Sample => decode_single(model, prompt, max_total, &processor, Some((cfg, rng))),
        Strategy::Beam   => beam_search(model, prompt, max_total, cfg, &processor),
    }
}

// ─── Logit processors ────────────────────────────────────────────────────────
struct LogitsProcessor<'a> {
    repetition_penalty: f32,
    min_length:         usize,
    bad_words:          &'a [Vec<u32>],
    eos:                u32,
}

impl<'a> LogitsProcessor<'a> {
    fn new(cfg: &'a GenerationConfig, eos: u32) -> Self {
        Self {
            repetition_penalty: cfg.repetition_penalty as f32,
            min_length:         cfg.min_length,
            bad_words:          cfg.bad_words_ids.as_deref().unwrap_or(&[]),
            eos,
        }
    }

    /// `sequence` is everything so far, prompt included.
    fn process(&self, sequence: &[u32], scores: &mut [f32]) {
        if self.repetition_penalty != 1.0 {
            apply_repetition_penalty(scores, sequence, self.repetition_penalty);
        }
        if sequence.len() < self.min_length {
            if let Some(s) = scores.get_mut(self.eos as usize) {
                *s = f32::NEG_INFINITY;
            }
        }
        apply_bad_words(scores, sequence, self.bad_words);
    }
}

/// Each distinct token seen so far is penalised once:
/// positive scores are divided by the penalty, negative ones multiplied.
pub(crate) fn apply_repetition_penalty(scores: &mut [f32], sequence: &[u32], penalty: f32) {
    let seen: HashSet<u32> = sequence.iter().copied().collect();
    for token in seen {
        if let Some(s) = scores.get_mut(token as usize) {
            *s = if *s > 0.0 { *s / penalty } else { *s * penalty };
        }
    }
}

/// Bans the last token of every bad word whose preceding tokens end the sequence.
pub(crate) fn apply_bad_words(scores: &mut [f32], sequence: &[u32], bad_words: &[Vec<u32>]) {
    for word in bad_words {
        let Some((&last, prefix)) = word.split_last() else { continue };
        if sequence.ends_with(prefix) {
            if let Some(s) = scores.get_mut(last as usize) {
                *s = f32::NEG_INFINITY;
            }
        }
    }
}

fn apply_temperature(scores: &mut [f32], temperature: f32) {
    if temperature != 1.0 {
        scores.iter_mut().for_each(|s| *s /= temperature);
    }
}

/// Keeps the `k` highest scores, ties at the boundary included.
fn apply_top_k(scores: &mut [f32], k: usize) {
    if k == 0 || k >= scores.len() {
        return;
    }
    let mut sorted: Vec<f32> = scores.to_vec();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    scores.iter_mut().filter(|s| **s < threshold).for_each(|s| *s = f32::NEG_INFINITY);
}

/// Keeps the smallest set of tokens whose probability mass reaches `top_p`.
fn apply_top_p(scores: &mut [f32], top_p: f32) {
    if top_p >= 1.0 {
        return;
    }
    let probs = softmax(scores);
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_unstable_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0f32;
    let mut keep       = HashSet::new();
    for idx in order {
        if cumulative >= top_p && !keep.is_empty() {
            break;
        }
        cumulative += probs[idx];
        keep.insert(idx);
    }
    for (i, s) in scores.iter_mut().enumerate() {
        if !keep.contains(&i) {
            *s = f32::NEG_INFINITY;
        }
    }
}

pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp_sum_ln = logits.iter().map(|&x| (x - max_logit).exp()).sum::<f32>().ln();
    logits.iter().map(|&x| x - max_logit - exp_sum_ln).collect()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    log_softmax(logits).into_iter().map(f32::exp).collect()
}

/// First index of the maximum.
fn argmax(values: &[f32]) -> u32 {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best as u32
}

// ─── Greedy / sampling ───────────────────────────────────────────────────────
fn decode_single<M: StepModel, R: Rng>(
    model:     &M,
    prompt:    &[u32],
    max_total: usize,
    processor: &LogitsProcessor<'_>,
    mut sampling: Option<(&GenerationConfig, &mut R)>,
) -> Result<Vec<u32>> {
    let mut sequence = prompt.to_vec();
    let (mut logits, mut cache) = model.step(&[prompt.to_vec()], None)?;

    loop {
        let mut scores = logits.into_iter().next().context("model returned no logits")?;
        processor.process(&sequence, &mut scores);

        let next = match sampling.as_mut() {
            None             => argmax(&scores),
            Some((cfg, rng)) => sample_token(&mut scores, cfg, &mut **rng)?,
        };
        if next == processor.eos {
            break;
        }
        sequence.push(next);
        if sequence.len() >= max_total {
            break;
        }

        let (l, c) = model.step(&[vec![next]], Some(cache))?;
        logits = l;
        cache  = c;
    }

    Ok(sequence.split_off(prompt.len()))
}

fn sample_token<R: Rng>(scores: &mut [f32], cfg: &GenerationConfig, rng: &mut R) -> Result<u32> {
    apply_temperature(scores, cfg.temperature as f32);
    apply_top_k(scores, cfg.top_k);
    apply_top_p(scores, cfg.top_p as f32);
    let probs = softmax(scores);
    let dist  = WeightedIndex::new(&probs).context("no token left to sample from")?;
    Ok(dist.sample(rng) as u32)
}

// ─── Beam search ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    /// Sum of log-probabilities of the generated tokens
    score:  f32,
}

/// Finished hypotheses, at most `num_beams`, ranked by
/// `sum_logprobs / len^length_penalty`.
#[derive(Debug)]
pub(crate) struct BeamHypotheses {
    num_beams:      usize,
    length_penalty: f32,
    hyps:           Vec<(f32, Vec<u32>)>,
    worst_score:    f32,
}

impl BeamHypotheses {
    pub(crate) fn new(num_beams: usize, length_penalty: f32) -> Self {
        Self { num_beams, length_penalty, hyps: Vec::new(), worst_score: 1e9 }
    }

    pub(crate) fn len(&self) -> usize {
        self.hyps.len()
    }

    fn normalise(&self, sum_logprobs: f32, len: usize) -> f32 {
        sum_logprobs / (len as f32).powf(self.length_penalty)
    }

    pub(crate) fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f32) {
        let score = self.normalise(sum_logprobs, tokens.len());
        if self.hyps.len() < self.num_beams || score > self.worst_score {
            self.hyps.push((score, tokens));
            if self.hyps.len() > self.num_beams {
                let worst_idx = self.hyps
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
                    .map_or(0, |(i, _)| i);
                self.hyps.remove(worst_idx);
                self.worst_score = self.hyps.iter().map(|h| h.0).fold(f32::INFINITY, f32::min);
            } else {
                self.worst_score = self.worst_score.min(score);
            }
        }
    }

    /// No live beam can still beat the worst kept hypothesis.
    pub(crate) fn is_done(&self, best_sum_logprobs: f32, cur_len: usize) -> bool {
        if self.hyps.len() < self.num_beams {
            return false;
        }
        self.worst_score >= self.normalise(best_sum_logprobs, cur_len)
    }

    pub(crate) fn best(self) -> Option<Vec<u32>> {
        self.hyps
            .into_iter()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, tokens)| tokens)
    }
}

fn beam_search<M: StepModel>(
    model:     &M,
    prompt:    &[u32],
    max_total: usize,
    cfg:       &GenerationConfig,
    processor: &LogitsProcessor<'_>,
) -> Result<Vec<u32>> {
    let num_beams = cfg.num_beams;
    let mut hyps  = BeamHypotheses::new(num_beams, cfg.length_penalty as f32);
    let mut beams = vec![Beam { tokens: prompt.to_vec(), score: 0.0 }];
    let mut done  = false;

    let (mut logits, mut cache) = model.step(&[prompt.to_vec()], None)?;

    loop {
        let cur_len = beams[0].tokens.len();

        // ── Step 1: best 2·num_beams continuations over all beams ──
        let mut candidates: Vec<(f32, usize, u32)> = Vec::new();
        for (beam_idx, (beam, row)) in beams.iter().zip(&logits).enumerate() {
            let mut scores = log_softmax(row);
            processor.process(&beam.tokens, &mut scores);
            for (token, logprob) in top_candidates(&scores, 2 * num_beams) {
                candidates.push((beam.score + logprob, beam_idx, token));
            }
        }
        candidates.retain(|c| c.0.is_finite());
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.truncate(2 * num_beams);

        // ── Step 2: retire EOS candidates, keep the rest as next beams ──
        let mut next    = Vec::with_capacity(num_beams);
        let mut parents = Vec::with_capacity(num_beams);
        for (rank, &(score, parent, token)) in candidates.iter().enumerate() {
            if token == processor.eos {
                if rank < num_beams {
                    hyps.add(beams[parent].tokens.clone(), score);
                }
            } else {
                let mut tokens = beams[parent].tokens.clone();
                tokens.push(token);
                next.push(Beam { tokens, score });
                parents.push(parent);
            }
            if next.len() == num_beams {
                break;
            }
        }

        let Some(&(best_score, _, _)) = candidates.first() else { break };
        if hyps.is_done(best_score, cur_len) {
            done = true;
            break;
        }
        if next.is_empty() {
            break;
        }
        beams = next;
        if beams[0].tokens.len() >= max_total {
            break;
        }

        // ── Step 3: advance the surviving beams ──
        cache = model.reorder(cache, &parents)?;
        let inputs: Vec<Vec<u32>> = beams
            .iter()
            .map(|b| b.tokens.last().map(|&t| vec![t]).unwrap_or_default())
            .collect();
        let (l, c) = model.step(&inputs, Some(cache))?;
        logits = l;
        cache  = c;
    }

    if !done {
        for beam in beams {
            hyps.add(beam.tokens, beam.score);
        }
    }

    let best = hyps.best().context("beam search produced no hypothesis")?;
    Ok(best.get(prompt.len()..).map(<[u32]>::to_vec).unwrap_or_default())
}

/// The `k` highest (token, score) pairs, best first.
fn top_candidates(scores: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = scores
        .iter()
        .enumerate()
        .map(|(i, &s)| (i as u32, s))
        .collect();
    let k = k.min(indexed.len());
    if k < indexed.len() {
        indexed.select_nth_unstable_by(k, |a, b| b.1.total_cmp(&a.1));
        indexed.truncate(k);
    }
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed
}

//! Native PPM reference engine.
//!
//! Predictions use interpolated smoothing: each context order contributes
//! `α(x)` for its observed symbols and passes the escape mass `γ` down to the
//! next lower order, ending in a uniform distribution over the alphabet.
//! The model persists across the trials of one run; contexts never cross a
//! trial boundary.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::results::{PpmEvent, PpmResults};
use super::{DecayOptions, EscapeMethod, PpmInstructions, PpmVariant, SimpleOptions};
use crate::stats::{entropy_bits, information_content, normalize_distribution};

/// Run a PPM configuration over all of its trials.
pub fn run_ppm(instructions: &PpmInstructions) -> PpmResults {
    let alphabet = instructions.alphabet();
    let trials = instructions.symbol_indices();
    let order_bound = instructions.order_bound();

    let events = match instructions.variant() {
        PpmVariant::Simple(options) => {
            let mut model = SimpleModel::new(alphabet.len(), order_bound, *options);
            trials
                .iter()
                .map(|trial| model.process_trial(trial, alphabet.levels()))
                .collect()
        }
        PpmVariant::Decay(options) => {
            let mut model = DecayModel::new(alphabet.len(), order_bound, options.clone());
            trials
                .iter()
                .zip(&options.input_time_sequence)
                .map(|(trial, times)| model.process_trial(trial, times, alphabet.levels()))
                .collect()
        }
    };

    PpmResults {
        model_type: instructions.model_type(),
        alphabet: alphabet.clone(),
        instructions_file_path: None,
        data_file_path: None,
        trials: events,
    }
}

// ---------------------------------------------------------------------------
// Smoothing shared by both variants
// ---------------------------------------------------------------------------

/// Split a context's counts into per-symbol mass `α` and escape mass `γ`,
/// ignoring excluded symbols. An empty context escapes with `γ = 1`.
fn escape_split(counts: &[f64], excluded: &[bool], escape: EscapeMethod) -> (Vec<f64>, f64) {
    let mut total = 0.0;
    let mut q = 0.0;
    let mut q1 = 0.0;
    for (x, &c) in counts.iter().enumerate() {
        if excluded[x] || c <= 0.0 {
            continue;
        }
        total += c;
        q += 1.0;
        if c <= 1.0 {
            q1 += 1.0;
        }
    }
    if total <= 0.0 {
        return (vec![0.0; counts.len()], 1.0);
    }

    let alpha_of = |c: f64| match escape {
        EscapeMethod::A => c / (total + 1.0),
        EscapeMethod::B => (c - 1.0).max(0.0) / total,
        EscapeMethod::C => c / (total + q),
        EscapeMethod::D => (c - 0.5).max(0.0) / total,
        EscapeMethod::AX => c / (total + q1 + 1.0),
    };
    let gamma = match escape {
        EscapeMethod::A => 1.0 / (total + 1.0),
        EscapeMethod::B => q / total,
        EscapeMethod::C => q / (total + q),
        EscapeMethod::D => q / (2.0 * total),
        EscapeMethod::AX => (q1 + 1.0) / (total + q1 + 1.0),
    };

    let alpha = counts
        .iter()
        .enumerate()
        .map(|(x, &c)| {
            if excluded[x] || c <= 0.0 {
                0.0
            } else {
                alpha_of(c)
            }
        })
        .collect();
    (alpha, gamma.min(1.0))
}

/// Blend per-order counts (index = order) from `top` down to the uniform base.
fn blend(
    counts: &[Option<&[f64]>],
    top: Option<usize>,
    escape: EscapeMethod,
    exclusion: bool,
    alphabet_size: usize,
) -> Vec<f64> {
    let mut dist = vec![0.0; alphabet_size];
    let mut excluded = vec![false; alphabet_size];
    let mut mass = 1.0;

    if let Some(top) = top {
        for order in (0..=top).rev() {
            let Some(c) = counts[order] else {
                continue;
            };
            let (alpha, gamma) = escape_split(c, &excluded, escape);
            if gamma >= 1.0 {
                continue;
            }
            for (d, a) in dist.iter_mut().zip(&alpha) {
                *d += mass * a;
            }
            mass *= gamma;
            // only symbols that received mass here; escape B gives count-1 symbols none
            if exclusion {
                for (x, &a) in alpha.iter().enumerate() {
                    if a > 0.0 {
                        excluded[x] = true;
                    }
                }
            }
        }
    }

    let open: Vec<usize> = (0..alphabet_size).filter(|&x| !excluded[x]).collect();
    if open.is_empty() {
        let share = mass / alphabet_size as f64;
        dist.iter_mut().for_each(|d| *d += share);
    } else {
        let share = mass / open.len() as f64;
        for x in open {
            dist[x] += share;
        }
    }
    normalize_distribution(&dist)
}

fn is_seen(counts: Option<&[f64]>) -> bool {
    counts.is_some_and(|c| c.iter().sum::<f64>() > 0.0)
}

fn is_deterministic(counts: Option<&[f64]>) -> bool {
    counts.is_some_and(|c| c.iter().filter(|&&v| v > 0.0).count() == 1)
}

/// Highest order to blend from: the longest seen context, or the shortest
/// deterministic one when that search is enabled.
fn choose_top(counts: &[Option<&[f64]>], shortest_deterministic: bool) -> Option<usize> {
    if shortest_deterministic
        && let Some(k) = (0..counts.len()).find(|&k| is_seen(counts[k]) && is_deterministic(counts[k]))
    {
        return Some(k);
    }
    (0..counts.len()).rev().find(|&k| is_seen(counts[k]))
}

fn make_event(
    symbol: usize,
    levels: &[f64],
    position: usize,
    time: Option<f64>,
    model_order: usize,
    distribution: Vec<f64>,
) -> PpmEvent {
    PpmEvent {
        symbol: levels[symbol],
        position,
        time,
        model_order,
        information_content: information_content(distribution[symbol]),
        entropy: entropy_bits(&distribution),
        distribution,
    }
}

// ---------------------------------------------------------------------------
// SIMPLE
// ---------------------------------------------------------------------------

struct SimpleModel {
    alphabet_size: usize,
    order_bound: usize,
    options: SimpleOptions,
    counts: HashMap<Vec<usize>, Vec<f64>>,
}

impl SimpleModel {
    fn new(alphabet_size: usize, order_bound: usize, options: SimpleOptions) -> Self {
        Self {
            alphabet_size,
            order_bound,
            options,
            counts: HashMap::new(),
        }
    }

    fn process_trial(&mut self, trial: &[usize], levels: &[f64]) -> Vec<PpmEvent> {
        let mut events = Vec::with_capacity(trial.len());
        for (pos, &symbol) in trial.iter().enumerate() {
            let history = &trial[..pos];
            let max_order = self.order_bound.min(pos);

            let (dist, order) = {
                let counts: Vec<Option<&[f64]>> = (0..=max_order)
                    .map(|k| {
                        self.counts
                            .get(&history[pos - k..])
                            .map(|c| c.as_slice())
                    })
                    .collect();
                let top = choose_top(&counts, self.options.shortest_deterministic);
                let dist = blend(
                    &counts,
                    top,
                    self.options.escape,
                    self.options.exclusion,
                    self.alphabet_size,
                );
                (dist, top.unwrap_or(0))
            };

            events.push(make_event(symbol, levels, pos, None, order, dist));
            self.update(history, symbol, max_order);
        }
        events
    }

    /// Increment counts from the highest order down. With update exclusion,
    /// stop after the first context that had already seen the symbol.
    fn update(&mut self, history: &[usize], symbol: usize, max_order: usize) {
        for k in (0..=max_order).rev() {
            let context = history[history.len() - k..].to_vec();
            let entry = self
                .counts
                .entry(context)
                .or_insert_with(|| vec![0.0; self.alphabet_size]);
            let seen_before = entry[symbol] > 0.0;
            entry[symbol] += 1.0;
            if self.options.update_exclusion && seen_before {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DECAY
// ---------------------------------------------------------------------------

/// One n-gram observation: global item index and (trial-offset) time.
#[derive(Clone, Copy, Debug)]
struct Stamp {
    pos: usize,
    time: f64,
}

struct DecayModel {
    alphabet_size: usize,
    order_bound: usize,
    options: DecayOptions,
    traces: HashMap<Vec<usize>, Vec<Vec<Stamp>>>,
    /// Time of every item observed so far, indexed by global position.
    times: Vec<f64>,
    rng: SmallRng,
}

impl DecayModel {
    fn new(alphabet_size: usize, order_bound: usize, options: DecayOptions) -> Self {
        let rng = SmallRng::seed_from_u64(options.seed);
        Self {
            alphabet_size,
            order_bound,
            options,
            traces: HashMap::new(),
            times: Vec::new(),
            rng,
        }
    }

    fn process_trial(&mut self, trial: &[usize], trial_times: &[f64], levels: &[f64]) -> Vec<PpmEvent> {
        // Each trial's clock continues from where the previous trial ended.
        let offset = match (self.times.last(), trial_times.first()) {
            (Some(&last), Some(&first)) => (last - first).max(0.0),
            _ => 0.0,
        };
        let start = self.times.len();
        let mut events = Vec::with_capacity(trial.len());

        for (pos, &symbol) in trial.iter().enumerate() {
            let now = trial_times[pos] + offset;
            let global = start + pos;
            let history = &trial[..pos];

            let mut max_order = self.order_bound.min(pos);
            if self.options.only_predict_from_buffer {
                while max_order > 0 && !self.span_in_buffer(global, now, max_order, max_order) {
                    max_order -= 1;
                }
            }

            let weights: Vec<Option<Vec<f64>>> = (0..=max_order)
                .map(|k| self.weights(&history[pos - k..], global, now))
                .collect();
            let counts: Vec<Option<&[f64]>> = weights.iter().map(|w| w.as_deref()).collect();
            let top = choose_top(&counts, false);
            let dist = blend(&counts, top, EscapeMethod::A, true, self.alphabet_size);

            events.push(make_event(
                symbol,
                levels,
                pos,
                Some(trial_times[pos]),
                top.unwrap_or(0),
                dist,
            ));

            self.times.push(now);
            self.learn(history, symbol, global, now, self.order_bound.min(pos));
        }
        events
    }

    /// Whether the `span` items ending `back` items before `global` fit the buffer.
    fn span_in_buffer(&self, global: usize, now: f64, span: usize, back: usize) -> bool {
        span <= self.options.buffer_length_items
            && (back == 0 || now - self.times[global - back] < self.options.buffer_length_time)
    }

    fn learn(&mut self, history: &[usize], symbol: usize, global: usize, now: f64, max_order: usize) {
        for k in 0..=max_order {
            if self.options.only_learn_from_buffer && !self.span_in_buffer(global, now, k + 1, k) {
                continue;
            }
            let context = history[history.len() - k..].to_vec();
            self.traces
                .entry(context)
                .or_insert_with(|| vec![Vec::new(); self.alphabet_size])[symbol]
                .push(Stamp { pos: global, time: now });
        }
    }

    /// Decayed weight of every symbol seen after `context`, plus optional noise.
    fn weights(&mut self, context: &[usize], global: usize, now: f64) -> Option<Vec<f64>> {
        let trace = self.traces.get(context)?;
        let mut weights: Vec<f64> = trace
            .iter()
            .map(|stamps| {
                stamps
                    .iter()
                    .map(|s| stamp_weight(&self.options, &self.times, s, global, now))
                    .sum()
            })
            .collect();

        if self.options.noise > 0.0 {
            let sd = self.options.noise.sqrt();
            for (w, stamps) in weights.iter_mut().zip(trace) {
                if !stamps.is_empty() {
                    *w = (*w + gaussian(&mut self.rng, sd)).max(0.0);
                }
            }
        }
        Some(weights)
    }
}

/// Memory-trace weight of one observation when predicting item `global` at `now`.
fn stamp_weight(options: &DecayOptions, times: &[f64], stamp: &Stamp, global: usize, now: f64) -> f64 {
    let items_since = global - stamp.pos;
    let elapsed = now - stamp.time;
    let in_buffer_items = items_since <= options.buffer_length_items;
    if in_buffer_items && elapsed < options.buffer_length_time {
        return options.buffer_weight;
    }

    let mut exit = stamp.time + options.buffer_length_time;
    if !in_buffer_items {
        exit = exit.min(times[stamp.pos + options.buffer_length_items]);
    }
    let since_exit = (now - exit).max(0.0);
    if since_exit < options.stm_duration {
        return options.stm_weight;
    }
    let decay_time = since_exit - options.stm_duration;
    options.ltm_asymptote
        + (options.ltm_weight - options.ltm_asymptote) * (-decay_time / options.ltm_half_life).exp2()
}

/// Box–Muller draw from N(0, sd²).
fn gaussian(rng: &mut SmallRng, sd: f64) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    sd * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

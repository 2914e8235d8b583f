// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Time Alignment Stage
//!
//! Resamples an irregularly-timestamped stream onto the uniform grid
//! implied by `targetSampleRate`. This is the one stage that consumes the
//! paired timestamp buffer; downstream stages see a regular sample rate.
//!
//! For every grid tick the stage locates the bracketing input samples and
//! interpolates (`linear`, `cubic` Catmull-Rom, or normalized windowed
//! `sinc` over 8 neighbors). A spacing wider than `gapThreshold` grid
//! periods between the brackets triggers the gap policy: interpolate
//! through, zero-fill, hold the last value, or fail the call.
//!
//! Drift compensation smooths device-clock jitter before interpolation:
//! `regression` replaces each arriving timestamp with the least-squares
//! fit over a sliding window; `pll` tracks the period with a first-order
//! loop. `none` uses raw timestamps.
//!
//! Grid ticks are only emitted once enough lookahead is buffered for the
//! chosen interpolator, so chunk boundaries never change the output; the
//! unconsumed tail stays in state.

use std::collections::VecDeque;

use signal_pipeline_domain::{
    BlockContext, ChannelState, PipelineError, StageKind, StageOutput, StageParameters,
    StageService, StageState,
};

/// Interpolation kernel for [`TimeAlignmentStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMethod {
    #[default]
    Linear,
    Cubic,
    Sinc,
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpolationMethod::Linear => write!(f, "linear"),
            InterpolationMethod::Cubic => write!(f, "cubic"),
            InterpolationMethod::Sinc => write!(f, "sinc"),
        }
    }
}

/// What to do when the bracketing samples are further apart than
/// `gapThreshold` grid periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    #[default]
    Interpolate,
    ZeroFill,
    Hold,
    Error,
}

impl std::fmt::Display for GapPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GapPolicy::Interpolate => write!(f, "interpolate"),
            GapPolicy::ZeroFill => write!(f, "zero-fill"),
            GapPolicy::Hold => write!(f, "hold"),
            GapPolicy::Error => write!(f, "error"),
        }
    }
}

/// Timestamp-jitter compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriftCompensation {
    #[default]
    None,
    Regression,
    Pll,
}

impl std::fmt::Display for DriftCompensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftCompensation::None => write!(f, "none"),
            DriftCompensation::Regression => write!(f, "regression"),
            DriftCompensation::Pll => write!(f, "pll"),
        }
    }
}

/// Configuration for [`TimeAlignmentStage`].
#[derive(Debug, Clone)]
pub struct TimeAlignmentConfig {
    pub target_sample_rate: f64,
    pub interpolation: InterpolationMethod,
    pub gap_policy: GapPolicy,
    /// Gap threshold in multiples of the grid period.
    pub gap_threshold: f64,
    pub drift_compensation: DriftCompensation,
}

impl TimeAlignmentConfig {
    pub fn new(target_sample_rate: f64) -> Self {
        Self {
            target_sample_rate,
            interpolation: InterpolationMethod::default(),
            gap_policy: GapPolicy::default(),
            gap_threshold: 1.5,
            drift_compensation: DriftCompensation::default(),
        }
    }
}

const REGRESSION_WINDOW: usize = 32;
const PLL_TIME_GAIN: f64 = 0.5;
const PLL_PERIOD_GAIN: f64 = 0.1;

/// Uniform-grid resampler over a timestamped stream.
pub struct TimeAlignmentStage {
    config: TimeAlignmentConfig,
    /// Effective (drift-compensated) timestamps of the buffered frames.
    times: VecDeque<f64>,
    /// Buffered frames, one deque per channel, aligned with `times`.
    pending: Vec<VecDeque<f32>>,
    next_output_time: f64,
    grid_started: bool,
    /// Raw-timestamp window for regression drift compensation.
    drift_window: VecDeque<f64>,
    pll_period: f64,
    pll_estimate: f64,
    pll_primed: bool,
    bound_channels: Option<usize>,
}

impl TimeAlignmentStage {
    pub fn new(config: TimeAlignmentConfig) -> Result<Self, PipelineError> {
        if !config.target_sample_rate.is_finite() || config.target_sample_rate <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Target sample rate must be positive, got {}",
                config.target_sample_rate
            )));
        }
        if !config.gap_threshold.is_finite() || config.gap_threshold <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Gap threshold must be positive, got {}",
                config.gap_threshold
            )));
        }
        Ok(Self {
            config,
            times: VecDeque::new(),
            pending: Vec::new(),
            next_output_time: 0.0,
            grid_started: false,
            drift_window: VecDeque::new(),
            pll_period: 0.0,
            pll_estimate: 0.0,
            pll_primed: false,
            bound_channels: None,
        })
    }

    fn grid_period(&self) -> f64 {
        1.0 / self.config.target_sample_rate
    }

    /// Samples the interpolator needs behind and ahead of the bracket.
    fn support(&self) -> (usize, usize) {
        match self.config.interpolation {
            InterpolationMethod::Linear => (0, 0),
            InterpolationMethod::Cubic => (1, 1),
            InterpolationMethod::Sinc => (3, 3),
        }
    }

    /// Drift-compensated timestamp for an arriving raw timestamp.
    fn effective_timestamp(&mut self, raw: f64) -> f64 {
        match self.config.drift_compensation {
            DriftCompensation::None => raw,
            DriftCompensation::Regression => {
                if self.drift_window.len() == REGRESSION_WINDOW {
                    self.drift_window.pop_front();
                }
                self.drift_window.push_back(raw);
                let n = self.drift_window.len();
                if n < 3 {
                    return raw;
                }
                // Least-squares fit t = a + b·j, evaluated at the newest j
                let nf = n as f64;
                let mut sum_t = 0.0;
                let mut sum_jt = 0.0;
                for (j, &t) in self.drift_window.iter().enumerate() {
                    sum_t += t;
                    sum_jt += j as f64 * t;
                }
                let sum_j = nf * (nf - 1.0) / 2.0;
                let sum_j2 = (nf - 1.0) * nf * (2.0 * nf - 1.0) / 6.0;
                let denom = nf * sum_j2 - sum_j * sum_j;
                if denom == 0.0 {
                    return raw;
                }
                let slope = (nf * sum_jt - sum_j * sum_t) / denom;
                let intercept = (sum_t - slope * sum_j) / nf;
                intercept + slope * (nf - 1.0)
            }
            DriftCompensation::Pll => {
                if !self.pll_primed {
                    self.pll_estimate = raw;
                    self.pll_primed = true;
                    return raw;
                }
                if self.pll_period == 0.0 {
                    self.pll_period = (raw - self.pll_estimate).max(f64::EPSILON);
                    self.pll_estimate = raw;
                    return raw;
                }
                let predicted = self.pll_estimate + self.pll_period;
                let error = raw - predicted;
                self.pll_estimate = predicted + PLL_TIME_GAIN * error;
                self.pll_period += PLL_PERIOD_GAIN * error;
                self.pll_estimate
            }
        }
    }

    /// Interpolates one channel at grid time `t` with bracket index `left`
    /// (`times[left] <= t <= times[left+1]`).
    fn interpolate_channel(&self, channel: usize, left: usize, t: f64) -> f32 {
        let times = &self.times;
        let values = &self.pending[channel];
        let t0 = times[left];
        let t1 = times[left + 1];
        let y0 = values[left] as f64;
        let y1 = values[left + 1] as f64;
        let span = t1 - t0;
        let frac = if span > 0.0 { (t - t0) / span } else { 0.0 };

        match self.config.interpolation {
            InterpolationMethod::Linear => (y0 + frac * (y1 - y0)) as f32,
            InterpolationMethod::Cubic => {
                let ym = if left > 0 { values[left - 1] as f64 } else { y0 };
                let yp = if left + 2 < values.len() {
                    values[left + 2] as f64
                } else {
                    y1
                };
                // Catmull-Rom on the unit parameter
                let f2 = frac * frac;
                let f3 = f2 * frac;
                let out = 0.5
                    * ((2.0 * y0)
                        + (-ym + y1) * frac
                        + (2.0 * ym - 5.0 * y0 + 4.0 * y1 - yp) * f2
                        + (-ym + 3.0 * y0 - 3.0 * y1 + yp) * f3);
                out as f32
            }
            InterpolationMethod::Sinc => {
                let local_dt = if span > 0.0 { span } else { self.grid_period() };
                let lo = left.saturating_sub(3);
                let hi = (left + 4).min(values.len() - 1);
                let mut acc = 0.0f64;
                let mut norm = 0.0f64;
                for k in lo..=hi {
                    let u = (t - times[k]) / local_dt;
                    let sinc = if u == 0.0 {
                        1.0
                    } else {
                        (std::f64::consts::PI * u).sin() / (std::f64::consts::PI * u)
                    };
                    // Hann taper over the 8-point support
                    let taper = 0.5 + 0.5 * (std::f64::consts::PI * u / 4.0).cos();
                    let weight = sinc * taper.max(0.0);
                    acc += weight * values[k] as f64;
                    norm += weight;
                }
                if norm.abs() > f64::EPSILON {
                    (acc / norm) as f32
                } else {
                    y0 as f32
                }
            }
        }
    }

    /// Drops buffered frames no interpolation position can reach anymore.
    fn trim(&mut self) {
        let (behind, _) = self.support();
        // Keep `behind + 1` frames at or before the next grid time
        loop {
            if self.times.len() <= behind + 2 {
                return;
            }
            if self.times[behind + 1] >= self.next_output_time {
                return;
            }
            self.times.pop_front();
            for queue in &mut self.pending {
                queue.pop_front();
            }
        }
    }
}

impl StageService for TimeAlignmentStage {
    fn kind(&self) -> StageKind {
        StageKind::TimeAlignment
    }

    fn consumes_timestamps(&self) -> bool {
        true
    }

    fn process_block(
        &mut self,
        samples: &mut Vec<f32>,
        ctx: &BlockContext<'_>,
    ) -> Result<StageOutput, PipelineError> {
        let frames = ctx.frames_in(samples.len())?;
        let timestamps = ctx.timestamps.ok_or_else(|| {
            PipelineError::MissingTimestamps(
                "timeAlignment requires a paired timestamp buffer".to_string(),
            )
        })?;
        if timestamps.len() != frames {
            return Err(PipelineError::ShapeMismatch(format!(
                "Timestamp buffer has {} entries for {} frames",
                timestamps.len(),
                frames
            )));
        }
        if let Some(expected) = self.bound_channels {
            if expected != ctx.channels {
                return Err(PipelineError::ChannelMismatch(format!(
                    "Stage 'timeAlignment' was initialized with {} channels but received {}",
                    expected, ctx.channels
                )));
            }
        }
        let channels = ctx.channels;
        if self.pending.len() != channels {
            self.pending = vec![VecDeque::new(); channels];
            self.bound_channels = Some(channels);
        }

        // Ingest with drift compensation; timestamps must advance
        for frame in 0..frames {
            let raw = timestamps[frame] as f64;
            if let Some(&last) = self.times.back() {
                if raw <= last {
                    return Err(PipelineError::ValidationError(format!(
                        "Timestamps must be strictly increasing: {} after {}",
                        raw, last
                    )));
                }
            }
            let effective = self.effective_timestamp(raw);
            let effective = match self.times.back() {
                // Compensation must never reorder the queue
                Some(&last) if effective <= last => last + f64::EPSILON.max(last.abs() * 1e-12),
                _ => effective,
            };
            self.times.push_back(effective);
            for channel in 0..channels {
                self.pending[channel].push_back(samples[frame * channels + channel]);
            }
            if !self.grid_started {
                self.grid_started = true;
                self.next_output_time = effective;
            }
        }

        // Emit every grid tick with enough lookahead buffered
        let (behind, ahead) = self.support();
        let period = self.grid_period();
        let gap_limit = self.config.gap_threshold * period;
        let mut out: Vec<f32> = Vec::new();

        loop {
            self.trim();
            let t = self.next_output_time;
            // Bracket search
            let Some(left) = (0..self.times.len().saturating_sub(1))
                .find(|&i| self.times[i] <= t && t <= self.times[i + 1])
            else {
                break;
            };
            if left + 1 + ahead >= self.times.len() {
                break; // not enough lookahead yet
            }
            let _ = behind; // trimming already preserves the trailing support

            // A tick that lands on a buffered sample (within f32 timestamp
            // granularity) copies it directly and bypasses gap handling.
            let snap = period * 1e-3;
            let on_sample = if (t - self.times[left]).abs() <= snap {
                Some(left)
            } else if (self.times[left + 1] - t).abs() <= snap {
                Some(left + 1)
            } else {
                None
            };

            let span = self.times[left + 1] - self.times[left];
            let in_gap = on_sample.is_none() && span > gap_limit;
            if in_gap && self.config.gap_policy == GapPolicy::Error {
                return Err(PipelineError::GapPolicy(format!(
                    "Gap of {:.6}s exceeds {} grid periods at t={:.6}",
                    span, self.config.gap_threshold, t
                )));
            }
            for channel in 0..channels {
                let value = if let Some(index) = on_sample {
                    self.pending[channel][index]
                } else if in_gap {
                    match self.config.gap_policy {
                        GapPolicy::ZeroFill => 0.0,
                        GapPolicy::Hold => self.pending[channel][left],
                        _ => self.interpolate_channel(channel, left, t),
                    }
                } else {
                    self.interpolate_channel(channel, left, t)
                };
                out.push(value);
            }
            self.next_output_time = t + period;
        }

        Ok(StageOutput::resized(out, channels))
    }

    fn structural_parameters(&self) -> StageParameters {
        StageParameters::new()
            .with_float("targetSampleRate", self.config.target_sample_rate)
            .with_text("interpolationMethod", &self.config.interpolation.to_string())
            .with_text("gapPolicy", &self.config.gap_policy.to_string())
            .with_float("gapThreshold", self.config.gap_threshold)
            .with_text("driftCompensation", &self.config.drift_compensation.to_string())
    }

    fn snapshot_state(&self) -> StageState {
        // Cell 0 carries the shared timestamp queues; cells 1..=C the
        // per-channel sample queues.
        let mut state = StageState::new()
            .with_scalar("nextOutputTime", self.next_output_time)
            .with_scalar("pllPeriod", self.pll_period)
            .with_scalar("pllTimeEstimate", self.pll_estimate)
            .with_counter("gridStarted", u64::from(self.grid_started))
            .with_counter("pllPrimed", u64::from(self.pll_primed));
        let shared = ChannelState::new()
            .with_buffer("timestamps", self.times.iter().map(|&t| t as f32).collect())
            .with_buffer(
                "driftWindow",
                self.drift_window.iter().map(|&t| t as f32).collect(),
            );
        state = state.with_channel(shared);
        for queue in &self.pending {
            state = state.with_channel(
                ChannelState::new().with_buffer("pending", queue.iter().copied().collect()),
            );
        }
        state
    }

    fn restore_state(&mut self, state: &StageState) -> Result<(), PipelineError> {
        if state.channel_count() == 0 {
            self.reset();
            return Ok(());
        }
        let shared = state.channel(0)?;
        let times: VecDeque<f64> = shared
            .buffer("timestamps")?
            .iter()
            .map(|&t| t as f64)
            .collect();
        let drift_window: VecDeque<f64> = shared
            .buffer("driftWindow")?
            .iter()
            .map(|&t| t as f64)
            .collect();
        let mut pending = Vec::with_capacity(state.channel_count() - 1);
        for index in 1..state.channel_count() {
            let queue = state.channel(index)?.buffer("pending")?;
            if queue.len() != times.len() {
                return Err(PipelineError::StateLoad(format!(
                    "Pending queue length {} does not match {} buffered timestamps",
                    queue.len(),
                    times.len()
                )));
            }
            pending.push(queue.iter().copied().collect());
        }
        self.next_output_time = state.scalar("nextOutputTime")?;
        self.pll_period = state.scalar("pllPeriod")?;
        self.pll_estimate = state.scalar("pllTimeEstimate")?;
        self.grid_started = state.counter("gridStarted")? != 0;
        self.pll_primed = state.counter("pllPrimed")? != 0;
        self.times = times;
        self.drift_window = drift_window;
        self.bound_channels = if pending.is_empty() { None } else { Some(pending.len()) };
        self.pending = pending;
        Ok(())
    }

    fn reset(&mut self) {
        self.times.clear();
        self.pending.clear();
        self.next_output_time = 0.0;
        self.grid_started = false;
        self.drift_window.clear();
        self.pll_period = 0.0;
        self.pll_estimate = 0.0;
        self.pll_primed = false;
        self.bound_channels = None;
    }
}

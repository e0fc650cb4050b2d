/*
    FluxFox
    https://github.com/dbalsom/fluxfox

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! A digital phase-locked loop that recovers the bit clock from a stream of
//! flux transition intervals.
//!
//! Each interval is resolved to a whole number of bit cells. The residual
//! timing error drives a proportional-integral correction of the loop phase
//! and cell period, with separate gain sets for initial acquisition and
//! steady-state tracking.

use crate::{
    cancel::CancelToken,
    flux::{FluxCapture, FluxEvent, FluxStats},
    format_us,
    types::{DiskRpm, TrackDataRate},
    RecoveryError,
};
use bit_vec::BitVec;
use std::fmt::{self, Display, Formatter};

pub const DEFAULT_LOCK_THRESHOLD: u8 = 192;
/// Maximum deviation of the cell period from nominal, as a fraction.
pub const DEFAULT_JITTER_TOLERANCE: f64 = 0.15;
pub const DEFAULT_MAX_CELLS_PER_EVENT: u32 = 256;

/// The loop bandwidth in use.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BandwidthMode {
    #[default]
    Acquisition,
    Tracking,
}

/// Where a decided bit fell relative to the center of its bit cell window.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MarginZone {
    Early,
    #[default]
    Center,
    Late,
}

impl Display for MarginZone {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            MarginZone::Early => write!(f, "E"),
            MarginZone::Center => write!(f, "C"),
            MarginZone::Late => write!(f, "L"),
        }
    }
}

/// One bit cell decided by the PLL.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecoveredBit {
    pub value: bool,
    pub quality: u8,
    pub margin_zone: MarginZone,
}

/// Proportional and integral gains.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PllGains {
    pub kp: f64,
    pub ki: f64,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PllConfig {
    /// The nominal data rate of the track.
    pub data_rate: TrackDataRate,
    /// The rotation rate of the drive the capture was taken with.
    pub rpm: DiskRpm,
    /// The tick resolution of captures in nanoseconds.
    pub tick_ns: f64,
    /// Lock quality at or above which the loop is considered locked.
    pub lock_threshold: u8,
    /// Maximum fractional deviation of the cell period from nominal.
    pub jitter_tolerance: f64,
    pub acquisition: PllGains,
    pub tracking: PllGains,
    /// Normalized phase error below which an event counts toward lock.
    pub lock_error: f64,
    /// Normalized phase error above which an event counts toward loss of lock.
    pub unlock_error: f64,
    /// Consecutive low-error events required to enter tracking.
    pub lock_run: u32,
    /// Consecutive high-error events that revert to acquisition.
    pub unlock_run: u32,
    /// Normalized phase error within which a bit is classified [MarginZone::Center].
    pub center_window: f64,
    /// Intervals longer than this many cells are truncated.
    pub max_cells_per_event: u32,
}

impl Default for PllConfig {
    fn default() -> Self {
        PllConfig {
            data_rate: TrackDataRate::default(),
            rpm: DiskRpm::default(),
            tick_ns: crate::flux::DEFAULT_TICK_NS,
            lock_threshold: DEFAULT_LOCK_THRESHOLD,
            jitter_tolerance: DEFAULT_JITTER_TOLERANCE,
            acquisition: PllGains { kp: 0.6, ki: 0.06 },
            tracking: PllGains { kp: 0.3, ki: 0.015 },
            lock_error: 0.1,
            unlock_error: 0.35,
            lock_run: 16,
            unlock_run: 4,
            center_window: 0.25,
            max_cells_per_event: DEFAULT_MAX_CELLS_PER_EVENT,
        }
    }
}

impl PllConfig {
    /// Create a configuration for the given nominal data rate, drive rotation rate and capture
    /// resolution, with default loop parameters.
    pub fn for_rate(data_rate: TrackDataRate, rpm: DiskRpm, tick_ns: f64) -> Self {
        PllConfig {
            data_rate,
            rpm,
            tick_ns,
            ..PllConfig::default()
        }
    }

    /// Return the nominal bit cell period in seconds, adjusted for the drive rotation rate.
    pub fn cell_period(&self) -> f64 {
        self.rpm.adjust_clock(self.data_rate.cell_period())
    }

    /// Return the nominal bit cell period in capture ticks.
    pub fn cell_period_ticks(&self) -> f64 {
        self.cell_period() * 1e9 / self.tick_ns
    }

    pub fn validate(&self) -> Result<(), RecoveryError> {
        let bad = |msg: &str| Err(RecoveryError::ParameterError(format!("PllConfig: {}", msg)));
        if !(self.tick_ns > 0.0) {
            return bad("tick resolution must be positive");
        }
        if u32::from(self.data_rate) == 0 {
            return bad("data rate must be non-zero");
        }
        if !(self.jitter_tolerance > 0.0 && self.jitter_tolerance < 0.5) {
            return bad("jitter tolerance must be within (0, 0.5)");
        }
        for gains in [self.acquisition, self.tracking] {
            if !(gains.kp > 0.0 && gains.kp <= 1.0 && gains.ki >= 0.0 && gains.ki < 1.0) {
                return bad("loop gains out of range");
            }
        }
        if self.lock_run == 0 || self.unlock_run == 0 || self.max_cells_per_event == 0 {
            return bad("run lengths must be non-zero");
        }
        if self.cell_period_ticks() < 1.0 {
            return bad("bit cell shorter than one capture tick");
        }
        Ok(())
    }
}

/// The mutable state of the loop.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PllState {
    /// Phase error carried into the next interval, in ticks.
    pub phase_accumulator: f64,
    /// Current estimate of the bit cell period, in ticks.
    pub frequency_estimate: f64,
    pub bandwidth_mode: BandwidthMode,
    pub lock_quality: u8,
}

/// The outcome of feeding one [FluxEvent] to the loop.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PllStep {
    /// Number of bit cells the interval was resolved to. The last cell holds the transition.
    pub cells: u32,
    /// Phase error normalized to one bit cell.
    pub phase_error: f64,
    pub quality: u8,
    pub margin_zone: MarginZone,
    /// True if the frequency correction hit the tolerance limit.
    pub clamped: bool,
}

impl PllStep {
    /// Return the bit at `cell` within this step.
    #[inline]
    pub fn bit(&self, cell: u32) -> RecoveredBit {
        RecoveredBit {
            value: cell + 1 == self.cells,
            quality: self.quality,
            margin_zone: self.margin_zone,
        }
    }

    pub fn bits(&self) -> impl Iterator<Item = RecoveredBit> + '_ {
        (0..self.cells).map(move |c| self.bit(c))
    }
}

pub struct PllDecodeResult {
    pub bits: BitVec,
    pub recovered: Vec<RecoveredBit>,
    pub flux_stats: FluxStats,
    /// The loop state after the last event.
    pub final_state: PllState,
    /// Number of events decoded while the loop was locked.
    pub locked_events: u64,
    /// Number of events where the frequency estimate was clamped.
    pub clamped_events: u64,
    pub lock_threshold: u8,
}

impl PllDecodeResult {
    /// Report whether the loop finished the capture in lock.
    pub fn check_lock(&self) -> Result<(), RecoveryError> {
        if self.final_state.lock_quality >= self.lock_threshold {
            Ok(())
        }
        else {
            Err(RecoveryError::PllUnlocked {
                lock_quality: self.final_state.lock_quality,
            })
        }
    }
}

pub struct Pll {
    config: PllConfig,
    nominal: f64,
    min_period: f64,
    max_period: f64,
    state: PllState,
    low_run: u32,
    high_run: u32,
}

impl Pll {
    pub fn new(config: PllConfig) -> Result<Self, RecoveryError> {
        config.validate()?;
        let nominal = config.cell_period_ticks();
        let mut pll = Pll {
            nominal,
            min_period: nominal * (1.0 - config.jitter_tolerance),
            max_period: nominal * (1.0 + config.jitter_tolerance),
            config,
            state: PllState {
                phase_accumulator: 0.0,
                frequency_estimate: nominal,
                bandwidth_mode: BandwidthMode::Acquisition,
                lock_quality: 0,
            },
            low_run: 0,
            high_run: 0,
        };
        pll.reset();
        log::debug!(
            "Pll::new(): rate: {} rpm: {} cell period: {} ({:.2} ticks) tolerance: {:.2}",
            pll.config.data_rate,
            pll.config.rpm,
            format_us!(pll.config.cell_period()),
            pll.nominal,
            pll.config.jitter_tolerance
        );
        Ok(pll)
    }

    pub fn config(&self) -> &PllConfig {
        &self.config
    }

    pub fn state(&self) -> &PllState {
        &self.state
    }

    /// Return the nominal cell period in ticks.
    pub fn nominal_period(&self) -> f64 {
        self.nominal
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock_quality >= self.config.lock_threshold
    }

    /// Return the loop to its initial state. Callers re-lock at the start of a track or on an
    /// index pulse.
    pub fn reset(&mut self) {
        self.state = PllState {
            phase_accumulator: 0.0,
            frequency_estimate: self.nominal,
            bandwidth_mode: BandwidthMode::Acquisition,
            lock_quality: 0,
        };
        self.low_run = 0;
        self.high_run = 0;
    }

    /// Resolve one flux interval into bit cells and update the loop.
    pub fn feed(&mut self, event: FluxEvent) -> PllStep {
        self.feed_ticks(event.ticks as f64)
    }

    fn feed_ticks(&mut self, interval: f64) -> PllStep {
        let freq = self.state.frequency_estimate;
        let gains = match self.state.bandwidth_mode {
            BandwidthMode::Acquisition => self.config.acquisition,
            BandwidthMode::Tracking => self.config.tracking,
        };

        let effective = interval + self.state.phase_accumulator;
        let rounded = (effective / freq).round();
        let cells = if rounded >= 1.0 {
            (rounded.min(self.config.max_cells_per_event as f64)) as u32
        }
        else {
            1
        };

        let phase_error = effective - cells as f64 * freq;
        let normalized = phase_error / freq;

        // Phase correction, carrying at most half a cell into the next interval.
        self.state.phase_accumulator = ((1.0 - gains.kp) * phase_error).clamp(-0.5 * freq, 0.5 * freq);

        // Frequency correction, bounded by the jitter tolerance.
        let corrected = freq + gains.ki * phase_error / cells as f64;
        let clamped = corrected < self.min_period || corrected > self.max_period;
        self.state.frequency_estimate = corrected.clamp(self.min_period, self.max_period);

        let abs_err = normalized.abs();
        let low = abs_err < self.config.lock_error;
        if low {
            self.low_run = self.low_run.saturating_add(1);
            self.high_run = 0;
        }
        else if abs_err > self.config.unlock_error {
            self.high_run = self.high_run.saturating_add(1);
            self.low_run = 0;
        }
        else {
            self.low_run = 0;
            self.high_run = 0;
        }

        let target: u32 = if low { 255 } else { 0 };
        self.state.lock_quality = ((self.state.lock_quality as u32 * 7 + target) / 8) as u8;

        if clamped {
            log::trace!(
                "Pll::feed(): frequency estimate clamped at {:.3} ticks (nominal {:.3})",
                self.state.frequency_estimate,
                self.nominal
            );
            self.state.lock_quality /= 2;
            self.state.bandwidth_mode = BandwidthMode::Acquisition;
            self.low_run = 0;
        }
        else {
            match self.state.bandwidth_mode {
                BandwidthMode::Acquisition if self.low_run >= self.config.lock_run => {
                    self.state.bandwidth_mode = BandwidthMode::Tracking;
                }
                BandwidthMode::Tracking if self.high_run >= self.config.unlock_run => {
                    self.state.bandwidth_mode = BandwidthMode::Acquisition;
                    self.low_run = 0;
                }
                _ => {}
            }
        }

        let margin_zone = if abs_err <= self.config.center_window {
            MarginZone::Center
        }
        else if normalized < 0.0 {
            MarginZone::Early
        }
        else {
            MarginZone::Late
        };

        let timing = (1.0 - 2.0 * abs_err).clamp(0.0, 1.0);
        let quality = (timing * self.state.lock_quality as f64).round() as u8;

        PllStep {
            cells,
            phase_error: normalized,
            quality,
            margin_zone,
            clamped,
        }
    }

    /// Adapt an iterator of flux events into an iterator of [RecoveredBit]s driven by this loop.
    pub fn recovered_bits<I>(&mut self, events: I) -> RecoveredBits<'_, I::IntoIter>
    where
        I: IntoIterator<Item = FluxEvent>,
    {
        RecoveredBits {
            pll: self,
            events: events.into_iter(),
            step: None,
            emitted: 0,
        }
    }

    /// Reset the loop and decode a complete capture.
    pub fn decode_capture(&mut self, capture: &FluxCapture) -> PllDecodeResult {
        // The token is never raised, so this can only return a result.
        match self.decode_capture_cancellable(capture, &CancelToken::new()) {
            Ok(result) => result,
            Err(_) => self.empty_result(),
        }
    }

    /// Reset the loop and decode a complete capture, checking `cancel` between events.
    pub fn decode_capture_cancellable(
        &mut self,
        capture: &FluxCapture,
        cancel: &CancelToken,
    ) -> Result<PllDecodeResult, RecoveryError> {
        self.reset();
        let scale = capture.tick_ns() / self.config.tick_ns;
        let mut bits = BitVec::with_capacity(capture.len() * 3);
        let mut recovered = Vec::with_capacity(capture.len() * 3);
        let mut flux_stats = FluxStats::default();
        let mut locked_events = 0u64;
        let mut clamped_events = 0u64;

        for event in capture.events() {
            if cancel.is_cancelled() {
                log::debug!("Pll::decode_capture(): cancelled after {} events", flux_stats.total);
                return Err(RecoveryError::Cancelled);
            }
            let step = self.feed_ticks(event.ticks as f64 * scale);
            flux_stats.record(event.seconds(capture.tick_ns()), step.cells);
            if self.is_locked() {
                locked_events += 1;
            }
            if step.clamped {
                clamped_events += 1;
            }
            for bit in step.bits() {
                bits.push(bit.value);
                recovered.push(bit);
            }
        }

        log::debug!(
            "Pll::decode_capture(): {} events, {} bits, {} locked, {} clamped, final period {:.3} ticks, lock quality {}",
            flux_stats.total,
            bits.len(),
            locked_events,
            clamped_events,
            self.state.frequency_estimate,
            self.state.lock_quality
        );
        log::debug!("Pll::decode_capture(): {}", flux_stats);

        Ok(PllDecodeResult {
            bits,
            recovered,
            flux_stats,
            final_state: self.state,
            locked_events,
            clamped_events,
            lock_threshold: self.config.lock_threshold,
        })
    }

    fn empty_result(&self) -> PllDecodeResult {
        PllDecodeResult {
            bits: BitVec::new(),
            recovered: Vec::new(),
            flux_stats: FluxStats::default(),
            final_state: self.state,
            locked_events: 0,
            clamped_events: 0,
            lock_threshold: self.config.lock_threshold,
        }
    }
}

/// Iterator adapter produced by [Pll::recovered_bits].
pub struct RecoveredBits<'a, I> {
    pll: &'a mut Pll,
    events: I,
    step: Option<PllStep>,
    emitted: u32,
}

impl<I> Iterator for RecoveredBits<'_, I>
where
    I: Iterator<Item = FluxEvent>,
{
    type Item = RecoveredBit;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(step) = &self.step {
                if self.emitted < step.cells {
                    let bit = step.bit(self.emitted);
                    self.emitted += 1;
                    return Some(bit);
                }
            }
            let event = self.events.next()?;
            self.step = Some(self.pll.feed(event));
            self.emitted = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn test_pll() -> Pll {
        // 250Kbps at 300RPM, 2us cells, 25ns ticks = 80 ticks per cell
        Pll::new(PllConfig::for_rate(TrackDataRate::Rate250Kbps(1.0), DiskRpm::Rpm300(1.0), 25.0)).unwrap()
    }

    #[test]
    fn test_pll_config() {
        let config = PllConfig::for_rate(TrackDataRate::Rate250Kbps(1.0), DiskRpm::Rpm360(1.0), 25.0);
        // DD media in a 360RPM drive reads at 300Kbps
        assert!((config.cell_period() - 1.0 / 600_000.0).abs() < 1e-12);

        let bad = PllConfig {
            tick_ns: 0.0,
            ..PllConfig::default()
        };
        assert!(Pll::new(bad).is_err());
        let bad = PllConfig {
            jitter_tolerance: 0.6,
            ..PllConfig::default()
        };
        assert!(Pll::new(bad).is_err());
    }

    #[test]
    fn test_pll_bit_emission() {
        let mut pll = test_pll();
        let events = [160u32, 240, 320, 160].map(FluxEvent::new);
        let bits: Vec<bool> = pll.recovered_bits(events).map(|b| b.value).collect();
        assert_eq!(
            bits,
            vec![false, true, false, false, true, false, false, false, true, false, true]
        );
    }

    #[test]
    fn test_pll_minimum_one_cell() {
        let mut pll = test_pll();
        let step = pll.feed(FluxEvent::new(5));
        assert_eq!(step.cells, 1);
        let step = pll.feed(FluxEvent::new(1_000_000));
        assert_eq!(step.cells, DEFAULT_MAX_CELLS_PER_EVENT);
    }

    #[test]
    fn test_pll_converges() {
        let mut pll = test_pll();
        let mut rng = StdRng::seed_from_u64(0x5EED);
        // Media running 3% slow, with each transition displaced by up to 1/20th of a cell
        let period = 80.0 * 1.03;
        let mut ideal = 0.0;
        let mut last = 0.0;
        for _ in 0..2000 {
            let cells: u32 = rng.gen_range(2..=4);
            ideal += cells as f64 * period;
            let actual: f64 = (ideal + rng.gen_range(-4.0..4.0)).round();
            let step = pll.feed(FluxEvent::new((actual - last) as u32));
            last = actual;
            assert!(!step.clamped);
            assert_eq!(step.cells, cells);
        }

        assert_eq!(pll.state().bandwidth_mode, BandwidthMode::Tracking);
        assert!(pll.is_locked());
        let estimate = pll.state().frequency_estimate;
        assert!((estimate - period).abs() / period < 0.01, "estimate {}", estimate);

        pll.reset();
        assert_eq!(pll.state().bandwidth_mode, BandwidthMode::Acquisition);
        assert_eq!(pll.state().lock_quality, 0);
        assert_eq!(pll.state().frequency_estimate, pll.nominal_period());
    }

    #[test]
    fn test_pll_clamps_out_of_tolerance() {
        let mut pll = test_pll();
        // 1.3 cells fits no cell count within tolerance
        let mut clamped = 0;
        for _ in 0..200 {
            if pll.feed(FluxEvent::new(104)).clamped {
                clamped += 1;
            }
        }
        assert!(clamped > 100);
        let max = pll.nominal_period() * (1.0 + DEFAULT_JITTER_TOLERANCE);
        assert!((pll.state().frequency_estimate - max).abs() < 1e-9);
        assert_eq!(pll.state().bandwidth_mode, BandwidthMode::Acquisition);
        assert!(!pll.is_locked());
    }

    #[test]
    fn test_pll_margin_zones() {
        let mut pll = test_pll();
        assert_eq!(pll.feed(FluxEvent::new(160)).margin_zone, MarginZone::Center);
        pll.reset();
        // 0.4 cells early
        assert_eq!(pll.feed(FluxEvent::new(128)).margin_zone, MarginZone::Early);
        pll.reset();
        assert_eq!(pll.feed(FluxEvent::new(192)).margin_zone, MarginZone::Late);
    }

    #[test]
    fn test_pll_decode_capture() {
        let mut pll = test_pll();
        let ticks: Vec<u32> = (0..200).map(|i| [160u32, 240, 320][i % 3]).collect();
        let capture = FluxCapture::from_ticks(&ticks, vec![], 25.0).unwrap();
        let result = pll.decode_capture(&capture);
        assert_eq!(result.bits.len(), result.recovered.len());
        assert_eq!(result.flux_stats.total, 200);
        assert_eq!(result.flux_stats.too_short + result.flux_stats.too_long, 0);
        assert!(result.check_lock().is_ok());

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            pll.decode_capture_cancellable(&capture, &cancel),
            Err(RecoveryError::Cancelled)
        ));
    }
}

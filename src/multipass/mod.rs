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

    src/multipass/mod.rs

    Multipass sector recovery: repeated reads of a track merged into a single best result.
*/

//! Sectors that fail their CRC on a normal read can often be recovered by reading the track
//! again. Each pass is decoded independently by its own [Pll] and [System34Schema], and every
//! sector instance with a valid ID is merged into a [SectorAccumulator] keyed by sector ID.
//!
//! A sector read with a good CRC in any pass is final. Other sectors are resolved again from
//! the merged evidence after every pass, see [RecoveredSector] and [Resolution]. Recovery is
//! complete as soon as every sector found resolves to a payload with a good CRC.
//!
//! A pass is merged only once it has been decoded completely. A cancelled pass is discarded,
//! so the session always reflects the last fully merged pass.

mod merge;

pub use merge::{BitClass, Confidence, RecoveredSector, Resolution};

use crate::{
    cancel::CancelToken,
    flux::{FluxCapture, FluxHistogram, HistogramStats, Pll, PllConfig},
    format_ms,
    track_schema::{Sector, System34Schema},
    types::{DiskChsn, TrackDataEncoding},
    RecoveryError,
};
use merge::{MergeParams, SectorAccumulator};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

pub const DEFAULT_PASS_BUDGET: u32 = 8;
pub const MIN_PASS_BUDGET: u32 = 2;
pub const MAX_PASS_BUDGET: u32 = 64;
pub const DEFAULT_STRONG_THRESHOLD: u8 = 90;
pub const DEFAULT_WEAK_THRESHOLD: u8 = 60;
pub const DEFAULT_MAX_CORRECTION_BITS: usize = 8;
/// Maximum number of weak byte offsets reported per sector.
pub const WEAK_POSITION_LIMIT: usize = 64;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MultipassConfig {
    /// Maximum number of passes, including the first.
    pub pass_budget: u32,
    /// Percent of the merged weight a byte value needs to be considered strong.
    pub strong_threshold: u8,
    /// Percent of the merged weight a byte value needs to be considered weak rather than
    /// ambiguous.
    pub weak_threshold: u8,
    /// Attempt single bit flips of the least confident bits when merging fails.
    pub use_crc_correction: bool,
    pub max_correction_bits: usize,
}

impl Default for MultipassConfig {
    fn default() -> Self {
        Self {
            pass_budget: DEFAULT_PASS_BUDGET,
            strong_threshold: DEFAULT_STRONG_THRESHOLD,
            weak_threshold: DEFAULT_WEAK_THRESHOLD,
            use_crc_correction: true,
            max_correction_bits: DEFAULT_MAX_CORRECTION_BITS,
        }
    }
}

impl MultipassConfig {
    pub fn validate(&self) -> Result<(), RecoveryError> {
        if !(MIN_PASS_BUDGET..=MAX_PASS_BUDGET).contains(&self.pass_budget) {
            return Err(RecoveryError::ParameterError(format!(
                "MultipassConfig: pass budget {} outside {}..={}",
                self.pass_budget, MIN_PASS_BUDGET, MAX_PASS_BUDGET
            )));
        }
        if self.strong_threshold > 100 || self.weak_threshold > self.strong_threshold {
            return Err(RecoveryError::ParameterError(format!(
                "MultipassConfig: invalid thresholds strong {} weak {}",
                self.strong_threshold, self.weak_threshold
            )));
        }
        Ok(())
    }

    fn merge_params(&self) -> MergeParams {
        MergeParams {
            strong: self.strong_threshold,
            weak: self.weak_threshold,
            use_crc_correction: self.use_crc_correction,
            max_correction_bits: self.max_correction_bits,
        }
    }
}

/// A source of repeated captures of the same track.
pub trait PassSource {
    /// Return the next capture, or None if no more captures are available.
    fn next_pass(&mut self) -> Option<FluxCapture>;
}

impl<I> PassSource for I
where
    I: Iterator<Item = FluxCapture>,
{
    fn next_pass(&mut self) -> Option<FluxCapture> {
        self.next()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecoveryStatus {
    #[default]
    Pending,
    /// Every sector found was read or merged into a payload with a good CRC.
    Complete,
    /// The pass budget was exhausted with sectors still failing their CRC.
    BestEffort,
}

impl Display for RecoveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStatus::Pending => write!(f, "pending"),
            RecoveryStatus::Complete => write!(f, "complete"),
            RecoveryStatus::BestEffort => write!(f, "best effort"),
        }
    }
}

/// Statistics of a single merged pass.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PassMetadata {
    pub pass: u32,
    pub flux_count: usize,
    /// The first index period of the capture in seconds, or the capture duration if the
    /// capture has fewer than two index pulses.
    pub index_time: f64,
    pub sectors_found: usize,
    pub sectors_good: usize,
    /// PLL lock quality at the end of the pass.
    pub lock_quality: u8,
}

/// Per track recovery counts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackSummary {
    pub sector_count: usize,
    /// Sectors with a good CRC.
    pub sectors_recovered: usize,
    /// Sectors with a bad CRC but at least one strong byte.
    pub sectors_partial: usize,
    /// Sectors with no data, or no strong byte.
    pub sectors_failed: usize,
    /// Mean of the average byte confidence of every sector, in percent.
    pub overall_confidence: u8,
}

impl TrackSummary {
    pub fn from_sectors(sectors: &[RecoveredSector]) -> Self {
        let mut summary = TrackSummary {
            sector_count: sectors.len(),
            ..Default::default()
        };

        for sector in sectors {
            if sector.crc_ok {
                summary.sectors_recovered += 1;
            }
            else if sector.classes.contains(&Confidence::Strong) {
                summary.sectors_partial += 1;
            }
            else {
                summary.sectors_failed += 1;
            }
        }

        if !sectors.is_empty() {
            let total: u64 = sectors.iter().map(|s| s.confidence_avg as u64).sum();
            summary.overall_confidence = (total / sectors.len() as u64) as u8;
        }
        summary
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MultipassResult {
    pub status: RecoveryStatus,
    pub passes: u32,
    /// Merged sectors in sector ID order.
    pub sectors: Vec<RecoveredSector>,
    pub summary: TrackSummary,
    pub pass_metadata: Vec<PassMetadata>,
    /// Flux interval statistics over every merged pass.
    pub histogram: HistogramStats,
}

impl MultipassResult {
    pub fn sector(&self, id: DiskChsn) -> Option<&RecoveredSector> {
        self.sectors.iter().find(|s| s.id == id)
    }

    pub fn all_good(&self) -> bool {
        !self.sectors.is_empty() && self.sectors.iter().all(|s| s.crc_ok)
    }

    pub fn is_best_effort(&self) -> bool {
        self.status == RecoveryStatus::BestEffort
    }
}

/// A decoded but not yet merged pass.
struct DecodedPass {
    sectors: Vec<Sector>,
    lock_quality: u8,
}

fn decode_pass(
    pll: &mut Pll,
    schema: &System34Schema,
    capture: &FluxCapture,
    cancel: &CancelToken,
) -> Result<DecodedPass, RecoveryError> {
    let result = pll.decode_capture_cancellable(capture, cancel)?;
    if let Err(e) = result.check_lock() {
        log::warn!("decode_pass(): {}", e);
    }
    Ok(DecodedPass {
        sectors: schema.decode(&result),
        lock_quality: result.final_state.lock_quality,
    })
}

/// Recovers the sectors of one track from up to `pass_budget` captures.
pub struct MultipassSession {
    config: MultipassConfig,
    pll_config: PllConfig,
    pll: Pll,
    schema: System34Schema,
    sectors: BTreeMap<DiskChsn, SectorAccumulator>,
    histogram: FluxHistogram,
    metadata: Vec<PassMetadata>,
    passes: u32,
}

impl MultipassSession {
    pub fn new(config: MultipassConfig, pll_config: PllConfig, encoding: TrackDataEncoding) -> Result<Self, RecoveryError> {
        config.validate()?;
        Ok(Self {
            config,
            pll: Pll::new(pll_config.clone())?,
            pll_config,
            schema: System34Schema::new(encoding)?,
            sectors: BTreeMap::new(),
            histogram: FluxHistogram::new()?,
            metadata: Vec::new(),
            passes: 0,
        })
    }

    pub fn config(&self) -> &MultipassConfig {
        &self.config
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Return true once every sector found has been read, or merged, with a good CRC.
    pub fn is_complete(&self) -> bool {
        !self.sectors.is_empty() && self.sectors.values().all(|s| s.is_recovered())
    }

    fn budget_remaining(&self) -> u32 {
        self.config.pass_budget.saturating_sub(self.passes)
    }

    pub fn status(&self) -> RecoveryStatus {
        if self.is_complete() {
            RecoveryStatus::Complete
        }
        else if self.budget_remaining() == 0 {
            RecoveryStatus::BestEffort
        }
        else {
            RecoveryStatus::Pending
        }
    }

    /// Decode and merge a single capture. Returns the session status after the merge.
    ///
    /// If `cancel` is raised during decoding, the pass is discarded and
    /// [RecoveryError::Cancelled] is returned.
    pub fn run_pass(&mut self, capture: &FluxCapture, cancel: &CancelToken) -> Result<RecoveryStatus, RecoveryError> {
        if self.status() != RecoveryStatus::Pending {
            return Ok(self.status());
        }

        let decoded = decode_pass(&mut self.pll, &self.schema, capture, cancel)?;
        self.merge(capture, decoded);
        Ok(self.status())
    }

    /// Pull captures from `source` until recovery completes, the budget is exhausted or the
    /// source runs dry.
    pub fn run<S: PassSource>(&mut self, source: &mut S, cancel: &CancelToken) -> Result<MultipassResult, RecoveryError> {
        while self.status() == RecoveryStatus::Pending {
            let Some(capture) = source.next_pass()
            else {
                break;
            };
            self.run_pass(&capture, cancel)?;
        }

        if self.passes == 0 {
            return Err(RecoveryError::NoCapture);
        }
        Ok(self.result())
    }

    /// Decode a batch of captures and merge them in order. With the `parallel` feature the
    /// captures are decoded concurrently; merging is always sequential.
    ///
    /// Passes preceding the first failed pass are merged before the error is returned. Captures
    /// beyond the remaining budget are ignored.
    pub fn run_batch(&mut self, captures: &[FluxCapture], cancel: &CancelToken) -> Result<MultipassResult, RecoveryError> {
        if captures.is_empty() && self.passes == 0 {
            return Err(RecoveryError::NoCapture);
        }
        if self.status() != RecoveryStatus::Pending {
            return Ok(self.result());
        }

        let batch = &captures[..captures.len().min(self.budget_remaining() as usize)];
        let decoded = self.decode_batch(batch, cancel);

        for (capture, pass) in batch.iter().zip(decoded) {
            if self.status() != RecoveryStatus::Pending {
                break;
            }
            self.merge(capture, pass?);
        }
        Ok(self.result())
    }

    fn decode_batch(&self, captures: &[FluxCapture], cancel: &CancelToken) -> Vec<Result<DecodedPass, RecoveryError>> {
        let decode = |capture: &FluxCapture| {
            let mut pll = Pll::new(self.pll_config.clone())?;
            decode_pass(&mut pll, &self.schema, capture, cancel)
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            captures.par_iter().map(decode).collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            captures.iter().map(decode).collect()
        }
    }

    fn merge(&mut self, capture: &FluxCapture, pass: DecodedPass) {
        self.passes += 1;
        self.histogram.add_capture(capture);

        let variant = self.schema.variant();
        let mut found = 0;
        let mut good = 0;
        for sector in pass.sectors.iter().filter(|s| s.id_crc_ok) {
            found += 1;
            if sector.data_crc_ok {
                good += 1;
            }
            let accumulator = self
                .sectors
                .entry(sector.id)
                .or_insert_with(|| SectorAccumulator::new(sector.id, variant));
            accumulator.add(sector);
        }

        let params = self.config.merge_params();
        for accumulator in self.sectors.values_mut() {
            accumulator.refresh(&params);
        }

        let periods = capture.index_periods();
        let index_time = periods
            .first()
            .copied()
            .unwrap_or(capture.duration_ticks() as f64 * capture.tick_ns() * 1e-9);

        self.metadata.push(PassMetadata {
            pass: self.passes,
            flux_count: capture.len(),
            index_time,
            sectors_found: found,
            sectors_good: good,
            lock_quality: pass.lock_quality,
        });

        log::debug!(
            "MultipassSession::merge(): pass {} ({}) found {} sectors, {} good; {} of {} sectors recovered",
            self.passes,
            format_ms!(index_time),
            found,
            good,
            self.sectors.values().filter(|s| s.is_recovered()).count(),
            self.sectors.len()
        );
    }

    /// Return the merged result as of the last complete pass.
    pub fn result(&self) -> MultipassResult {
        let params = self.config.merge_params();
        let sectors: Vec<RecoveredSector> = self.sectors.values().map(|s| s.resolved(&params)).collect();
        MultipassResult {
            status: self.status(),
            passes: self.passes,
            summary: TrackSummary::from_sectors(&sectors),
            sectors,
            pass_metadata: self.metadata.clone(),
            histogram: self.histogram.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(MultipassConfig::default().validate().is_ok());
        for budget in [0, 1, 65] {
            let config = MultipassConfig {
                pass_budget: budget,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
        let config = MultipassConfig {
            strong_threshold: 50,
            weak_threshold: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    fn recovered(id: u8, crc_ok: bool, classes: Vec<Confidence>, confidence_avg: u8) -> RecoveredSector {
        RecoveredSector {
            id: DiskChsn::new(0, 0, id, 0),
            crc_ok,
            classes,
            confidence_avg,
            ..Default::default()
        }
    }

    #[test]
    fn test_track_summary() {
        assert_eq!(TrackSummary::from_sectors(&[]), TrackSummary::default());

        let sectors = vec![
            recovered(1, true, vec![Confidence::Strong; 4], 100),
            recovered(2, true, vec![Confidence::Weak; 4], 70),
            recovered(3, false, vec![Confidence::Ambiguous, Confidence::Strong], 60),
            recovered(4, false, vec![Confidence::Weak, Confidence::Ambiguous], 50),
            recovered(5, false, Vec::new(), 0),
        ];
        let summary = TrackSummary::from_sectors(&sectors);
        assert_eq!(summary.sector_count, 5);
        assert_eq!(summary.sectors_recovered, 2);
        assert_eq!(summary.sectors_partial, 1);
        assert_eq!(summary.sectors_failed, 2);
        assert_eq!(summary.overall_confidence, 56);
    }

    #[test]
    fn test_gcr_rejected() {
        assert!(MultipassSession::new(
            MultipassConfig::default(),
            PllConfig::default(),
            TrackDataEncoding::GcrCbm
        )
        .is_err());
    }

    #[test]
    fn test_no_capture() {
        let mut session =
            MultipassSession::new(MultipassConfig::default(), PllConfig::default(), TrackDataEncoding::Mfm).unwrap();
        let mut source = std::iter::empty::<FluxCapture>();
        assert!(matches!(
            session.run(&mut source, &CancelToken::new()),
            Err(RecoveryError::NoCapture)
        ));
        assert!(matches!(
            session.run_batch(&[], &CancelToken::new()),
            Err(RecoveryError::NoCapture)
        ));
        assert_eq!(session.status(), RecoveryStatus::Pending);
    }
}

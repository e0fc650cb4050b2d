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

//! This module defines a [FluxHistogram] structure which accumulates flux
//! interval statistics over one or more captures.
//!
//! It is used to estimate the data rate of a track before the PLL has locked,
//! to supply transition density evidence to the interface profiler, and to
//! record the aggregate interval distribution of a multipass session.

use crate::{
    flux::{FluxCapture, AVERAGE_FLUX_DENSITY},
    types::TrackDataRate,
    RecoveryError,
};
use histogram::{Bucket, Histogram};
use std::ops::RangeInclusive;

// grouping_power should be set such that 2^(-1 * grouping_power) is an acceptable relative error.
// Grouping power of 3 produces sharp spikes
const GROUPING_POWER: u8 = 3;
// Max value power of 2^16 = 65536 (65us). Longer intervals are counted as overflow.
const MAX_VALUE_POWER: u8 = 16;

/// Summary statistics of a [FluxHistogram]. All times are in nanoseconds.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistogramStats {
    pub total: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub peak_start: u64,
    pub peak_end: u64,
    pub peak_count: u64,
    pub overflow: u64,
}

pub struct FluxHistogram {
    histogram: Histogram,
    total_time: f64,
    count: u64,
    sum_ns: u128,
    min_ns: u64,
    max_ns: u64,
    overflow: u64,
}

impl FluxHistogram {
    pub fn new() -> Result<Self, RecoveryError> {
        let histogram = Histogram::new(GROUPING_POWER, MAX_VALUE_POWER)
            .map_err(|e| RecoveryError::ParameterError(format!("histogram configuration: {:?}", e)))?;

        Ok(FluxHistogram {
            histogram,
            total_time: 0.0,
            count: 0,
            sum_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            overflow: 0,
        })
    }

    /// Produce a [FluxHistogram] over a fraction of the flux transitions in a capture.
    /// # Arguments
    /// * `capture` - The capture to sample
    /// * `fraction` - The fraction of the transitions to use in the histogram
    pub fn from_capture(capture: &FluxCapture, fraction: f64) -> Result<Self, RecoveryError> {
        let mut new = Self::new()?;
        let take_count = (capture.len() as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
        log::debug!("FluxHistogram::from_capture(): Taking {} flux deltas", take_count);
        for event in capture.events().iter().take(take_count) {
            new.add_interval_ns(event.nanos(capture.tick_ns()));
        }
        Ok(new)
    }

    /// Add every transition of a capture to the histogram.
    pub fn add_capture(&mut self, capture: &FluxCapture) {
        for event in capture.events() {
            self.add_interval_ns(event.nanos(capture.tick_ns()));
        }
    }

    pub fn add_interval_ns(&mut self, ns: u64) {
        if self.histogram.increment(ns).is_err() {
            self.overflow += 1;
        }
        self.count += 1;
        self.sum_ns += ns as u128;
        self.total_time += ns as f64 * 1e-9;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
    }

    /// Return the sum of all sampled intervals in seconds.
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Return the number of sampled intervals.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Return the mean interval in nanoseconds, or None if nothing was sampled.
    pub fn mean_ns(&self) -> Option<f64> {
        if self.count == 0 {
            None
        }
        else {
            Some(self.sum_ns as f64 / self.count as f64)
        }
    }

    /// Return the most populated bucket as a count and a nanosecond range.
    pub fn peak(&self) -> Option<(u64, RangeInclusive<u64>)> {
        let mut best: Option<Bucket> = None;
        for bucket in self.histogram.into_iter() {
            if bucket.count() > best.as_ref().map(|b| b.count()).unwrap_or(0) {
                best = Some(bucket.clone());
            }
        }
        best.map(|b| (b.count(), b.start()..=b.end()))
    }

    /// Estimate the nominal data rate from the mean transition interval, assuming the transition
    /// density of random MFM data.
    pub fn estimate_rate(&self) -> Option<TrackDataRate> {
        let mean = self.mean_ns()?;
        if mean <= 0.0 {
            return None;
        }
        let cell_ns = mean / AVERAGE_FLUX_DENSITY;
        let rate = (1e9 / (cell_ns * 2.0)).round() as u32;
        log::debug!(
            "FluxHistogram::estimate_rate(): mean interval {:.1}ns, cell {:.1}ns, rate {}",
            mean,
            cell_ns,
            rate
        );
        Some(TrackDataRate::from(rate))
    }

    pub fn stats(&self) -> HistogramStats {
        let (peak_count, peak_start, peak_end) = match self.peak() {
            Some((count, range)) => (count, *range.start(), *range.end()),
            None => (0, 0, 0),
        };
        HistogramStats {
            total: self.count,
            min_ns: if self.count == 0 { 0 } else { self.min_ns },
            max_ns: self.max_ns,
            mean_ns: self.mean_ns().unwrap_or(0.0),
            peak_start,
            peak_end,
            peak_count,
            overflow: self.overflow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mfm_like() -> FluxHistogram {
        let mut hist = FluxHistogram::new().unwrap();
        // 50% 2 cell, 37.5% 3 cell, 12.5% 4 cell at a 2us cell
        for _ in 0..400 {
            hist.add_interval_ns(4000);
        }
        for _ in 0..300 {
            hist.add_interval_ns(6000);
        }
        for _ in 0..100 {
            hist.add_interval_ns(8000);
        }
        hist
    }

    #[test]
    fn test_histogram_stats() {
        let mut hist = mfm_like();
        hist.add_interval_ns(100_000);

        let stats = hist.stats();
        assert_eq!(stats.total, 801);
        assert_eq!(stats.min_ns, 4000);
        assert_eq!(stats.max_ns, 100_000);
        assert_eq!(stats.overflow, 1);
        assert_eq!(stats.peak_count, 400);
        assert!(stats.peak_start <= 4000 && stats.peak_end >= 4000);
    }

    #[test]
    fn test_estimate_rate() {
        let hist = mfm_like();
        // mean is 5.25us, close to the random data density at 250Kbps
        assert!(matches!(hist.estimate_rate(), Some(TrackDataRate::Rate250Kbps(_))));

        let empty = FluxHistogram::new().unwrap();
        assert!(empty.estimate_rate().is_none());
        assert_eq!(empty.stats(), HistogramStats::default());
    }
}

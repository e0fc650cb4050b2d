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

    src/flux/mod.rs

    Flux capture model, interval statistics and bit clock recovery.
*/
use std::{
    fmt,
    fmt::{Display, Formatter},
};

mod capture;
pub mod histogram;
pub mod pll;

pub use capture::{FluxCapture, FluxEvent, RevolutionStats, DEFAULT_TICK_NS};
pub use histogram::{FluxHistogram, HistogramStats};
pub use pll::{BandwidthMode, MarginZone, Pll, PllConfig, PllGains, PllDecodeResult, PllState, PllStep, RecoveredBit, RecoveredBits};

/// The average number of bit cells per flux transition for random MFM data.
pub const AVERAGE_FLUX_DENSITY: f64 = 2.636;

#[doc(hidden)]
#[macro_export]
macro_rules! format_us {
    ($value:expr) => {
        format!("{:.4}μs", $value * 1_000_000.0)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! format_ms {
    ($value:expr) => {
        format!("{:.4}ms", $value * 1_000.0)
    };
}

/// Classification of a flux interval by the number of bit cells it spans.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FluxTransition {
    Short,
    Medium,
    Long,
    Other,
}

impl Display for FluxTransition {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FluxTransition::Short => write!(f, "S"),
            FluxTransition::Medium => write!(f, "M"),
            FluxTransition::Long => write!(f, "L"),
            FluxTransition::Other => write!(f, "X"),
        }
    }
}

impl From<u32> for FluxTransition {
    /// Classify a transition by its length in bit cells, as counted by the PLL.
    fn from(cells: u32) -> Self {
        match cells {
            2 => FluxTransition::Short,
            3 => FluxTransition::Medium,
            4 => FluxTransition::Long,
            _ => FluxTransition::Other,
        }
    }
}

/// Statistics gathered by the PLL over one decode. Transition categories are counted in bit
/// cells, so `short`, `medium` and `long` correspond to the 2, 3 and 4 cell MFM intervals.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxStats {
    pub total: u32,
    pub short: u32,
    pub medium: u32,
    pub long: u32,
    pub too_short: u32,
    pub too_long: u32,

    pub shortest_flux: f64,
    pub longest_flux:  f64,
}

impl Display for FluxStats {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Total: {} S: {} M: {} L: {} Shortest: {} Longest: {} Too Short: {} Too Long: {}",
            self.total,
            self.short,
            self.medium,
            self.long,
            format_us!(self.shortest_flux),
            format_us!(self.longest_flux),
            self.too_short,
            self.too_long
        )
    }
}

impl FluxStats {
    /// Update the statistics with one interval (in seconds) that the PLL resolved to `cells`
    /// bit cells.
    pub fn record(&mut self, delta: f64, cells: u32) {
        if self.total == 0 {
            self.shortest_flux = delta;
            self.longest_flux = delta;
        }
        else {
            self.shortest_flux = delta.min(self.shortest_flux);
            self.longest_flux = delta.max(self.longest_flux);
        }
        self.total += 1;

        match FluxTransition::from(cells) {
            FluxTransition::Short => self.short += 1,
            FluxTransition::Medium => self.medium += 1,
            FluxTransition::Long => self.long += 1,
            FluxTransition::Other => {
                if cells < 2 {
                    self.too_short += 1;
                }
                else {
                    self.too_long += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flux_stats_record() {
        let mut stats = FluxStats::default();
        stats.record(4.0e-6, 2);
        stats.record(6.0e-6, 3);
        stats.record(8.0e-6, 4);
        stats.record(2.0e-6, 1);
        stats.record(12.0e-6, 6);

        assert_eq!(stats.total, 5);
        assert_eq!((stats.short, stats.medium, stats.long), (1, 1, 1));
        assert_eq!((stats.too_short, stats.too_long), (1, 1));
        assert_eq!(stats.shortest_flux, 2.0e-6);
        assert_eq!(stats.longest_flux, 12.0e-6);
    }
}

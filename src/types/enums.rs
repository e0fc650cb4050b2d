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

    enums.rs

    Defines common enum types
*/
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// The line code used to record a track.
///
/// Historical controllers used a number of self-clocking and group codes. The
/// clocked codes (FM, MFM, M2FM) insert clock cells between data cells; the
/// group codes (GCR variants, RLL(2,7)) map groups of data bits to longer code
/// words with bounded run lengths.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackDataEncoding {
    #[default]
    #[doc = "Modified Frequency Modulation. Used by almost all 5.25&quot; and 3.5&quot; diskettes and ST-506 hard disks."]
    Mfm,
    #[doc = "Frequency Modulation. Used by older 8&quot; diskettes."]
    Fm,
    #[doc = "FM with the TRS-80 (Tandy) data address mark set."]
    TandyFm,
    #[doc = "Modified MFM, used by Intel MDS and some DEC 8&quot; systems."]
    M2fm,
    #[doc = "Commodore 4-to-5 Group Code Recording."]
    GcrCbm,
    #[doc = "Apple II 6-and-2 Group Code Recording."]
    GcrApple6,
    #[doc = "Agat 6-and-2 Group Code Recording with Agat address prologues."]
    Agat,
    #[doc = "IBM Run Length Limited (2,7), used by RLL hard disk controllers."]
    Rll27,
}

impl TrackDataEncoding {
    /// Return the number of bit cells that encode a single symbol.
    pub fn cells_per_symbol(&self) -> usize {
        use TrackDataEncoding::*;
        match self {
            Mfm | Fm | TandyFm | M2fm | Rll27 => 16,
            GcrCbm => 10,
            GcrApple6 | Agat => 8,
        }
    }

    /// Return true if this encoding is a Group Code Recording variant.
    pub fn is_gcr(&self) -> bool {
        matches!(
            self,
            TrackDataEncoding::GcrCbm | TrackDataEncoding::GcrApple6 | TrackDataEncoding::Agat
        )
    }

    /// Return true if this encoding records an FM-style clock on every bit.
    pub fn is_fm(&self) -> bool {
        matches!(self, TrackDataEncoding::Fm | TrackDataEncoding::TandyFm)
    }

    /// Some encodings are refinements of another and are only ever reported in place of
    /// their base encoding. Returns the base encoding for such variants.
    pub fn refines(&self) -> Option<TrackDataEncoding> {
        match self {
            TrackDataEncoding::TandyFm => Some(TrackDataEncoding::Fm),
            _ => None,
        }
    }
}

impl Display for TrackDataEncoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        use TrackDataEncoding::*;
        match self {
            Mfm => write!(f, "MFM"),
            Fm => write!(f, "FM"),
            TandyFm => write!(f, "Tandy FM"),
            M2fm => write!(f, "M2FM"),
            GcrCbm => write!(f, "GCR (Commodore)"),
            GcrApple6 => write!(f, "GCR (Apple 6&2)"),
            Agat => write!(f, "GCR (Agat)"),
            Rll27 => write!(f, "RLL(2,7)"),
        }
    }
}

/// The physical form factor of the media or mechanism.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskPhysicalDimensions {
    #[doc = "An 8\" Diskette"]
    Dimension8,
    #[default]
    #[doc = "A 5.25\" Diskette"]
    Dimension5_25,
    #[doc = "A 3.5\" Diskette"]
    Dimension3_5,
    #[doc = "A fixed (hard) disk"]
    FixedDisk,
}

impl Display for DiskPhysicalDimensions {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DiskPhysicalDimensions::Dimension8 => write!(f, "8\""),
            DiskPhysicalDimensions::Dimension5_25 => write!(f, "5.25\""),
            DiskPhysicalDimensions::Dimension3_5 => write!(f, "3.5\""),
            DiskPhysicalDimensions::FixedDisk => write!(f, "Fixed disk"),
        }
    }
}

/// The density of data recording on a disk track.
///
/// * `Standard` density: typically referring to FM encoding, typically used by 8" diskettes.
/// * `Double` density: typically referring to MFM encoding at 250/300Kbps.
/// * `High` density: typically referring to MFM encoding at 500Kbps.
/// * `Extended` density: typically referring to MFM encoding at 1Mbps.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackDensity {
    Standard,
    #[default]
    Double,
    High,
    Extended,
}

impl From<TrackDataRate> for TrackDensity {
    fn from(rate: TrackDataRate) -> Self {
        use TrackDataRate::*;
        match rate {
            Rate250Kbps(_) => TrackDensity::Double,
            Rate300Kbps(_) => TrackDensity::Double,
            Rate500Kbps(_) => TrackDensity::High,
            Rate1000Kbps(_) => TrackDensity::Extended,
            Rate5Mbps(_) => TrackDensity::Double,
            Rate7_5Mbps(_) => TrackDensity::High,
            Rate10Mbps(_) | Rate15Mbps(_) => TrackDensity::Extended,
            RateNonstandard(_) => TrackDensity::Double,
        }
    }
}

impl Display for TrackDensity {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        use TrackDensity::*;
        match self {
            Standard => write!(f, "Standard"),
            Double => write!(f, "Double"),
            High => write!(f, "High"),
            Extended => write!(f, "Extended"),
        }
    }
}

/// TrackDataRate defines the nominal controller data rate. For the clocked codes this is half
/// the bit cell rate.
/// A clock adjustment factor is stored to make possible calculation of the exact data rate.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackDataRate {
    RateNonstandard(u32),
    Rate250Kbps(f64),
    Rate300Kbps(f64),
    Rate500Kbps(f64),
    Rate1000Kbps(f64),
    Rate5Mbps(f64),
    Rate7_5Mbps(f64),
    Rate10Mbps(f64),
    Rate15Mbps(f64),
}

impl Default for TrackDataRate {
    fn default() -> Self {
        TrackDataRate::Rate250Kbps(1.0)
    }
}

impl From<TrackDataRate> for u32 {
    fn from(rate: TrackDataRate) -> Self {
        use TrackDataRate::*;
        match rate {
            Rate250Kbps(f) => (250_000.0 * f) as u32,
            Rate300Kbps(f) => (300_000.0 * f) as u32,
            Rate500Kbps(f) => (500_000.0 * f) as u32,
            Rate1000Kbps(f) => (1_000_000.0 * f) as u32,
            Rate5Mbps(f) => (5_000_000.0 * f) as u32,
            Rate7_5Mbps(f) => (7_500_000.0 * f) as u32,
            Rate10Mbps(f) => (10_000_000.0 * f) as u32,
            Rate15Mbps(f) => (15_000_000.0 * f) as u32,
            RateNonstandard(rate) => rate,
        }
    }
}

/// Implement a conversion from a u32 to a TrackDataRate.
/// An 8-15% rate deviance is allowed for standard rates, otherwise a RateNonstandard is returned.
impl From<u32> for TrackDataRate {
    fn from(rate: u32) -> Self {
        use TrackDataRate::*;
        match rate {
            212_000..271_000 => Rate250Kbps(rate as f64 / 250_000.0),
            271_000..345_000 => Rate300Kbps(rate as f64 / 300_000.0),
            425_000..575_000 => Rate500Kbps(rate as f64 / 500_000.0),
            850_000..1_150_000 => Rate1000Kbps(rate as f64 / 1_000_000.0),
            4_250_000..6_250_000 => Rate5Mbps(rate as f64 / 5_000_000.0),
            6_250_000..8_750_000 => Rate7_5Mbps(rate as f64 / 7_500_000.0),
            8_750_000..12_500_000 => Rate10Mbps(rate as f64 / 10_000_000.0),
            12_500_000..17_250_000 => Rate15Mbps(rate as f64 / 15_000_000.0),
            _ => RateNonstandard(rate),
        }
    }
}

impl Display for TrackDataRate {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        use TrackDataRate::*;
        match self {
            RateNonstandard(rate) => write!(fmt, "*{}Kbps", rate / 1000),
            Rate250Kbps(f) => write!(fmt, "250Kbps (x{:.2})", f),
            Rate300Kbps(f) => write!(fmt, "300Kbps (x{:.2})", f),
            Rate500Kbps(f) => write!(fmt, "500Kbps (x{:.2})", f),
            Rate1000Kbps(f) => write!(fmt, "1000Kbps (x{:.2})", f),
            Rate5Mbps(f) => write!(fmt, "5Mbps (x{:.2})", f),
            Rate7_5Mbps(f) => write!(fmt, "7.5Mbps (x{:.2})", f),
            Rate10Mbps(f) => write!(fmt, "10Mbps (x{:.2})", f),
            Rate15Mbps(f) => write!(fmt, "15Mbps (x{:.2})", f),
        }
    }
}

impl TrackDataRate {
    /// Retrieve the adjustment factor for this [TrackDataRate].
    pub fn factor(&self) -> f64 {
        use TrackDataRate::*;
        match *self {
            Rate250Kbps(f) | Rate300Kbps(f) | Rate500Kbps(f) | Rate1000Kbps(f) => f,
            Rate5Mbps(f) | Rate7_5Mbps(f) | Rate10Mbps(f) | Rate15Mbps(f) => f,
            RateNonstandard(_) => 1.0,
        }
    }

    /// Return the same rate class with an adjustment factor of 1.0.
    pub fn nominal(&self) -> TrackDataRate {
        use TrackDataRate::*;
        match *self {
            Rate250Kbps(_) => Rate250Kbps(1.0),
            Rate300Kbps(_) => Rate300Kbps(1.0),
            Rate500Kbps(_) => Rate500Kbps(1.0),
            Rate1000Kbps(_) => Rate1000Kbps(1.0),
            Rate5Mbps(_) => Rate5Mbps(1.0),
            Rate7_5Mbps(_) => Rate7_5Mbps(1.0),
            Rate10Mbps(_) => Rate10Mbps(1.0),
            Rate15Mbps(_) => Rate15Mbps(1.0),
            RateNonstandard(r) => RateNonstandard(r),
        }
    }

    /// Return true if this is one of the hard disk interface rates.
    pub fn is_fixed_disk(&self) -> bool {
        use TrackDataRate::*;
        matches!(self, Rate5Mbps(_) | Rate7_5Mbps(_) | Rate10Mbps(_) | Rate15Mbps(_))
    }

    /// Return the bit cell period for this rate in seconds. The bit cell rate is twice the
    /// data rate.
    pub fn cell_period(&self) -> f64 {
        let rate = u32::from(*self).max(1) as f64;
        1.0 / (rate * 2.0)
    }
}

/// The number of tracks physically recorded on a disk surface.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackCount {
    Tracks40,
    Tracks77,
    #[default]
    Tracks80,
}

impl Display for TrackCount {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TrackCount::Tracks40 => write!(f, "40 tracks"),
            TrackCount::Tracks77 => write!(f, "77 tracks"),
            TrackCount::Tracks80 => write!(f, "80 tracks"),
        }
    }
}

/// The signaling convention of the drive interface a capture was taken from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskInterface {
    #[default]
    #[doc = "Single-ended floppy drive interface"]
    Floppy,
    #[doc = "ST-506/ST-412 hard disk interface with a differential read data pair"]
    St506,
    #[doc = "ESDI hard disk interface with differential read data and clock pairs"]
    Esdi,
}

impl Display for DiskInterface {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DiskInterface::Floppy => write!(f, "Floppy"),
            DiskInterface::St506 => write!(f, "ST-506"),
            DiskInterface::Esdi => write!(f, "ESDI"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_rate_from_u32() {
        assert!(matches!(TrackDataRate::from(250_000), TrackDataRate::Rate250Kbps(_)));
        assert!(matches!(TrackDataRate::from(295_000), TrackDataRate::Rate300Kbps(_)));
        assert!(matches!(TrackDataRate::from(10_200_000), TrackDataRate::Rate10Mbps(_)));
        assert!(matches!(TrackDataRate::from(2_000_000), TrackDataRate::RateNonstandard(_)));
    }

    #[test]
    fn test_cell_period() {
        let period = TrackDataRate::Rate250Kbps(1.0).cell_period();
        assert!((period - 2.0e-6).abs() < 1e-12);
    }

    #[test]
    fn test_encoding_refinement() {
        for encoding in TrackDataEncoding::iter() {
            if let Some(base) = encoding.refines() {
                assert!(base.refines().is_none());
                assert_eq!(base.cells_per_symbol(), encoding.cells_per_symbol());
            }
        }
    }
}

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

//! RPM (Revolutions Per Minute) related types and functions.

use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// The default fractional tolerance used when classifying an index period.
pub const DEFAULT_RPM_TOLERANCE: f64 = 0.08;

/// A [DiskRpm] represents the physical rotation rate of a disk within a drive
/// context.
/// The most common rotation rate used for floppy disks is 300RPM, but this was
/// not universal.
///
/// The most common variant is the 360RPM used by the IBM PC's 5.25" high
/// density floppy drives, even when reading DD disks, and by 8" drives.
///
/// Fixed disks on the ST-506 and ESDI interfaces spin at 3600RPM.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskRpm {
    /// A 300 RPM base rotation rate.
    Rpm300(f64),
    /// A 360 RPM base rotation rate.
    Rpm360(f64),
    /// A 3600 RPM base rotation rate (fixed disks).
    Rpm3600(f64),
}

impl From<DiskRpm> for f64 {
    /// Convert a DiskRpm to a floating-point RPM value.
    fn from(rpm: DiskRpm) -> Self {
        use DiskRpm::*;
        match rpm {
            Rpm300(f) => 300.0 * f,
            Rpm360(f) => 360.0 * f,
            Rpm3600(f) => 3600.0 * f,
        }
    }
}

impl Default for DiskRpm {
    fn default() -> Self {
        DiskRpm::Rpm300(1.0)
    }
}

impl Display for DiskRpm {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        let f = self.factor();
        let f_str = if f == 1.0 {
            "".to_string()
        }
        else if f > 1.0 {
            format!(" +{:.3}%", (f - 1.0) * 100.0)
        }
        else {
            format!(" -{:.3}%", (1.0 - f) * 100.0)
        };
        match self {
            DiskRpm::Rpm300(_) => write!(fmt, "300RPM{}", f_str),
            DiskRpm::Rpm360(_) => write!(fmt, "360RPM{}", f_str),
            DiskRpm::Rpm3600(_) => write!(fmt, "3600RPM{}", f_str),
        }
    }
}

impl DiskRpm {
    /// Retrieve the adjustment factor for this [DiskRpm].
    pub fn factor(&self) -> f64 {
        match *self {
            DiskRpm::Rpm300(f) => f,
            DiskRpm::Rpm360(f) => f,
            DiskRpm::Rpm3600(f) => f,
        }
    }

    /// Return the same speed class with an adjustment factor of 1.0.
    pub fn nominal(&self) -> DiskRpm {
        match self {
            DiskRpm::Rpm300(_) => DiskRpm::Rpm300(1.0),
            DiskRpm::Rpm360(_) => DiskRpm::Rpm360(1.0),
            DiskRpm::Rpm3600(_) => DiskRpm::Rpm3600(1.0),
        }
    }

    /// Try to calculate a [DiskRpm] from the time between index pulses in seconds.
    /// `tolerance` is the accepted fractional deviation from each nominal class.
    /// Returns None if the period falls outside every class window.
    pub fn try_from_index_time(time: f64, tolerance: f64) -> Option<DiskRpm> {
        if time <= 0.0 {
            return None;
        }
        let rpm = 60.0 / time;
        let within = |nominal: f64| (rpm / nominal - 1.0).abs() <= tolerance;

        // 300 and 360 windows only meet at tolerances above 9%, check the nearer class first.
        if within(300.0) && (rpm < 330.0 || !within(360.0)) {
            Some(DiskRpm::Rpm300(rpm / 300.0))
        }
        else if within(360.0) {
            Some(DiskRpm::Rpm360(rpm / 360.0))
        }
        else if within(3600.0) {
            Some(DiskRpm::Rpm3600(rpm / 3600.0))
        }
        else {
            None
        }
    }

    /// Convert a [DiskRpm] to an index time in seconds.
    pub fn index_time(&self) -> f64 {
        60.0 / f64::from(*self)
    }

    /// Adjust a bit cell period for media read in this drive. Double density media written at
    /// 300RPM and read in a 360RPM drive arrives 20% faster.
    #[inline]
    pub fn adjust_clock(&self, base_clock: f64) -> f64 {
        // Assume a base clock of 1.5us or greater is a double density disk.
        if matches!(self, DiskRpm::Rpm360(_)) && base_clock >= 1.5e-6 {
            base_clock * (300.0 / 360.0)
        }
        else {
            base_clock
        }
    }

    /// Calculate the rotation rate from an index period measured in capture ticks.
    pub fn calculate(index_ticks: u64, tick_ns: f64) -> Option<f64> {
        if index_ticks == 0 || tick_ns <= 0.0 {
            return None;
        }
        Some(60.0 / (index_ticks as f64 * tick_ns * 1e-9))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_classes() {
        assert!(matches!(
            DiskRpm::try_from_index_time(0.200, DEFAULT_RPM_TOLERANCE),
            Some(DiskRpm::Rpm300(_))
        ));
        assert!(matches!(
            DiskRpm::try_from_index_time(0.1667, DEFAULT_RPM_TOLERANCE),
            Some(DiskRpm::Rpm360(_))
        ));
        assert!(matches!(
            DiskRpm::try_from_index_time(0.01667, DEFAULT_RPM_TOLERANCE),
            Some(DiskRpm::Rpm3600(_))
        ));
        assert!(DiskRpm::try_from_index_time(0.100, DEFAULT_RPM_TOLERANCE).is_none());
        assert!(DiskRpm::try_from_index_time(0.0, DEFAULT_RPM_TOLERANCE).is_none());
    }

    #[test]
    fn test_adjust_clock() {
        let clock = DiskRpm::Rpm360(1.0).adjust_clock(2.0e-6);
        assert!((clock - 1.6667e-6).abs() < 1e-9);
        assert_eq!(DiskRpm::Rpm360(1.0).adjust_clock(1.0e-6), 1.0e-6);
        assert_eq!(DiskRpm::Rpm300(1.0).adjust_clock(2.0e-6), 2.0e-6);
    }

    #[test]
    fn test_calculate() {
        // 200ms at 5ns per tick.
        let rpm = DiskRpm::calculate(40_000_000, 5.0).unwrap();
        assert!((rpm - 300.0).abs() < 0.001);
        assert!(DiskRpm::calculate(0, 5.0).is_none());
    }
}

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

    src/detect/profiler.rs

    Aggregates rotation, data rate, encoding, signaling and track density evidence into a
    DriveProfile.
*/
use crate::{
    detect::classifier::Classification,
    flux::{FluxCapture, FluxHistogram},
    types::{
        DiskInterface,
        DiskPhysicalDimensions,
        DiskRpm,
        SignalLines,
        TrackCount,
        TrackDataEncoding,
        TrackDataRate,
        TrackDensity,
        DEFAULT_RPM_TOLERANCE,
    },
    RecoveryError,
};
use std::fmt::{self, Display, Formatter};

pub const DEFAULT_MIN_INDEX_PERIODS: usize = 2;
pub const DEFAULT_MIN_TRACK_SAMPLES: usize = 3;
pub const DEFAULT_MIN_SIGNAL_SAMPLES: usize = 1;
pub const DEFAULT_MIN_FLUX_COUNT: u64 = 1000;
/// Index periods shorter than this fraction of a 360RPM revolution are sector holes.
pub const HARD_SECTOR_RATIO: f64 = 0.5;
/// Accepted deviation of an index hole pair from one sector period.
pub const INDEX_PAIR_TOLERANCE: f64 = 0.2;
/// Accepted deviation of an estimated data rate from its nominal class.
pub const DATA_RATE_TOLERANCE: f64 = 0.15;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProfilerConfig {
    pub rpm_tolerance: f64,
    pub min_index_periods: usize,
    /// Number of (physical, decoded) cylinder pairs needed to judge track density.
    pub min_track_samples: usize,
    pub min_signal_samples: usize,
    pub min_flux_count: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            rpm_tolerance: DEFAULT_RPM_TOLERANCE,
            min_index_periods: DEFAULT_MIN_INDEX_PERIODS,
            min_track_samples: DEFAULT_MIN_TRACK_SAMPLES,
            min_signal_samples: DEFAULT_MIN_SIGNAL_SAMPLES,
            min_flux_count: DEFAULT_MIN_FLUX_COUNT,
        }
    }
}

/// A single profiling conclusion with a confidence from 0 to 255. A sub-score exists only
/// once enough evidence has been observed.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubScore<T> {
    pub value: T,
    pub confidence: u8,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RotationEvidence {
    pub rpm: DiskRpm,
    pub hard_sectored: bool,
    /// Number of sector holes per revolution, for hard-sectored media.
    pub sector_holes: Option<u32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StepEvidence {
    /// Decoded cylinders match the physical step count.
    Native,
    /// Decoded cylinders are half the physical step count.
    DoubleStep,
}

/// A summary of the drive and media a set of captures was taken from.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriveProfile {
    pub form_factor: DiskPhysicalDimensions,
    pub density_class: TrackDensity,
    pub track_density: TrackCount,
    pub rpm_class: DiskRpm,
    pub encoding: TrackDataEncoding,
    pub data_rate: TrackDataRate,
    pub hard_sectored: bool,
    /// Mean confidence of all contributing sub-scores.
    pub quality_score: u8,
    pub interface: DiskInterface,
    /// The media requires double stepping in the capturing drive.
    pub double_step: bool,
    /// The profile was supplied by the caller rather than detected.
    pub forced: bool,
}

impl Display for DriveProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}{}{} q:{}{}",
            self.form_factor,
            self.interface,
            self.rpm_class,
            self.encoding,
            self.data_rate,
            self.track_density,
            if self.double_step { " (double step)" } else { "" },
            if self.hard_sectored { " hard-sectored" } else { "" },
            self.quality_score,
            if self.forced { " [forced]" } else { "" }
        )
    }
}

/// Collects evidence about a drive and its media and publishes a [DriveProfile] once every
/// sub-score is valid. A published profile does not change until [InterfaceProfiler::reset].
#[derive(Clone, Debug, Default)]
pub struct InterfaceProfiler {
    config: ProfilerConfig,
    index_periods: Vec<f64>,
    differential_counts: Vec<u32>,
    track_samples: Vec<(u16, u16)>,
    rotation: Option<SubScore<RotationEvidence>>,
    data_rate: Option<SubScore<TrackDataRate>>,
    encoding: Option<SubScore<TrackDataEncoding>>,
    interface: Option<SubScore<DiskInterface>>,
    steps: Option<SubScore<StepEvidence>>,
    profile: Option<DriveProfile>,
}

impl InterfaceProfiler {
    pub fn new(config: ProfilerConfig) -> Result<Self, RecoveryError> {
        if !(config.rpm_tolerance > 0.0 && config.rpm_tolerance < 0.5) {
            return Err(RecoveryError::ParameterError(format!(
                "ProfilerConfig: rpm tolerance {} out of range",
                config.rpm_tolerance
            )));
        }
        if config.min_index_periods == 0 || config.min_track_samples == 0 || config.min_signal_samples == 0 {
            return Err(RecoveryError::ParameterError(
                "ProfilerConfig: sample minimums must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            config,
            ..Default::default()
        })
    }

    pub fn rotation(&self) -> Option<&SubScore<RotationEvidence>> {
        self.rotation.as_ref()
    }

    pub fn data_rate(&self) -> Option<&SubScore<TrackDataRate>> {
        self.data_rate.as_ref()
    }

    pub fn encoding(&self) -> Option<&SubScore<TrackDataEncoding>> {
        self.encoding.as_ref()
    }

    pub fn interface(&self) -> Option<&SubScore<DiskInterface>> {
        self.interface.as_ref()
    }

    pub fn steps(&self) -> Option<&SubScore<StepEvidence>> {
        self.steps.as_ref()
    }

    /// Observe the time between successive index pulses, in seconds.
    pub fn observe_index_periods(&mut self, periods: &[f64]) {
        self.index_periods
            .extend(periods.iter().copied().filter(|p| p.is_finite() && *p > 0.0));
        self.rotation = self.evaluate_rotation();
        self.try_publish();
    }

    /// Observe the index periods and flux intervals of a capture.
    pub fn observe_capture(&mut self, capture: &FluxCapture) -> Result<(), RecoveryError> {
        let histogram = FluxHistogram::from_capture(capture, 1.0)?;
        self.observe_index_periods(&capture.index_periods());
        self.observe_histogram(&histogram);
        Ok(())
    }

    /// Observe the flux interval distribution of a track.
    pub fn observe_histogram(&mut self, histogram: &FluxHistogram) {
        if histogram.count() < self.config.min_flux_count {
            log::debug!(
                "InterfaceProfiler::observe_histogram(): {} transitions, {} required",
                histogram.count(),
                self.config.min_flux_count
            );
            return;
        }

        match histogram.estimate_rate() {
            Some(TrackDataRate::RateNonstandard(rate)) => {
                log::warn!("InterfaceProfiler::observe_histogram(): nonstandard data rate {}", rate);
            }
            Some(rate) => {
                let deviation = (rate.factor() - 1.0).abs() / DATA_RATE_TOLERANCE;
                self.data_rate = Some(SubScore {
                    value: rate,
                    confidence: scale_confidence(1.0 - deviation),
                });
                self.try_publish();
            }
            None => {}
        }
    }

    /// Observe the result of encoding classification.
    pub fn observe_classification(&mut self, classification: &Classification) {
        self.encoding = Some(SubScore {
            value: classification.encoding,
            confidence: classification.confidence,
        });
        self.try_publish();
    }

    /// Observe which interface lines were driven differentially during a capture.
    pub fn observe_signal_lines(&mut self, lines: SignalLines) {
        self.differential_counts.push(lines.differential_count());

        if self.differential_counts.len() >= self.config.min_signal_samples {
            let mut sorted = self.differential_counts.clone();
            sorted.sort_unstable();
            let median = sorted[sorted.len() / 2];
            let interface = match median {
                0 => DiskInterface::Floppy,
                1 => DiskInterface::St506,
                _ => DiskInterface::Esdi,
            };
            let agree = sorted
                .iter()
                .filter(|&&c| (c.min(2)) == median.min(2))
                .count();
            self.interface = Some(SubScore {
                value: interface,
                confidence: scale_confidence(agree as f64 / sorted.len() as f64),
            });
        }
        self.try_publish();
    }

    /// Observe the cylinder number decoded from a sector ID after stepping the head to a
    /// physical cylinder.
    pub fn observe_track(&mut self, physical: u16, decoded: u16) {
        // Cylinder 0 matches under every stepping ratio.
        if physical == 0 {
            return;
        }
        self.track_samples.push((physical, decoded));

        let native = self.track_samples.iter().filter(|(p, d)| p == d).count();
        let double = self
            .track_samples
            .iter()
            .filter(|(p, d)| *p == d.saturating_mul(2) || *p == d.saturating_mul(2).saturating_add(1))
            .count();
        let total = self.track_samples.len();

        let (value, count) = if double > native {
            (StepEvidence::DoubleStep, double)
        }
        else {
            (StepEvidence::Native, native)
        };

        self.steps = if count >= self.config.min_track_samples {
            Some(SubScore {
                value,
                confidence: scale_confidence(count as f64 / total as f64),
            })
        }
        else {
            None
        };
        self.try_publish();
    }

    /// Publish a caller-supplied profile immediately, replacing any detected profile.
    pub fn force_personality(&mut self, profile: DriveProfile) {
        log::debug!("InterfaceProfiler::force_personality(): {}", profile);
        self.profile = Some(DriveProfile {
            forced: true,
            quality_score: u8::MAX,
            ..profile
        });
    }

    /// Return the published profile, or None if it is not yet available.
    pub fn profile(&self) -> Option<&DriveProfile> {
        self.profile.as_ref()
    }

    pub fn reset(&mut self) {
        *self = Self {
            config: self.config.clone(),
            ..Default::default()
        };
    }

    fn evaluate_rotation(&self) -> Option<SubScore<RotationEvidence>> {
        if self.index_periods.len() < self.config.min_index_periods {
            return None;
        }
        let tolerance = self.config.rpm_tolerance;

        if let Some((revolution, holes)) = hard_sector_revolution(&self.index_periods) {
            let rpm = DiskRpm::try_from_index_time(revolution, tolerance)?;
            log::debug!(
                "InterfaceProfiler::evaluate_rotation(): hard-sectored media, {} holes, {}",
                holes,
                rpm
            );
            return Some(SubScore {
                value: RotationEvidence {
                    rpm,
                    hard_sectored: true,
                    sector_holes: Some(holes),
                },
                confidence: rpm_confidence(rpm, tolerance),
            });
        }

        // Every period must fall into the same speed class.
        let first = DiskRpm::try_from_index_time(self.index_periods[0], tolerance)?.nominal();
        for period in self.index_periods.iter() {
            let rpm = DiskRpm::try_from_index_time(*period, tolerance)?;
            if rpm.nominal() != first {
                log::warn!(
                    "InterfaceProfiler::evaluate_rotation(): inconsistent rotation rates {} and {}",
                    first,
                    rpm
                );
                return None;
            }
        }

        let mean = self.index_periods.iter().sum::<f64>() / self.index_periods.len() as f64;
        let rpm = DiskRpm::try_from_index_time(mean, tolerance)?;
        Some(SubScore {
            value: RotationEvidence {
                rpm,
                hard_sectored: false,
                sector_holes: None,
            },
            confidence: rpm_confidence(rpm, tolerance),
        })
    }

    fn try_publish(&mut self) {
        if self.profile.is_some() {
            return;
        }

        let (Some(rotation), Some(data_rate), Some(encoding), Some(interface), Some(steps)) =
            (self.rotation, self.data_rate, self.encoding, self.interface, self.steps)
        else {
            return;
        };

        let rpm = rotation.value.rpm;
        let form_factor = if encoding.value.is_gcr() {
            DiskPhysicalDimensions::Dimension5_25
        }
        else if matches!(rpm, DiskRpm::Rpm3600(_)) || data_rate.value.is_fixed_disk() {
            DiskPhysicalDimensions::FixedDisk
        }
        else if matches!(rpm, DiskRpm::Rpm360(_))
            && (interface.value == DiskInterface::Esdi || encoding.value.is_fm())
        {
            DiskPhysicalDimensions::Dimension8
        }
        else if matches!(rpm, DiskRpm::Rpm300(_)) && steps.value == StepEvidence::Native {
            DiskPhysicalDimensions::Dimension3_5
        }
        else {
            DiskPhysicalDimensions::Dimension5_25
        };

        let track_density = match (steps.value, form_factor) {
            (StepEvidence::DoubleStep, _) => TrackCount::Tracks40,
            (StepEvidence::Native, DiskPhysicalDimensions::Dimension8) => TrackCount::Tracks77,
            (StepEvidence::Native, _) => TrackCount::Tracks80,
        };

        let density_class = if encoding.value.is_fm() {
            TrackDensity::Standard
        }
        else {
            TrackDensity::from(data_rate.value)
        };

        // A data rate from the other interface family is suspect.
        let mut rate_confidence = data_rate.confidence;
        if data_rate.value.is_fixed_disk() == (interface.value == DiskInterface::Floppy) {
            rate_confidence /= 2;
        }

        let confidences = [
            rotation.confidence,
            rate_confidence,
            encoding.confidence,
            interface.confidence,
            steps.confidence,
        ];
        let quality_score =
            (confidences.iter().map(|&c| c as u32).sum::<u32>() / confidences.len() as u32) as u8;

        let profile = DriveProfile {
            form_factor,
            density_class,
            track_density,
            rpm_class: rpm,
            encoding: encoding.value,
            data_rate: data_rate.value,
            hard_sectored: rotation.value.hard_sectored,
            quality_score,
            interface: interface.value,
            double_step: steps.value == StepEvidence::DoubleStep,
            forced: false,
        };
        log::debug!("InterfaceProfiler::try_publish(): {}", profile);
        self.profile = Some(profile);
    }
}

fn scale_confidence(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn rpm_confidence(rpm: DiskRpm, tolerance: f64) -> u8 {
    scale_confidence(1.0 - (rpm.factor() - 1.0).abs() / tolerance)
}

/// Reconstruct the revolution time of hard-sectored media.
///
/// Hard-sectored media has one hole per sector plus an index hole midway between two sector
/// holes, so the index hole splits one sector period into a pair of half periods. The
/// revolution is the time from one such pair to the next. Returns the revolution time and
/// the number of sector holes, or None if two index pairs cannot be found.
fn hard_sector_revolution(periods: &[f64]) -> Option<(f64, u32)> {
    if periods.len() < 4 {
        return None;
    }
    let mut sorted = periods.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let sector = sorted[sorted.len() / 2];
    if sector >= DiskRpm::Rpm360(1.0).index_time() * HARD_SECTOR_RATIO {
        return None;
    }

    let is_half = |p: f64| p > sector * 0.25 && p < sector * 0.75;
    let pairs: Vec<usize> = periods
        .windows(2)
        .enumerate()
        .filter(|(_, w)| is_half(w[0]) && is_half(w[1]) && ((w[0] + w[1]) / sector - 1.0).abs() <= INDEX_PAIR_TOLERANCE)
        .map(|(i, _)| i)
        .collect();

    let (&first, &second) = (pairs.first()?, pairs.get(1)?);
    let revolution: f64 = periods[first..second].iter().sum();
    Some((revolution, (second - first - 1) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::classifier::EncodingScoreboard;

    fn classification(encoding: TrackDataEncoding) -> Classification {
        Classification {
            encoding,
            confidence: 240,
            was_forced: false,
            scoreboard: EncodingScoreboard::default(),
        }
    }

    fn histogram_for_rate(rate: f64) -> FluxHistogram {
        // Mean interval of random MFM data at this rate.
        let cell_ns = 1e9 / (rate * 2.0);
        let mean = (cell_ns * crate::flux::AVERAGE_FLUX_DENSITY).round() as u64;
        let mut histogram = FluxHistogram::new().unwrap();
        for _ in 0..2000 {
            histogram.add_interval_ns(mean);
        }
        histogram
    }

    #[test]
    fn test_35_profile() {
        let mut profiler = InterfaceProfiler::new(ProfilerConfig::default()).unwrap();
        profiler.observe_index_periods(&[0.2001, 0.1998, 0.2]);
        profiler.observe_histogram(&histogram_for_rate(500_000.0));
        profiler.observe_classification(&classification(TrackDataEncoding::Mfm));
        profiler.observe_signal_lines(SignalLines::empty());
        assert!(profiler.profile().is_none());

        for c in 1..=3 {
            profiler.observe_track(c, c);
        }
        let profile = profiler.profile().unwrap();
        assert_eq!(profile.form_factor, DiskPhysicalDimensions::Dimension3_5);
        assert_eq!(profile.track_density, TrackCount::Tracks80);
        assert_eq!(profile.density_class, TrackDensity::High);
        assert_eq!(profile.interface, DiskInterface::Floppy);
        assert!(matches!(profile.rpm_class, DiskRpm::Rpm300(_)));
        assert!(!profile.double_step);
        assert!(!profile.hard_sectored);
        assert!(!profile.forced);
        assert!(profile.quality_score > 200);
    }

    #[test]
    fn test_8inch_profile() {
        let mut profiler = InterfaceProfiler::new(ProfilerConfig::default()).unwrap();
        profiler.observe_index_periods(&[0.1667, 0.1666]);
        profiler.observe_histogram(&histogram_for_rate(500_000.0));
        profiler.observe_classification(&classification(TrackDataEncoding::Mfm));
        profiler.observe_signal_lines(SignalLines::READ_DATA | SignalLines::READ_CLOCK);
        for c in 10..13 {
            profiler.observe_track(c, c);
        }
        let profile = profiler.profile().unwrap();
        assert_eq!(profile.form_factor, DiskPhysicalDimensions::Dimension8);
        assert_eq!(profile.interface, DiskInterface::Esdi);
        assert_eq!(profile.track_density, TrackCount::Tracks77);
        assert!(matches!(profile.rpm_class, DiskRpm::Rpm360(_)));
    }

    #[test]
    fn test_double_step() {
        let mut profiler = InterfaceProfiler::new(ProfilerConfig::default()).unwrap();
        profiler.observe_index_periods(&[0.2, 0.2]);
        profiler.observe_histogram(&histogram_for_rate(250_000.0));
        profiler.observe_classification(&classification(TrackDataEncoding::Mfm));
        profiler.observe_signal_lines(SignalLines::empty());
        profiler.observe_track(0, 0);
        profiler.observe_track(2, 1);
        profiler.observe_track(4, 2);
        assert!(profiler.profile().is_none());
        profiler.observe_track(9, 4);

        let profile = profiler.profile().unwrap();
        assert!(profile.double_step);
        assert_eq!(profile.track_density, TrackCount::Tracks40);
        assert_eq!(profile.form_factor, DiskPhysicalDimensions::Dimension5_25);
    }

    #[test]
    fn test_hard_sectored() {
        // Ten sectors at 300RPM, index hole midway through a sector.
        let mut periods = Vec::new();
        for _ in 0..2 {
            periods.extend_from_slice(&[0.02; 9]);
            periods.extend_from_slice(&[0.01, 0.01]);
        }
        periods.push(0.02);
        let (revolution, holes) = hard_sector_revolution(&periods).unwrap();
        assert!((revolution - 0.2).abs() < 1e-9);
        assert_eq!(holes, 10);

        let mut profiler = InterfaceProfiler::new(ProfilerConfig::default()).unwrap();
        profiler.observe_index_periods(&periods);
        let rotation = profiler.rotation().unwrap();
        assert!(rotation.value.hard_sectored);
        assert_eq!(rotation.value.sector_holes, Some(10));
        assert!(matches!(rotation.value.rpm, DiskRpm::Rpm300(_)));
    }

    #[test]
    fn test_fixed_disk() {
        let mut profiler = InterfaceProfiler::new(ProfilerConfig::default()).unwrap();
        profiler.observe_index_periods(&[1.0 / 60.0; 4]);
        assert!(!profiler.rotation().unwrap().value.hard_sectored);
        profiler.observe_histogram(&histogram_for_rate(7_500_000.0));
        profiler.observe_classification(&classification(TrackDataEncoding::Rll27));
        profiler.observe_signal_lines(SignalLines::READ_DATA);
        for c in 100..103 {
            profiler.observe_track(c, c);
        }
        let profile = profiler.profile().unwrap();
        assert_eq!(profile.form_factor, DiskPhysicalDimensions::FixedDisk);
        assert_eq!(profile.interface, DiskInterface::St506);
        assert!(matches!(profile.data_rate, TrackDataRate::Rate7_5Mbps(_)));
    }

    #[test]
    fn test_forced_and_reset() {
        let mut profiler = InterfaceProfiler::new(ProfilerConfig::default()).unwrap();
        profiler.observe_index_periods(&[0.2, 0.2]);
        assert!(profiler.profile().is_none());

        let forced = DriveProfile {
            form_factor: DiskPhysicalDimensions::Dimension5_25,
            density_class: TrackDensity::Double,
            track_density: TrackCount::Tracks40,
            rpm_class: DiskRpm::Rpm300(1.0),
            encoding: TrackDataEncoding::GcrApple6,
            data_rate: TrackDataRate::Rate250Kbps(1.0),
            hard_sectored: false,
            quality_score: 0,
            interface: DiskInterface::Floppy,
            double_step: false,
            forced: false,
        };
        profiler.force_personality(forced);
        let profile = profiler.profile().unwrap();
        assert!(profile.forced);
        assert_eq!(profile.encoding, TrackDataEncoding::GcrApple6);
        assert_eq!(profile.quality_score, 255);

        profiler.reset();
        assert!(profiler.profile().is_none());
        assert!(profiler.rotation().is_none());
    }

    #[test]
    fn test_inconsistent_rotation() {
        let mut profiler = InterfaceProfiler::new(ProfilerConfig::default()).unwrap();
        profiler.observe_index_periods(&[0.2, 0.1667]);
        assert!(profiler.rotation().is_none());
    }
}

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

    src/detect/classifier.rs

    Identifies the line code of a recovered bitstream by counting sync mark hits for every
    supported encoding in parallel.
*/
use crate::{
    bitstream_codec::{all_codecs, LineCodec, SyncWindow},
    types::TrackDataEncoding,
    RecoveryError,
};
use bit_vec::BitVec;
use std::fmt::{self, Display, Formatter};
use strum::IntoEnumIterator;

/// A winning encoding must score more than this to be reported.
pub const DEFAULT_SCORE_FLOOR: u32 = 8;
/// A winning encoding must lead the runner-up by at least this much.
pub const DEFAULT_SCORE_MARGIN: u32 = 4;
/// Score value of each decoded field that passed its CRC check.
pub const DEFAULT_CRC_WEIGHT: u32 = 4;
/// Extra hits a refinement encoding needs over its base encoding to replace it.
pub const DEFAULT_REFINE_FLOOR: u32 = 1;
/// Default sample window, in bit cells. Enough for one revolution of a 300RPM DD track.
pub const DEFAULT_SAMPLE_BITS: u64 = 100_000;

/// The extent of the stream sampled before scoring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleWindow {
    /// Score after this many bit cells.
    Bits(u64),
    /// Score after this many index pulses.
    Revolutions(u32),
}

impl Default for SampleWindow {
    fn default() -> Self {
        SampleWindow::Bits(DEFAULT_SAMPLE_BITS)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassifierConfig {
    pub window: SampleWindow,
    pub score_floor: u32,
    pub score_margin: u32,
    pub crc_weight: u32,
    pub refine_floor: u32,
    /// Skip detection and report this encoding.
    pub force_personality: Option<TrackDataEncoding>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            window: SampleWindow::default(),
            score_floor: DEFAULT_SCORE_FLOOR,
            score_margin: DEFAULT_SCORE_MARGIN,
            crc_weight: DEFAULT_CRC_WEIGHT,
            refine_floor: DEFAULT_REFINE_FLOOR,
            force_personality: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClassifierState {
    #[default]
    Idle,
    Sampling,
    Scoring,
    Done,
    Forced,
}

impl Display for ClassifierState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierState::Idle => write!(f, "Idle"),
            ClassifierState::Sampling => write!(f, "Sampling"),
            ClassifierState::Scoring => write!(f, "Scoring"),
            ClassifierState::Done => write!(f, "Done"),
            ClassifierState::Forced => write!(f, "Forced"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncodingScore {
    pub sync_hits: u32,
    pub crc_passes: u32,
}

impl EncodingScore {
    pub fn score(&self, crc_weight: u32) -> u32 {
        self.sync_hits.saturating_add(self.crc_passes.saturating_mul(crc_weight))
    }
}

/// Per-encoding evidence counters. Counters only increase until the scoreboard is cleared.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncodingScoreboard {
    scores: Vec<(TrackDataEncoding, EncodingScore)>,
}

impl Default for EncodingScoreboard {
    fn default() -> Self {
        Self {
            scores: TrackDataEncoding::iter().map(|e| (e, EncodingScore::default())).collect(),
        }
    }
}

impl EncodingScoreboard {
    fn entry(&mut self, encoding: TrackDataEncoding) -> Option<&mut EncodingScore> {
        self.scores.iter_mut().find(|(e, _)| *e == encoding).map(|(_, s)| s)
    }

    pub fn record_hit(&mut self, encoding: TrackDataEncoding) {
        if let Some(score) = self.entry(encoding) {
            score.sync_hits = score.sync_hits.saturating_add(1);
        }
    }

    pub fn record_crc_pass(&mut self, encoding: TrackDataEncoding) {
        if let Some(score) = self.entry(encoding) {
            score.crc_passes = score.crc_passes.saturating_add(1);
        }
    }

    pub fn get(&self, encoding: TrackDataEncoding) -> EncodingScore {
        self.scores
            .iter()
            .find(|(e, _)| *e == encoding)
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TrackDataEncoding, EncodingScore)> {
        self.scores.iter()
    }

    pub fn total_hits(&self) -> u64 {
        self.scores.iter().map(|(_, s)| s.sync_hits as u64).sum()
    }

    pub fn clear(&mut self) {
        for (_, score) in self.scores.iter_mut() {
            *score = EncodingScore::default();
        }
    }
}

/// The result of classifying a stream.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Classification {
    pub encoding: TrackDataEncoding,
    /// 255 for a forced or unopposed result, falling with the runner-up's score.
    pub confidence: u8,
    pub was_forced: bool,
    pub scoreboard: EncodingScoreboard,
}

/// Runs the sync detector of every supported codec over a bitstream and decides which
/// encoding it was recorded with.
///
/// ```text
/// Idle -> Sampling -> Scoring -> Done
///      \-> Forced
/// ```
///
/// Refinement encodings (see [TrackDataEncoding::refines]) recognize a superset of their base
/// encoding's marks, so they do not compete for first place. A refinement replaces a winning
/// base encoding only when it has collected at least `refine_floor` hits more than the base.
pub struct EncodingClassifier {
    config: ClassifierConfig,
    state: ClassifierState,
    detectors: Vec<Box<dyn LineCodec>>,
    window: SyncWindow,
    scoreboard: EncodingScoreboard,
    bits_sampled: u64,
    revolutions: u32,
    result: Option<Classification>,
}

impl EncodingClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, RecoveryError> {
        match config.window {
            SampleWindow::Bits(0) | SampleWindow::Revolutions(0) => {
                return Err(RecoveryError::ParameterError(
                    "ClassifierConfig: sample window must be non-zero".to_string(),
                ))
            }
            _ => {}
        }
        if config.score_margin == 0 {
            return Err(RecoveryError::ParameterError(
                "ClassifierConfig: score margin must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            config,
            state: ClassifierState::Idle,
            detectors: all_codecs(),
            window: SyncWindow::new(),
            scoreboard: EncodingScoreboard::default(),
            bits_sampled: 0,
            revolutions: 0,
            result: None,
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn state(&self) -> ClassifierState {
        self.state
    }

    pub fn scoreboard(&self) -> &EncodingScoreboard {
        &self.scoreboard
    }

    pub fn bits_sampled(&self) -> u64 {
        self.bits_sampled
    }

    /// Begin sampling. If a personality is forced, the classifier moves directly to `Forced`.
    pub fn start(&mut self) -> ClassifierState {
        if self.state != ClassifierState::Idle {
            return self.state;
        }

        if let Some(encoding) = self.config.force_personality {
            log::debug!("EncodingClassifier::start(): forced personality {}", encoding);
            self.result = Some(Classification {
                encoding,
                confidence: u8::MAX,
                was_forced: true,
                scoreboard: self.scoreboard.clone(),
            });
            self.state = ClassifierState::Forced;
        }
        else {
            self.state = ClassifierState::Sampling;
        }
        self.state
    }

    /// Feed one recovered bit to every sync detector.
    pub fn push_bit(&mut self, bit: bool) -> ClassifierState {
        if self.state != ClassifierState::Sampling {
            return self.state;
        }

        self.window.push(bit);
        for detector in self.detectors.iter() {
            if let Some(kind) = detector.sync_detector(&self.window) {
                log::trace!(
                    "EncodingClassifier::push_bit(): {} {} at bit {}",
                    detector.encoding(),
                    kind,
                    self.bits_sampled
                );
                self.scoreboard.record_hit(detector.encoding());
            }
        }

        self.bits_sampled += 1;
        if let SampleWindow::Bits(n) = self.config.window {
            if self.bits_sampled >= n {
                self.state = ClassifierState::Scoring;
            }
        }
        self.state
    }

    pub fn push_bits(&mut self, bits: &BitVec) -> ClassifierState {
        for bit in bits.iter() {
            if self.push_bit(bit) != ClassifierState::Sampling {
                break;
            }
        }
        self.state
    }

    /// Add evidence from a decoded field whose CRC was valid.
    pub fn record_crc_pass(&mut self, encoding: TrackDataEncoding) {
        if matches!(self.state, ClassifierState::Sampling | ClassifierState::Scoring) {
            self.scoreboard.record_crc_pass(encoding);
        }
    }

    /// Signal an index pulse. Marks never span an index pulse, so the sync window is cleared.
    pub fn index_pulse(&mut self) -> ClassifierState {
        self.window.clear();
        if self.state != ClassifierState::Sampling {
            return self.state;
        }

        self.revolutions += 1;
        if let SampleWindow::Revolutions(n) = self.config.window {
            if self.revolutions >= n {
                self.state = ClassifierState::Scoring;
            }
        }
        self.state
    }

    /// End sampling if still in progress and score the collected evidence.
    pub fn finish(&mut self) -> Result<Classification, RecoveryError> {
        match self.state {
            ClassifierState::Idle => {
                self.start();
                if self.state == ClassifierState::Forced {
                    return self.finish();
                }
                self.state = ClassifierState::Scoring;
                self.score()
            }
            ClassifierState::Sampling | ClassifierState::Scoring => {
                self.state = ClassifierState::Scoring;
                self.score()
            }
            ClassifierState::Done | ClassifierState::Forced => {
                self.result.clone().ok_or(RecoveryError::ClassificationInconclusive)
            }
        }
    }

    fn score(&mut self) -> Result<Classification, RecoveryError> {
        let weight = self.config.crc_weight;
        self.state = ClassifierState::Done;

        let mut ranked: Vec<(TrackDataEncoding, u32)> = self
            .scoreboard
            .iter()
            .filter(|(e, _)| e.refines().is_none())
            .map(|(e, s)| (*e, s.score(weight)))
            .collect();
        // Highest score first. Ties keep enumeration order.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let (winner, winner_score) = ranked.first().copied().unwrap_or_default();
        let runner_up_score = ranked.get(1).map(|r| r.1).unwrap_or(0);

        if winner_score <= self.config.score_floor {
            log::warn!(
                "EncodingClassifier::score(): best score {} ({}) does not exceed floor {}",
                winner_score,
                winner,
                self.config.score_floor
            );
            return Err(RecoveryError::ClassificationInconclusive);
        }
        if winner_score - runner_up_score < self.config.score_margin {
            log::warn!(
                "EncodingClassifier::score(): {} leads by {}, margin {} required",
                winner,
                winner_score - runner_up_score,
                self.config.score_margin
            );
            return Err(RecoveryError::ClassificationInconclusive);
        }

        let confidence = (255 * (winner_score - runner_up_score) as u64 / winner_score as u64).min(255) as u8;

        let mut encoding = winner;
        for (refinement, score) in self.scoreboard.iter() {
            if refinement.refines() == Some(winner)
                && score.score(weight) >= winner_score.saturating_add(self.config.refine_floor)
            {
                log::debug!("EncodingClassifier::score(): {} refined to {}", winner, refinement);
                encoding = *refinement;
            }
        }

        log::debug!(
            "EncodingClassifier::score(): {} with confidence {} after {} bits",
            encoding,
            confidence,
            self.bits_sampled
        );
        let result = Classification {
            encoding,
            confidence,
            was_forced: false,
            scoreboard: self.scoreboard.clone(),
        };
        self.result = Some(result.clone());
        Ok(result)
    }

    /// Classify a complete bitstream.
    pub fn classify(&mut self, bits: &BitVec) -> Result<Classification, RecoveryError> {
        self.start();
        self.push_bits(bits);
        self.finish()
    }

    /// Return to `Idle` with a cleared scoreboard.
    pub fn reset(&mut self) {
        self.state = ClassifierState::Idle;
        self.window.clear();
        self.scoreboard.clear();
        self.bits_sampled = 0;
        self.revolutions = 0;
        self.result = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream_codec::{codec_for, mfm::MFM_SYNC_A1, push_word};

    fn mfm_stream(marks: usize) -> BitVec {
        let codec = codec_for(TrackDataEncoding::Mfm);
        let mut bits = BitVec::new();
        for i in 0..marks {
            bits.extend(codec.encode_buf(&[0x4E; 8], false).unwrap().iter());
            bits.extend(codec.encode_buf(&[0x00; 12], false).unwrap().iter());
            for _ in 0..3 {
                push_word(&mut bits, MFM_SYNC_A1, 16);
            }
            bits.extend(codec.encode_buf(&[0xFE, i as u8, 0, 1, 2], true).unwrap().iter());
        }
        bits
    }

    #[test]
    fn test_classify_mfm() {
        let mut classifier = EncodingClassifier::new(ClassifierConfig::default()).unwrap();
        let result = classifier.classify(&mfm_stream(10)).unwrap();

        assert_eq!(result.encoding, TrackDataEncoding::Mfm);
        assert!(!result.was_forced);
        // Three A1 syncs per mark, and one C2 pattern formed by the zero bytes running into
        // the first A1.
        assert_eq!(result.scoreboard.get(TrackDataEncoding::Mfm).sync_hits, 40);
        assert_eq!(result.confidence, 255);
        assert_eq!(classifier.state(), ClassifierState::Done);
    }

    #[test]
    fn test_forced() {
        let config = ClassifierConfig {
            force_personality: Some(TrackDataEncoding::GcrApple6),
            ..Default::default()
        };
        let mut classifier = EncodingClassifier::new(config).unwrap();
        assert_eq!(classifier.start(), ClassifierState::Forced);
        // Input is ignored while forced.
        assert_eq!(classifier.push_bits(&mfm_stream(10)), ClassifierState::Forced);

        let result = classifier.finish().unwrap();
        assert_eq!(result.encoding, TrackDataEncoding::GcrApple6);
        assert_eq!(result.confidence, 255);
        assert!(result.was_forced);
        assert_eq!(result.scoreboard.total_hits(), 0);
    }

    #[test]
    fn test_inconclusive() {
        let mut classifier = EncodingClassifier::new(ClassifierConfig::default()).unwrap();
        assert!(matches!(
            classifier.classify(&BitVec::from_elem(4096, false)),
            Err(RecoveryError::ClassificationInconclusive)
        ));
        assert_eq!(classifier.state(), ClassifierState::Done);

        // Too few marks to exceed the floor.
        classifier.reset();
        assert_eq!(classifier.state(), ClassifierState::Idle);
        assert!(classifier.classify(&mfm_stream(2)).is_err());
    }

    #[test]
    fn test_bit_window() {
        let config = ClassifierConfig {
            window: SampleWindow::Bits(100),
            ..Default::default()
        };
        let mut classifier = EncodingClassifier::new(config).unwrap();
        classifier.start();
        assert_eq!(classifier.push_bits(&mfm_stream(4)), ClassifierState::Scoring);
        assert_eq!(classifier.bits_sampled(), 100);
    }

    #[test]
    fn test_revolution_window() {
        let config = ClassifierConfig {
            window: SampleWindow::Revolutions(2),
            ..Default::default()
        };
        let mut classifier = EncodingClassifier::new(config).unwrap();
        classifier.start();
        classifier.push_bits(&mfm_stream(5));
        assert_eq!(classifier.index_pulse(), ClassifierState::Sampling);
        classifier.push_bits(&mfm_stream(5));
        assert_eq!(classifier.index_pulse(), ClassifierState::Scoring);

        // Bits pushed after the window closes are not counted.
        classifier.push_bits(&mfm_stream(5));
        let result = classifier.finish().unwrap();
        assert_eq!(result.scoreboard.get(TrackDataEncoding::Mfm).sync_hits, 40);
    }

    #[test]
    fn test_crc_evidence() {
        let mut classifier = EncodingClassifier::new(ClassifierConfig::default()).unwrap();
        classifier.start();
        for _ in 0..3 {
            classifier.record_crc_pass(TrackDataEncoding::Rll27);
        }
        let result = classifier.finish().unwrap();
        assert_eq!(result.encoding, TrackDataEncoding::Rll27);
        assert_eq!(result.scoreboard.get(TrackDataEncoding::Rll27).crc_passes, 3);
    }

    #[test]
    fn test_reset_clears() {
        let mut classifier = EncodingClassifier::new(ClassifierConfig::default()).unwrap();
        classifier.classify(&mfm_stream(10)).unwrap();
        classifier.reset();
        assert_eq!(classifier.scoreboard().total_hits(), 0);
        assert_eq!(classifier.bits_sampled(), 0);
        assert!(classifier.finish().is_err());
    }

    #[test]
    fn test_bad_config() {
        let config = ClassifierConfig {
            window: SampleWindow::Bits(0),
            ..Default::default()
        };
        assert!(EncodingClassifier::new(config).is_err());
    }
}

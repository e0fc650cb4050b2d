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

    src/multipass/merge.rs

    Byte and bit level merging of sector instances recovered over multiple passes.
*/
use crate::{
    crc::Crc16,
    track_schema::{system34::DAM_MARK, Sector, System34Variant},
    types::DiskChsn,
};
use std::fmt::{self, Display, Formatter};

/// Agreement level of a merged byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Confidence {
    Strong,
    Weak,
    Ambiguous,
}

/// Agreement level and value of a merged bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BitClass {
    Strong1,
    Weak1,
    Strong0,
    Weak0,
    Ambiguous,
}

impl BitClass {
    /// Return the value of the bit, or None if ambiguous.
    pub fn value(&self) -> Option<bool> {
        match self {
            BitClass::Strong1 | BitClass::Weak1 => Some(true),
            BitClass::Strong0 | BitClass::Weak0 => Some(false),
            BitClass::Ambiguous => None,
        }
    }
}

/// How the payload of a merged sector was chosen.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Resolution {
    /// A single pass read the sector with a good CRC.
    Clean,
    /// The highest weighted value at every byte position produced a good CRC.
    Consensus,
    /// Weighted bit majority votes produced a good CRC.
    BitMajority,
    /// Substituting a runner-up value at one byte position produced a good CRC.
    Substitution,
    /// Flipping one low confidence bit produced a good CRC.
    BitFlip,
    /// No candidate produced a good CRC. The payload is a best effort.
    #[default]
    Unresolved,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Clean => write!(f, "clean"),
            Resolution::Consensus => write!(f, "consensus"),
            Resolution::BitMajority => write!(f, "bit majority"),
            Resolution::Substitution => write!(f, "substitution"),
            Resolution::BitFlip => write!(f, "bit flip"),
            Resolution::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Thresholds applied when classifying merged bytes and bits, in percent of the total weight
/// at a position.
#[derive(Copy, Clone, Debug)]
pub(crate) struct MergeParams {
    pub strong: u8,
    pub weak: u8,
    pub use_crc_correction: bool,
    pub max_correction_bits: usize,
}

/// A sector merged from every pass it was read in.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecoveredSector {
    pub id: DiskChsn,
    /// The best payload, excluding the CRC.
    pub data: Vec<u8>,
    pub crc_ok: bool,
    pub deleted: bool,
    pub recorded_crc: u16,
    pub calculated_crc: u16,
    pub resolution: Resolution,
    /// Number of passes that read the data field of this sector.
    pub instances: u32,
    /// Number of instances agreeing with the chosen value of each data byte.
    pub agreement: Vec<u32>,
    /// Share of the total weight held by the chosen value of each data byte, in percent.
    pub confidence: Vec<u8>,
    pub classes: Vec<Confidence>,
    /// Classification of each data bit, most significant bit of each byte first.
    pub bit_classes: Vec<BitClass>,
    /// Offsets of the first data bytes that are not strong.
    pub weak_positions: Vec<usize>,
    /// A CRC guided correction was applied.
    pub corrected: bool,
    pub confidence_min: u8,
    pub confidence_avg: u8,
}

impl RecoveredSector {
    pub fn weak_count(&self) -> usize {
        self.classes.iter().filter(|c| **c != Confidence::Strong).count()
    }
}

#[derive(Copy, Clone, Debug)]
struct ByteCandidate {
    value: u8,
    weight: u64,
    votes: u32,
}

/// Collects every instance of one sector. Positions cover the data bytes followed by the two
/// CRC bytes.
#[derive(Clone, Debug)]
pub(crate) struct SectorAccumulator {
    id: DiskChsn,
    variant: System34Variant,
    size: usize,
    deleted: bool,
    crc_prefix: Vec<u8>,
    candidates: Vec<Vec<ByteCandidate>>,
    bit_weights: Vec<[u64; 2]>,
    instances: u32,
    clean: Option<Sector>,
    /// Resolution of the evidence merged so far. Cleared whenever an instance is added.
    resolved: Option<RecoveredSector>,
}

impl SectorAccumulator {
    pub fn new(id: DiskChsn, variant: System34Variant) -> Self {
        let size = id.n_size();
        Self {
            id,
            variant,
            size,
            deleted: false,
            crc_prefix: variant.crc_prefix(DAM_MARK),
            candidates: vec![Vec::new(); size + 2],
            bit_weights: vec![[0, 0]; (size + 2) * 8],
            instances: 0,
            clean: None,
            resolved: None,
        }
    }

    /// Return true once an instance with a good CRC has been merged.
    pub fn is_clean(&self) -> bool {
        self.clean.is_some()
    }

    pub fn instances(&self) -> u32 {
        self.instances
    }

    /// Resolve the sector again if instances were merged since the last refresh.
    pub fn refresh(&mut self, params: &MergeParams) {
        if self.resolved.is_none() {
            self.resolved = Some(self.resolve(params));
        }
    }

    /// Return true if the sector was read cleanly, or if the last refresh produced a payload
    /// with a good CRC.
    pub fn is_recovered(&self) -> bool {
        self.is_clean() || self.resolved.as_ref().is_some_and(|s| s.crc_ok)
    }

    /// Return the resolved sector, reusing the last refresh if it is current.
    pub fn resolved(&self, params: &MergeParams) -> RecoveredSector {
        match &self.resolved {
            Some(sector) => sector.clone(),
            None => self.resolve(params),
        }
    }

    /// Merge one instance of the sector. Instances without a data field, or with a data field
    /// of the wrong size, are ignored.
    pub fn add(&mut self, sector: &Sector) {
        if self.is_clean() || !sector.id_crc_ok || sector.id != self.id || !sector.has_data() {
            return;
        }
        if sector.data.len() != self.size {
            log::warn!(
                "SectorAccumulator::add(): sector {} has {} bytes, expected {}",
                sector.id,
                sector.data.len(),
                self.size
            );
            return;
        }

        if sector.data_crc_ok {
            self.clean = Some(sector.clone());
        }
        if let Some(mark) = sector.data_mark {
            self.crc_prefix = self.variant.crc_prefix(mark);
        }
        self.deleted = sector.deleted;
        self.instances += 1;
        self.resolved = None;

        let crc = sector.recorded_crc_bytes();
        for (pos, &value) in sector.data.iter().chain(crc.iter()).enumerate() {
            let weight = sector.quality.get(pos).copied().unwrap_or(0).max(1) as u64;

            let slot = &mut self.candidates[pos];
            match slot.iter_mut().find(|c| c.value == value) {
                Some(candidate) => {
                    candidate.weight += weight;
                    candidate.votes += 1;
                }
                None => slot.push(ByteCandidate {
                    value,
                    weight,
                    votes: 1,
                }),
            }

            for bit in 0..8 {
                let set = value & (0x80 >> bit) != 0;
                self.bit_weights[pos * 8 + bit][set as usize] += weight;
            }
        }
    }

    /// Candidates at a position, best first.
    fn ranked(&self, pos: usize) -> Vec<ByteCandidate> {
        let mut ranked = self.candidates[pos].clone();
        ranked.sort_by(|a, b| {
            b.weight
                .cmp(&a.weight)
                .then(b.votes.cmp(&a.votes))
                .then(a.value.cmp(&b.value))
        });
        ranked
    }

    /// Return true if `buf`, holding data followed by its CRC, has a zero CRC residual.
    fn crc_ok(&self, buf: &[u8]) -> bool {
        let mut crc = Crc16::new();
        crc.push_slice(&self.crc_prefix);
        crc.push_slice(buf);
        crc.value() == 0
    }

    fn bit_margin(&self, index: usize) -> u64 {
        let [zero, one] = self.bit_weights[index];
        zero.abs_diff(one)
    }

    /// Choose the best payload for the sector.
    pub fn resolve(&self, params: &MergeParams) -> RecoveredSector {
        if self.instances == 0 {
            return RecoveredSector {
                id: self.id,
                ..Default::default()
            };
        }

        let (buf, resolution) = match &self.clean {
            Some(sector) => {
                let mut buf = sector.data.clone();
                buf.extend_from_slice(&sector.recorded_crc_bytes());
                (buf, Resolution::Clean)
            }
            None => self.search(params),
        };

        let crc_ok = self.crc_ok(&buf);
        let recorded_crc = u16::from_be_bytes([buf[self.size], buf[self.size + 1]]);
        let mut calc = Crc16::new();
        calc.push_slice(&self.crc_prefix);
        calc.push_slice(&buf[..self.size]);

        let mut sector = RecoveredSector {
            id: self.id,
            data: buf[..self.size].to_vec(),
            crc_ok,
            deleted: self.deleted,
            recorded_crc,
            calculated_crc: calc.value(),
            resolution,
            instances: self.instances,
            corrected: matches!(resolution, Resolution::Substitution | Resolution::BitFlip),
            ..Default::default()
        };

        for (pos, &value) in buf[..self.size].iter().enumerate() {
            let total: u64 = self.candidates[pos].iter().map(|c| c.weight).sum();
            let chosen = self.candidates[pos].iter().find(|c| c.value == value);
            let (weight, votes) = chosen.map(|c| (c.weight, c.votes)).unwrap_or((0, 0));
            let byte_share = percent(weight, total);

            sector.agreement.push(votes);
            sector.confidence.push(byte_share);
            let class = classify(byte_share, params);
            sector.classes.push(class);
            if class != Confidence::Strong && sector.weak_positions.len() < super::WEAK_POSITION_LIMIT {
                sector.weak_positions.push(pos);
            }

            for bit in 0..8 {
                let set = value & (0x80 >> bit) != 0;
                let [zero, one] = self.bit_weights[pos * 8 + bit];
                let share = percent(if set { one } else { zero }, zero + one);
                sector.bit_classes.push(match (classify(share, params), set) {
                    (Confidence::Strong, true) => BitClass::Strong1,
                    (Confidence::Strong, false) => BitClass::Strong0,
                    (Confidence::Weak, true) => BitClass::Weak1,
                    (Confidence::Weak, false) => BitClass::Weak0,
                    (Confidence::Ambiguous, _) => BitClass::Ambiguous,
                });
            }
        }

        sector.confidence_min = sector.confidence.iter().copied().min().unwrap_or(0);
        sector.confidence_avg = if sector.confidence.is_empty() {
            0
        }
        else {
            (sector.confidence.iter().map(|&c| c as u64).sum::<u64>() / sector.confidence.len() as u64) as u8
        };

        log::debug!(
            "SectorAccumulator::resolve(): sector {} from {} instances: {}, crc {}, min confidence {}%",
            self.id,
            self.instances,
            resolution,
            if crc_ok { "ok" } else { "bad" },
            sector.confidence_min
        );
        sector
    }

    /// Search for a payload with a good CRC among the merged candidates.
    fn search(&self, params: &MergeParams) -> (Vec<u8>, Resolution) {
        let ranked: Vec<Vec<ByteCandidate>> = (0..self.size + 2).map(|pos| self.ranked(pos)).collect();
        let winners: Vec<u8> = ranked.iter().map(|r| r.first().map(|c| c.value).unwrap_or(0)).collect();
        if self.crc_ok(&winners) {
            return (winners, Resolution::Consensus);
        }

        let majority: Vec<u8> = (0..self.size + 2)
            .map(|pos| {
                (0..8).fold(0u8, |byte, bit| {
                    let [zero, one] = self.bit_weights[pos * 8 + bit];
                    (byte << 1) | (one > zero) as u8
                })
            })
            .collect();
        if majority != winners && self.crc_ok(&majority) {
            return (majority, Resolution::BitMajority);
        }

        // Try runner-up values, closest contests first.
        let mut contested: Vec<(usize, u64)> = ranked
            .iter()
            .enumerate()
            .filter(|(_, r)| r.len() > 1)
            .map(|(pos, r)| (pos, r[0].weight - r[1].weight))
            .collect();
        contested.sort_by_key(|&(pos, margin)| (margin, pos));

        let mut buf = winners.clone();
        for &(pos, _) in contested.iter() {
            for candidate in ranked[pos].iter().skip(1) {
                buf[pos] = candidate.value;
                if self.crc_ok(&buf) {
                    log::debug!(
                        "SectorAccumulator::search(): sector {} repaired at offset {} with {:02X}",
                        self.id,
                        pos,
                        candidate.value
                    );
                    return (buf, Resolution::Substitution);
                }
            }
            buf[pos] = winners[pos];
        }

        if params.use_crc_correction {
            let mut bits: Vec<usize> = (0..self.bit_weights.len()).collect();
            bits.sort_by_key(|&i| (self.bit_margin(i), i));

            for &index in bits.iter().take(params.max_correction_bits) {
                let (pos, mask) = (index / 8, 0x80u8 >> (index % 8));
                buf[pos] ^= mask;
                if self.crc_ok(&buf) {
                    log::debug!(
                        "SectorAccumulator::search(): sector {} repaired by flipping bit {} of offset {}",
                        self.id,
                        index % 8,
                        pos
                    );
                    return (buf, Resolution::BitFlip);
                }
                buf[pos] ^= mask;
            }
        }

        log::debug!(
            "SectorAccumulator::search(): sector {} unresolved after {} instances",
            self.id,
            self.instances
        );
        (winners, Resolution::Unresolved)
    }
}

fn percent(part: u64, total: u64) -> u8 {
    if total == 0 {
        0
    }
    else {
        (part * 100 / total) as u8
    }
}

fn classify(percent: u8, params: &MergeParams) -> Confidence {
    if percent >= params.strong {
        Confidence::Strong
    }
    else if percent >= params.weak {
        Confidence::Weak
    }
    else {
        Confidence::Ambiguous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackDataEncoding;

    const PARAMS: MergeParams = MergeParams {
        strong: 90,
        weak: 60,
        use_crc_correction: true,
        max_correction_bits: 8,
    };

    fn prefix() -> Vec<u8> {
        vec![0xA1, 0xA1, 0xA1, 0xFB]
    }

    fn payload() -> Vec<u8> {
        (0..128u32).map(|i| (i * 7 + 3) as u8).collect()
    }

    /// Build a sector instance as the track parser would, with the CRC of `good`.
    fn instance(data: Vec<u8>, good: &[u8], quality: u8) -> Sector {
        let mut crc = Crc16::new();
        crc.push_slice(&prefix());
        crc.push_slice(good);
        let recorded = crc.value();

        let mut calc = Crc16::new();
        calc.push_slice(&prefix());
        calc.push_slice(&data);
        let calculated = calc.value();

        Sector {
            id: DiskChsn::new(0, 0, 1, 0),
            encoding: TrackDataEncoding::Mfm,
            id_crc_ok: true,
            quality: vec![quality; data.len() + 2],
            data,
            data_crc_ok: recorded == calculated,
            data_mark: Some(0xFB),
            recorded_crc: recorded,
            calculated_crc: calculated,
            data_offset: Some(0),
            ..Default::default()
        }
    }

    fn accumulator() -> SectorAccumulator {
        SectorAccumulator::new(DiskChsn::new(0, 0, 1, 0), System34Variant::Mfm)
    }

    #[test]
    fn test_clean_instance() {
        let good = payload();
        let mut acc = accumulator();
        acc.add(&instance(good.clone(), &good, 200));
        assert!(acc.is_clean());

        let sector = acc.resolve(&PARAMS);
        assert!(sector.crc_ok);
        assert_eq!(sector.resolution, Resolution::Clean);
        assert_eq!(sector.data, good);
        assert_eq!(sector.confidence_min, 100);
        assert!(sector.weak_positions.is_empty());
        assert!(!sector.corrected);
    }

    #[test]
    fn test_clean_instance_is_final() {
        let good = payload();
        let mut bad = good.clone();
        bad[3] ^= 0xFF;

        let mut acc = accumulator();
        acc.add(&instance(good.clone(), &good, 100));
        acc.add(&instance(bad.clone(), &good, 250));
        assert_eq!(acc.instances(), 1);
        assert_eq!(acc.resolve(&PARAMS).data, good);
    }

    #[test]
    fn test_consensus() {
        let good = payload();
        let mut a = instance(good.clone(), &good, 200);
        a.data[10] ^= 0x55;
        a.quality[10] = 20;
        a.data_crc_ok = false;
        let mut b = instance(good.clone(), &good, 200);
        b.data[90] ^= 0x10;
        b.quality[90] = 20;
        b.data_crc_ok = false;

        let mut acc = accumulator();
        acc.add(&a);
        acc.add(&b);
        let sector = acc.resolve(&PARAMS);
        assert!(sector.crc_ok);
        assert_eq!(sector.resolution, Resolution::Consensus);
        assert_eq!(sector.data, good);
        assert_eq!(sector.agreement[10], 1);
        assert_eq!(sector.agreement[0], 2);
        // 200 of 220 is Strong, the rest of the sector is unanimous.
        assert_eq!(sector.confidence[10], 90);
        assert!(sector.weak_positions.is_empty());
        assert_eq!(sector.instances, 2);
    }

    #[test]
    fn test_merged_crc_recovers() {
        let good = payload();
        let mut a = instance(good.clone(), &good, 200);
        a.data[10] ^= 0x55;
        a.data_crc_ok = false;
        let mut b = instance(good.clone(), &good, 200);
        b.data[90] ^= 0x10;
        b.data_crc_ok = false;
        let mut c = instance(good.clone(), &good, 200);
        c.data[100] ^= 0x01;
        c.data_crc_ok = false;

        let params = MergeParams {
            use_crc_correction: false,
            ..PARAMS
        };
        let mut acc = accumulator();
        acc.add(&a);
        acc.refresh(&params);
        assert!(!acc.is_recovered());

        acc.add(&b);
        acc.add(&c);
        // Stale until refreshed.
        assert!(!acc.is_recovered());
        acc.refresh(&params);
        assert!(acc.is_recovered());
        assert!(!acc.is_clean());

        let sector = acc.resolved(&params);
        assert_eq!(sector, acc.resolve(&params));
        assert_eq!(sector.resolution, Resolution::Consensus);
        assert_eq!(sector.data, good);
    }

    #[test]
    fn test_substitution() {
        let good = payload();
        // Pass A is confidently wrong at offset 5, pass B is weakly right.
        let mut a = instance(good.clone(), &good, 200);
        a.data[5] ^= 0x81;
        a.data_crc_ok = false;
        let mut b = instance(good.clone(), &good, 200);
        b.quality[5] = 150;
        b.data[60] ^= 0x02;
        b.quality[60] = 10;
        b.data_crc_ok = false;

        let mut acc = accumulator();
        acc.add(&a);
        acc.add(&b);
        let sector = acc.resolve(&PARAMS);
        assert!(sector.crc_ok);
        assert_eq!(sector.resolution, Resolution::Substitution);
        assert!(sector.corrected);
        assert_eq!(sector.data, good);
        assert_eq!(sector.classes[5], Confidence::Ambiguous);
        assert_eq!(sector.weak_positions, vec![5]);
    }

    #[test]
    fn test_bit_flip() {
        let good = payload();
        let mut a = instance(good.clone(), &good, 220);
        a.data[40] ^= 0x04;
        a.quality[40] = 30;
        a.data_crc_ok = false;

        let mut acc = accumulator();
        acc.add(&a);
        let sector = acc.resolve(&PARAMS);
        assert!(sector.crc_ok);
        assert_eq!(sector.resolution, Resolution::BitFlip);
        assert_eq!(sector.data, good);

        // Without correction the sector stays unresolved.
        let params = MergeParams {
            use_crc_correction: false,
            ..PARAMS
        };
        let sector = acc.resolve(&params);
        assert!(!sector.crc_ok);
        assert_eq!(sector.resolution, Resolution::Unresolved);
        assert_ne!(sector.data, good);
    }

    #[test]
    fn test_bit_classes() {
        let good = payload();
        let mut acc = accumulator();
        let mut a = instance(good.clone(), &good, 100);
        a.data[0] = 0xF0;
        a.data_crc_ok = false;
        let mut b = instance(good.clone(), &good, 100);
        b.data[0] = 0xF1;
        b.data_crc_ok = false;
        acc.add(&a);
        acc.add(&b);

        let sector = acc.resolve(&PARAMS);
        assert_eq!(sector.bit_classes.len(), good.len() * 8);
        assert_eq!(sector.bit_classes[0], BitClass::Strong1);
        assert_eq!(sector.bit_classes[4], BitClass::Strong0);
        assert_eq!(sector.bit_classes[7], BitClass::Ambiguous);
        assert_eq!(sector.bit_classes[7].value(), None);
    }

    #[test]
    fn test_ignores_bad_instances() {
        let good = payload();
        let mut acc = accumulator();

        let mut no_id = instance(good.clone(), &good, 100);
        no_id.id_crc_ok = false;
        acc.add(&no_id);

        let mut no_data = instance(good.clone(), &good, 100);
        no_data.data_offset = None;
        acc.add(&no_data);

        let mut short = instance(good[..64].to_vec(), &good, 100);
        short.data_crc_ok = false;
        acc.add(&short);

        assert_eq!(acc.instances(), 0);
        let sector = acc.resolve(&PARAMS);
        assert!(!sector.crc_ok);
        assert!(sector.data.is_empty());
    }
}

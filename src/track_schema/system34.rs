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

    src/track_schema/system34.rs

    Implements the IBM System 34 sector layout: address mark detection, ID and data field
    decoding, and track formatting for the clocked line codes.
*/

//! The IBM System 34 layout was shared, with minor changes in gap sizes and address mark
//! construction, by FM, MFM, M2FM and RLL(2,7) controllers. A track consists of an optional
//! index address mark followed by one or more sectors, each composed of an ID field and a data
//! field:
//!
//! ```text
//! gap | sync | IDAM | C H S N | CRC | gap2 | sync | DAM | data ... | CRC | gap3
//! ```
//!
//! How an address mark is constructed differs by encoding:
//!  - MFM uses three `A1` sync bytes with a missing clock (`0x4489`), followed by a normally
//!    encoded mark byte.
//!  - FM and Tandy FM encode the mark byte itself with a missing clock pattern.
//!  - M2FM encodes the mark byte with a `D7` clock pattern.
//!  - RLL(2,7) uses a single `0x8048` sync word followed by a normally encoded mark byte.
//!
//! The CRC of each field covers the address mark bytes, so the implied sync bytes must be fed
//! into the CRC before the mark. See [System34Variant::crc_prefix].

use crate::{
    bitstream_codec::{codec_for, push_word, slice_cells, LineCodec, SyncKind, SyncWindow, SyncWord},
    crc::Crc16,
    flux::{PllDecodeResult, RecoveredBit},
    track_schema::{Sector, TrackMarkerItem},
    types::{DiskChsn, TrackDataEncoding},
    RecoveryError,
};
use bit_vec::BitVec;
use std::fmt::{self, Display, Formatter};

pub const GAP_BYTE: u8 = 0x4E;
pub const SYNC_BYTE: u8 = 0;

pub const IBM_GAP3_DEFAULT: usize = 22;
pub const IBM_GAP4A: usize = 80;
pub const IBM_GAP1: usize = 50;
pub const IBM_GAP2: usize = 22;
pub const SYNC_LEN: usize = 12;

pub const FM_GAP_BYTE: u8 = 0xFF;
pub const FM_GAP4A: usize = 40;
pub const FM_GAP1: usize = 26;
pub const FM_GAP2: usize = 11;
pub const FM_SYNC_LEN: usize = 6;

/// Number of trailing gap bytes written after the last sector of a formatted track.
pub const GAP4B_LEN: usize = 32;

/// Maximum distance, in symbols, from the end of an ID field to the start of its data mark.
pub const DATA_MARK_WINDOW: usize = 64;

pub const IAM_MARK: u8 = 0xFC;
pub const IDAM_MARK: u8 = 0xFE;
pub const DAM_MARK: u8 = 0xFB;
pub const DDAM_MARK: u8 = 0xF8;
pub const TANDY_DAM_F9: u8 = 0xF9;
pub const TANDY_DAM_FA: u8 = 0xFA;

pub const MFM_SYNC_BYTE: u8 = 0xA1;
pub const MFM_SYNC_RUN: usize = 3;

/// The encodings that use the System 34 sector layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum System34Variant {
    Mfm,
    Fm,
    TandyFm,
    M2fm,
    Rll27,
}

impl TryFrom<TrackDataEncoding> for System34Variant {
    type Error = RecoveryError;

    fn try_from(encoding: TrackDataEncoding) -> Result<Self, Self::Error> {
        match encoding {
            TrackDataEncoding::Mfm => Ok(System34Variant::Mfm),
            TrackDataEncoding::Fm => Ok(System34Variant::Fm),
            TrackDataEncoding::TandyFm => Ok(System34Variant::TandyFm),
            TrackDataEncoding::M2fm => Ok(System34Variant::M2fm),
            TrackDataEncoding::Rll27 => Ok(System34Variant::Rll27),
            _ => Err(RecoveryError::ParameterError(format!(
                "{} does not use the System 34 sector layout",
                encoding
            ))),
        }
    }
}

impl From<System34Variant> for TrackDataEncoding {
    fn from(variant: System34Variant) -> Self {
        match variant {
            System34Variant::Mfm => TrackDataEncoding::Mfm,
            System34Variant::Fm => TrackDataEncoding::Fm,
            System34Variant::TandyFm => TrackDataEncoding::TandyFm,
            System34Variant::M2fm => TrackDataEncoding::M2fm,
            System34Variant::Rll27 => TrackDataEncoding::Rll27,
        }
    }
}

impl System34Variant {
    /// Return true if the mark byte is part of the sync pattern rather than a separately
    /// encoded symbol following it.
    pub fn embedded_marks(&self) -> bool {
        matches!(self, System34Variant::Fm | System34Variant::TandyFm | System34Variant::M2fm)
    }

    /// Number of consecutive sync words that must precede a separately encoded mark byte.
    pub fn sync_run(&self) -> usize {
        match self {
            System34Variant::Mfm => MFM_SYNC_RUN,
            _ => 1,
        }
    }

    /// Return the bytes that precede the field contents in the field's CRC calculation.
    pub fn crc_prefix(&self, mark: u8) -> Vec<u8> {
        match self {
            System34Variant::Mfm => vec![MFM_SYNC_BYTE, MFM_SYNC_BYTE, MFM_SYNC_BYTE, mark],
            System34Variant::Rll27 => vec![MFM_SYNC_BYTE, mark],
            _ => vec![mark],
        }
    }

    pub fn gap_byte(&self) -> u8 {
        if self.is_single_density() {
            FM_GAP_BYTE
        }
        else {
            GAP_BYTE
        }
    }

    pub fn sync_len(&self) -> usize {
        if self.is_single_density() {
            FM_SYNC_LEN
        }
        else {
            SYNC_LEN
        }
    }

    pub fn gap4a(&self) -> usize {
        if self.is_single_density() {
            FM_GAP4A
        }
        else {
            IBM_GAP4A
        }
    }

    pub fn gap1(&self) -> usize {
        if self.is_single_density() {
            FM_GAP1
        }
        else {
            IBM_GAP1
        }
    }

    pub fn gap2(&self) -> usize {
        if self.is_single_density() {
            FM_GAP2
        }
        else {
            IBM_GAP2
        }
    }

    /// Return true if this variant writes an index address mark when formatting.
    pub fn has_index_mark(&self) -> bool {
        !matches!(self, System34Variant::Rll27)
    }

    fn is_single_density(&self) -> bool {
        matches!(self, System34Variant::Fm | System34Variant::TandyFm | System34Variant::M2fm)
    }
}

/// The kinds of address mark found on a System 34 track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum System34Marker {
    Iam,
    Idam,
    Dam,
    Ddam,
}

impl System34Marker {
    /// Map an address mark byte to a marker. Tandy's F9 and FA marks are treated as data marks.
    pub fn from_mark(mark: u8) -> Option<System34Marker> {
        match mark {
            IAM_MARK => Some(System34Marker::Iam),
            IDAM_MARK => Some(System34Marker::Idam),
            DAM_MARK | TANDY_DAM_F9 | TANDY_DAM_FA => Some(System34Marker::Dam),
            DDAM_MARK => Some(System34Marker::Ddam),
            _ => None,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, System34Marker::Dam | System34Marker::Ddam)
    }
}

impl Display for System34Marker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            System34Marker::Iam => write!(f, "IAM"),
            System34Marker::Idam => write!(f, "IDAM"),
            System34Marker::Dam => write!(f, "DAM"),
            System34Marker::Ddam => write!(f, "DDAM"),
        }
    }
}

/// A sector to be written by [System34Schema::format_track].
#[derive(Clone, Debug, Default)]
pub struct FormatSector {
    pub id: DiskChsn,
    pub data: Vec<u8>,
    pub deleted: bool,
    /// Override the data address mark byte (Tandy F9/FA marks).
    pub mark: Option<u8>,
    /// Write an intentionally corrupted data CRC.
    pub bad_data_crc: bool,
}

impl FormatSector {
    pub fn new(id: DiskChsn, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            ..Default::default()
        }
    }
}

/// A decoded field: the symbols, their quality weights and the decode error count.
struct FieldRead {
    bytes: Vec<u8>,
    quality: Vec<u8>,
    errors: u32,
}

/// Parses and builds System 34 tracks for one encoding.
#[derive(Clone)]
pub struct System34Schema {
    variant: System34Variant,
    codec: Box<dyn LineCodec>,
}

impl System34Schema {
    pub fn new(encoding: TrackDataEncoding) -> Result<Self, RecoveryError> {
        let variant = System34Variant::try_from(encoding)?;
        Ok(Self {
            variant,
            codec: codec_for(encoding),
        })
    }

    pub fn variant(&self) -> System34Variant {
        self.variant
    }

    pub fn encoding(&self) -> TrackDataEncoding {
        self.codec.encoding()
    }

    /// Scan a bitstream for address marks. The window is cleared after each accepted mark so
    /// that marks never overlap.
    pub fn scan_markers(&self, bits: &BitVec) -> Vec<TrackMarkerItem> {
        let mut markers = Vec::new();
        let mut window = SyncWindow::new();
        let mut pos = 0;

        while pos < bits.len() {
            window.push(bits.get(pos).unwrap_or(false));
            pos += 1;

            if let Some(word) = self.codec.sync_word(&window) {
                if let Some(item) = self.resolve_marker(bits, &window, word, pos) {
                    log::trace!(
                        "System34Schema::scan_markers(): {} mark {:02X} at {}",
                        item.marker,
                        item.mark,
                        item.start
                    );
                    pos = item.end;
                    window.clear();
                    markers.push(item);
                }
            }
        }
        markers
    }

    fn resolve_marker(&self, bits: &BitVec, window: &SyncWindow, word: &SyncWord, pos: usize) -> Option<TrackMarkerItem> {
        let word_bits = word.to_bits();

        if self.variant.embedded_marks() && word.kind != SyncKind::Sync {
            let mark = word.mark?;
            return Some(TrackMarkerItem {
                marker: System34Marker::from_mark(mark)?,
                mark,
                start: pos.saturating_sub(word.len as usize),
                mark_start: None,
                end: pos,
                prev: self.codec.trailing_state(&word_bits),
            });
        }

        // The mark byte follows a run of sync words.
        let run = self.variant.sync_run();
        let mut pattern = 0u64;
        for _ in 0..run {
            pattern = (pattern << word.len) | word.pattern;
        }
        let run_len = word.len as usize * run;
        if run_len > 64 || !window.matches(pattern, run_len as u8) {
            return None;
        }

        let width = self.codec.cells_per_symbol();
        let mark_cells = slice_cells(bits, pos, width)?;
        let decoded = self
            .codec
            .decode_run(bits, pos, 1, self.codec.trailing_state(&word_bits))?
            .pop()?;
        let mark = match decoded {
            Ok(mark) => mark,
            Err(e) => {
                log::trace!("System34Schema::resolve_marker(): bad mark at {}: {}", pos, e);
                return None;
            }
        };

        let marker = System34Marker::from_mark(mark)?;
        // An index mark must follow the index sync, and a sector mark the regular sync.
        if (word.kind == SyncKind::IndexMark) != (marker == System34Marker::Iam) {
            return None;
        }

        Some(TrackMarkerItem {
            marker,
            mark,
            start: pos.saturating_sub(run_len),
            mark_start: Some(pos),
            end: pos + width,
            prev: self.codec.trailing_state(&mark_cells),
        })
    }

    /// Decode the `count` symbols following `marker`. Returns `None` if the bitstream ends
    /// before the field does. Symbols that fail to decode are replaced by their partial value.
    fn read_field(
        &self,
        bits: &BitVec,
        recovered: Option<&[RecoveredBit]>,
        marker: &TrackMarkerItem,
        count: usize,
    ) -> Option<FieldRead> {
        let width = self.codec.cells_per_symbol();
        // The mark byte and its field form one stream when code words span symbols.
        let (start, skip) = match marker.mark_start {
            Some(mark_start) if self.codec.spans_symbols() => (mark_start, 1),
            _ => (marker.end, 0),
        };
        let symbols = self.codec.decode_run(bits, start, count + skip, marker.prev)?;

        let mut field = FieldRead {
            bytes: Vec::with_capacity(count),
            quality: Vec::with_capacity(count),
            errors: 0,
        };
        for (i, symbol) in symbols.into_iter().enumerate().skip(skip) {
            let offset = start + i * width;
            let byte = match symbol {
                Ok(byte) => byte,
                Err(e) => {
                    log::trace!("System34Schema::read_field(): decode error at {}: {}", offset, e);
                    field.errors += 1;
                    e.partial().unwrap_or(0)
                }
            };
            field.bytes.push(byte);
            field.quality.push(symbol_quality(recovered, offset, width));
        }
        Some(field)
    }

    fn field_crc(&self, mark: u8, bytes: &[u8]) -> u16 {
        let mut crc = Crc16::new();
        crc.push_slice(&self.variant.crc_prefix(mark));
        crc.push_slice(bytes);
        crc.value()
    }

    /// Decode all sectors from a bitstream. `recovered` supplies per-cell quality for the
    /// stream; without it every symbol is given full weight.
    pub fn parse_sectors(&self, bits: &BitVec, recovered: Option<&[RecoveredBit]>) -> Vec<Sector> {
        let markers = self.scan_markers(bits);
        let width = self.codec.cells_per_symbol();
        let mut sectors = Vec::new();

        for (i, idam) in markers.iter().enumerate() {
            if idam.marker != System34Marker::Idam {
                continue;
            }

            let Some(id_field) = self.read_field(bits, recovered, idam, 6)
            else {
                log::debug!("System34Schema::parse_sectors(): ID field at {} is truncated", idam.start);
                continue;
            };

            let id = DiskChsn::new(
                id_field.bytes[0] as u16,
                id_field.bytes[1],
                id_field.bytes[2],
                id_field.bytes[3],
            );
            let id_recorded = u16::from_be_bytes([id_field.bytes[4], id_field.bytes[5]]);
            let id_calculated = self.field_crc(idam.mark, &id_field.bytes[0..4]);
            let id_crc_ok = id_recorded == id_calculated;

            let mut sector = Sector {
                id,
                encoding: self.encoding(),
                id_crc_ok,
                id_offset: idam.start,
                decode_errors: id_field.errors,
                ..Default::default()
            };

            if !id_crc_ok {
                log::warn!(
                    "System34Schema::parse_sectors(): ID CRC error at {}: recorded {:04X} calculated {:04X}",
                    idam.start,
                    id_recorded,
                    id_calculated
                );
                sectors.push(sector);
                continue;
            }

            // The data mark must follow before the next ID mark and within the data mark window.
            let id_end = idam.end + 6 * width;
            let dam = markers[i + 1..]
                .iter()
                .take_while(|m| m.marker != System34Marker::Idam)
                .find(|m| m.marker.is_data());

            let dam = match dam {
                Some(dam) if dam.start >= id_end && dam.start - id_end <= DATA_MARK_WINDOW * width => dam,
                _ => {
                    log::debug!("System34Schema::parse_sectors(): no data mark for sector {}", id);
                    sectors.push(sector);
                    continue;
                }
            };

            let size = id.n_size();
            let Some(data_field) = self.read_field(bits, recovered, dam, size + 2)
            else {
                log::debug!(
                    "System34Schema::parse_sectors(): data field for sector {} is truncated",
                    id
                );
                sectors.push(sector);
                continue;
            };

            let recorded = u16::from_be_bytes([data_field.bytes[size], data_field.bytes[size + 1]]);
            let calculated = self.field_crc(dam.mark, &data_field.bytes[..size]);

            sector.deleted = dam.marker == System34Marker::Ddam;
            sector.data_mark = Some(dam.mark);
            sector.data_offset = Some(dam.start);
            sector.recorded_crc = recorded;
            sector.calculated_crc = calculated;
            sector.data_crc_ok = recorded == calculated;
            sector.decode_errors += data_field.errors;
            sector.quality = data_field.quality;
            sector.data = data_field.bytes;
            sector.data.truncate(size);

            if !sector.data_crc_ok {
                log::warn!(
                    "System34Schema::parse_sectors(): data CRC error in sector {}: recorded {:04X} calculated {:04X}",
                    id,
                    recorded,
                    calculated
                );
            }
            sectors.push(sector);
        }

        log::debug!(
            "System34Schema::parse_sectors(): {} sectors from {} markers ({} bits)",
            sectors.len(),
            markers.len(),
            bits.len()
        );
        sectors
    }

    /// Decode all sectors from the output of the PLL, weighting each symbol by the quality of
    /// its recovered bits.
    pub fn decode(&self, result: &PllDecodeResult) -> Vec<Sector> {
        self.parse_sectors(&result.bits, Some(&result.recovered))
    }

    /// Build the bitstream of a complete track containing the specified sectors.
    pub fn format_track(&self, sectors: &[FormatSector], gap3: usize) -> Result<BitVec, RecoveryError> {
        let mut writer = TrackWriter::new(self.codec.as_ref());
        let gap = self.variant.gap_byte();

        writer.repeat(gap, self.variant.gap4a());
        if self.variant.has_index_mark() {
            writer.repeat(SYNC_BYTE, self.variant.sync_len());
            self.write_mark(&mut writer, IAM_MARK)?;
            writer.repeat(gap, self.variant.gap1());
        }

        for sector in sectors {
            if sector.data.len() != sector.id.n_size() {
                return Err(RecoveryError::ParameterError(format!(
                    "sector {} data length {} does not match size code",
                    sector.id,
                    sector.data.len()
                )));
            }

            let (c, h, s, n) = sector.id.get();
            let c = u8::try_from(c).map_err(|_| {
                RecoveryError::ParameterError(format!("sector {} cylinder does not fit in an ID field", sector.id))
            })?;
            let id_bytes = [c, h, s, n];
            writer.repeat(SYNC_BYTE, self.variant.sync_len());
            self.write_mark(&mut writer, IDAM_MARK)?;
            writer.bytes(&id_bytes);
            writer.bytes(&self.field_crc(IDAM_MARK, &id_bytes).to_be_bytes());
            writer.repeat(gap, self.variant.gap2());

            let mark = match (sector.mark, sector.deleted) {
                (Some(mark), _) => mark,
                (None, true) => DDAM_MARK,
                (None, false) => DAM_MARK,
            };
            let mut crc = self.field_crc(mark, &sector.data);
            if sector.bad_data_crc {
                crc ^= 0xFFFF;
            }
            writer.repeat(SYNC_BYTE, self.variant.sync_len());
            self.write_mark(&mut writer, mark)?;
            writer.bytes(&sector.data);
            writer.bytes(&crc.to_be_bytes());
            writer.repeat(gap, gap3);
        }

        writer.repeat(gap, GAP4B_LEN);
        writer.finish()
    }

    fn write_mark(&self, writer: &mut TrackWriter, mark: u8) -> Result<(), RecoveryError> {
        let missing = || RecoveryError::ParameterError(format!("{} has no {:02X} address mark", self.encoding(), mark));

        if self.variant.embedded_marks() {
            let word = self
                .codec
                .sync_words()
                .iter()
                .find(|w| w.mark == Some(mark) && w.kind != SyncKind::Sync)
                .ok_or_else(missing)?;
            writer.raw(word.pattern, word.len as usize)?;
            return Ok(());
        }

        let kind = if mark == IAM_MARK {
            SyncKind::IndexMark
        }
        else {
            SyncKind::Sync
        };
        let word = self
            .codec
            .sync_words()
            .iter()
            .find(|w| w.kind == kind)
            .ok_or_else(missing)?;
        for _ in 0..self.variant.sync_run() {
            writer.raw(word.pattern, word.len as usize)?;
        }
        writer.bytes(&[mark]);
        Ok(())
    }
}

/// Accumulates encoded symbols and raw cell patterns into a track bitstream. Symbols between
/// raw patterns are encoded together, so codes whose words span symbols see one stream.
struct TrackWriter<'a> {
    codec: &'a dyn LineCodec,
    bits: BitVec,
    pending: Vec<u8>,
    prev: bool,
}

impl<'a> TrackWriter<'a> {
    fn new(codec: &'a dyn LineCodec) -> Self {
        Self {
            codec,
            bits: BitVec::new(),
            pending: Vec::new(),
            prev: false,
        }
    }

    fn bytes(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    fn repeat(&mut self, byte: u8, count: usize) {
        self.pending.extend(std::iter::repeat(byte).take(count));
    }

    fn raw(&mut self, pattern: u64, len: usize) -> Result<(), RecoveryError> {
        self.flush()?;
        let mut cells = BitVec::with_capacity(len);
        push_word(&mut cells, pattern, len);
        self.prev = self.codec.trailing_state(&cells);
        self.bits.extend(cells.iter());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecoveryError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let cells = self.codec.encode_buf(&self.pending, self.prev)?;
        self.prev = self.codec.trailing_state(&cells);
        self.bits.extend(cells.iter());
        self.pending.clear();
        Ok(())
    }

    fn finish(mut self) -> Result<BitVec, RecoveryError> {
        self.flush()?;
        Ok(self.bits)
    }
}

/// Return the mean quality of the recovered bits spanning one symbol.
fn symbol_quality(recovered: Option<&[RecoveredBit]>, start: usize, width: usize) -> u8 {
    let Some(recovered) = recovered
    else {
        return u8::MAX;
    };
    match recovered.get(start..start + width) {
        Some(bits) if !bits.is_empty() => {
            let sum: u32 = bits.iter().map(|b| b.quality as u32).sum();
            (sum / bits.len() as u32) as u8
        }
        _ => 0,
    }
}

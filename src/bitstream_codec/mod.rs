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

    src/bitstream_codec/mod.rs

    Defines the LineCodec trait implemented by every supported track encoding, along
    with the sync window shared by all sync detectors.
*/

pub mod fm;
pub mod gcr_apple;
pub mod gcr_cbm;
pub mod m2fm;
pub mod mfm;
pub mod rll;

use crate::types::TrackDataEncoding;
use bit_vec::BitVec;
use dyn_clone::DynClone;
use std::fmt::{Display, Formatter};
use strum::IntoEnumIterator;
use thiserror::Error;

pub use fm::{FmCodec, TandyFmCodec};
pub use gcr_apple::{AgatCodec, Apple6Codec};
pub use gcr_cbm::CbmGcrCodec;
pub use m2fm::M2fmCodec;
pub use mfm::MfmCodec;
pub use rll::Rll27Codec;

/// Errors produced while decoding or encoding a single symbol.
/// Decode errors carry the best-effort value assembled from the cells that could be interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodecError {
    #[error("Illegal code word {word:#06X} (partial value {partial:#04X})")]
    IllegalCodeWord { word: u32, partial: u8 },
    #[error("Clock violation at cell {cell} (partial value {partial:#04X})")]
    ClockViolation { cell: usize, partial: u8 },
    #[error("Truncated symbol: expected {expected} cells, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("Symbol {symbol:#04X} out of range (maximum {max:#04X})")]
    SymbolOutOfRange { symbol: u8, max: u8 },
}

impl CodecError {
    /// Return the best-effort decoded value, if one is available.
    pub fn partial(&self) -> Option<u8> {
        match self {
            CodecError::IllegalCodeWord { partial, .. } => Some(*partial),
            CodecError::ClockViolation { partial, .. } => Some(*partial),
            _ => None,
        }
    }
}

/// The kind of marker a sync detector recognized.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncKind {
    /// A bare synchronization pattern whose meaning is given by the symbol that follows (MFM A1, RLL).
    Sync,
    /// An index address mark.
    IndexMark,
    /// A sector ID (address) mark or address field prologue.
    IdMark,
    /// A data mark or data field prologue.
    DataMark,
    /// A deleted data mark.
    DeletedDataMark,
}

impl Display for SyncKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncKind::Sync => write!(f, "Sync"),
            SyncKind::IndexMark => write!(f, "IAM"),
            SyncKind::IdMark => write!(f, "IDAM"),
            SyncKind::DataMark => write!(f, "DAM"),
            SyncKind::DeletedDataMark => write!(f, "DDAM"),
        }
    }
}

/// A cell pattern recognized by a sync detector. `pattern` holds the last `len` cells,
/// most recent cell in bit 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SyncWord {
    pub pattern: u64,
    pub len: u8,
    pub kind: SyncKind,
    /// The mark byte this pattern represents, if the pattern encodes one.
    pub mark: Option<u8>,
}

impl SyncWord {
    pub const fn new(pattern: u64, len: u8, kind: SyncKind, mark: Option<u8>) -> Self {
        Self {
            pattern,
            len,
            kind,
            mark,
        }
    }

    /// Return the cells of this sync word as a [BitVec], oldest cell first.
    pub fn to_bits(&self) -> BitVec {
        let mut bits = BitVec::with_capacity(self.len as usize);
        push_word(&mut bits, self.pattern, self.len as usize);
        bits
    }
}

/// A shift register over the most recent bit cells of a stream.
#[derive(Copy, Clone, Debug, Default)]
pub struct SyncWindow {
    bits:  u64,
    count: u64,
}

impl SyncWindow {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, bit: bool) {
        self.bits = (self.bits << 1) | (bit as u64);
        self.count = self.count.saturating_add(1);
    }

    /// Return true if the most recent `len` cells equal `pattern`.
    #[inline]
    pub fn matches(&self, pattern: u64, len: u8) -> bool {
        let len = len.min(64);
        if self.count < len as u64 {
            return false;
        }
        (self.bits & mask(len)) == pattern
    }

    #[inline]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Return the number of cells pushed since the window was created or cleared.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[inline]
fn mask(len: u8) -> u64 {
    if len >= 64 {
        u64::MAX
    }
    else {
        (1u64 << len) - 1
    }
}

/// Append the low `len` bits of `word` to `bits`, most significant first.
pub(crate) fn push_word(bits: &mut BitVec, word: u64, len: usize) {
    for i in (0..len.min(64)).rev() {
        bits.push((word >> i) & 1 != 0);
    }
}

/// Read `len` cells starting at `start` as an unsigned word, most significant first.
pub(crate) fn read_word(bits: &BitVec, start: usize, len: usize) -> Option<u64> {
    if len > 64 || start.checked_add(len)? > bits.len() {
        return None;
    }
    let mut word = 0u64;
    for i in start..start + len {
        word = (word << 1) | (bits.get(i)? as u64);
    }
    Some(word)
}

/// Copy `len` cells starting at `start` into a new [BitVec].
pub(crate) fn slice_cells(bits: &BitVec, start: usize, len: usize) -> Option<BitVec> {
    if start.checked_add(len)? > bits.len() {
        return None;
    }
    Some((start..start + len).filter_map(|i| bits.get(i)).collect())
}

/// The encode and decode operations of a single line code.
///
/// `prev_bit` carries the state of the previous symbol that influences clocking. For the
/// clocked codes this is the trailing state of the previous symbol as reported by
/// [LineCodec::trailing_state]; group codes ignore it.
///
/// All implementors must satisfy `decode(encode(b, p), p) == Ok(b)` for every symbol `b` up to
/// [LineCodec::max_symbol] and both values of `p`.
pub trait LineCodec: DynClone + Send + Sync {
    /// Return the [TrackDataEncoding] this codec implements.
    fn encoding(&self) -> TrackDataEncoding;

    fn cells_per_symbol(&self) -> usize {
        self.encoding().cells_per_symbol()
    }

    /// Return the largest encodable symbol.
    fn max_symbol(&self) -> u8 {
        0xFF
    }

    /// Encode a single symbol into bit cells.
    fn encode(&self, symbol: u8, prev_bit: bool) -> Result<BitVec, CodecError>;

    /// Decode exactly [LineCodec::cells_per_symbol] cells into a symbol.
    fn decode(&self, cells: &BitVec, prev_bit: bool) -> Result<u8, CodecError>;

    /// Return the state to pass as `prev_bit` to the symbol following `cells`.
    fn trailing_state(&self, cells: &BitVec) -> bool {
        cells.len().checked_sub(1).and_then(|i| cells.get(i)).unwrap_or(false)
    }

    /// Return the sync words recognized by this codec's sync detector.
    fn sync_words(&self) -> &'static [SyncWord];

    /// Check the most recent cells of a stream for one of this codec's marker patterns.
    fn sync_detector(&self, window: &SyncWindow) -> Option<SyncKind> {
        self.sync_word(window).map(|word| word.kind)
    }

    /// Like [LineCodec::sync_detector], but return the matching [SyncWord].
    fn sync_word(&self, window: &SyncWindow) -> Option<&'static SyncWord> {
        self.sync_words()
            .iter()
            .find(|word| window.matches(word.pattern, word.len))
    }

    /// Encode a buffer of symbols, chaining the trailing state of each symbol into the next.
    fn encode_buf(&self, data: &[u8], prev_bit: bool) -> Result<BitVec, CodecError> {
        let mut bits = BitVec::with_capacity(data.len() * self.cells_per_symbol());
        let mut prev = prev_bit;
        for &symbol in data {
            let cells = self.encode(symbol, prev)?;
            prev = self.trailing_state(&cells);
            bits.extend(cells.iter());
        }
        Ok(bits)
    }

    /// Decode as many whole symbols as `cells` contains, stopping at the first error.
    fn decode_buf(&self, cells: &BitVec, prev_bit: bool) -> Result<Vec<u8>, CodecError> {
        let width = self.cells_per_symbol();
        let mut out = Vec::with_capacity(cells.len() / width);
        let mut prev = prev_bit;
        let mut start = 0;
        while let Some(symbol_cells) = slice_cells(cells, start, width) {
            out.push(self.decode(&symbol_cells, prev)?);
            prev = self.trailing_state(&symbol_cells);
            start += width;
        }
        Ok(out)
    }

    /// Return true if code words may cross symbol boundaries. A run of such symbols must be
    /// encoded with [LineCodec::encode_buf] and decoded from its first symbol.
    fn spans_symbols(&self) -> bool {
        false
    }

    /// Decode `count` consecutive symbols starting at cell `start`, one result per symbol.
    /// Returns `None` if `cells` ends before the last symbol does.
    fn decode_run(
        &self,
        cells: &BitVec,
        start: usize,
        count: usize,
        prev_bit: bool,
    ) -> Option<Vec<Result<u8, CodecError>>> {
        let width = self.cells_per_symbol();
        let mut out = Vec::with_capacity(count);
        let mut prev = prev_bit;
        for i in 0..count {
            let symbol_cells = slice_cells(cells, start + i * width, width)?;
            out.push(self.decode(&symbol_cells, prev));
            prev = self.trailing_state(&symbol_cells);
        }
        Some(out)
    }
}

dyn_clone::clone_trait_object!(LineCodec);

/// Return a boxed codec for the specified encoding.
pub fn codec_for(encoding: TrackDataEncoding) -> Box<dyn LineCodec> {
    match encoding {
        TrackDataEncoding::Mfm => Box::new(MfmCodec),
        TrackDataEncoding::Fm => Box::new(FmCodec),
        TrackDataEncoding::TandyFm => Box::new(TandyFmCodec),
        TrackDataEncoding::M2fm => Box::new(M2fmCodec),
        TrackDataEncoding::GcrCbm => Box::new(CbmGcrCodec),
        TrackDataEncoding::GcrApple6 => Box::new(Apple6Codec),
        TrackDataEncoding::Agat => Box::new(AgatCodec),
        TrackDataEncoding::Rll27 => Box::new(Rll27Codec),
    }
}

/// Return one codec for every supported encoding.
pub fn all_codecs() -> Vec<Box<dyn LineCodec>> {
    TrackDataEncoding::iter().map(codec_for).collect()
}

/// Check that a symbol is within a codec's range.
pub(crate) fn check_symbol(symbol: u8, max: u8) -> Result<(), CodecError> {
    if symbol > max {
        Err(CodecError::SymbolOutOfRange { symbol, max })
    }
    else {
        Ok(())
    }
}

/// Check that a cell window holds exactly one symbol.
pub(crate) fn check_width(cells: &BitVec, expected: usize) -> Result<(), CodecError> {
    if cells.len() < expected {
        Err(CodecError::Truncated {
            expected,
            found: cells.len(),
        })
    }
    else {
        Ok(())
    }
}

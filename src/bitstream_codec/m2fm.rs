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

    src/bitstream_codec/m2fm.rs

    Implements M2FM (modified MFM) encoding and decoding.
*/

use crate::{
    bitstream_codec::{check_width, CodecError, LineCodec, SyncKind, SyncWord},
    types::TrackDataEncoding,
};
use bit_vec::BitVec;

pub const M2FM_BYTE_LEN: usize = 16;

// Marks are written with a D7 clock pattern, which places clock cells adjacent to data
// transitions and can never occur in legal M2FM.
pub const M2FM_IAM_MARKER: u64 = 0xF77A;
pub const M2FM_IDAM_MARKER: u64 = 0xF77E;
pub const M2FM_DAM_MARKER: u64 = 0xF76F;
pub const M2FM_DDAM_MARKER: u64 = 0xF76A;

static M2FM_SYNC_WORDS: [SyncWord; 4] = [
    SyncWord::new(M2FM_IAM_MARKER, 16, SyncKind::IndexMark, Some(0xFC)),
    SyncWord::new(M2FM_IDAM_MARKER, 16, SyncKind::IdMark, Some(0xFE)),
    SyncWord::new(M2FM_DAM_MARKER, 16, SyncKind::DataMark, Some(0xFB)),
    SyncWord::new(M2FM_DDAM_MARKER, 16, SyncKind::DeletedDataMark, Some(0xF8)),
];

/// M2FM writes a clock cell only when the previous data cell, the previous clock cell and the
/// current data cell are all empty.
///
/// `prev_bit` is true when either cell of the previous bit held a transition.
#[derive(Copy, Clone, Debug, Default)]
pub struct M2fmCodec;

impl LineCodec for M2fmCodec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::M2fm
    }

    fn encode(&self, symbol: u8, prev_bit: bool) -> Result<BitVec, CodecError> {
        let mut bits = BitVec::with_capacity(M2FM_BYTE_LEN);
        let mut prev = prev_bit;
        for i in (0..8).rev() {
            let data = symbol & (1 << i) != 0;
            let clock = !prev && !data;
            bits.push(clock);
            bits.push(data);
            prev = clock || data;
        }
        Ok(bits)
    }

    fn decode(&self, cells: &BitVec, prev_bit: bool) -> Result<u8, CodecError> {
        check_width(cells, M2FM_BYTE_LEN)?;
        let mut value = 0u8;
        let mut prev = prev_bit;
        let mut violation = None;
        for i in 0..8 {
            let clock = cells.get(i * 2).unwrap_or(false);
            let data = cells.get(i * 2 + 1).unwrap_or(false);
            if clock != (!prev && !data) && violation.is_none() {
                violation = Some(i * 2);
            }
            value = (value << 1) | data as u8;
            prev = clock || data;
        }
        match violation {
            Some(cell) => Err(CodecError::ClockViolation { cell, partial: value }),
            None => Ok(value),
        }
    }

    fn trailing_state(&self, cells: &BitVec) -> bool {
        let len = cells.len();
        len >= 2 && (cells.get(len - 2).unwrap_or(false) || cells.get(len - 1).unwrap_or(false))
    }

    fn sync_words(&self) -> &'static [SyncWord] {
        &M2FM_SYNC_WORDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream_codec::read_word;

    #[test]
    fn test_m2fm_zero_run() {
        // A run of zero bits alternates clocks, unlike MFM which clocks every zero
        let bits = M2fmCodec.encode(0x00, false).unwrap();
        assert_eq!(read_word(&bits, 0, 16), Some(0x8888));
        let bits = M2fmCodec.encode(0x00, true).unwrap();
        assert_eq!(read_word(&bits, 0, 16), Some(0x2222));
    }

    #[test]
    fn test_m2fm_no_adjacent_transitions() {
        for prev in [false, true] {
            for symbol in 0..=255u8 {
                let bits = M2fmCodec.encode(symbol, prev).unwrap();
                let word = read_word(&bits, 0, 16).unwrap();
                assert_eq!(word & (word >> 1), 0, "{:02X}", symbol);
            }
        }
    }

    #[test]
    fn test_m2fm_trailing_state() {
        let bits = M2fmCodec.encode(0x01, false).unwrap();
        assert!(M2fmCodec.trailing_state(&bits));
        // 0x00 after a transition ends on a clock-free pair
        let bits = M2fmCodec.encode(0x00, true).unwrap();
        assert!(M2fmCodec.trailing_state(&bits));
        let bits = M2fmCodec.encode(0x00, false).unwrap();
        assert!(!M2fmCodec.trailing_state(&bits));
    }
}

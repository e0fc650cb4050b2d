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

    src/bitstream_codec/mfm.rs

    Implements MFM encoding and decoding.
*/

use crate::{
    bitstream_codec::{check_width, CodecError, LineCodec, SyncKind, SyncWord},
    types::TrackDataEncoding,
};
use bit_vec::BitVec;

pub const MFM_BYTE_LEN: usize = 16;
/// The A1 sync byte with a missing clock between bits 4 and 5.
pub const MFM_SYNC_A1: u64 = 0x4489;
/// The C2 sync byte with a missing clock between bits 3 and 4.
pub const MFM_SYNC_C2: u64 = 0x5224;

static MFM_SYNC_WORDS: [SyncWord; 2] = [
    SyncWord::new(MFM_SYNC_A1, 16, SyncKind::Sync, Some(0xA1)),
    SyncWord::new(MFM_SYNC_C2, 16, SyncKind::IndexMark, Some(0xC2)),
];

/// MFM inserts a clock cell before each data cell when neither the previous nor the current
/// data bit is set.
#[derive(Copy, Clone, Debug, Default)]
pub struct MfmCodec;

impl LineCodec for MfmCodec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::Mfm
    }

    fn encode(&self, symbol: u8, prev_bit: bool) -> Result<BitVec, CodecError> {
        let mut bits = BitVec::with_capacity(MFM_BYTE_LEN);
        let mut prev = prev_bit;
        for i in (0..8).rev() {
            let data = symbol & (1 << i) != 0;
            bits.push(!(prev || data));
            bits.push(data);
            prev = data;
        }
        Ok(bits)
    }

    fn decode(&self, cells: &BitVec, prev_bit: bool) -> Result<u8, CodecError> {
        check_width(cells, MFM_BYTE_LEN)?;
        let mut value = 0u8;
        let mut prev = prev_bit;
        let mut violation = None;
        for i in 0..8 {
            let clock = cells.get(i * 2).unwrap_or(false);
            let data = cells.get(i * 2 + 1).unwrap_or(false);
            if clock != !(prev || data) && violation.is_none() {
                violation = Some(i * 2);
            }
            value = (value << 1) | data as u8;
            prev = data;
        }

        match violation {
            Some(cell) => Err(CodecError::ClockViolation { cell, partial: value }),
            None => Ok(value),
        }
    }

    fn sync_words(&self) -> &'static [SyncWord] {
        &MFM_SYNC_WORDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream_codec::{read_word, SyncWindow};

    #[test]
    fn test_mfm_encode_known() {
        // 0x00 after a zero bit is all clocks
        let bits = MfmCodec.encode(0x00, false).unwrap();
        assert_eq!(read_word(&bits, 0, 16), Some(0xAAAA));
        // 0x00 after a one bit drops the first clock
        let bits = MfmCodec.encode(0x00, true).unwrap();
        assert_eq!(read_word(&bits, 0, 16), Some(0x2AAA));
        let bits = MfmCodec.encode(0x4E, true).unwrap();
        assert_eq!(read_word(&bits, 0, 16), Some(0x1254));
        let bits = MfmCodec.encode(0xFE, false).unwrap();
        assert_eq!(read_word(&bits, 0, 16), Some(0x5554));
    }

    #[test]
    fn test_mfm_sync_violates_clock() {
        // A1 encodes as 0x44A9 normally, the sync drops one clock.
        let bits = MfmCodec.encode(0xA1, false).unwrap();
        assert_eq!(read_word(&bits, 0, 16), Some(0x44A9));

        let mut sync = BitVec::new();
        crate::bitstream_codec::push_word(&mut sync, MFM_SYNC_A1, 16);
        assert!(matches!(
            MfmCodec.decode(&sync, false),
            Err(CodecError::ClockViolation { partial: 0xA1, .. })
        ));
    }

    #[test]
    fn test_mfm_sync_detector() {
        let mut window = SyncWindow::new();
        for i in (0..16).rev() {
            window.push((MFM_SYNC_C2 >> i) & 1 != 0);
        }
        assert_eq!(MfmCodec.sync_detector(&window), Some(SyncKind::IndexMark));
    }
}

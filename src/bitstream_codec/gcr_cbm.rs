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

    src/bitstream_codec/gcr_cbm.rs

    Implements Commodore 4-to-5 GCR encoding and decoding.
*/

use crate::{
    bitstream_codec::{check_width, read_word, CodecError, LineCodec, SyncKind, SyncWord},
    types::TrackDataEncoding,
};
use bit_vec::BitVec;

pub const CBM_GCR_BYTE_LEN: usize = 10;

/// Nibble to 5-bit code word. No code word has more than two leading or trailing zeros, so
/// a stream never holds more than two consecutive zero cells.
pub const CBM_GCR_TABLE: [u8; 16] = [
    0b01010, 0b01011, 0b10010, 0b10011, 0b01110, 0b01111, 0b10110, 0b10111, 0b01001, 0b11001, 0b11010,
    0b11011, 0b01101, 0b11101, 0b11110, 0b10101,
];

const CBM_GCR_INVERSE: [u8; 32] = build_inverse();

const fn build_inverse() -> [u8; 32] {
    let mut table = [0xFF; 32];
    let mut i = 0;
    while i < 16 {
        table[CBM_GCR_TABLE[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Number of cells in a sync pattern: a run of one cells followed by a block ID code word.
/// Drives write a run of forty ones. FM data can hold runs of ten or more, so twenty are
/// required to match.
pub const CBM_SYNC_LEN: u8 = 30;
/// Twenty one cells followed by the code for 0x08 (header block ID).
pub const CBM_HEADER_SYNC: u64 = 0x3FFF_FD49;
/// Twenty one cells followed by the code for 0x07 (data block ID).
pub const CBM_DATA_SYNC: u64 = 0x3FFF_FD57;

static CBM_SYNC_WORDS: [SyncWord; 2] = [
    SyncWord::new(CBM_HEADER_SYNC, CBM_SYNC_LEN, SyncKind::IdMark, Some(0x08)),
    SyncWord::new(CBM_DATA_SYNC, CBM_SYNC_LEN, SyncKind::DataMark, Some(0x07)),
];

#[derive(Copy, Clone, Debug, Default)]
pub struct CbmGcrCodec;

impl LineCodec for CbmGcrCodec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::GcrCbm
    }

    fn encode(&self, symbol: u8, _prev_bit: bool) -> Result<BitVec, CodecError> {
        let word = (CBM_GCR_TABLE[(symbol >> 4) as usize] as u64) << 5 | CBM_GCR_TABLE[(symbol & 0x0F) as usize] as u64;
        let mut bits = BitVec::with_capacity(CBM_GCR_BYTE_LEN);
        crate::bitstream_codec::push_word(&mut bits, word, CBM_GCR_BYTE_LEN);
        Ok(bits)
    }

    fn decode(&self, cells: &BitVec, _prev_bit: bool) -> Result<u8, CodecError> {
        check_width(cells, CBM_GCR_BYTE_LEN)?;
        let word = read_word(cells, 0, CBM_GCR_BYTE_LEN).unwrap_or(0) as u32;
        let hi = CBM_GCR_INVERSE[((word >> 5) & 0x1F) as usize];
        let lo = CBM_GCR_INVERSE[(word & 0x1F) as usize];

        if hi == 0xFF || lo == 0xFF {
            let partial = ((hi & 0x0F) << 4) | (lo & 0x0F);
            return Err(CodecError::IllegalCodeWord { word, partial });
        }
        Ok((hi << 4) | lo)
    }

    fn sync_words(&self) -> &'static [SyncWord] {
        &CBM_SYNC_WORDS
    }
}

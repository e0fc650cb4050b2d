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

    src/bitstream_codec/fm.rs

    Implements FM encoding and decoding, and the Tandy FM variant.
*/

use crate::{
    bitstream_codec::{check_width, CodecError, LineCodec, SyncKind, SyncWord},
    types::TrackDataEncoding,
};
use bit_vec::BitVec;

pub const FM_BYTE_LEN: usize = 16;
/// A zero gap byte followed by a mark byte, both as FM cells.
pub const FM_MARKER_LEN: u8 = 32;

pub const FM_IAM_MARKER: u64 = 0xAAAA_F77A;
pub const FM_IDAM_MARKER: u64 = 0xAAAA_F57E;
pub const FM_DAM_MARKER: u64 = 0xAAAA_F56F;
pub const FM_DDAM_MARKER: u64 = 0xAAAA_F56A;
pub const TANDY_DAM_F9_MARKER: u64 = 0xAAAA_F56B;
pub const TANDY_DAM_FA_MARKER: u64 = 0xAAAA_F56E;

static FM_SYNC_WORDS: [SyncWord; 4] = [
    SyncWord::new(FM_IAM_MARKER, FM_MARKER_LEN, SyncKind::IndexMark, Some(0xFC)),
    SyncWord::new(FM_IDAM_MARKER, FM_MARKER_LEN, SyncKind::IdMark, Some(0xFE)),
    SyncWord::new(FM_DAM_MARKER, FM_MARKER_LEN, SyncKind::DataMark, Some(0xFB)),
    SyncWord::new(FM_DDAM_MARKER, FM_MARKER_LEN, SyncKind::DeletedDataMark, Some(0xF8)),
];

static TANDY_SYNC_WORDS: [SyncWord; 6] = [
    SyncWord::new(FM_IAM_MARKER, FM_MARKER_LEN, SyncKind::IndexMark, Some(0xFC)),
    SyncWord::new(FM_IDAM_MARKER, FM_MARKER_LEN, SyncKind::IdMark, Some(0xFE)),
    SyncWord::new(FM_DAM_MARKER, FM_MARKER_LEN, SyncKind::DataMark, Some(0xFB)),
    SyncWord::new(FM_DDAM_MARKER, FM_MARKER_LEN, SyncKind::DeletedDataMark, Some(0xF8)),
    SyncWord::new(TANDY_DAM_F9_MARKER, FM_MARKER_LEN, SyncKind::DataMark, Some(0xF9)),
    SyncWord::new(TANDY_DAM_FA_MARKER, FM_MARKER_LEN, SyncKind::DataMark, Some(0xFA)),
];

fn fm_encode(symbol: u8) -> BitVec {
    let mut bits = BitVec::with_capacity(FM_BYTE_LEN);
    for i in (0..8).rev() {
        bits.push(true);
        bits.push(symbol & (1 << i) != 0);
    }
    bits
}

fn fm_decode(cells: &BitVec) -> Result<u8, CodecError> {
    check_width(cells, FM_BYTE_LEN)?;
    let mut value = 0u8;
    let mut violation = None;
    for i in 0..8 {
        if !cells.get(i * 2).unwrap_or(false) && violation.is_none() {
            violation = Some(i * 2);
        }
        value = (value << 1) | cells.get(i * 2 + 1).unwrap_or(false) as u8;
    }
    match violation {
        Some(cell) => Err(CodecError::ClockViolation { cell, partial: value }),
        None => Ok(value),
    }
}

/// FM records a clock cell before every data cell.
#[derive(Copy, Clone, Debug, Default)]
pub struct FmCodec;

impl LineCodec for FmCodec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::Fm
    }

    fn encode(&self, symbol: u8, _prev_bit: bool) -> Result<BitVec, CodecError> {
        Ok(fm_encode(symbol))
    }

    fn decode(&self, cells: &BitVec, _prev_bit: bool) -> Result<u8, CodecError> {
        fm_decode(cells)
    }

    fn sync_words(&self) -> &'static [SyncWord] {
        &FM_SYNC_WORDS
    }
}

/// FM as written by the WD1771 based TRS-80 controllers, which additionally use the F9 and
/// FA data address marks.
#[derive(Copy, Clone, Debug, Default)]
pub struct TandyFmCodec;

impl LineCodec for TandyFmCodec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::TandyFm
    }

    fn encode(&self, symbol: u8, _prev_bit: bool) -> Result<BitVec, CodecError> {
        Ok(fm_encode(symbol))
    }

    fn decode(&self, cells: &BitVec, _prev_bit: bool) -> Result<u8, CodecError> {
        fm_decode(cells)
    }

    fn sync_words(&self) -> &'static [SyncWord] {
        &TANDY_SYNC_WORDS
    }
}

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

    src/bitstream_codec/rll.rs

    Implements IBM RLL(2,7) encoding and decoding.
*/

use crate::{
    bitstream_codec::{check_width, push_word, read_word, slice_cells, CodecError, LineCodec, SyncKind, SyncWord},
    types::TrackDataEncoding,
};
use bit_vec::BitVec;

pub const RLL_BYTE_LEN: usize = 16;
/// A one cell followed by eight zero cells, which exceeds the maximum run of legal data.
pub const RLL_SYNC: u64 = 0x8048;

static RLL_SYNC_WORDS: [SyncWord; 1] = [SyncWord::new(RLL_SYNC, 16, SyncKind::Sync, None)];

/// A variable length mapping of data bits to code cells.
#[derive(Copy, Clone, Debug)]
struct RllWord {
    data: u8,
    data_len: u8,
    code: u8,
    code_len: u8,
}

const fn rw(data: u8, data_len: u8, code: u8, code_len: u8) -> RllWord {
    RllWord {
        data,
        data_len,
        code,
        code_len,
    }
}

/// The IBM 2,7 code table. Both the data and code columns are prefix free, and the data column
/// is complete, so any bit sequence parses into table entries with at most three bits left over.
/// Every code word starts with at most four zero cells and ends with two or three, so any
/// concatenation of code words keeps runs of zeros between two and seven.
#[rustfmt::skip]
static RLL27_TABLE: [RllWord; 7] = [
    rw(0b10,   2, 0b0100,     4),
    rw(0b11,   2, 0b1000,     4),
    rw(0b000,  3, 0b000100,   6),
    rw(0b010,  3, 0b100100,   6),
    rw(0b011,  3, 0b001000,   6),
    rw(0b0010, 4, 0b00100100, 8),
    rw(0b0011, 4, 0b00001000, 8),
];

/// Code words for the bits left over when a stream ends inside a table entry. No table entry
/// matches the cells of a terminator, so a terminator can only be recognized where the cells
/// run out.
#[rustfmt::skip]
static RLL27_TERMINATORS: [RllWord; 5] = [
    rw(0b0,   1, 0b00,     2),
    rw(0b1,   1, 0b10,     2),
    rw(0b00,  2, 0b0000,   4),
    rw(0b01,  2, 0b0010,   4),
    rw(0b001, 3, 0b000010, 6),
];

/// Run Length Limited (2,7): every pair of one cells is separated by at least two and at most
/// seven zero cells.
///
/// Code words cover two to four data bits and so do not align with symbols. A run of symbols
/// is therefore encoded as one continuous stream, and a symbol in the middle of a run can only
/// be decoded by parsing the run from its first symbol. A single symbol encoded on its own is
/// closed with a terminator and occupies exactly [RLL_BYTE_LEN] cells, as does every symbol of
/// a stream on average.
#[derive(Copy, Clone, Debug, Default)]
pub struct Rll27Codec;

impl LineCodec for Rll27Codec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::Rll27
    }

    fn encode(&self, symbol: u8, _prev_bit: bool) -> Result<BitVec, CodecError> {
        encode_stream(&[symbol])
    }

    fn decode(&self, cells: &BitVec, _prev_bit: bool) -> Result<u8, CodecError> {
        check_width(cells, RLL_BYTE_LEN)?;
        let symbol_cells = slice_cells(cells, 0, RLL_BYTE_LEN).ok_or(CodecError::Truncated {
            expected: RLL_BYTE_LEN,
            found: cells.len(),
        })?;
        decode_stream(&symbol_cells, 0, 1)
            .pop()
            .unwrap_or(Err(CodecError::Truncated {
                expected: RLL_BYTE_LEN,
                found: 0,
            }))
    }

    fn sync_words(&self) -> &'static [SyncWord] {
        &RLL_SYNC_WORDS
    }

    fn spans_symbols(&self) -> bool {
        true
    }

    fn encode_buf(&self, data: &[u8], _prev_bit: bool) -> Result<BitVec, CodecError> {
        encode_stream(data)
    }

    fn decode_buf(&self, cells: &BitVec, _prev_bit: bool) -> Result<Vec<u8>, CodecError> {
        decode_stream(cells, 0, cells.len() / RLL_BYTE_LEN).into_iter().collect()
    }

    fn decode_run(
        &self,
        cells: &BitVec,
        start: usize,
        count: usize,
        _prev_bit: bool,
    ) -> Option<Vec<Result<u8, CodecError>>> {
        if start.checked_add(count.checked_mul(RLL_BYTE_LEN)?)? > cells.len() {
            return None;
        }
        Some(decode_stream(cells, start, count))
    }
}

/// Encode `data` as a single stream, closing it with a terminator if the last table entry is
/// incomplete.
fn encode_stream(data: &[u8]) -> Result<BitVec, CodecError> {
    let mut bits = BitVec::with_capacity(data.len() * RLL_BYTE_LEN);
    let mut word = 0u8;
    let mut word_len = 0u8;

    for &byte in data {
        for shift in (0..8).rev() {
            word = (word << 1) | ((byte >> shift) & 1);
            word_len += 1;
            if let Some(w) = RLL27_TABLE.iter().find(|w| w.data_len == word_len && w.data == word) {
                push_word(&mut bits, w.code as u64, w.code_len as usize);
                word = 0;
                word_len = 0;
            }
        }
    }

    if word_len > 0 {
        let w = RLL27_TERMINATORS
            .iter()
            .find(|w| w.data_len == word_len && w.data == word)
            .ok_or(CodecError::IllegalCodeWord {
                word: word as u32,
                partial: data.last().copied().unwrap_or(0),
            })?;
        push_word(&mut bits, w.code as u64, w.code_len as usize);
    }
    Ok(bits)
}

/// Parse `count` symbols from the stream starting at cell `start`. Each data bit occupies two
/// cells, so symbol `i` always begins at `start + i * 16` even though its first code word may
/// begin earlier. The last code word may extend past the final symbol's cells; the bits it
/// carries for the following symbol are discarded.
///
/// Cells that match no code word are consumed two at a time as zero bits, and the symbol they
/// fall in is reported as an [CodecError::IllegalCodeWord] carrying its partial value.
fn decode_stream(cells: &BitVec, start: usize, count: usize) -> Vec<Result<u8, CodecError>> {
    let total_bits = count * 8;
    let mut out = Vec::with_capacity(count);
    let mut value = 0u8;
    let mut value_len = 0;
    let mut illegal: Option<u32> = None;
    let mut decoded = 0usize;
    let mut pos = start;

    while decoded < total_bits {
        let avail = cells.len().saturating_sub(pos);
        if avail < 2 {
            break;
        }
        let needed = total_bits - decoded;
        let matches =
            |w: &&RllWord| (w.code_len as usize) <= avail && read_word(cells, pos, w.code_len as usize) == Some(w.code as u64);

        let entry = RLL27_TABLE.iter().find(matches).or_else(|| {
            RLL27_TERMINATORS
                .iter()
                .filter(|w| w.data_len as usize == needed && w.code_len as usize == avail)
                .find(matches)
        });

        let (data, data_len, code_len) = match entry {
            Some(w) => (w.data, w.data_len, w.code_len as usize),
            None => {
                if illegal.is_none() {
                    illegal = Some(read_word(cells, pos, avail.min(8)).unwrap_or(0) as u32);
                }
                (0, 1, 2)
            }
        };

        for shift in (0..data_len).rev() {
            if decoded == total_bits {
                break;
            }
            value = (value << 1) | ((data >> shift) & 1);
            value_len += 1;
            decoded += 1;
            if value_len == 8 {
                out.push(match illegal.take() {
                    Some(word) => Err(CodecError::IllegalCodeWord { word, partial: value }),
                    None => Ok(value),
                });
                value = 0;
                value_len = 0;
            }
        }
        pos += code_len;
    }

    while out.len() < count {
        out.push(Err(CodecError::Truncated {
            expected: RLL_BYTE_LEN,
            found: cells.len().saturating_sub(start + out.len() * RLL_BYTE_LEN),
        }));
    }
    out
}

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

    src/bitstream_codec/gcr_apple.rs

    Implements 6-and-2 GCR as used by Apple II and Agat disk controllers.
*/

//! The 6-and-2 code maps each 6-bit value to one of 64 disk nibbles. Every nibble has its high
//! bit set, no more than one pair of adjacent zero bits, and at least one pair of adjacent one
//! bits below bit 7. The reserved nibbles 0xAA and 0xD5 never occur in data, which keeps the
//! field prologues unique.
//!
//! Higher layers are responsible for splitting sector bytes into 6-bit symbols (the "2" in 6-and-2).

use crate::{
    bitstream_codec::{check_symbol, check_width, push_word, read_word, CodecError, LineCodec, SyncKind, SyncWord},
    types::TrackDataEncoding,
};
use bit_vec::BitVec;

pub const GCR6_SYMBOL_LEN: usize = 8;
pub const GCR6_MAX_SYMBOL: u8 = 0x3F;

#[rustfmt::skip]
pub const GCR6_TABLE: [u8; 64] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6,
    0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3,
    0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC,
    0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3,
    0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE,
    0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC,
    0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6,
    0xF7, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];

const GCR6_INVERSE: [u8; 256] = build_inverse();

const fn build_inverse() -> [u8; 256] {
    let mut table = [0xFF; 256];
    let mut i = 0;
    while i < 64 {
        table[GCR6_TABLE[i] as usize] = i as u8;
        i += 1;
    }
    table
}

pub const APPLE_ADDRESS_PROLOGUE: u64 = 0xD5_AA96;
pub const APPLE_DATA_PROLOGUE: u64 = 0xD5_AAAD;
pub const AGAT_ADDRESS_PROLOGUE: u64 = 0xD5_AA95;
pub const AGAT_DATA_PROLOGUE: u64 = 0xD5_AA6A;

static APPLE_SYNC_WORDS: [SyncWord; 2] = [
    SyncWord::new(APPLE_ADDRESS_PROLOGUE, 24, SyncKind::IdMark, None),
    SyncWord::new(APPLE_DATA_PROLOGUE, 24, SyncKind::DataMark, None),
];

static AGAT_SYNC_WORDS: [SyncWord; 2] = [
    SyncWord::new(AGAT_ADDRESS_PROLOGUE, 24, SyncKind::IdMark, None),
    SyncWord::new(AGAT_DATA_PROLOGUE, 24, SyncKind::DataMark, None),
];

fn gcr6_encode(symbol: u8) -> Result<BitVec, CodecError> {
    check_symbol(symbol, GCR6_MAX_SYMBOL)?;
    let mut bits = BitVec::with_capacity(GCR6_SYMBOL_LEN);
    push_word(&mut bits, GCR6_TABLE[symbol as usize] as u64, GCR6_SYMBOL_LEN);
    Ok(bits)
}

fn gcr6_decode(cells: &BitVec) -> Result<u8, CodecError> {
    check_width(cells, GCR6_SYMBOL_LEN)?;
    let word = read_word(cells, 0, GCR6_SYMBOL_LEN).unwrap_or(0) as u32;
    match GCR6_INVERSE[(word & 0xFF) as usize] {
        0xFF => Err(CodecError::IllegalCodeWord {
            word,
            partial: (word & 0x3F) as u8,
        }),
        value => Ok(value),
    }
}

/// Apple II 6-and-2 (DOS 3.3 and ProDOS) disk nibbles.
#[derive(Copy, Clone, Debug, Default)]
pub struct Apple6Codec;

impl LineCodec for Apple6Codec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::GcrApple6
    }

    fn max_symbol(&self) -> u8 {
        GCR6_MAX_SYMBOL
    }

    fn encode(&self, symbol: u8, _prev_bit: bool) -> Result<BitVec, CodecError> {
        gcr6_encode(symbol)
    }

    fn decode(&self, cells: &BitVec, _prev_bit: bool) -> Result<u8, CodecError> {
        gcr6_decode(cells)
    }

    fn sync_words(&self) -> &'static [SyncWord] {
        &APPLE_SYNC_WORDS
    }
}

/// Agat 140K 6-and-2 disk nibbles. The nibble alphabet matches the Apple II, only the field
/// prologues differ.
#[derive(Copy, Clone, Debug, Default)]
pub struct AgatCodec;

impl LineCodec for AgatCodec {
    fn encoding(&self) -> TrackDataEncoding {
        TrackDataEncoding::Agat
    }

    fn max_symbol(&self) -> u8 {
        GCR6_MAX_SYMBOL
    }

    fn encode(&self, symbol: u8, _prev_bit: bool) -> Result<BitVec, CodecError> {
        gcr6_encode(symbol)
    }

    fn decode(&self, cells: &BitVec, _prev_bit: bool) -> Result<u8, CodecError> {
        gcr6_decode(cells)
    }

    fn sync_words(&self) -> &'static [SyncWord] {
        &AGAT_SYNC_WORDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcr6_table_properties() {
        for &nibble in GCR6_TABLE.iter() {
            assert!(nibble & 0x80 != 0);
            assert_ne!(nibble, 0xAA);
            assert_ne!(nibble, 0xD5);
        }
        let mut sorted = GCR6_TABLE.to_vec();
        sorted.dedup();
        assert_eq!(sorted.len(), 64);
    }

    #[test]
    fn test_gcr6_out_of_range() {
        assert_eq!(
            Apple6Codec.encode(0x40, false),
            Err(CodecError::SymbolOutOfRange { symbol: 0x40, max: 0x3F })
        );
        assert!(AgatCodec.encode(0xFF, true).is_err());
    }

    #[test]
    fn test_gcr6_reserved_nibble() {
        let mut bits = BitVec::new();
        push_word(&mut bits, 0xD5, 8);
        assert!(matches!(
            Apple6Codec.decode(&bits, false),
            Err(CodecError::IllegalCodeWord { word: 0xD5, .. })
        ));
    }
}

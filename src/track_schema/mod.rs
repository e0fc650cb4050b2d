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

    src/track_schema/mod.rs

    Defines the sector record produced by track layout parsing.
*/

//! The `track_schema` module interprets the layout of syncs, gaps and address marks on a
//! recovered track, relying on a [LineCodec](crate::bitstream_codec::LineCodec) to decode the
//! underlying data representation.
//!
//! A schema also defines the layout of a track for formatting operations, and the CRC that
//! protects each field.
//!
//! Only the IBM System 34 layout is implemented. It covers FM, Tandy FM, MFM, M2FM and
//! RLL(2,7) tracks.

pub mod system34;

pub use system34::{FormatSector, System34Marker, System34Schema, System34Variant};

use crate::types::{DiskChsn, TrackDataEncoding};

/// An address mark found on a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackMarkerItem {
    pub marker: System34Marker,
    /// The address mark byte.
    pub mark: u8,
    /// Bit offset of the first sync cell.
    pub start: usize,
    /// Bit offset of the mark byte, if the mark is encoded as a symbol after the sync.
    pub mark_start: Option<usize>,
    /// Bit offset of the first cell after the mark.
    pub end: usize,
    /// Clocking state carried into the first symbol after the mark.
    pub prev: bool,
}

/// A sector recovered from a track.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sector {
    /// The sector ID as recorded in the ID field.
    pub id: DiskChsn,
    pub encoding: TrackDataEncoding,
    pub id_crc_ok: bool,
    /// Sector data, excluding the CRC. Empty if no data field was found.
    pub data: Vec<u8>,
    pub data_crc_ok: bool,
    /// The sector was written with a deleted data address mark.
    pub deleted: bool,
    /// The data address mark byte, if a data field was found.
    pub data_mark: Option<u8>,
    pub recorded_crc: u16,
    pub calculated_crc: u16,
    /// Quality weight of each byte of the data field, including the two CRC bytes.
    pub quality: Vec<u8>,
    /// Number of symbols in the ID and data fields that failed to decode.
    pub decode_errors: u32,
    /// Bit offset of the ID address mark.
    pub id_offset: usize,
    /// Bit offset of the data address mark.
    pub data_offset: Option<usize>,
}

impl Sector {
    /// Return true if both the ID and data fields passed their CRC check.
    pub fn is_good(&self) -> bool {
        self.id_crc_ok && self.data_crc_ok
    }

    pub fn has_data(&self) -> bool {
        self.data_offset.is_some()
    }

    /// Return the CRC of the data field as recorded on the track.
    pub fn recorded_crc_bytes(&self) -> [u8; 2] {
        self.recorded_crc.to_be_bytes()
    }

    /// Return the mean quality weight of the data field.
    pub fn mean_quality(&self) -> u8 {
        if self.quality.is_empty() {
            return 0;
        }
        let sum: u64 = self.quality.iter().map(|&q| q as u64).sum();
        (sum / self.quality.len() as u64) as u8
    }
}

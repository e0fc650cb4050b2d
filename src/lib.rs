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
*/

//! # fluxfox_recovery
//!
//! A library for recovering data from raw flux transition captures of floppy and legacy hard
//! disks.
//!
//! Recovery proceeds in stages:
//!  - A [FluxCapture] is decoded into bit cells by the digital [Pll] in the [flux] module.
//!  - The [EncodingClassifier] identifies the line code of the recovered bits, and the
//!    [InterfaceProfiler] combines that result with timing evidence into a [DriveProfile].
//!  - A [LineCodec] from the [bitstream_codec] module decodes symbols, and the
//!    [System34Schema] locates and checks the sectors of a track.
//!  - [MultipassSession] merges repeated reads of a track to recover sectors that fail their
//!    CRC on a single read.

pub mod bitstream_codec;
mod cancel;
pub mod crc;
pub mod detect;
pub mod flux;
pub mod multipass;
pub mod track_schema;
pub mod types;

use thiserror::Error;

pub use crate::bitstream_codec::CodecError;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum RecoveryError {
    #[error("A decoding error occurred: {0}")]
    Decode(#[from] CodecError),
    #[error("A CRC error was detected: recorded {recorded:04X}, calculated {calculated:04X}")]
    CrcMismatch { recorded: u16, calculated: u16 },
    #[error("The encoding could not be determined with sufficient confidence")]
    ClassificationInconclusive,
    #[error("The PLL failed to lock: lock quality {lock_quality}")]
    PllUnlocked { lock_quality: u8 },
    #[error("Invalid parameters were specified to a library function: {0}")]
    ParameterError(String),
    #[error("The operation was cancelled")]
    Cancelled,
    #[error("No flux capture was available")]
    NoCapture,
}

pub use crate::{
    bitstream_codec::{all_codecs, codec_for, LineCodec, SyncKind, SyncWindow, SyncWord},
    cancel::CancelToken,
    crc::{crc16, Crc16},
    detect::{
        Classification,
        ClassifierConfig,
        DriveProfile,
        EncodingClassifier,
        EncodingScoreboard,
        InterfaceProfiler,
        ProfilerConfig,
    },
    flux::{
        FluxCapture,
        FluxEvent,
        FluxHistogram,
        MarginZone,
        Pll,
        PllConfig,
        PllDecodeResult,
        PllState,
        RecoveredBit,
    },
    multipass::{
        MultipassConfig,
        MultipassResult,
        MultipassSession,
        PassSource,
        RecoveredSector,
        RecoveryStatus,
        TrackSummary,
    },
    track_schema::{FormatSector, Sector, System34Schema},
    types::{
        DiskChsn,
        DiskInterface,
        DiskPhysicalDimensions,
        DiskRpm,
        SignalLines,
        TrackCount,
        TrackDataEncoding,
        TrackDataRate,
        TrackDensity,
    },
};

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

    tests/common/mod.rs

    Common support routines for tests: synthetic tracks and flux captures
*/
#![allow(dead_code)]

use bit_vec::BitVec;
use fluxfox_recovery::{
    codec_for,
    track_schema::Sector,
    DiskChsn,
    DiskRpm,
    FluxCapture,
    FormatSector,
    PllConfig,
    System34Schema,
    TrackDataEncoding,
    TrackDataRate,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Capture resolution used by synthetic captures.
pub const TICK_NS: f64 = 25.0;
/// 2μs bit cells, as written at 250Kbps in a 300RPM drive.
pub const CELL_TICKS: f64 = 80.0;
/// Bit cells in one revolution at 300RPM.
pub const TRACK_CELLS: usize = 100_000;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn pll_config() -> PllConfig {
    PllConfig::for_rate(TrackDataRate::Rate250Kbps(1.0), DiskRpm::Rpm300(1.0), TICK_NS)
}

/// Build `count` sectors of size code `n` on the specified cylinder, filled with seeded random
/// data.
pub fn random_sectors(cylinder: u16, count: u8, n: u8, seed: u64) -> Vec<FormatSector> {
    let mut rng = StdRng::seed_from_u64(seed);
    (1..=count)
        .map(|s| {
            let id = DiskChsn::new(cylinder, 0, s, n);
            let data = (0..id.n_size()).map(|_| rng.gen()).collect();
            FormatSector::new(id, data)
        })
        .collect()
}

/// Format a track and pad it with gap bytes to exactly one revolution.
pub fn format_track(encoding: TrackDataEncoding, sectors: &[FormatSector]) -> BitVec {
    let schema = System34Schema::new(encoding).unwrap();
    let mut track = schema.format_track(sectors, 22).unwrap();
    assert!(track.len() <= TRACK_CELLS, "track too long: {} cells", track.len());

    let codec = codec_for(encoding);
    let prev = codec.trailing_state(&track);
    let pad = (TRACK_CELLS - track.len()) / codec.cells_per_symbol();
    let gap = vec![schema.variant().gap_byte(); pad];
    track.extend(codec.encode_buf(&gap, prev).unwrap().iter());
    while track.len() < TRACK_CELLS {
        track.push(false);
    }
    track
}

/// Convert a track bitstream into a flux capture of `revolutions` revolutions.
///
/// Every transition is displaced by up to `jitter` cells, and the whole capture is stretched
/// by `speed` (1.0 is nominal, 1.02 is media running 2% slow). An index pulse is placed at the
/// start of every revolution and at the end of the capture.
pub fn track_to_capture(track: &BitVec, revolutions: usize, speed: f64, jitter: f64, seed: u64) -> FluxCapture {
    let mut rng = StdRng::seed_from_u64(seed);
    let cell = CELL_TICKS * speed;
    let mut ticks = Vec::new();
    let mut index_times = Vec::new();
    let mut last = 0.0;

    for rev in 0..revolutions {
        let base = rev * track.len();
        index_times.push((base as f64 * cell).round() as u64);
        for (i, bit) in track.iter().enumerate() {
            if !bit {
                continue;
            }
            let offset = if jitter > 0.0 {
                rng.gen_range(-jitter..jitter) * cell
            }
            else {
                0.0
            };
            let t = ((base + i + 1) as f64 * cell + offset).round();
            ticks.push((t - last) as u32);
            last = t;
        }
    }
    index_times.push(((revolutions * track.len()) as f64 * cell).round() as u64);

    FluxCapture::from_ticks(&ticks, index_times, TICK_NS).unwrap()
}

/// Return the cell offset of data byte `index` of an MFM sector.
pub fn mfm_data_cell(sector: &Sector, index: usize) -> usize {
    // Three A1 syncs and the mark byte precede the data.
    sector.data_offset.unwrap() + 64 + index * 16
}

/// Re-encode the MFM symbol at `cell` with its value XORed with `mask`. The lowest data bit
/// must be left unchanged so the clocking of the following symbol stays valid.
pub fn corrupt_mfm_byte(track: &mut BitVec, cell: usize, mask: u8) {
    assert_eq!(mask & 0x01, 0);
    let codec = codec_for(TrackDataEncoding::Mfm);
    let prev = cell > 0 && track[cell - 1];
    let cells: BitVec = track.iter().skip(cell).take(16).collect();
    let value = codec.decode(&cells, prev).unwrap();
    let encoded = codec.encode(value ^ mask, prev).unwrap();
    for (i, bit) in encoded.iter().enumerate() {
        track.set(cell + i, bit);
    }
}

mod common;

use bit_vec::BitVec;
use common::*;
use fluxfox_recovery::{
    multipass::Resolution,
    CancelToken,
    FluxCapture,
    FormatSector,
    MultipassConfig,
    MultipassSession,
    RecoveryError,
    RecoveryStatus,
    System34Schema,
    TrackDataEncoding,
};

const SECTORS: u8 = 9;

fn sectors() -> Vec<FormatSector> {
    random_sectors(10, SECTORS, 2, 0xD15C)
}

fn session(config: MultipassConfig) -> MultipassSession {
    MultipassSession::new(config, pll_config(), TrackDataEncoding::Mfm).unwrap()
}

/// A capture of a track with sector 3 recorded with a bad data CRC.
fn bad_crc_capture(seed: u64) -> FluxCapture {
    let mut sectors = sectors();
    sectors[2].bad_data_crc = true;
    track_to_capture(&format_track(TrackDataEncoding::Mfm, &sectors), 1, 1.0, 0.02, seed)
}

fn good_capture(seed: u64) -> FluxCapture {
    track_to_capture(&format_track(TrackDataEncoding::Mfm, &sectors()), 1, 1.0, 0.02, seed)
}

/// A capture with single bytes of sector 5 corrupted at the given offsets.
fn corrupted_capture(offsets: &[usize], jitter: f64, seed: u64) -> FluxCapture {
    let mut track: BitVec = format_track(TrackDataEncoding::Mfm, &sectors());
    let schema = System34Schema::new(TrackDataEncoding::Mfm).unwrap();
    let parsed = schema.parse_sectors(&track, None);
    let sector = &parsed[4];
    for &offset in offsets {
        corrupt_mfm_byte(&mut track, mfm_data_cell(sector, offset), 0x10);
    }
    track_to_capture(&track, 1, 1.0, jitter, seed)
}

#[test]
fn test_second_pass_completes() {
    init();
    let mut session = session(MultipassConfig::default());
    let cancel = CancelToken::new();

    assert_eq!(session.run_pass(&bad_crc_capture(1), &cancel).unwrap(), RecoveryStatus::Pending);
    let partial = session.result();
    assert_eq!(partial.sectors.len(), SECTORS as usize);
    assert!(!partial.all_good());

    assert_eq!(session.run_pass(&good_capture(2), &cancel).unwrap(), RecoveryStatus::Complete);
    let result = session.result();
    assert_eq!(result.passes, 2);
    assert!(result.all_good());
    for (sector, written) in result.sectors.iter().zip(sectors().iter()) {
        assert_eq!(sector.id, written.id);
        assert_eq!(sector.resolution, Resolution::Clean);
        assert_eq!(sector.data, written.data);
    }
    assert_eq!(result.pass_metadata.len(), 2);
    assert_eq!(result.pass_metadata[0].sectors_good, SECTORS as usize - 1);
    assert_eq!(result.pass_metadata[1].sectors_good, SECTORS as usize);
    assert!((result.pass_metadata[0].index_time - 0.2).abs() < 1e-6);

    // A complete session merges nothing further.
    assert_eq!(session.run_pass(&bad_crc_capture(3), &cancel).unwrap(), RecoveryStatus::Complete);
    assert_eq!(session.passes(), 2);
}

#[test]
fn test_run_stops_when_complete() {
    init();
    let mut session = session(MultipassConfig::default());
    let mut source = vec![bad_crc_capture(1), good_capture(2), good_capture(3)].into_iter();

    let result = session.run(&mut source, &CancelToken::new()).unwrap();
    assert_eq!(result.status, RecoveryStatus::Complete);
    assert_eq!(result.passes, 2);
    // The third capture was never requested.
    assert_eq!(source.len(), 1);
}

#[test]
fn test_consensus_across_passes() {
    init();
    let config = MultipassConfig {
        use_crc_correction: false,
        ..MultipassConfig::default()
    };
    let mut session = session(config);
    let written = &sectors()[4];

    // Without jitter every byte carries the same weight, and a tied vote goes to the lower value.
    // Clearing bit 4 at `a` and `b` makes the corrupted value win both ties after two passes.
    let mut set = (0..written.data.len()).filter(|&i| written.data[i] & 0x10 != 0);
    let a = set.next().unwrap();
    let b = set.nth(20).unwrap();
    let c = (0..written.data.len()).find(|&i| written.data[i] & 0x10 == 0).unwrap();

    let mut source = vec![
        corrupted_capture(&[a], 0.0, 1),
        corrupted_capture(&[b], 0.0, 2),
        corrupted_capture(&[c], 0.0, 3),
    ]
    .into_iter()
    .chain((4..9).map(|seed| corrupted_capture(&[c], 0.0, seed)));

    let cancel = CancelToken::new();
    assert_eq!(session.run_pass(&source.next().unwrap(), &cancel).unwrap(), RecoveryStatus::Pending);
    assert_eq!(session.run_pass(&source.next().unwrap(), &cancel).unwrap(), RecoveryStatus::Pending);
    assert!(!session.result().all_good());

    // The third pass breaks every tie, and no sector is ever read cleanly.
    let result = session.run(&mut source, &CancelToken::new()).unwrap();
    assert_eq!(result.status, RecoveryStatus::Complete);
    assert!(!result.is_best_effort());
    assert_eq!(result.passes, 3);
    assert_eq!(source.count(), 5);

    let sector = result.sector(written.id).unwrap();
    assert_eq!(sector.resolution, Resolution::Consensus);
    assert!(sector.crc_ok);
    assert_eq!(sector.data, written.data);
    assert_eq!(sector.instances, 3);
    assert_eq!(sector.agreement[a], 2);
    assert_eq!(sector.agreement[c], 2);
    let mut weak = vec![a, b, c];
    weak.sort();
    assert_eq!(sector.weak_positions, weak);
    assert!(sector.confidence_min < 90);

    // Every other sector was read cleanly.
    assert!(result
        .sectors
        .iter()
        .filter(|s| s.id != written.id)
        .all(|s| s.resolution == Resolution::Clean));
    assert!(result.all_good());
    assert_eq!(result.summary.sectors_recovered, SECTORS as usize);
    assert_eq!(result.summary.sectors_failed, 0);
}

#[test]
fn test_merged_sector_stops_run() {
    init();
    let mut session = session(MultipassConfig::default());
    let written = &sectors()[4];
    let offsets = [3, 100, 250, 400, 500, 17, 333, 444];
    let mut source = offsets.iter().zip(1..).map(|(&offset, seed)| corrupted_capture(&[offset], 0.02, seed));

    // No pass reads sector 5 cleanly, but three passes outvote every corrupted byte.
    let result = session.run(&mut source, &CancelToken::new()).unwrap();
    assert_eq!(result.status, RecoveryStatus::Complete);
    assert!(result.passes <= 3);
    let sector = result.sector(written.id).unwrap();
    assert!(sector.crc_ok);
    assert_ne!(sector.resolution, Resolution::Clean);
    assert_eq!(sector.data, written.data);
}

#[test]
fn test_budget_exhausted() {
    init();
    let config = MultipassConfig {
        pass_budget: 2,
        use_crc_correction: false,
        ..MultipassConfig::default()
    };
    let mut session = session(config);
    let mut source = (1..10).map(bad_crc_capture);

    let result = session.run(&mut source, &CancelToken::new()).unwrap();
    assert_eq!(result.status, RecoveryStatus::BestEffort);
    assert_eq!(result.passes, 2);

    let sector = &result.sectors[2];
    assert!(!sector.crc_ok);
    assert_eq!(sector.resolution, Resolution::Unresolved);
    assert_eq!(sector.data, sectors()[2].data);
    assert_eq!(sector.recorded_crc, sector.calculated_crc ^ 0xFFFF);
    assert!(!result.all_good());

    assert_eq!(result.summary.sector_count, SECTORS as usize);
    assert_eq!(result.summary.sectors_recovered, SECTORS as usize - 1);
    // Both passes agree on every byte of the bad sector.
    assert_eq!(result.summary.sectors_partial, 1);
    assert_eq!(result.summary.sectors_failed, 0);
    assert_eq!(result.summary.overall_confidence, 100);
}

#[test]
fn test_cancelled_pass_is_discarded() {
    init();
    let mut session = session(MultipassConfig::default());
    let cancel = CancelToken::new();
    session.run_pass(&bad_crc_capture(1), &cancel).unwrap();
    let before = session.result();

    cancel.cancel();
    assert!(matches!(
        session.run_pass(&good_capture(2), &cancel),
        Err(RecoveryError::Cancelled)
    ));
    assert_eq!(session.passes(), 1);
    assert_eq!(session.result(), before);

    cancel.reset();
    assert_eq!(session.run_pass(&good_capture(2), &cancel).unwrap(), RecoveryStatus::Complete);
}

#[test]
fn test_batch_matches_sequential() {
    init();
    let captures = vec![bad_crc_capture(1), corrupted_capture(&[7], 0.02, 2), good_capture(3)];

    let mut sequential = session(MultipassConfig::default());
    let cancel = CancelToken::new();
    for capture in captures.iter() {
        sequential.run_pass(capture, &cancel).unwrap();
    }

    let mut batch = session(MultipassConfig::default());
    let result = batch.run_batch(&captures, &cancel).unwrap();
    assert_eq!(result, sequential.result());
    assert_eq!(result.status, RecoveryStatus::Complete);
    // The second pass supplies the last missing sector; the third is not merged.
    assert_eq!(result.passes, 2);
}

#[test]
fn test_no_capture() {
    init();
    let mut session = session(MultipassConfig::default());
    let mut empty = std::iter::empty::<FluxCapture>();
    assert!(matches!(
        session.run(&mut empty, &CancelToken::new()),
        Err(RecoveryError::NoCapture)
    ));
    assert!(matches!(
        session.run_batch(&[], &CancelToken::new()),
        Err(RecoveryError::NoCapture)
    ));
}

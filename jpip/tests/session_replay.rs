use parking_lot::Mutex;
use proptest::prelude::*;
use std::io;
use std::sync::Arc;

use jpip::{
    Arrival, DatabinId, PrecinctPosition, ProgressCallback, QualityLayers, Region, Session,
    SessionError,
};

fn vbas(value: u64) -> Vec<u8> {
    let mut groups = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        groups.push((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    groups.reverse();
    groups
}

// JPP-stream message with explicit class and codestream.
fn message(class_id: u64, in_class_id: u64, offset: u64, bytes: &[u8], is_last: bool) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut rest = in_class_id;
    while rest >= 16 {
        tail.push((rest & 0x7F) as u8);
        rest >>= 7;
    }
    tail.reverse();
    let mut out = vec![0b0110_0000 | (is_last as u8) << 4 | rest as u8];
    out.extend(tail);
    let last = out.len() - 1;
    for byte in &mut out[..last] {
        *byte |= 0x80;
    }
    out.extend(vbas(class_id));
    out.extend(vbas(0));
    out.extend(vbas(offset));
    out.extend(vbas(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out
}

// 256x128 single component image, 128x128 tiles, one decomposition level, 32x32 codeblocks,
// two quality layers, no SOP or EPH, one precinct per resolution level.
fn main_header() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0x4F];
    bytes.extend_from_slice(&[0xFF, 0x51, 0x00, 0x29, 0x00, 0x00]);
    for value in [256u32, 128, 0, 0, 128, 128, 0, 0] {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    bytes.extend_from_slice(&[0x00, 0x01, 0x07, 0x01, 0x01]);
    bytes.extend_from_slice(&[
        0xFF, 0x52, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x03, 0x03, 0x00, 0x01,
    ]);
    bytes
}

// Two layers of a precinct with one 2x2 codeblock subband: layer 0 ends at 10, layer 1 at 25.
fn lowest_resolution_packets() -> Vec<u8> {
    let mut bytes = vec![0xE3, 0x29, 0x44];
    bytes.extend(0u8..7);
    bytes.extend_from_slice(&[0xE1, 0xCA, 0x90]);
    bytes.extend(100u8..112);
    bytes
}

fn arrival(class_id: u64, in_class_id: u64, offset: u64, bytes: &[u8], is_last: bool) -> Arrival {
    Arrival {
        class_id,
        in_class_id,
        offset,
        bytes,
        is_last_byte: is_last,
        codestream_index: 0,
    }
}

// Session holding the main header and both (empty) tile headers.
fn session_with_headers() -> Session {
    let session = Session::default();
    session
        .add_data(arrival(6, 0, 0, &main_header(), true))
        .unwrap();
    session.add_data(arrival(2, 0, 0, &[], true)).unwrap();
    session.add_data(arrival(2, 1, 0, &[], true)).unwrap();
    session
}

fn recorder() -> (Arc<Mutex<Vec<QualityLayers>>>, ProgressCallback) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    (reports, Box::new(move |layers| sink.lock().push(layers)))
}

// Lowest resolution level of one tile.
fn thumbnail(tile: u32) -> Region {
    Region {
        x: tile * 128,
        y: 0,
        width: 128,
        height: 128,
        discard_levels: 1,
    }
}

fn lowest_resolution(tile: u32) -> PrecinctPosition {
    PrecinctPosition {
        tile,
        component: 0,
        resolution: 0,
        precinct: 0,
    }
}

#[test]
fn test_jpp_stream_end_to_end() {
    let mut stream = message(6, 0, 0, &main_header(), true);
    stream.extend(message(2, 0, 0, &[], true));
    stream.extend(message(2, 1, 0, &[], true));
    // tile 0: precinct of resolution 0, then the one of resolution 1 with two empty packets
    stream.extend(message(0, 0, 0, &lowest_resolution_packets(), true));
    stream.extend(message(0, 2, 0, &[0x00, 0x00], true));
    stream.extend_from_slice(&[0x00, 0x01, 0x00]);

    let session = Session::default();
    let reports = session.add_jpp_stream(io::Cursor::new(stream)).unwrap();
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|report| report.completed));
    assert_eq!(session.structure().unwrap().geometry.num_tiles(), 2);

    let (progress, callback) = recorder();
    let region = Region {
        discard_levels: 0,
        ..thumbnail(0)
    };
    let tracker = session.track_region(&region, None, callback).unwrap();
    assert_eq!(*progress.lock(), vec![QualityLayers::Max]);
    assert_eq!(session.tracker_minimum(tracker).unwrap(), QualityLayers::Max);

    let codeblocks = session
        .codeblocks(&lowest_resolution(0), 1)
        .unwrap()
        .unwrap();
    let ranges: Vec<_> = codeblocks
        .iter()
        .map(|codeblock| (codeblock.codeblock, codeblock.byte_start, codeblock.byte_end()))
        .collect();
    assert_eq!(ranges, vec![(0, 13, 16), (1, 16, 25)]);

    let highest = PrecinctPosition {
        resolution: 1,
        ..lowest_resolution(0)
    };
    assert_eq!(session.codeblocks(&highest, 0).unwrap(), Some(Vec::new()));
}

#[test]
fn test_progress_byte_by_byte() {
    let session = session_with_headers();
    let (progress, callback) = recorder();
    let tracker = session.track_region(&thumbnail(0), None, callback).unwrap();
    assert!(progress.lock().is_empty());

    let packets = lowest_resolution_packets();
    for (offset, byte) in packets.iter().enumerate() {
        let is_last = offset + 1 == packets.len();
        let report = session
            .add_data(arrival(0, 0, offset as u64, &[*byte], is_last))
            .unwrap();
        assert!(report.failures.is_empty());
        if offset + 1 < 10 {
            assert!(progress.lock().is_empty());
            assert_eq!(session.codeblocks(&lowest_resolution(0), 0).unwrap(), None);
        }
    }
    assert_eq!(
        *progress.lock(),
        vec![QualityLayers::Layers(1), QualityLayers::Max]
    );
    assert_eq!(session.tracker_minimum(tracker).unwrap(), QualityLayers::Max);
}

#[test]
fn test_quality_limit() {
    let session = session_with_headers();
    let (progress, callback) = recorder();
    session.track_region(&thumbnail(1), Some(1), callback).unwrap();
    let packets = lowest_resolution_packets();
    session
        .add_data(arrival(0, 1, 0, &packets[..10], false))
        .unwrap();
    assert_eq!(*progress.lock(), vec![QualityLayers::Max]);
}

#[test]
fn test_cancelled_tracker_is_silent() {
    let session = session_with_headers();
    let (progress, callback) = recorder();
    let tracker = session.track_region(&thumbnail(0), None, callback).unwrap();
    assert!(session.cancel(tracker));
    assert!(!session.cancel(tracker));
    assert_eq!(session.num_trackers(), 0);

    session
        .add_data(arrival(0, 0, 0, &lowest_resolution_packets(), true))
        .unwrap();
    assert!(progress.lock().is_empty());
    assert!(matches!(
        session.tracker_minimum(tracker),
        Err(SessionError::UnknownTracker { .. })
    ));
}

#[test]
fn test_malformed_precinct_stops_only_its_tracker() {
    let session = session_with_headers();
    let (first_progress, first_callback) = recorder();
    let (second_progress, second_callback) = recorder();
    let first = session
        .track_region(&thumbnail(0), None, first_callback)
        .unwrap();
    let second = session
        .track_region(&thumbnail(1), None, second_callback)
        .unwrap();

    // the byte after 0xFF has its top bit set
    let report = session
        .add_data(arrival(0, 0, 0, &[0xFF, 0x80], false))
        .unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].tracker, first);
    assert!(report.failures[0].error.is_malformed_data());
    assert_eq!(session.num_trackers(), 1);
    assert_eq!(
        session
            .databin_status(DatabinId::precinct(0))
            .unwrap()
            .loaded_bytes,
        2
    );

    session
        .add_data(arrival(0, 1, 0, &lowest_resolution_packets(), true))
        .unwrap();
    assert!(first_progress.lock().is_empty());
    assert_eq!(*second_progress.lock(), vec![QualityLayers::Max]);
    assert_eq!(session.tracker_minimum(second).unwrap(), QualityLayers::Max);
}

#[test]
fn test_other_codestream_rejected() {
    let mut stream = message(6, 0, 0, &main_header(), true);
    // Bin-ID with class and CSn, codestream 1
    stream.extend_from_slice(&[0b0111_0000, 0x06, 0x01, 0x00, 0x00]);
    let session = Session::default();
    assert!(matches!(
        session.add_jpp_stream(io::Cursor::new(stream)),
        Err(SessionError::UnsupportedCodestream { index: 1 })
    ));
}

// Splits `length` bytes at `cuts` into non-empty ranges.
fn ranges(length: usize, mut cuts: Vec<usize>) -> Vec<(usize, usize)> {
    cuts.push(0);
    cuts.push(length);
    cuts.sort_unstable();
    cuts.dedup();
    cuts.windows(2).map(|pair| (pair[0], pair[1])).collect()
}

proptest! {
    #[test]
    fn prop_arrival_order_and_chunking_do_not_matter(
        chunks in proptest::collection::vec(0usize..=25, 0..8)
            .prop_flat_map(|cuts| Just(ranges(25, cuts)).prop_shuffle())
    ) {
        let packets = lowest_resolution_packets();

        let whole = session_with_headers();
        whole.add_data(arrival(0, 0, 0, &packets, true)).unwrap();

        let pieces = session_with_headers();
        for (start, end) in chunks {
            pieces
                .add_data(arrival(0, 0, start as u64, &packets[start..end], end == packets.len()))
                .unwrap();
        }

        let id = DatabinId::precinct(0);
        prop_assert_eq!(pieces.databin_status(id), whole.databin_status(id));
        for layer in 0..2 {
            prop_assert_eq!(
                pieces.codeblocks(&lowest_resolution(0), layer).unwrap(),
                whole.codeblocks(&lowest_resolution(0), layer).unwrap()
            );
        }
    }
}

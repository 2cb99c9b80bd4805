/// Integration test: replay log rotation at the segment threshold.
///
/// 50,001 appends rotate exactly once. Rotating the remainder (as a replay
/// pass does) leaves two segments whose union holds every entry in order.
use vigil_cluster::log::list_segments;
use vigil_cluster::{LogEntry, ReplayLog, SegmentReader, MAX_SEGMENT_ENTRIES};

fn entry(i: usize) -> LogEntry {
    LogEntry {
        timestamp: 1_700_000_000.0 + i as f64 * 0.001,
        source: if i % 2 == 0 { None } else { Some("peer".into()) },
        message: format!(r#"{{"jsonrpc":"2.0","method":"cluster::CheckResult","params":{{"n":{i}}}}}"#),
        security: None,
    }
}

#[test]
fn threshold_rotation_keeps_every_entry_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = ReplayLog::new(dir.path()).unwrap();
    log.open().unwrap();

    let total = MAX_SEGMENT_ENTRIES + 1;
    let mut rotations = 0;
    for i in 0..total {
        if log.append(&entry(i)).unwrap() {
            rotations += 1;
        }
    }
    assert_eq!(rotations, 1);
    assert_eq!(log.entries(), 1);

    log.rotate().unwrap();
    let segments = list_segments(dir.path()).unwrap();
    assert_eq!(segments.len(), 2);
    assert!(segments[0].timestamp < segments[1].timestamp);

    let counts: Vec<usize> = segments
        .iter()
        .map(|s| SegmentReader::open(&s.path).unwrap().count())
        .collect();
    assert_eq!(counts, vec![MAX_SEGMENT_ENTRIES, 1]);

    let replayed: Vec<LogEntry> = segments
        .iter()
        .flat_map(|s| SegmentReader::open(&s.path).unwrap())
        .collect();
    assert_eq!(replayed.len(), total);
    for (i, got) in replayed.iter().enumerate() {
        let want = entry(i);
        assert_eq!(got.message, want.message, "entry {i}");
        assert_eq!(got.source, want.source, "entry {i}");
    }
}

#[test]
fn segment_names_cover_their_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = ReplayLog::new(dir.path()).unwrap();
    log.open().unwrap();
    log.append(&entry(0)).unwrap();
    log.append(&entry(1)).unwrap();
    let path = log.rotate().unwrap().unwrap();

    let name: u64 = path.file_name().unwrap().to_str().unwrap().parse().unwrap();
    let newest = SegmentReader::open(&path).unwrap().last().unwrap();
    assert!(name as f64 > newest.timestamp);
}

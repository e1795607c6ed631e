use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::Duration;

use crate::header::BLOCK_SIZE;
use crate::{
    ArchiveTotals, Error, ExtractOptions, ExtractStats, ExtractStep, PressReader, PressWriter,
    RewriteRule,
};

const MTIME_A: u64 = 1_600_000_000;
const MTIME_B: u64 = 1_600_000_001;

fn create_test_archive(dir: &Path) -> PathBuf {
    let path = dir.join("site.press");
    let mut writer = PressWriter::create(&path).unwrap();
    writer
        .insert("a.txt", "", 10, MTIME_A, &mut Cursor::new(b"0123456789".to_vec()))
        .unwrap();
    writer
        .insert("b.txt", "sub", 0, MTIME_B, &mut Cursor::new(Vec::new()))
        .unwrap();
    writer.finish().unwrap();
    path
}

fn extract_fully(archive: &Path, dest: &Path, options: &ExtractOptions) -> Vec<ExtractStep> {
    let mut reader = PressReader::open(archive).unwrap();
    let mut steps = Vec::new();
    let mut entry_offset = 0;

    while !reader.is_finished() {
        let step = reader.extract_next(dest, options, entry_offset).unwrap();
        entry_offset = if step.completed { 0 } else { step.entry_offset };
        steps.push(step);
    }

    steps
}

#[test]
fn archive_layout_is_headers_payloads_then_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());

    let data = fs::read(&path).unwrap();
    assert_eq!(data.len(), 3 * BLOCK_SIZE + 10);

    // First header: name, then the decimal size field.
    assert_eq!(&data[..5], b"a.txt");
    assert_eq!(&data[255..257], b"10");
    assert_eq!(data[257], 0);
    assert_eq!(&data[BLOCK_SIZE..BLOCK_SIZE + 10], b"0123456789");

    // Second header carries its directory in the path field.
    let second = BLOCK_SIZE + 10;
    assert_eq!(&data[second..second + 5], b"b.txt");
    assert_eq!(&data[second + 281..second + 284], b"sub");

    // The archive ends with one all-zero block.
    assert!(data[2 * BLOCK_SIZE + 10..].iter().all(|b| *b == 0));
}

#[test]
fn empty_archive_is_a_single_sentinel_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.press");
    PressWriter::create(&path).unwrap().finish().unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), BLOCK_SIZE as u64);

    let mut reader = PressReader::open(&path).unwrap();
    assert_eq!(
        reader.totals().unwrap(),
        ArchiveTotals {
            entries: 0,
            bytes: 0
        }
    );

    reader.seek(0).unwrap();
    let step = reader
        .extract_next(dir.path(), &ExtractOptions::default(), 0)
        .unwrap();
    assert!(step.completed);
    assert!(step.entry.is_none());
    assert!(reader.is_finished());
}

#[test]
fn totals_counts_entries_and_payload_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());

    let mut reader = PressReader::open(&path).unwrap();
    assert_eq!(
        reader.totals().unwrap(),
        ArchiveTotals {
            entries: 2,
            bytes: 10
        }
    );
}

#[test]
fn totals_are_cached_for_the_life_of_the_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());

    let mut reader = PressReader::open(&path).unwrap();
    let first = reader.totals().unwrap();

    reader.seek(7).unwrap();
    let second = reader.totals().unwrap();

    assert_eq!(first, second);
    assert_eq!(reader.position().unwrap(), 7);
}

#[test]
fn entries_lists_decoded_records_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());

    let mut reader = PressReader::open(&path).unwrap();
    let entries = reader.entries().unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].path, "a.txt");
    assert_eq!(entries[0].dir, "");
    assert_eq!(entries[0].size, 10);
    assert_eq!(entries[0].mtime, MTIME_A);
    assert_eq!(entries[1].path, format!("sub{}b.txt", MAIN_SEPARATOR));
    assert_eq!(entries[1].dir, "sub");
    assert_eq!(entries[1].size, 0);
}

#[test]
fn extracts_entries_in_archive_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());
    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let steps = extract_fully(&path, &dest, &ExtractOptions::default());

    // Two entries, then the sentinel step.
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.completed));
    assert_eq!(steps[0].entry.as_ref().unwrap().path, "a.txt");
    assert_eq!(
        steps[1].entry.as_ref().unwrap().path,
        format!("sub{}b.txt", MAIN_SEPARATOR)
    );
    assert!(steps[2].entry.is_none());
    assert_eq!(steps[2].archive_offset, (3 * BLOCK_SIZE + 10) as u64);

    assert_eq!(steps.iter().map(|s| s.bytes_written).sum::<u64>(), 10);
    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"0123456789");
    assert_eq!(fs::read(dest.join("sub").join("b.txt")).unwrap(), b"");
}

#[test]
fn restores_mtime_on_completed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());
    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    extract_fully(&path, &dest, &ExtractOptions::default());

    let meta = fs::metadata(dest.join("a.txt")).unwrap();
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    assert_eq!(mtime.unix_seconds(), MTIME_A as i64);
}

#[cfg(unix)]
#[test]
fn applies_default_mode_bits() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());
    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    extract_fully(&path, &dest, &ExtractOptions::default());

    let file_mode = fs::metadata(dest.join("a.txt")).unwrap().permissions().mode();
    assert_eq!(file_mode & 0o7777, 0o644);

    let dir_mode = fs::metadata(dest.join("sub")).unwrap().permissions().mode();
    assert_eq!(dir_mode & 0o7777, 0o755);
}

#[test]
fn extraction_requires_an_existing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());

    let mut reader = PressReader::open(&path).unwrap();
    let missing = dir.path().join("nowhere");
    let err = reader
        .extract_next(&missing, &ExtractOptions::default(), 0)
        .unwrap_err();
    assert!(matches!(err, Error::NotDirectory { .. }));
}

#[test]
fn excluded_entries_are_seeked_past() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());
    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let mut options = ExtractOptions::default();
    options.exclude = vec!["sub".to_string()];

    let steps = extract_fully(&path, &dest, &options);

    assert!(!steps[0].skipped);
    assert!(steps[1].skipped);
    assert_eq!(steps[1].bytes_written, 0);
    assert!(dest.join("a.txt").is_file());
    assert!(!dest.join("sub").exists());
}

#[test]
fn rewrites_entry_paths_onto_new_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());
    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let mut options = ExtractOptions::default();
    options.rewrite = vec![RewriteRule::new("sub", "moved")];

    extract_fully(&path, &dest, &options);

    assert!(dest.join("a.txt").is_file());
    assert!(dest.join("moved").join("b.txt").is_file());
    assert!(!dest.join("sub").exists());
}

#[test]
fn time_budget_pauses_after_a_chunk_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("large.press");
    let payload: Vec<u8> = (0..700_000u32).map(|i| (i % 251) as u8).collect();

    let mut writer = PressWriter::create(&path).unwrap();
    writer
        .insert(
            "large.bin",
            "",
            payload.len() as u64,
            MTIME_A,
            &mut Cursor::new(payload.clone()),
        )
        .unwrap();
    writer.finish().unwrap();

    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let mut reader = PressReader::open(&path).unwrap();
    let mut options = ExtractOptions::default();
    options.time_budget = Some(Duration::from_secs(0));

    let step = reader.extract_next(&dest, &options, 0).unwrap();
    assert!(!step.completed);
    assert_eq!(step.entry_offset, 512_000);
    assert_eq!(step.bytes_written, 512_000);
    assert_eq!(fs::metadata(dest.join("large.bin")).unwrap().len(), 512_000);

    options.time_budget = None;
    let step = reader
        .extract_next(&dest, &options, step.entry_offset)
        .unwrap();
    assert!(step.completed);
    assert_eq!(step.entry_offset, 0);
    assert_eq!(step.bytes_written, 188_000);

    assert_eq!(fs::read(dest.join("large.bin")).unwrap(), payload);
}

#[test]
fn unopenable_destination_skips_the_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());
    let dest = dir.path().join("out");

    // Occupy the first entry's destination with a directory.
    fs::create_dir_all(dest.join("a.txt")).unwrap();

    let steps = extract_fully(&path, &dest, &ExtractOptions::default());

    assert!(steps[0].skipped);
    assert!(steps[0].completed);
    assert_eq!(steps[0].bytes_written, 0);
    assert!(dest.join("a.txt").is_dir());
    assert_eq!(fs::read(dest.join("sub").join("b.txt")).unwrap(), b"");
}

#[test]
fn truncated_payload_is_not_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());

    let mut data = fs::read(&path).unwrap();
    data.truncate(BLOCK_SIZE + 5);
    let cut = dir.path().join("cut.press");
    fs::write(&cut, &data).unwrap();

    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let mut reader = PressReader::open(&cut).unwrap();
    let err = reader
        .extract_next(&dest, &ExtractOptions::default(), 0)
        .unwrap_err();
    assert!(matches!(err, Error::NotReadable { .. }));

    // The destination rolls back to its length at the start of the call.
    assert_eq!(fs::metadata(dest.join("a.txt")).unwrap().len(), 0);
}

#[test]
fn insert_rejects_oversize_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.press");

    let mut writer = PressWriter::create(&path).unwrap();
    let name = "n".repeat(256);
    let err = writer
        .insert(&name, "", 0, 0, &mut Cursor::new(Vec::new()))
        .unwrap_err();
    assert!(matches!(err, Error::MalformedHeader { .. }));
}

#[test]
fn extract_all_tallies_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_test_archive(dir.path());
    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let mut reader = PressReader::open(&path).unwrap();
    let stats = reader
        .extract_all(&dest, &ExtractOptions::default())
        .unwrap();
    assert_eq!(
        stats,
        ExtractStats {
            entries_extracted: 2,
            entries_skipped: 0,
            bytes_written: 10
        }
    );

    let mut options = ExtractOptions::default();
    options.exclude = vec!["a.txt".to_string()];
    let dest = dir.path().join("partial");
    fs::create_dir_all(&dest).unwrap();

    let mut reader = PressReader::open(&path).unwrap();
    let stats = reader.extract_all(&dest, &options).unwrap();
    assert_eq!(
        stats,
        ExtractStats {
            entries_extracted: 1,
            entries_skipped: 1,
            bytes_written: 0
        }
    );
}

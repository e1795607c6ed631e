use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use press_format::{ExtractOptions, PressReader, PressWriter};

fn write_site_archive(path: &Path) -> Vec<u8> {
    let payload: Vec<u8> = (0..700_000u32).map(|i| (i * 7 % 253) as u8).collect();

    let mut writer = PressWriter::create(path).unwrap();
    writer
        .insert(
            "index.html",
            "",
            11,
            1_600_000_000,
            &mut Cursor::new(b"hello press".to_vec()),
        )
        .unwrap();
    writer
        .insert(
            "data.bin",
            "assets",
            payload.len() as u64,
            1_600_000_100,
            &mut Cursor::new(payload.clone()),
        )
        .unwrap();
    writer
        .insert(
            "style.css",
            "assets",
            4,
            1_600_000_200,
            &mut Cursor::new(b"body".to_vec()),
        )
        .unwrap();
    writer.finish().unwrap();

    payload
}

#[test]
fn extraction_resumes_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("site.press");
    let payload = write_site_archive(&archive);

    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();
    let options = ExtractOptions::default();

    // First process: one entry, then stop and persist the offset.
    let mut reader = PressReader::open(&archive).unwrap();
    let step = reader.extract_next(&dest, &options, 0).unwrap();
    assert!(step.completed);
    let archive_offset = step.archive_offset;
    reader.close().unwrap();

    // Second process: seek to the persisted offset and finish the job.
    let mut reader = PressReader::open(&archive).unwrap();
    reader.seek(archive_offset).unwrap();
    while !reader.is_finished() {
        let step = reader.extract_next(&dest, &options, 0).unwrap();
        assert!(step.completed);
    }
    reader.close().unwrap();

    assert_eq!(fs::read(dest.join("index.html")).unwrap(), b"hello press");
    assert_eq!(fs::read(dest.join("assets").join("data.bin")).unwrap(), payload);
    assert_eq!(fs::read(dest.join("assets").join("style.css")).unwrap(), b"body");
}

#[test]
fn partial_entries_resume_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("site.press");
    let payload = write_site_archive(&archive);

    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    // A zero budget pauses after every chunk, so even small entries take
    // an extra no-op call to complete.
    let mut options = ExtractOptions::default();
    options.time_budget = Some(Duration::from_secs(0));

    // Every step runs in a fresh reader, the way a chain of separate
    // processes would drive it.
    let mut archive_offset = 0;
    let mut entry_offset = 0;
    let mut rounds = 0;
    loop {
        let mut reader = PressReader::open(&archive).unwrap();
        reader.seek(archive_offset).unwrap();

        let step = reader.extract_next(&dest, &options, entry_offset).unwrap();
        archive_offset = step.archive_offset;
        entry_offset = if step.completed { 0 } else { step.entry_offset };

        let finished = reader.is_finished();
        reader.close().unwrap();

        rounds += 1;
        assert!(rounds < 32);
        if finished {
            break;
        }
    }

    // The large entry alone needs more than one pass.
    assert!(rounds > 4);
    assert_eq!(fs::read(dest.join("index.html")).unwrap(), b"hello press");
    assert_eq!(fs::read(dest.join("assets").join("data.bin")).unwrap(), payload);
    assert_eq!(fs::read(dest.join("assets").join("style.css")).unwrap(), b"body");
}

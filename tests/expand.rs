use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;

use kira_align_pipeline::app::{Phase, ProgressEvent, ProgressSink};
use kira_align_pipeline::expand::expand_archives;
use kira_align_pipeline::tracker::ResourceTracker;

const READ: &[u8] = b"@r1\nACGT\n+\nIIII\n";

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn write_gz(path: &Path, content: &[u8]) {
    let mut encoder = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap();
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
    let encoder = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn gzip_expands_next_to_original_and_is_cleaned_up() {
    let temp = tempfile::tempdir().unwrap();
    let unit = temp.path();
    write_gz(&unit.join("reads2.fq.gz"), READ);
    let tracker = ResourceTracker::new();
    let sink = RecordingSink::default();

    let report = expand_archives(unit, &tracker, &sink).unwrap();

    let target = unit.join("reads2.fq");
    assert_eq!(report.produced, vec![target.clone()]);
    assert_eq!(fs::read(&target).unwrap(), READ);
    assert!(tracker.is_tracked(&target));

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].phase, Phase::Expand);
    assert_eq!(events[0].position, Some((1, 1)));
    drop(events);

    tracker.cleanup().unwrap();
    assert!(!target.exists());
    assert!(unit.join("reads2.fq.gz").exists());
}

#[test]
fn existing_plain_file_is_never_overwritten() {
    let temp = tempfile::tempdir().unwrap();
    let unit = temp.path();
    fs::write(unit.join("reads2.fq"), b"operator data").unwrap();
    write_gz(&unit.join("reads2.fq.gz"), READ);
    let tracker = ResourceTracker::new();

    let report = expand_archives(unit, &tracker, &RecordingSink::default()).unwrap();

    assert!(report.produced.is_empty());
    assert_eq!(report.skipped, vec![unit.join("reads2.fq")]);
    assert!(!tracker.is_tracked(&unit.join("reads2.fq")));
    tracker.cleanup().unwrap();
    assert_eq!(fs::read(unit.join("reads2.fq")).unwrap(), b"operator data");
}

#[test]
fn expansion_is_repeatable_within_a_run() {
    let temp = tempfile::tempdir().unwrap();
    let unit = temp.path();
    write_gz(&unit.join("a.fastq.gz"), READ);
    let tracker = ResourceTracker::new();

    let first = expand_archives(unit, &tracker, &RecordingSink::default()).unwrap();
    let second = expand_archives(unit, &tracker, &RecordingSink::default()).unwrap();

    assert_eq!(first.produced, second.produced);
    assert_eq!(tracker.tracked().len(), 1);
    assert_eq!(fs::read(unit.join("a.fastq")).unwrap(), READ);
}

#[test]
fn containers_contribute_only_read_files() {
    let temp = tempfile::tempdir().unwrap();
    let unit = temp.path();
    write_zip(
        &unit.join("batch.zip"),
        &[("run/reads3.fastq", READ), ("run/notes.txt", b"hello")],
    );
    write_tar_gz(&unit.join("batch2.tar.gz"), &[("deep/nested/reads4.fq", READ)]);
    let tracker = ResourceTracker::new();

    let report = expand_archives(unit, &tracker, &RecordingSink::default()).unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(
        report.produced,
        vec![unit.join("reads3.fastq"), unit.join("reads4.fq")]
    );
    assert!(!unit.join("notes.txt").exists());

    let report = tracker.cleanup().unwrap();
    assert!(report.failed.is_empty());
    let mut leftovers: Vec<_> = fs::read_dir(unit)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    leftovers.sort();
    assert_eq!(leftovers, vec!["batch.zip", "batch2.tar.gz"]);
}

#[test]
fn broken_archive_does_not_stop_siblings() {
    let temp = tempfile::tempdir().unwrap();
    let unit = temp.path();
    fs::write(unit.join("a.fastq.gz"), b"definitely not gzip").unwrap();
    write_gz(&unit.join("b.fastq.gz"), READ);
    let tracker = ResourceTracker::new();

    let report = expand_archives(unit, &tracker, &RecordingSink::default()).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].archive, unit.join("a.fastq.gz"));
    assert!(!unit.join("a.fastq").exists());
    assert_eq!(report.produced, vec![unit.join("b.fastq")]);
}

#[cfg(unix)]
#[test]
fn linked_tar_entries_never_reach_outside_the_unit() {
    let temp = tempfile::tempdir().unwrap();
    let elsewhere = temp.path().join("elsewhere");
    fs::create_dir(&elsewhere).unwrap();
    fs::write(elsewhere.join("precious.fastq"), READ).unwrap();
    let unit = temp.path().join("barcode01");
    fs::create_dir(&unit).unwrap();

    let encoder = GzEncoder::new(
        fs::File::create(unit.join("batch.tar.gz")).unwrap(),
        Compression::default(),
    );
    let mut builder = tar::Builder::new(encoder);
    let mut link = tar::Header::new_gnu();
    link.set_entry_type(tar::EntryType::Symlink);
    link.set_size(0);
    link.set_mode(0o777);
    builder.append_link(&mut link, "link", &elsewhere).unwrap();
    let mut hard = tar::Header::new_gnu();
    hard.set_entry_type(tar::EntryType::Link);
    hard.set_size(0);
    hard.set_mode(0o644);
    builder
        .append_link(&mut hard, "hard.fastq", elsewhere.join("precious.fastq"))
        .unwrap();
    let mut header = tar::Header::new_gnu();
    header.set_size(READ.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "run/reads5.fq", READ).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let tracker = ResourceTracker::new();
    let report = expand_archives(&unit, &tracker, &RecordingSink::default()).unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.produced, vec![unit.join("reads5.fq")]);
    assert!(!tracker.is_tracked(&unit.join("precious.fastq")));
    assert!(!tracker.is_tracked(&unit.join("hard.fastq")));

    tracker.cleanup().unwrap();
    assert_eq!(fs::read(elsewhere.join("precious.fastq")).unwrap(), READ);
    assert!(!unit.join("reads5.fq").exists());
}

//! Integration tests for batch conversion through `BatchScheduler`.
//!
//! Inputs are real Part 10 streams from `common`, so every task runs the full
//! decode, transcode and rename path.

mod common;

use anyhow::Result;
use common::*;
use dicomxml::models::{BulkDataMode, TaskOutcome};
use dicomxml::report::BatchReport;
use dicomxml::scheduler::BatchScheduler;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn patient(id: &str) -> Vec<u8> {
    let body = DatasetBuilder::little_endian()
        .text(0x0010_0010, "PN", "Doe^Jane")
        .text(0x0010_0020, "LO", id)
        .build();
    part10(EXPLICIT_LE, &body)
}

#[test]
fn test_three_files_with_ten_workers() -> Result<()> {
    let dir = TempDir::new()?;
    let inputs: Vec<PathBuf> = ["a.dcm", "b.dcm", "c.dcm"]
        .iter()
        .zip(["P1", "P2", "P3"])
        .map(|(name, id)| write_input(dir.path(), name, &patient(id)))
        .collect();
    assert_eq!(BatchScheduler::effective_parallelism(10, inputs.len()), 3);

    let root = dir.path().join("out");
    let outcomes = BatchScheduler::new(&root)
        .with_parallelism(10)
        .with_bulk_data(BulkDataMode::Inline)
        .run(&inputs)?;

    assert_eq!(outcomes.len(), 3);
    let order: Vec<PathBuf> = outcomes.iter().map(|o| o.input().clone()).collect();
    assert_eq!(order, inputs);

    let mut dirs = HashSet::new();
    for (outcome, id) in outcomes.iter().zip(["P1", "P2", "P3"]) {
        let TaskOutcome::Success(result) = outcome else {
            panic!("expected success for {:?}", outcome.input());
        };
        assert!(dirs.insert(result.output_dir.clone()));
        assert_eq!(result.output_dir.parent(), Some(root.canonicalize()?.as_path()));
        assert_eq!(
            result.xml_file.file_name().unwrap().to_string_lossy(),
            format!("Doe^Jane_{id}.xml")
        );
        assert_well_formed(&fs::read_to_string(&result.xml_file)?);
    }
    Ok(())
}

#[test]
fn test_no_existing_inputs_is_an_empty_batch() -> Result<()> {
    let dir = TempDir::new()?;
    let root = dir.path().join("out");
    let outcomes = BatchScheduler::new(&root)
        .with_parallelism(4)
        .run(&[dir.path().join("missing.dcm")])?;
    assert!(outcomes.is_empty());
    assert!(!root.exists());
    Ok(())
}

#[test]
fn test_missing_inputs_are_filtered_out() -> Result<()> {
    let dir = TempDir::new()?;
    let present = write_input(dir.path(), "present.dcm", &patient("X"));
    let inputs = vec![dir.path().join("gone.dcm"), present.clone()];
    let outcomes = BatchScheduler::new(dir.path().join("out")).run(&inputs)?;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].input(), &present);
    Ok(())
}

#[test]
fn test_same_base_name_gets_disjoint_directories() -> Result<()> {
    let dir = TempDir::new()?;
    fs::create_dir(dir.path().join("left"))?;
    fs::create_dir(dir.path().join("right"))?;
    let inputs = vec![
        write_input(&dir.path().join("left"), "scan.dcm", &patient("L")),
        write_input(&dir.path().join("right"), "scan.dcm", &patient("R")),
    ];

    let outcomes = BatchScheduler::new(dir.path().join("out"))
        .with_parallelism(2)
        .run(&inputs)?;

    let dirs: Vec<PathBuf> = outcomes
        .iter()
        .map(|o| match o {
            TaskOutcome::Success(result) => result.output_dir.clone(),
            TaskOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        })
        .collect();
    assert_ne!(dirs[0], dirs[1]);
    for dir in &dirs {
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("scan.dcm"));
    }
    Ok(())
}

#[test]
fn test_bad_input_does_not_abort_siblings() -> Result<()> {
    let dir = TempDir::new()?;
    let good = write_input(dir.path(), "good.dcm", &patient("G"));
    let mut truncated = patient("B");
    truncated.truncate(truncated.len() - 3);
    let bad = write_input(dir.path(), "bad.dcm", &truncated);

    let outcomes = BatchScheduler::new(dir.path().join("out"))
        .with_parallelism(2)
        .run(&[bad.clone(), good.clone()])?;

    assert!(!outcomes[0].is_success());
    assert_eq!(outcomes[0].input(), &bad);
    assert!(outcomes[1].is_success());

    let report = BatchReport::from_outcomes(&outcomes);
    assert_eq!((report.succeeded, report.failed), (1, 1));

    let report_path = dir.path().join("report.json");
    report.write_json(&report_path)?;
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report_path)?)?;
    assert_eq!(json["entries"][0]["status"], "failure");
    assert_eq!(json["entries"][1]["status"], "success");
    Ok(())
}

#[test]
fn test_unwritable_root_fails_the_batch() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_input(dir.path(), "a.dcm", &patient("A"));
    let result = BatchScheduler::new(input.join("out")).run(&[input.clone()]);
    assert!(result.is_err());
    Ok(())
}

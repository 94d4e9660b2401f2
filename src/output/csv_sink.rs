//! CSV row sink
//!
//! Opened once per run and appended to, one row per harvested repository.
//! The header is written only when the file does not exist yet, so a resumed
//! run keeps appending to the interrupted report.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use csv::WriterBuilder;

use crate::types::stats::{RepoStatsRow, CSV_COLUMNS};

const REPO_NAME_COLUMN: &str = "Repo_Name";

pub struct CsvRowSink {
    writer: csv::Writer<std::fs::File>,
    path: PathBuf,
}

impl CsvRowSink {
    /// Opens the report for appending, creating it with the header row when
    /// absent.
    pub fn create_or_append(path: &Path) -> Result<Self> {
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open report file {}", path.display()))?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer
                .write_record(CSV_COLUMNS)
                .with_context(|| format!("Failed to write header to {}", path.display()))?;
            writer
                .flush()
                .with_context(|| format!("Failed to flush header to {}", path.display()))?;
        }

        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    /// Appends one row and flushes it, so a killed process never loses an
    /// acknowledged row.
    pub fn append(&mut self, row: &RepoStatsRow) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", self.path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush row to {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads the set of repository names already present in a report file.
pub fn read_emitted_repo_names(path: &Path) -> Result<HashSet<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open report file {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read the header of {}", path.display()))?
        .clone();
    let name_index = headers
        .iter()
        .position(|column| column == REPO_NAME_COLUMN)
        .ok_or_else(|| {
            anyhow!(
                "Column {} not found in {}",
                REPO_NAME_COLUMN,
                path.display()
            )
        })?;

    let mut names = HashSet::new();
    for record in reader.records() {
        let record =
            record.with_context(|| format!("Failed to read a row of {}", path.display()))?;
        if let Some(name) = record.get(name_index) {
            names.insert(name.to_string());
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn sample_row(repo_name: &str) -> RepoStatsRow {
        RepoStatsRow {
            org_name: "acme".to_string(),
            repo_name: repo_name.to_string(),
            is_empty: false,
            last_push: Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
            last_update: None,
            is_fork: false,
            is_archived: true,
            disk_size_kb: 2048,
            repo_size_mb: 2,
            record_count: 17,
            collaborator_count: 3,
            protected_branch_count: 1,
            pr_review_count: 2,
            pr_review_comment_count: 4,
            commit_comment_count: 5,
            milestone_count: 0,
            pr_count: 2,
            project_count: 0,
            branch_count: 4,
            release_count: 1,
            issue_count: 6,
            issue_event_count: -2,
            issue_comment_count: 9,
            tag_count: 2,
            discussion_count: 0,
            has_wiki: true,
            full_url: "https://github.com/acme/widgets".to_string(),
            migration_issue: false,
            created: Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn a_new_file_gets_exactly_one_header_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");

        let mut sink = CsvRowSink::create_or_append(&path).unwrap();
        sink.append(&sample_row("alpha")).unwrap();
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), CSV_COLUMNS.join(","));
        assert!(lines.next().unwrap().contains("alpha"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn reopening_appends_without_a_second_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");

        let mut sink = CsvRowSink::create_or_append(&path).unwrap();
        sink.append(&sample_row("alpha")).unwrap();
        drop(sink);

        let mut sink = CsvRowSink::create_or_append(&path).unwrap();
        sink.append(&sample_row("beta")).unwrap();
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        let header_count = content
            .lines()
            .filter(|line| line.starts_with("Org_Name"))
            .count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn emitted_names_round_trip_through_the_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");

        let mut sink = CsvRowSink::create_or_append(&path).unwrap();
        sink.append(&sample_row("alpha")).unwrap();
        sink.append(&sample_row("beta")).unwrap();
        drop(sink);

        let names = read_emitted_repo_names(&path).unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains("alpha"));
        assert!(names.contains("beta"));
    }

    #[test]
    fn negative_event_counts_survive_serialization() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");

        let mut sink = CsvRowSink::create_or_append(&path).unwrap();
        sink.append(&sample_row("alpha")).unwrap();
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(",-2,"));
    }

    #[test]
    fn the_declared_columns_match_the_row_field_order() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(sample_row("alpha")).unwrap();
        let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let header = data.lines().next().unwrap();
        assert_eq!(header, CSV_COLUMNS.join(","));
    }

    #[test]
    fn a_file_without_the_name_column_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "A,B\n1,2\n").unwrap();

        assert!(read_emitted_repo_names(&path).is_err());
    }
}

//! Per-run results storage.

use super::generator::{render_row, render_summary, HEADER};
use crate::models::{Outcome, RunSummary};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Destination for the outcomes of a run.
///
/// A run is bracketed by `begin_run` and `finish_run`; `append` is called
/// once per stored outcome, in arrival order.
pub trait OutcomeStore: Send + 'static {
    fn begin_run(&mut self) -> Result<()>;
    fn append(&mut self, outcome: &Outcome) -> Result<()>;
    fn finish_run(&mut self, summary: &RunSummary) -> Result<()>;
}

/// CSV results file, truncated at the start of every run.
///
/// Rows are flushed as they arrive so a crash mid-run keeps what was
/// already received.
pub struct CsvStore {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            self.begin_run()?;
        }
        self.writer
            .as_mut()
            .context("Results file is not open")
    }
}

impl OutcomeStore for CsvStore {
    fn begin_run(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create results directory: {}", parent.display())
                })?;
            }
        }

        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create results file: {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", HEADER)?;
        writer.flush()?;

        debug!("Opened results file {}", self.path.display());
        self.writer = Some(writer);
        Ok(())
    }

    fn append(&mut self, outcome: &Outcome) -> Result<()> {
        let writer = self.writer()?;
        writeln!(writer, "{}", render_row(outcome))?;
        writer.flush()?;
        Ok(())
    }

    fn finish_run(&mut self, summary: &RunSummary) -> Result<()> {
        let path = self.path.clone();
        let writer = self.writer()?;
        writer.write_all(render_summary(summary).as_bytes())?;
        writer.flush()
            .with_context(|| format!("Failed to write results file: {}", path.display()))?;

        self.writer = None;
        Ok(())
    }
}

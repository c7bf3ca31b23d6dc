//! Delivery sinks for the receiver.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rdt_lab_abstract::DeliverySink;
use tracing::debug;

/// File name the lab grader reads delivered data from.
pub const DEFAULT_OUTPUT: &str = "recvData.txt";

/// Appends delivered payloads to a file, one integer per line.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Open `path` truncated, so the file holds only this session's output.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeliverySink for FileSink {
    fn deliver(&mut self, batch: &[Vec<i32>]) -> io::Result<()> {
        let mut writer = BufWriter::new(&mut self.file);
        for payload in batch {
            for value in payload {
                writeln!(writer, "{value}")?;
            }
        }
        writer.flush()?;
        debug!("Delivered {} block(s) to {}", batch.len(), self.path.display());
        Ok(())
    }
}

/// Keeps delivered batches in memory. Clones share the same storage, so a
/// test can hand one clone to the receiver and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<Vec<i32>>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Vec<i32>>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delivered payloads in delivery order, batch boundaries removed.
    pub fn payloads(&self) -> Vec<Vec<i32>> {
        self.batches().into_iter().flatten().collect()
    }

    /// Delivered values as one flat stream.
    pub fn values(&self) -> Vec<i32> {
        self.payloads().into_iter().flatten().collect()
    }

    pub fn flush_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl DeliverySink for MemorySink {
    fn deliver(&mut self, batch: &[Vec<i32>]) -> io::Result<()> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.to_vec());
        Ok(())
    }
}

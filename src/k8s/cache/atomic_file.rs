/**
 * Crash-safe file replacement
 *
 * Content is staged in a temporary file next to the destination, flushed and
 * fsynced, then renamed over the destination. Readers see either the previous
 * file or the complete new one.
 */
use crate::error::Result;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A file being written; it only replaces its destination on [`StagedFile::commit`]
pub struct StagedFile {
    writer: BufWriter<NamedTempFile>,
    dest: PathBuf,
}

impl StagedFile {
    /// Create the temporary file in `dest_dir`
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created
    pub fn create(dest_dir: &Path, file_name: &str) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(&format!("_{file_name}"))
            .tempfile_in(dest_dir)?;
        Ok(Self {
            writer: BufWriter::new(temp),
            dest: dest_dir.join(file_name),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the write fails
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    /// Flush, fsync and rename over the destination
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; the temporary file is removed and
    /// the destination is left untouched
    pub fn commit(self) -> Result<PathBuf> {
        let temp = self.writer.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.dest).map_err(|e| e.error)?;
        debug!("💾 Wrote {}", self.dest.display());
        Ok(self.dest)
    }
}

/// Replace `dest_dir/file_name` with `bytes`
///
/// # Errors
///
/// Returns an error if staging, syncing or renaming fails
pub fn write_atomic(dest_dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let mut staged = StagedFile::create(dest_dir, file_name)?;
    staged.write_all(bytes)?;
    staged.commit()
}

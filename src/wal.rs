use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode one committed transaction to [len][bincode][crc32] format.
fn encode_commit(writer: &mut impl Write, events: &[Event]) -> io::Result<()> {
    let payload =
        bincode::serialize(events).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "commit record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: Vec<Event>][u32: crc32]`
/// - One entry holds every event of one transaction, so a torn write loses the
///   whole transaction and never half of it.
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check.
/// - A failed append is cut back off the file before `append` returns, so a
///   commit reported as failed is never replayed. If that cut fails the log
///   refuses every later append.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covering exactly the successfully appended commits.
    committed_len: u64,
    appends_since_compact: u64,
    failed: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            appends_since_compact: 0,
            failed: false,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Append one transaction and fsync before returning. On error nothing of
    /// this transaction remains in the log.
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::other(format!(
                "wal {} is unusable after a failed rollback",
                self.path.display()
            )));
        }
        let mut record = Vec::new();
        encode_commit(&mut record, events)?;

        if let Err(e) = self.write_record(&record) {
            if let Err(rollback) = self.rollback() {
                tracing::error!(
                    "wal {}: rollback after failed append failed: {rollback}",
                    self.path.display()
                );
                self.failed = true;
            }
            return Err(e);
        }
        self.committed_len += record.len() as u64;
        self.appends_since_compact += 1;
        Ok(())
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.writer.write_all(record)?;
        self.writer.flush()?;
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(io::Error::other("injected sync failure"));
        }
        self.writer.get_ref().sync_all()
    }

    /// Throw away unflushed bytes and truncate the file to the last good commit.
    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it on drop.
        let (_file, _unflushed) = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    /// Make the next append fail after its bytes reached the file.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted commits to a temp file and fsync.
    pub fn write_compact_file(path: &Path, commits: &[Vec<Event>]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for events in commits {
            encode_commit(&mut writer, events)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let reopened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|file| Ok((file.metadata()?.len(), file)));
        let (len, file) = match reopened {
            Ok(opened) => opened,
            Err(e) => {
                // The writer still points at the replaced file.
                self.failed = true;
                return Err(e);
            }
        };
        self.writer = BufWriter::new(file);
        self.committed_len = len;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replace the WAL with a minimal set of commits that recreates the current state.
    pub fn compact(&mut self, commits: &[Vec<Event>]) -> io::Result<()> {
        Self::write_compact_file(&self.path, commits)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid commits in order.
    /// Truncated/corrupt trailing entries are discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Vec<Event>>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut remaining = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut commits = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            remaining = remaining.saturating_sub(4);
            let len = u64::from(u32::from_le_bytes(len_buf));
            // Payload plus crc must fit in what is left of the file.
            if len.saturating_add(4) > remaining {
                tracing::warn!(
                    "wal {}: record of {len} bytes runs past end of file, dropping tail",
                    path.display()
                );
                break;
            }
            remaining -= len + 4;

            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;
            let mut crc_buf = [0u8; 4];
            reader.read_exact(&mut crc_buf)?;
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!("wal {}: crc mismatch, dropping tail", path.display());
                break;
            }

            match bincode::deserialize::<Vec<Event>>(&payload) {
                Ok(events) => commits.push(events),
                Err(_) => break, // corrupt payload
            }
        }

        Ok(commits)
    }
}

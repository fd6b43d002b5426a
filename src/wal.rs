use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Records larger than this are treated as corruption on replay.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Append-only reservation journal.
///
/// Record layout: `[u32 len][bincode Event][u32 crc32 of payload]`, little endian.
/// A torn or corrupt tail (crash mid-append) ends replay; everything before it
/// is kept. Batches are all-or-nothing: a failed batch is cut back off the file.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Bytes on disk up to the end of the last durable batch.
    committed_len: u64,
    appends_since_compact: u64,
}

fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "journal record too large"));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Record {
    /// A decoded record and its size on disk.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Torn write or bad checksum; stop here.
    Damaged(&'static str),
}

/// Fill `buf`, distinguishing a clean EOF (nothing read) from a short read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<usize>> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(Some(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    match read_full(reader, &mut len_buf)? {
        None => {}
        Some(0) => return Ok(Record::End),
        Some(_) => return Ok(Record::Damaged("truncated length prefix")),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Damaged("oversized record"));
    }

    let mut payload = vec![0u8; len];
    if read_full(reader, &mut payload)?.is_some() {
        return Ok(Record::Damaged("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if read_full(reader, &mut crc_buf)?.is_some() {
        return Ok(Record::Damaged("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Damaged("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Event(event, 8 + len as u64)),
        Err(_) => Ok(Record::Damaged("undecodable payload")),
    }
}

impl Wal {
    /// Open (or create) the journal at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one record.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch(std::iter::once(event))
    }

    /// Encode every record, then write and fsync them as one unit.
    ///
    /// An encoding error writes nothing. A write or sync error truncates the
    /// file back to where the batch began, so no record of a failed batch is
    /// replayed after a restart.
    pub fn append_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        let mut encoded = Vec::new();
        let mut count = 0u64;
        for event in events {
            write_record(&mut encoded, event)?;
            count += 1;
        }

        if let Err(e) = self.write_durable(&encoded) {
            if let Err(undo) = self.rollback() {
                tracing::error!(path = %self.path.display(), "journal rollback failed: {undo}");
            }
            return Err(e);
        }
        self.committed_len += encoded.len() as u64;
        self.appends_since_compact += count;
        Ok(())
    }

    fn write_durable(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Drop unflushed bytes and cut the file back to `committed_len`.
    fn rollback(&mut self) -> io::Result<()> {
        let reopened = OpenOptions::new().append(true).open(&self.path)?;
        // into_parts discards the buffer instead of flushing it on drop.
        let (file, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(reopened)).into_parts();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write the compacted record set to `<path>.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the journal and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every intact record. A missing file is an empty journal.
    ///
    /// A damaged tail is cut off the file so later appends follow the last
    /// intact record instead of the garbage.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut intact = 0u64;
        loop {
            match read_record(&mut reader)? {
                Record::Event(event, size) => {
                    events.push(event);
                    intact += size;
                }
                Record::End => break,
                Record::Damaged(why) => {
                    tracing::warn!(
                        path = %path.display(),
                        kept = events.len(),
                        "journal tail discarded: {why}"
                    );
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(intact)?;
                    file.sync_all()?;
                    break;
                }
            }
        }
        Ok(events)
    }
}

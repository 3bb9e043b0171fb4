use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on one encoded event; a larger length prefix is garbage.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Bytes of framing around each payload: length prefix plus checksum.
const FRAME_OVERHEAD: u64 = 8;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little endian.
/// Returns the number of bytes written.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large for WAL frame"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(u64::from(len) + FRAME_OVERHEAD)
}

/// Outcome of reading one frame.
enum Frame {
    /// An intact event and the size of its frame on disk.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Truncated or corrupt frame; nothing after it is trusted.
    Torn,
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    // A zero-byte read here is a clean end; anything partial is torn.
    let mut first = [0u8; 1];
    if reader.read(&mut first)? == 0 {
        return Ok(Frame::End);
    }
    len_buf[0] = first[0];
    if !read_exact_or_eof(reader, &mut len_buf[1..])? {
        return Ok(Frame::Torn);
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(Frame::Torn);
    }
    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Ok(Frame::Torn);
    }
    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(Frame::Torn);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Frame::Event(event, len as u64 + FRAME_OVERHEAD)),
        Err(_) => Ok(Frame::Torn),
    }
}

/// Events recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// True if a torn tail (crash mid-write, bit rot) was dropped.
    pub discarded_tail: bool,
    /// Length of the intact prefix; everything past it is garbage.
    pub valid_len: u64,
}

/// Append-only write-ahead log of reservation events.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by the last successful `flush_sync`.
    committed_len: u64,
    /// Bytes and events buffered since then.
    pending_len: u64,
    pending_appends: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            pending_len: 0,
            pending_appends: 0,
        })
    }

    /// Cut the log back to `valid_len` bytes and fsync, dropping a torn tail
    /// so later appends are not hidden behind it.
    pub fn truncate_to(path: &Path, valid_len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()
    }

    /// Append and fsync one event. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Not durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        // Count before writing: a frame that fails halfway may still have
        // reached the buffer, and `rollback` cuts by file length anyway.
        self.pending_appends += 1;
        self.appends_since_compact += 1;
        self.pending_len += write_frame(&mut self.writer, event)?;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_len;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Discard everything since the last successful `flush_sync`: buffered
    /// bytes are dropped unwritten and the file is cut back to its committed
    /// length, so a failed batch never leaves a partial frame mid-log.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        // into_parts hands back the buffer without flushing it.
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (old_file, _unwritten) = stale.into_parts();
        drop(old_file);

        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.pending_appends);
        self.pending_len = 0;
        self.pending_appends = 0;

        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn committed_len(&self) -> u64 {
        self.committed_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a replacement log next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the replacement over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every intact event. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event, size) => {
                    replay.events.push(event);
                    replay.valid_len += size;
                }
                Frame::End => break,
                Frame::Torn => {
                    replay.discarded_tail = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{NaiveDate, NaiveTime, Utc};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("salonslot_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(hour: u32) -> Event {
        Event::ReservationCreated {
            record: ReservationRecord {
                id: Ulid::new(),
                date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                customer_name: "Yuki".into(),
                phone: None,
                staff_id: Some("aiko".into()),
                status: ReservationStatus::Active,
                created_at: Utc::now(),
                canceled_at: None,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![created(10), created(11)];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = created(10);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event]);
        assert!(replay.discarded_tail);
    }

    #[test]
    fn replay_reports_intact_prefix_length() {
        let path = tmp_path("valid_len.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&created(10)).unwrap();
            wal.append(&created(11)).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8, 0, 0]).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events.len(), 2);
        assert!(replay.discarded_tail);
        assert_eq!(replay.valid_len, good_len);
    }

    #[test]
    fn appends_after_truncated_tail_are_replayed() {
        let path = tmp_path("truncate_then_append.wal");
        let (first, second) = (created(10), created(11));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8, 0, 0]).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        Wal::truncate_to(&path, replay.valid_len).unwrap();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![first, second]);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn rollback_discards_uncommitted_bytes() {
        let path = tmp_path("rollback.wal");
        let (kept, dropped, next) = (created(10), created(11), created(12));
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        let committed = wal.committed_len();
        assert_eq!(committed, fs::metadata(&path).unwrap().len());

        // Half a frame reached the file before the batch failed.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[42u8, 0, 0, 0, 1, 2]).unwrap();
        }
        wal.append_buffered(&dropped).unwrap();
        wal.rollback().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), committed);
        assert_eq!(wal.appends_since_compact(), 1);

        wal.append(&next).unwrap();
        drop(wal);
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![kept, next]);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let good = created(10);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&created(11)).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![good]);
        assert!(replay.discarded_tail);
    }

    #[test]
    fn compact_replaces_log_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let keep = created(10);
        let after = created(12);
        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..20 {
                wal.append(&created(9)).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);
            wal.append(&after).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![keep, after]);
    }

    #[test]
    fn buffered_appends_count_until_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (10..15).map(created).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap().events, events);
    }
}

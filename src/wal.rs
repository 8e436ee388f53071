use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::limits::MAX_WAL_FRAME_BYTES;
use crate::model::Event;

const MAGIC_LEN: usize = 8;
/// Every log file starts with these bytes.
const MAGIC: &[u8; MAGIC_LEN] = b"RMLKWAL1";

/// `[u32 payload len][u32 crc32 of payload]`, little endian.
const FRAME_HEADER_LEN: usize = 8;

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Frame one event into `writer`, returning the bytes written.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload = bincode::serialize(event).map_err(|e| invalid(e.to_string()))?;
    if payload.len() > MAX_WAL_FRAME_BYTES {
        return Err(invalid(format!("event of {} bytes exceeds frame limit", payload.len())));
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[4..].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    writer.write_all(&header)?;
    writer.write_all(&payload)?;
    Ok((FRAME_HEADER_LEN + payload.len()) as u64)
}

/// Fill `buf` completely. `Ok(false)` if the file ends first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

enum Frame {
    /// A decoded event and the bytes it occupied.
    Event(Event, u64),
    End,
    /// Torn or corrupt; nothing after it is trusted.
    Damaged(String),
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut got = 0;
    while got < FRAME_HEADER_LEN {
        match reader.read(&mut header[got..])? {
            0 if got == 0 => return Ok(Frame::End),
            0 => return Ok(Frame::Damaged("torn frame header".into())),
            n => got += n,
        }
    }
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_WAL_FRAME_BYTES {
        return Ok(Frame::Damaged(format!("frame length {len} over limit")));
    }

    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? {
        return Ok(Frame::Damaged("torn frame payload".into()));
    }
    if crc32fast::hash(&payload) != crc {
        return Ok(Frame::Damaged("crc mismatch".into()));
    }
    Ok(match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Frame::Event(event, (FRAME_HEADER_LEN + len) as u64),
        Err(e) => Frame::Damaged(format!("undecodable event: {e}")),
    })
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let fresh = file.metadata()?.len() == 0;
    let mut writer = BufWriter::new(file);
    if fresh {
        writer.write_all(MAGIC)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    Ok(writer)
}

/// Outcome of reading a log file front to back.
struct Scan {
    events: Vec<Event>,
    /// Length of the intact prefix, set only when a damaged tail follows it.
    damaged_at: Option<u64>,
}

/// Append-only reservation event log.
///
/// Layout: an 8-byte magic, then frames of `[len][crc32][bincode Event]`.
/// Replay keeps every frame up to the first damaged one. `recover` cuts the
/// damaged tail off before the log is reopened, so a crash mid-write loses at
/// most the batch that was being written.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful `flush_sync`.
    durable_len: u64,
    /// Bytes buffered or written since then.
    pending_len: u64,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let writer = open_for_append(path)?;
        let durable_len = writer.get_ref().metadata()?.len();
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            durable_len,
            pending_len: 0,
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_len += write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        Ok(())
    }

    /// Drop everything since the last successful `flush_sync`: buffered
    /// frames are discarded and bytes already written are truncated away.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // `into_parts` hands back the buffer without writing it.
        let (_, _unwritten) = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        self.pending_len = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn staging_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `events` as a complete log into the staging file beside `path`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::staging_path(path))?);
        writer.write_all(MAGIC)?;
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Move the staging file over the live log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::staging_path(&self.path), &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.durable_len = self.writer.get_ref().metadata()?.len();
        self.pending_len = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Every intact event in `path`, oldest first. A missing or empty file is
    /// an empty log; a file that is not a roomlock log is an error.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.events)
    }

    /// Replay `path` and truncate any damaged tail, so frames appended after
    /// reopening follow the last intact one and stay readable.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let Scan { events, damaged_at } = Self::scan(path)?;
        if let Some(intact) = damaged_at {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact)?;
            file.sync_all()?;
            warn!("wal {}: truncated to {intact} bytes", path.display());
        }
        Ok(events)
    }

    fn scan(path: &Path) -> io::Result<Scan> {
        let empty = Scan { events: Vec::new(), damaged_at: None };
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(empty),
            Err(e) => return Err(e),
        };
        if file.metadata()?.len() == 0 {
            return Ok(empty);
        }
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; MAGIC_LEN];
        if !fill(&mut reader, &mut magic)? || &magic != MAGIC {
            return Err(invalid(format!("{} is not a reservation log", path.display())));
        }

        let mut events = Vec::new();
        let mut offset = MAGIC_LEN as u64;
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event, len) => {
                    events.push(event);
                    offset += len;
                }
                Frame::End => return Ok(Scan { events, damaged_at: None }),
                Frame::Damaged(why) => {
                    warn!(
                        "wal {}: {why} after {} events at byte {offset}, discarding the rest",
                        path.display(),
                        events.len()
                    );
                    return Ok(Scan { events, damaged_at: Some(offset) });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Reservation, ReservationStatus, Span};
    use ulid::Ulid;

    const DAY0: i64 = 1_767_225_600_000;

    fn fresh_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomlock_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn booked(hour: i64) -> Event {
        Event::ReservationCreated {
            reservation: Reservation {
                id: Ulid::new(),
                room_id: Ulid::new(),
                user_id: Ulid::new(),
                span: Span::new(DAY0 + hour * 3_600_000, DAY0 + (hour + 1) * 3_600_000),
                purpose: Some("retro".into()),
                status: ReservationStatus::Active,
                created_at: DAY0,
            },
        }
    }

    fn write_log(path: &Path, events: &[Event]) {
        let mut wal = Wal::open(path).unwrap();
        for e in events {
            wal.append(e).unwrap();
        }
    }

    #[test]
    fn lifecycle_round_trip() {
        let path = fresh_path("lifecycle.wal");
        let a = booked(9);
        let b = booked(10);
        let events = vec![
            a.clone(),
            b.clone(),
            Event::ReservationCancelled { id: a.reservation_id() },
            Event::ReservationCompleted { id: b.reservation_id() },
        ];
        write_log(&path, &events);
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn missing_and_empty_files_are_empty_logs() {
        let path = fresh_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());

        File::create(&path).unwrap();
        assert!(Wal::replay(&path).unwrap().is_empty());

        // Opening writes the header; still no events.
        drop(Wal::open(&path).unwrap());
        assert_eq!(fs::metadata(&path).unwrap().len(), MAGIC_LEN as u64);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn foreign_file_is_refused() {
        let path = fresh_path("foreign.wal");
        fs::write(&path, b"definitely not a log").unwrap();
        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn torn_tail_keeps_prefix() {
        let path = fresh_path("torn.wal");
        let kept = booked(9);
        write_log(&path, std::slice::from_ref(&kept));

        // Header promises 40 bytes, only 3 arrive.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&40u32.to_le_bytes()).unwrap();
        f.write_all(&0u32.to_le_bytes()).unwrap();
        f.write_all(&[1, 2, 3]).unwrap();
        drop(f);

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);
    }

    #[test]
    fn corrupt_frame_stops_replay() {
        let path = fresh_path("corrupt.wal");
        let first = booked(9);
        write_log(&path, &[first.clone(), booked(10), booked(11)]);

        // Flip one payload byte of the second frame.
        let mut bytes = fs::read(&path).unwrap();
        let first_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let second_payload = MAGIC_LEN + FRAME_HEADER_LEN + first_len + FRAME_HEADER_LEN;
        bytes[second_payload] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
    }

    #[test]
    fn oversized_frame_length_is_damage() {
        let path = fresh_path("oversized.wal");
        let kept = booked(9);
        write_log(&path, std::slice::from_ref(&kept));
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        f.write_all(&0u32.to_le_bytes()).unwrap();
        drop(f);

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);
    }

    #[test]
    fn recover_cuts_damaged_tail() {
        let path = fresh_path("recover.wal");
        let kept = booked(9);
        write_log(&path, std::slice::from_ref(&kept));
        let intact = fs::metadata(&path).unwrap().len();

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0xAB; 5]).unwrap();
        drop(f);

        let scan = Wal::scan(&path).unwrap();
        assert_eq!(scan.damaged_at, Some(intact));
        assert_eq!(Wal::recover(&path).unwrap(), vec![kept.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);

        // New frames follow the intact prefix and replay.
        let later = booked(10);
        write_log(&path, std::slice::from_ref(&later));
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
    }

    #[test]
    fn clean_log_needs_no_recovery() {
        let path = fresh_path("clean.wal");
        write_log(&path, &[booked(9), booked(10)]);
        let before = fs::metadata(&path).unwrap().len();
        assert_eq!(Wal::scan(&path).unwrap().damaged_at, None);
        assert_eq!(Wal::recover(&path).unwrap().len(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), before);
    }

    #[test]
    fn rollback_forgets_unflushed_frames() {
        let path = fresh_path("rollback.wal");
        let first = booked(9);
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&first).unwrap();
        let durable = fs::metadata(&path).unwrap().len();

        // Enough frames to spill past the write buffer onto disk.
        for h in 0..200 {
            wal.append_buffered(&booked(h)).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() > durable);
        wal.rollback().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), durable);

        let last = booked(11);
        wal.append(&last).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, last]);
    }

    #[test]
    fn compaction_replaces_history() {
        let path = fresh_path("compaction.wal");
        let survivor = booked(9);
        let mut wal = Wal::open(&path).unwrap();
        for h in 0..12 {
            wal.append(&booked(h)).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 12);
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(std::slice::from_ref(&survivor)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        assert!(fs::metadata(&path).unwrap().len() < before);
        assert!(!Wal::staging_path(&path).exists());

        let later = Event::ReservationCancelled { id: survivor.reservation_id() };
        wal.append(&later).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![survivor, later]);
    }

    #[test]
    fn buffered_appends_land_on_flush() {
        let path = fresh_path("buffered.wal");
        let events: Vec<Event> = (8..13).map(booked).collect();
        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.append_buffered(e).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 5);
        wal.flush_sync().unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::commit::Frame;
use crate::error::{LogError, Result};

/// A single append-only file holding a contiguous run of [`Frame`]s, plus an
/// in-memory index from LSN to byte offset so `LoadEntry` does not need a
/// linear scan. Kept as one file rather than a rotating multi-segment
/// directory — this engine's scope does not require segment rotation or
/// retention beyond `Compact`.
pub struct Segment {
    path: PathBuf,
    file: File,
    /// byte offset each LSN starts at, for `read_at`.
    index: BTreeMap<u64, u64>,
    next_write_offset: u64,
}

impl Segment {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let mut seg = Segment {
            path,
            file,
            index: BTreeMap::new(),
            next_write_offset: 0,
        };
        seg.rebuild_index()?;
        Ok(seg)
    }

    fn rebuild_index(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);
        let mut offset = 0u64;
        loop {
            let before = offset;
            match Frame::decode(&mut reader) {
                Ok(Some(frame)) => {
                    let len = frame.encoded_len() as u64;
                    self.index.insert(frame.lsn, before);
                    offset = before + len;
                }
                Ok(None) => break,
                Err(LogError::ChecksumMismatch { .. }) | Err(LogError::Corrupt(_)) => {
                    // A torn tail write from a crash mid-append; truncate it
                    // away so the segment ends cleanly at the last good frame.
                    log::warn!(
                        "tae-commitlog: truncating torn tail of {} at byte {before}",
                        self.path.display()
                    );
                    self.file.set_len(before)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.next_write_offset = offset;
        self.file.seek(SeekFrom::Start(self.next_write_offset))?;
        Ok(())
    }

    pub fn append(&mut self, lsn: u64, payload: Vec<u8>) -> Result<()> {
        let frame = Frame { lsn, payload };
        self.file.seek(SeekFrom::Start(self.next_write_offset))?;
        frame.write(&mut self.file)?;
        self.index.insert(lsn, self.next_write_offset);
        self.next_write_offset += frame.encoded_len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn read_at(&self, lsn: u64) -> Result<Vec<u8>> {
        let offset = *self.index.get(&lsn).ok_or(LogError::NotFound(lsn))?;
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let frame = Frame::decode(&mut file)?.ok_or(LogError::NotFound(lsn))?;
        Ok(frame.payload)
    }

    pub fn contains(&self, lsn: u64) -> bool {
        self.index.contains_key(&lsn)
    }

    pub fn max_lsn(&self) -> Option<u64> {
        self.index.keys().next_back().copied()
    }

    pub fn min_lsn(&self) -> Option<u64> {
        self.index.keys().next().copied()
    }

    /// Iterates all frames currently in the segment in LSN order.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<(u64, Vec<u8>)>> + '_> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);
        Ok(std::iter::from_fn(move || match Frame::decode(&mut reader) {
            Ok(Some(frame)) => Some(Ok((frame.lsn, frame.payload))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }))
    }

    /// Drops the on-disk bytes and index entries for every LSN strictly less
    /// than `keep_from`, by rewriting the file to a fresh one containing only
    /// the retained frames. Used by `Compact`.
    pub fn compact_before(&mut self, keep_from: u64) -> Result<()> {
        let tmp_path = self.path.with_extension("compact.tmp");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut new_index = BTreeMap::new();
        let mut offset = 0u64;
        for entry in self.iter()? {
            let (lsn, payload) = entry?;
            if lsn < keep_from {
                continue;
            }
            let frame = Frame { lsn, payload };
            frame.write(&mut tmp)?;
            new_index.insert(lsn, offset);
            offset += frame.encoded_len() as u64;
        }
        tmp.flush()?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.index = new_index;
        self.next_write_offset = offset;
        self.file.seek(SeekFrom::Start(self.next_write_offset))?;
        Ok(())
    }

    pub fn len_entries(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let mut seg = Segment::open(dir.path().join("group.log")).unwrap();
        seg.append(0, b"a".to_vec()).unwrap();
        seg.append(1, b"bb".to_vec()).unwrap();
        seg.flush().unwrap();
        assert_eq!(seg.read_at(0).unwrap(), b"a");
        assert_eq!(seg.read_at(1).unwrap(), b"bb");
        assert_eq!(seg.max_lsn(), Some(1));
    }

    #[test]
    fn reopen_rebuilds_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("group.log");
        {
            let mut seg = Segment::open(&path).unwrap();
            seg.append(0, b"x".to_vec()).unwrap();
            seg.append(1, b"y".to_vec()).unwrap();
            seg.flush().unwrap();
        }
        let seg2 = Segment::open(&path).unwrap();
        assert_eq!(seg2.len_entries(), 2);
        assert_eq!(seg2.read_at(1).unwrap(), b"y");
    }

    #[test]
    fn compact_before_drops_earlier_lsns() {
        let dir = tempdir().unwrap();
        let mut seg = Segment::open(dir.path().join("group.log")).unwrap();
        for i in 0..5 {
            seg.append(i, vec![i as u8]).unwrap();
        }
        seg.flush().unwrap();
        seg.compact_before(3).unwrap();
        assert!(!seg.contains(2));
        assert!(seg.contains(3));
        assert!(seg.contains(4));
        assert_eq!(seg.len_entries(), 2);
    }

    #[test]
    fn lsn_monotone_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("group.log");
        {
            let mut seg = Segment::open(&path).unwrap();
            for i in 0..10 {
                seg.append(i, vec![0u8; 4]).unwrap();
            }
            seg.flush().unwrap();
        }
        let seg2 = Segment::open(&path).unwrap();
        let lsns: Vec<u64> = seg2.iter().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(lsns, (0..10).collect::<Vec<_>>());
    }
}

use std::io::{ErrorKind, Read, Write};
use crate::data_range::{merge_ranges, DataRange};

pub const RECORD_FILE_HEADER: u64 = 0x4452_4547_4553_5242;

pub const DOWNLOADED_INFO_RECORD_LENGTH: usize = 4 * 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordType {
    DownloadFileLength = 1,
    DownloadedInfo = 2,
}

impl From<RecordType> for u64 {
    fn from(value: RecordType) -> u64 {
        value as u64
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordLog {
    pub download_length: u64,
    pub ranges: Vec<DataRange>,
}

impl RecordLog {
    pub fn merged_ranges(&self) -> Vec<DataRange> {
        merge_ranges(&self.ranges)
    }

    pub fn covered_length(&self) -> u64 {
        self.merged_ranges().iter().map(|r| r.length).sum()
    }
}

/// Binary layout of the resumption record file, little-endian 8-byte integers:
///
/// ```text
/// header | 1 | download_length | (2 | start_point | length | checksum)*
/// ```
pub struct RecordFormatter;

impl RecordFormatter {
    pub fn write_header<W: Write>(writer: &mut W, download_length: u64) -> std::io::Result<()> {
        let mut buffer = [0u8; 24];
        buffer[0..8].copy_from_slice(&RECORD_FILE_HEADER.to_le_bytes());
        buffer[8..16].copy_from_slice(&u64::from(RecordType::DownloadFileLength).to_le_bytes());
        buffer[16..24].copy_from_slice(&download_length.to_le_bytes());
        writer.write_all(&buffer)
    }

    pub fn encode_range(range: &DataRange) -> [u8; DOWNLOADED_INFO_RECORD_LENGTH] {
        let mut buffer = [0u8; DOWNLOADED_INFO_RECORD_LENGTH];
        buffer[0..8].copy_from_slice(&u64::from(RecordType::DownloadedInfo).to_le_bytes());
        buffer[8..16].copy_from_slice(&range.start.to_le_bytes());
        buffer[16..24].copy_from_slice(&range.length.to_le_bytes());
        buffer[24..32].copy_from_slice(&range.checksum.unwrap_or(0).to_le_bytes());
        buffer
    }

    pub fn write_range<W: Write>(writer: &mut W, range: &DataRange) -> std::io::Result<()> {
        writer.write_all(&Self::encode_range(range))
    }

    /// `Ok(None)` for an unusable log. A truncated trailing record ends the log.
    pub fn read<R: Read>(reader: &mut R) -> std::io::Result<Option<RecordLog>> {
        match read_u64(reader)? {
            Some(RECORD_FILE_HEADER) => {}
            _ => return Ok(None),
        }
        match read_u64(reader)? {
            Some(tag) if tag == u64::from(RecordType::DownloadFileLength) => {}
            _ => return Ok(None),
        }
        let download_length = match read_u64(reader)? {
            Some(value) => value,
            None => return Ok(None),
        };

        let mut log = RecordLog {
            download_length,
            ranges: Vec::new(),
        };
        loop {
            let mut buffer = [0u8; DOWNLOADED_INFO_RECORD_LENGTH];
            let read_length = read_full(reader, &mut buffer)?;
            if read_length >= 8 && u64_at(&buffer, 0) != u64::from(RecordType::DownloadedInfo) {
                return Ok(None);
            }
            if read_length < DOWNLOADED_INFO_RECORD_LENGTH {
                break;
            }
            log.ranges.push(DataRange::with_checksum(
                u64_at(&buffer, 8),
                u64_at(&buffer, 16),
                u64_at(&buffer, 24),
            ));
        }
        Ok(Some(log))
    }
}

fn u64_at(buffer: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buffer[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_full<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<Option<u64>> {
    let mut buffer = [0u8; 8];
    if read_full(reader, &mut buffer)? < 8 {
        return Ok(None);
    }
    Ok(Some(u64::from_le_bytes(buffer)))
}

use std::io::{Read, Seek, SeekFrom};
use crc::{Crc, CRC_64_ECMA_182};

/// CRC-64 with polynomial `0x42F0E1EBA9EA3693`, unreflected, zero init and xorout.
pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub fn checksum(buffer: &[u8]) -> u64 {
    CRC64.checksum(buffer)
}

pub fn checksum_span<R: Read + Seek>(reader: &mut R, start_point: u64, length: u64, buffer: &mut [u8]) -> std::io::Result<u64> {
    if buffer.is_empty() && length > 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty checksum buffer"));
    }
    reader.seek(SeekFrom::Start(start_point))?;

    let mut digest = CRC64.digest();
    let mut remaining = length;
    while remaining > 0 {
        let read_length = remaining.min(buffer.len() as u64) as usize;
        reader.read_exact(&mut buffer[..read_length])?;
        digest.update(&buffer[..read_length]);
        remaining -= read_length as u64;
    }
    Ok(digest.finalize())
}

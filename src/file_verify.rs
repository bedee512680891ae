use std::path::Path;
use xxhash_rust::xxh64;
use tokio::io::{AsyncReadExt, BufReader};
use crate::error::DownloadError;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum FileVerify {
    None,
    #[allow(non_camel_case_types)]
    xxHash(u64),
}

impl From<u64> for FileVerify {
    fn from(hash: u64) -> Self {
        match hash {
            0 => FileVerify::None,
            value => FileVerify::xxHash(value),
        }
    }
}

pub async fn calculate_file_xxhash(file_path: impl AsRef<Path>, seed: u64) -> crate::error::Result<u64> {
    let file = tokio::fs::File::open(file_path.as_ref()).await.map_err(|source| DownloadError::FileOpen {
        path: file_path.as_ref().display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = xxh64::Xxh64::new(seed);
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[0..bytes_read]);
    }
    Ok(hasher.digest())
}

pub async fn file_validate(file_verify: &FileVerify, file_path: impl AsRef<Path>) -> crate::error::Result<()> {
    match file_verify {
        FileVerify::None => Ok(()),
        FileVerify::xxHash(value) => {
            let hash = calculate_file_xxhash(file_path, 0).await?;
            if hash != *value {
                return Err(DownloadError::FileVerify {
                    expected: *value,
                    actual: hash,
                });
            }
            Ok(())
        }
    }
}

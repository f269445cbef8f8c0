//! Writable byte sinks for segment files
//!
//! Workers stream bytes into a sink obtained from a [`SinkProvider`]. The
//! default provider writes segment files to the local filesystem; tests
//! substitute providers that fail or capture writes. Sinks are released by
//! drop on every exit path, normal or not.

use std::io;
use std::path::Path;
use tokio::io::AsyncWrite;

/// A writable byte sink for one segment.
pub type WritableSink = dyn AsyncWrite + Send + Unpin;

/// Opens writable sinks for segment files.
pub trait SinkProvider: Send + Sync {
    /// Open a sink of `expected_size` bytes under `directory`.
    ///
    /// Failure here is fatal for the requesting worker; the network request
    /// is never issued without a sink to write into.
    fn open(
        &self,
        directory: &Path,
        file_name: &str,
        expected_size: u64,
    ) -> io::Result<Box<WritableSink>>;
}

/// Filesystem-backed sink provider. Pre-allocates the segment file to its
/// expected size so disk-full surfaces before the network call.
#[derive(Debug, Default, Clone)]
pub struct FsSinkProvider;

impl SinkProvider for FsSinkProvider {
    fn open(
        &self,
        directory: &Path,
        file_name: &str,
        expected_size: u64,
    ) -> io::Result<Box<WritableSink>> {
        std::fs::create_dir_all(directory)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(directory.join(file_name))?;
        file.set_len(expected_size)?;
        Ok(Box::new(tokio::fs::File::from_std(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn fs_sink_creates_and_presizes_file() {
        let dir = std::env::temp_dir().join(format!("segfetch-sink-{}", uuid::Uuid::new_v4()));
        let mut sink = FsSinkProvider.open(&dir, "0-test.bin", 128).unwrap();

        let path = dir.join("0-test.bin");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 128);

        sink.write_all(b"hello").await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content[..5], b"hello");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn fs_sink_fails_on_unwritable_directory() {
        // A file where the directory should be makes create_dir_all fail
        let dir = std::env::temp_dir().join(format!("segfetch-sink-{}", uuid::Uuid::new_v4()));
        std::fs::write(&dir, b"not a directory").unwrap();
        assert!(FsSinkProvider.open(&dir, "0-test.bin", 16).is_err());
        std::fs::remove_file(&dir).unwrap();
    }
}

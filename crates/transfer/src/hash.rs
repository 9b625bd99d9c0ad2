use filedrop_protocol::ContentHash;
use md5::{Digest, Md5};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TransferError;
use crate::source::ByteSource;

/// Default hashing window: 4 MiB.
pub const DEFAULT_HASH_WINDOW: u64 = 4 * 1024 * 1024;

/// Smallest accepted hashing window: 64 KiB.
pub const MIN_HASH_WINDOW: u64 = 64 * 1024;

/// Largest accepted hashing window: 8 MiB.
pub const MAX_HASH_WINDOW: u64 = 8 * 1024 * 1024;

/// Computes the MD5 digest of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash(Md5::digest(data).into())
}

/// Streams a [`ByteSource`] through MD5 one window at a time.
///
/// At most one window is held in memory, whatever the file size.
#[derive(Debug, Clone, Copy)]
pub struct HashCalculator {
    window: u64,
}

impl Default for HashCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_WINDOW)
    }
}

impl HashCalculator {
    /// Creates a calculator; `window` is clamped to
    /// [`MIN_HASH_WINDOW`]..=[`MAX_HASH_WINDOW`].
    pub fn new(window: u64) -> Self {
        Self {
            window: window.clamp(MIN_HASH_WINDOW, MAX_HASH_WINDOW),
        }
    }

    /// Window size in bytes.
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Hashes the whole source.
    ///
    /// `on_progress(hashed, total)` runs after every window. Cancellation is
    /// checked before each window; once observed no further reads happen and
    /// [`TransferError::Cancelled`] is returned.
    pub async fn compute<F>(
        &self,
        source: &dyn ByteSource,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<ContentHash, TransferError>
    where
        F: FnMut(u64, u64),
    {
        let total = source.size();
        let mut hasher = Md5::new();
        let mut offset = 0u64;

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        while offset < total {
            if cancel.is_cancelled() {
                debug!(name = source.name(), offset, "hashing cancelled");
                return Err(TransferError::Cancelled);
            }

            let length = self.window.min(total - offset);
            let data = source.read_range(offset, length).await?;
            if data.len() as u64 != length {
                return Err(TransferError::SourceChanged {
                    offset,
                    expected: length,
                    actual: data.len() as u64,
                });
            }

            hasher.update(&data);
            offset += length;
            on_progress(offset, total);
        }

        if total == 0 {
            on_progress(0, 0);
        }

        let digest = ContentHash(hasher.finalize().into());
        debug!(name = source.name(), size = total, hash = %digest, "hash computed");
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, ReadFuture};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hash_bytes_known_vector() {
        // RFC 1321 test suite.
        assert_eq!(hash_bytes(b"").to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hash_bytes(b"abc").to_hex(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn window_is_clamped() {
        assert_eq!(HashCalculator::new(1).window(), MIN_HASH_WINDOW);
        assert_eq!(HashCalculator::new(u64::MAX).window(), MAX_HASH_WINDOW);
        assert_eq!(HashCalculator::default().window(), DEFAULT_HASH_WINDOW);
    }

    #[tokio::test]
    async fn windowed_digest_matches_whole_buffer() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let source = MemorySource::new("blob.bin", data.clone());

        let mut reports = Vec::new();
        let digest = HashCalculator::new(MIN_HASH_WINDOW)
            .compute(&source, &CancellationToken::new(), |done, total| {
                reports.push((done, total))
            })
            .await
            .unwrap();

        assert_eq!(digest, hash_bytes(&data));
        // 300_000 / 65_536 -> 5 windows.
        assert_eq!(reports.len(), 5);
        assert_eq!(reports.last(), Some(&(300_000, 300_000)));
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[tokio::test]
    async fn empty_source_reports_once() {
        let source = MemorySource::new("empty", Vec::new());
        let mut calls = 0;
        let digest = HashCalculator::default()
            .compute(&source, &CancellationToken::new(), |_, _| calls += 1)
            .await
            .unwrap();
        assert_eq!(digest, hash_bytes(b""));
        assert_eq!(calls, 1);
    }

    /// Counts reads and cancels the token after the first one.
    struct CancellingSource {
        inner: MemorySource,
        cancel: CancellationToken,
        reads: AtomicUsize,
    }

    impl ByteSource for CancellingSource {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn size(&self) -> u64 {
            self.inner.size()
        }

        fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            self.inner.read_range(offset, length)
        }
    }

    #[tokio::test]
    async fn cancellation_stops_between_windows() {
        let cancel = CancellationToken::new();
        let source = CancellingSource {
            inner: MemorySource::new("big.bin", vec![7u8; 4 * MIN_HASH_WINDOW as usize]),
            cancel: cancel.clone(),
            reads: AtomicUsize::new(0),
        };

        let result = HashCalculator::new(MIN_HASH_WINDOW)
            .compute(&source, &cancel, |_, _| {})
            .await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_reads_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = CancellingSource {
            inner: MemorySource::new("a", vec![1u8; 10]),
            cancel: cancel.clone(),
            reads: AtomicUsize::new(0),
        };
        let result = HashCalculator::default().compute(&source, &cancel, |_, _| {}).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    }
}

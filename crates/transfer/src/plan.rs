use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_THRESHOLD};

/// Transfer state of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    InFlight,
    Acked,
    Failed,
}

/// A contiguous byte range of the source, uploaded and acknowledged on its own.
///
/// Geometry (`index`, `offset`, `length`) is fixed at planning time; only
/// `status` and `attempts` change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub offset: u64,
    pub length: u64,
    pub status: ChunkStatus,
    pub attempts: u8,
}

impl Chunk {
    fn new(index: u32, offset: u64, length: u64) -> Self {
        Self {
            index,
            offset,
            length,
            status: ChunkStatus::Pending,
            attempts: 0,
        }
    }
}

/// Planner inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanConfig {
    /// Files at or below this size go out in one request.
    pub chunk_threshold: u64,
    /// Size of every chunk but the last. Zero disables chunking.
    pub chunk_size: u64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Ordered, indexed chunk layout for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Whole file in one request, no merge needed.
    pub single_shot: bool,
    /// Nominal chunk size (the file size for single-shot plans).
    pub chunk_size: u64,
    /// Total bytes covered by the plan.
    pub file_size: u64,
    chunks: Vec<Chunk>,
}

/// Lays out `size` bytes according to `config`.
///
/// Pure and deterministic: the same `(size, config)` always yields the same
/// plan. Zero-byte files produce a single empty chunk. A zero `chunk_size`
/// cannot split anything, so it also yields a single-shot plan.
pub fn plan(size: u64, config: &PlanConfig) -> ChunkPlan {
    if size <= config.chunk_threshold || config.chunk_size == 0 {
        return ChunkPlan {
            single_shot: true,
            chunk_size: size,
            file_size: size,
            chunks: vec![Chunk::new(0, 0, size)],
        };
    }

    let count = size.div_ceil(config.chunk_size);
    let chunks = (0..count)
        .map(|i| {
            let offset = i * config.chunk_size;
            let length = config.chunk_size.min(size - offset);
            Chunk::new(i as u32, offset, length)
        })
        .collect();

    ChunkPlan {
        single_shot: false,
        chunk_size: config.chunk_size,
        file_size: size,
        chunks,
    }
}

impl ChunkPlan {
    /// All chunks in index order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Returns the chunk at `index`.
    pub fn get(&self, index: u32) -> Option<&Chunk> {
        self.chunks.get(index as usize)
    }

    /// Number of chunks in the plan.
    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Number of acknowledged chunks.
    pub fn acked_count(&self) -> u32 {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Acked)
            .count() as u32
    }

    /// Returns `true` when every chunk is acknowledged.
    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.status == ChunkStatus::Acked)
    }

    /// Indices of chunks that still need uploading, in order.
    pub fn pending_indices(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|c| c.status != ChunkStatus::Acked)
            .map(|c| c.index)
            .collect()
    }

    /// Indices of acknowledged chunks, in order.
    pub fn acked_indices(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Acked)
            .map(|c| c.index)
            .collect()
    }

    /// Sets the status of one chunk. Unknown indices are ignored.
    pub fn set_status(&mut self, index: u32, status: ChunkStatus) {
        if let Some(chunk) = self.chunks.get_mut(index as usize) {
            chunk.status = status;
        }
    }

    /// Counts one more attempt for `index` and returns the new total.
    pub fn record_attempt(&mut self, index: u32) -> u8 {
        match self.chunks.get_mut(index as usize) {
            Some(chunk) => {
                chunk.attempts = chunk.attempts.saturating_add(1);
                chunk.attempts
            }
            None => 0,
        }
    }

    /// Marks the given indices as acknowledged (resume state reported by the
    /// server). Out-of-range indices are skipped; returns how many chunks
    /// changed state.
    pub fn mark_acked<I>(&mut self, indices: I) -> u32
    where
        I: IntoIterator<Item = u32>,
    {
        let mut marked = 0;
        for index in indices {
            if let Some(chunk) = self.chunks.get_mut(index as usize)
                && chunk.status != ChunkStatus::Acked
            {
                chunk.status = ChunkStatus::Acked;
                marked += 1;
            }
        }
        marked
    }

    /// Resets every chunk not in `indices` back to pending.
    ///
    /// Used when the server's view of the upload disagrees with ours.
    pub fn reconcile<I>(&mut self, indices: I)
    where
        I: IntoIterator<Item = u32>,
    {
        let held: std::collections::HashSet<u32> = indices.into_iter().collect();
        for chunk in &mut self.chunks {
            if held.contains(&chunk.index) {
                chunk.status = ChunkStatus::Acked;
            } else {
                chunk.status = ChunkStatus::Pending;
                chunk.attempts = 0;
            }
        }
    }
}

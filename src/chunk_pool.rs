//! Chunk pool: the platform-allocator-backed source of archetype chunks.
//!
//! Blocks of `chunks_per_block` contiguous chunks are requested from the
//! platform allocator (represented here by `bumpalo`, standing in for the
//! huge-page-aware allocator the spec treats as an external collaborator).
//! Released chunks are threaded onto a free list through their own first
//! machine word, so the free list itself costs no extra memory.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bumpalo::Bump;

/// Minimum chunk size: 4 KiB.
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
/// Maximum chunk size: 1 MiB.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;
/// Default chunk size: 16 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Cache line size used for intra-chunk column alignment.
pub const CACHE_LINE: usize = 64;

/// Tunables for a [`ChunkPool`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkPoolConfig {
    pub chunk_size: usize,
    pub chunks_per_block: usize,
    pub max_chunks: usize,
    pub huge_pages: bool,
}

impl Default for ChunkPoolConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunks_per_block: 64,
            max_chunks: usize::MAX,
            huge_pages: false,
        }
    }
}

#[derive(Default)]
struct Stats {
    total_chunks: AtomicUsize,
    free_chunks: AtomicUsize,
    blocks_allocated: AtomicUsize,
}

struct Block {
    // Keeps the backing bytes alive; chunk pointers borrow from it.
    _arena: Bump,
    base: NonNull<u8>,
    len_chunks: usize,
}

struct Inner {
    config: ChunkPoolConfig,
    blocks: Vec<Block>,
    free_head: Option<NonNull<u8>>,
    stats: Stats,
}

/// Owns blocks of raw, chunk-sized memory and an intrusive free list.
pub struct ChunkPool {
    inner: RefCell<Inner>,
}

/// A chunk borrowed from a [`ChunkPool`]. Returned to the pool's free list
/// when dropped.
pub struct PooledChunk {
    ptr: NonNull<u8>,
    size: usize,
    pool: Rc<ChunkPool>,
}

impl PooledChunk {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for PooledChunk {
    fn drop(&mut self) {
        self.pool.release(self.ptr);
    }
}

impl ChunkPool {
    pub fn new(config: ChunkPoolConfig) -> Rc<Self> {
        assert!(
            config.chunk_size.is_power_of_two()
                && (MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&config.chunk_size),
            "chunk size must be a power of two in [4 KiB, 1 MiB]"
        );
        Rc::new(Self {
            inner: RefCell::new(Inner {
                config,
                blocks: Vec::new(),
                free_head: None,
                stats: Stats::default(),
            }),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.borrow().config.chunk_size
    }

    pub fn total_chunks(&self) -> usize {
        self.inner.borrow().stats.total_chunks.load(Ordering::Relaxed)
    }

    pub fn free_chunks(&self) -> usize {
        self.inner.borrow().stats.free_chunks.load(Ordering::Relaxed)
    }

    /// Acquires one chunk, allocating a fresh block from the platform
    /// allocator if the free list is empty. `None` when `max_chunks` would
    /// be exceeded.
    pub fn acquire(self: &Rc<Self>) -> Option<PooledChunk> {
        let ptr = {
            let mut inner = self.inner.borrow_mut();
            if inner.free_head.is_none() {
                inner.grow()?;
            }
            inner.pop_free()
        }?;
        self.inner.borrow().stats.free_chunks.fetch_sub(1, Ordering::Relaxed);
        Some(PooledChunk {
            ptr,
            size: self.chunk_size(),
            pool: Rc::clone(self),
        })
    }

    /// Acquires `n` chunks, preferring to carve them directly out of freshly
    /// allocated blocks over round-tripping through the free list.
    pub fn acquire_batch(self: &Rc<Self>, n: usize, out: &mut Vec<PooledChunk>) {
        out.reserve(n);
        for _ in 0..n {
            match self.acquire() {
                Some(c) => out.push(c),
                None => break,
            }
        }
    }

    fn release(&self, ptr: NonNull<u8>) {
        let mut inner = self.inner.borrow_mut();
        inner.push_free(ptr);
        inner.stats.free_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// `true` iff `ptr` falls within a block owned by this pool and is
    /// aligned to the chunk size.
    pub fn owns(&self, ptr: *const u8) -> bool {
        let inner = self.inner.borrow();
        inner.blocks.iter().any(|b| {
            let base = b.base.as_ptr() as usize;
            let len = b.len_chunks * inner.config.chunk_size;
            let p = ptr as usize;
            p >= base && p < base + len && (p - base) % inner.config.chunk_size == 0
        })
    }
}

impl Inner {
    fn grow(&mut self) -> Option<()> {
        if self.stats.total_chunks.load(Ordering::Relaxed) >= self.config.max_chunks {
            return None;
        }
        let chunk_size = self.config.chunk_size;
        let block_bytes = chunk_size * self.config.chunks_per_block;
        let arena = Bump::with_capacity(block_bytes + chunk_size);
        let layout = std::alloc::Layout::from_size_align(block_bytes, chunk_size)
            .expect("valid chunk block layout");
        let raw = arena.alloc_layout(layout);
        // SAFETY: `raw` came from `alloc_layout` with `block_bytes` bytes
        // available and is non-null by construction.
        unsafe {
            std::ptr::write_bytes(raw.as_ptr(), 0, block_bytes);
        }
        let base = raw;

        let chunks_to_add = self.config.chunks_per_block.min(
            self.config.max_chunks - self.stats.total_chunks.load(Ordering::Relaxed),
        );
        for i in 0..chunks_to_add {
            // SAFETY: offset stays within the block we just allocated.
            let chunk_ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(i * chunk_size)) };
            self.push_free(chunk_ptr);
        }

        self.blocks.push(Block {
            _arena: arena,
            base,
            len_chunks: chunks_to_add,
        });
        self.stats.total_chunks.fetch_add(chunks_to_add, Ordering::Relaxed);
        self.stats.free_chunks.fetch_add(chunks_to_add, Ordering::Relaxed);
        self.stats.blocks_allocated.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "profiling")]
        tracing::debug!(chunks_to_add, chunk_size, "chunk pool grew by one block");
        Some(())
    }

    fn push_free(&mut self, ptr: NonNull<u8>) {
        // SAFETY: the chunk is at least `usize` bytes and not in use.
        unsafe {
            let next = self.free_head.map(|p| p.as_ptr() as usize).unwrap_or(0);
            (ptr.as_ptr() as *mut usize).write(next);
        }
        self.free_head = Some(ptr);
    }

    fn pop_free(&mut self) -> Option<NonNull<u8>> {
        let head = self.free_head?;
        // SAFETY: head was pushed by `push_free`, which wrote a valid next
        // pointer (or 0 for "none") into its first word.
        let next = unsafe { (head.as_ptr() as *const usize).read() };
        self.free_head = NonNull::new(next as *mut u8);
        // Account for one pop: the stats decrement happens in `acquire`.
        let _ = &self.stats;
        Some(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_roundtrip() {
        let pool = ChunkPool::new(ChunkPoolConfig {
            chunks_per_block: 4,
            ..Default::default()
        });
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.total_chunks(), 4);
        assert_eq!(pool.free_chunks(), 2);
        assert!(pool.owns(a.as_ptr()));
        drop(a);
        drop(b);
        assert_eq!(pool.free_chunks(), 4);
    }

    #[test]
    fn respects_max_chunks() {
        let pool = ChunkPool::new(ChunkPoolConfig {
            chunks_per_block: 4,
            max_chunks: 2,
            ..Default::default()
        });
        let _a = pool.acquire();
        let _b = pool.acquire();
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn fresh_blocks_are_zeroed() {
        let pool = ChunkPool::new(ChunkPoolConfig {
            chunks_per_block: 1,
            ..Default::default()
        });
        let chunk = pool.acquire().unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(chunk.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}

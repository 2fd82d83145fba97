use lru::LruCache;
use std::num::NonZeroUsize;

use super::error::FileResult;
use super::file_manager::{FileHandle, PagedFileManager};
use super::{BUFFER_POOL_SIZE, PAGE_SIZE, PageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    file: FileHandle,
    page_id: PageId,
}

struct Frame {
    data: Vec<u8>,
    dirty: bool,
}

/// LRU page cache over the file manager. All page IO in the engine flows
/// through here; mutable access marks the frame dirty and eviction writes
/// dirty frames back before the memory is reused.
pub struct BufferManager {
    file_manager: PagedFileManager,
    frames: LruCache<FrameKey, Frame>,
    capacity: usize,
    /// Recycled page buffer so steady-state loads do not allocate.
    spare: Vec<u8>,
}

impl BufferManager {
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    pub fn with_capacity(file_manager: PagedFileManager, capacity: usize) -> Self {
        Self {
            file_manager,
            frames: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN)),
            capacity: capacity.max(1),
            spare: vec![0u8; PAGE_SIZE],
        }
    }

    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    /// Read access to a page, loading it from disk on a miss.
    pub fn page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<&[u8]> {
        let key = FrameKey { file, page_id };
        if self.frames.peek(&key).is_none() {
            self.load(key)?;
        }
        // load() just inserted the frame on a miss
        Ok(&self.frames.get(&key).unwrap().data)
    }

    /// Mutable access to a page; the frame is marked dirty.
    pub fn page_mut(&mut self, file: FileHandle, page_id: PageId) -> FileResult<&mut [u8]> {
        let key = FrameKey { file, page_id };
        if self.frames.peek(&key).is_none() {
            self.load(key)?;
        }
        let frame = self.frames.get_mut(&key).unwrap();
        frame.dirty = true;
        Ok(&mut frame.data)
    }

    pub fn flush_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        let key = FrameKey { file, page_id };
        if let Some(frame) = self.frames.peek_mut(&key)
            && frame.dirty
        {
            self.file_manager.write_page(key.file, key.page_id, &frame.data)?;
            frame.dirty = false;
        }
        Ok(())
    }

    /// Write back every dirty frame and sync the underlying files.
    pub fn flush_all(&mut self) -> FileResult<()> {
        let dirty_keys: Vec<FrameKey> = self
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(key, _)| *key)
            .collect();

        for key in dirty_keys {
            if let Some(frame) = self.frames.peek_mut(&key)
                && frame.dirty
            {
                self.file_manager.write_page(key.file, key.page_id, &frame.data)?;
                frame.dirty = false;
            }
        }

        self.file_manager.sync_all()?;
        Ok(())
    }

    /// Flush everything and drop all cached frames.
    pub fn flush_and_clear(&mut self) -> FileResult<()> {
        self.flush_all()?;
        self.frames.clear();
        Ok(())
    }

    /// Delete a file, dropping its cached frames without writing them back.
    /// Required when the file's pages are going away with it; a later
    /// flush must not resurrect them through a dead handle.
    pub fn discard_and_remove<P: AsRef<std::path::Path>>(&mut self, path: P) -> FileResult<()> {
        if let Some(handle) = self.file_manager.handle_for(&path) {
            let stale: Vec<FrameKey> = self
                .frames
                .iter()
                .filter(|(key, _)| key.file == handle)
                .map(|(key, _)| *key)
                .collect();
            for key in stale {
                self.frames.pop(&key);
            }
        }
        self.file_manager.remove_file(path)
    }

    fn load(&mut self, key: FrameKey) -> FileResult<()> {
        while self.frames.len() >= self.capacity {
            self.evict_lru()?;
        }

        if self.spare.len() != PAGE_SIZE {
            self.spare = vec![0u8; PAGE_SIZE];
        }
        self.file_manager.read_page(key.file, key.page_id, &mut self.spare)?;

        let data = std::mem::take(&mut self.spare);
        self.frames.put(key, Frame { data, dirty: false });
        Ok(())
    }

    fn evict_lru(&mut self) -> FileResult<()> {
        if let Some((key, frame)) = self.frames.pop_lru() {
            if frame.dirty {
                self.file_manager.write_page(key.file, key.page_id, &frame.data)?;
            }
            self.spare = frame.data;
        }
        Ok(())
    }

    pub fn cached_page_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_page_cached(&self, file: FileHandle, page_id: PageId) -> bool {
        self.frames.contains(&FrameKey { file, page_id })
    }

    pub fn dirty_page_count(&self) -> usize {
        self.frames.iter().filter(|(_, f)| f.dirty).count()
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

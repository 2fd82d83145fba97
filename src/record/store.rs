//! One table's row storage: a singly linked chain of record pages starting
//! at page 1 (page 0 is the file header page).

use std::sync::{Arc, Mutex};

use super::error::{RecordError, RecordResult};
use super::page::{MAX_PAYLOAD_BYTES, RecordPage};
use crate::file::{self, BufferManager, FileHandle, PAGE_KIND_FILE_HEADER, PageId};

/// First record page of every table file.
pub const FIRST_RECORD_PAGE: PageId = 1;

const HEADER_WORD_KIND: usize = 0;
const HEADER_WORD_PAGE_COUNT: usize = 1;

pub struct RecordStore {
    file_handle: FileHandle,
    tail_page: PageId,
    page_count: usize,
}

impl RecordStore {
    /// Create a table file: a file header page plus one empty record page.
    pub fn create(buffer_mgr: &mut BufferManager, path: &str) -> RecordResult<Self> {
        buffer_mgr.file_manager_mut().create_file(path)?;
        let file_handle = buffer_mgr.file_manager_mut().open_file(path)?;

        let header = buffer_mgr.page_mut(file_handle, 0)?;
        header.fill(0);
        file::write_word(header, HEADER_WORD_KIND, PAGE_KIND_FILE_HEADER);
        file::write_word(header, HEADER_WORD_PAGE_COUNT, 2);

        let page = buffer_mgr.page_mut(file_handle, FIRST_RECORD_PAGE)?;
        RecordPage::init(page);

        Ok(Self {
            file_handle,
            tail_page: FIRST_RECORD_PAGE,
            page_count: 2,
        })
    }

    /// Open an existing table file and walk the chain to the tail. An insane
    /// header on the first record page means the file was never initialized
    /// and is formatted in place; on any later page it is corruption.
    pub fn open(buffer_mgr: &mut BufferManager, path: &str) -> RecordResult<Self> {
        let file_handle = buffer_mgr.file_manager_mut().open_file(path)?;
        let file_pages = buffer_mgr.file_manager_mut().page_count(file_handle)?;

        {
            let first = buffer_mgr.page_mut(file_handle, FIRST_RECORD_PAGE)?;
            let needs_init = !RecordPage::from_buffer(first).header_is_sane();
            if needs_init {
                RecordPage::init(first);
                let header = buffer_mgr.page_mut(file_handle, 0)?;
                header.fill(0);
                file::write_word(header, HEADER_WORD_KIND, PAGE_KIND_FILE_HEADER);
                file::write_word(header, HEADER_WORD_PAGE_COUNT, 2);
            }
        }

        let mut tail_page = FIRST_RECORD_PAGE;
        loop {
            let buffer = buffer_mgr.page_mut(file_handle, tail_page)?;
            let page = RecordPage::from_buffer(buffer);
            if tail_page != FIRST_RECORD_PAGE && !page.header_is_sane() {
                return Err(RecordError::CorruptPage(tail_page));
            }
            let next = page.next_page();
            if next < 0 {
                break;
            }
            tail_page = next as PageId;
        }

        Ok(Self {
            file_handle,
            tail_page,
            page_count: file_pages.max(2),
        })
    }

    pub fn file_handle(&self) -> FileHandle {
        self.file_handle
    }

    /// Append a record at the tail, allocating and linking a fresh page if
    /// the tail lacks room. The caller owns slot id allocation.
    pub fn insert(
        &mut self,
        buffer_mgr: &mut BufferManager,
        slot_id: i32,
        payload: &[u8],
    ) -> RecordResult<()> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(RecordError::PayloadTooLarge(payload.len()));
        }

        {
            let buffer = buffer_mgr.page_mut(self.file_handle, self.tail_page)?;
            let mut page = RecordPage::from_buffer(buffer);
            if page.insert(slot_id, payload)? {
                return Ok(());
            }
        }

        let new_page = self.allocate_page(buffer_mgr)?;
        let buffer = buffer_mgr.page_mut(self.file_handle, new_page)?;
        let mut page = RecordPage::from_buffer(buffer);
        page.insert(slot_id, payload)?;
        self.tail_page = new_page;
        Ok(())
    }

    /// Tombstone a record wherever it lives in the chain.
    pub fn delete(&mut self, buffer_mgr: &mut BufferManager, slot_id: i32) -> RecordResult<()> {
        let mut page_id = FIRST_RECORD_PAGE;
        loop {
            let buffer = buffer_mgr.page_mut(self.file_handle, page_id)?;
            let mut page = RecordPage::from_buffer(buffer);
            if page.tombstone(slot_id) {
                return Ok(());
            }
            let next = page.next_page();
            if next < 0 {
                return Err(RecordError::SlotNotFound(slot_id));
            }
            page_id = next as PageId;
        }
    }

    /// Delete plus re-insert under the same slot id; the record may move.
    pub fn update(
        &mut self,
        buffer_mgr: &mut BufferManager,
        slot_id: i32,
        payload: &[u8],
    ) -> RecordResult<()> {
        self.delete(buffer_mgr, slot_id)?;
        self.insert(buffer_mgr, slot_id, payload)
    }

    /// Fetch a record's payload by slot id.
    pub fn get(&mut self, buffer_mgr: &mut BufferManager, slot_id: i32) -> RecordResult<Vec<u8>> {
        let mut page_id = FIRST_RECORD_PAGE;
        loop {
            let buffer = buffer_mgr.page_mut(self.file_handle, page_id)?;
            let page = RecordPage::from_buffer(buffer);
            if let Some((pos, total)) = page.find_record(slot_id) {
                return Ok(page.read_payload(pos, total));
            }
            let next = page.next_page();
            if next < 0 {
                return Err(RecordError::SlotNotFound(slot_id));
            }
            page_id = next as PageId;
        }
    }

    fn allocate_page(&mut self, buffer_mgr: &mut BufferManager) -> RecordResult<PageId> {
        let new_page = self.page_count;
        self.page_count += 1;

        let buffer = buffer_mgr.page_mut(self.file_handle, new_page)?;
        RecordPage::init(buffer);

        let prev = buffer_mgr.page_mut(self.file_handle, self.tail_page)?;
        RecordPage::from_buffer(prev).set_next_page(new_page as i32);

        let header = buffer_mgr.page_mut(self.file_handle, 0)?;
        file::write_word(header, HEADER_WORD_PAGE_COUNT, self.page_count as u32);

        Ok(new_page)
    }

    /// Lazy scan over all live records in page-then-offset order. At most
    /// one page is consulted per step.
    pub fn scan_iter(&self, buffer_manager: Arc<Mutex<BufferManager>>) -> RecordScanIter {
        RecordScanIter {
            buffer_manager,
            file_handle: self.file_handle,
            page_id: FIRST_RECORD_PAGE as i32,
            buffered: Vec::new(),
            buffered_at: 0,
            done: false,
        }
    }
}

/// Streaming record scan. Each step buffers one page's live records under
/// the buffer-pool lock and then yields them without holding it.
pub struct RecordScanIter {
    buffer_manager: Arc<Mutex<BufferManager>>,
    file_handle: FileHandle,
    page_id: i32,
    buffered: Vec<(i32, Vec<u8>)>,
    buffered_at: usize,
    done: bool,
}

impl RecordScanIter {
    fn fill_from_next_page(&mut self) -> RecordResult<()> {
        let mut buffer_mgr = match self.buffer_manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        while self.page_id >= 0 {
            let buffer = buffer_mgr.page_mut(self.file_handle, self.page_id as PageId)?;
            let page = RecordPage::from_buffer(buffer);
            let records = page.live_records();
            let next = page.next_page();

            self.buffered = records
                .into_iter()
                .map(|(sid, (pos, total))| (sid, page.read_payload(pos, total)))
                .collect();
            self.buffered_at = 0;
            self.page_id = next;

            if !self.buffered.is_empty() {
                return Ok(());
            }
        }

        self.done = true;
        Ok(())
    }
}

impl Iterator for RecordScanIter {
    type Item = RecordResult<(i32, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.buffered_at < self.buffered.len() {
                let item = std::mem::take(&mut self.buffered[self.buffered_at]);
                self.buffered_at += 1;
                return Some(Ok(item));
            }
            if let Err(err) = self.fill_from_next_page() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

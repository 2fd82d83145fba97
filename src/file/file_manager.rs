use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageId};

/// Handle to an open paged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

struct FileEntry {
    file: File,
    path: PathBuf,
}

/// Maps file handles to open files and performs page-granular IO.
pub struct PagedFileManager {
    open_files: HashMap<FileHandle, FileEntry>,
    path_to_handle: HashMap<PathBuf, FileHandle>,
    next_handle: usize,
    max_open_files: usize,
}

impl PagedFileManager {
    pub fn new() -> Self {
        Self::with_max_files(128)
    }

    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_handle: HashMap::new(),
            next_handle: 0,
            max_open_files,
        }
    }

    /// Create a new empty file, failing if it already exists.
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        Ok(())
    }

    /// Open an existing file, reusing the handle if it is already open.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&handle) = self.path_to_handle.get(&path) {
            return Ok(handle);
        }
        if self.open_files.len() >= self.max_open_files {
            return Err(FileError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let handle = FileHandle(self.next_handle);
        self.next_handle += 1;

        self.open_files.insert(
            handle,
            FileEntry {
                file,
                path: path.clone(),
            },
        );
        self.path_to_handle.insert(path, handle);

        Ok(handle)
    }

    pub fn close_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        self.path_to_handle.remove(&entry.path);
        Ok(())
    }

    /// Delete a file, closing it first if it is open.
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if let Ok(canonical) = path.canonicalize()
            && let Some(&handle) = self.path_to_handle.get(&canonical)
        {
            self.close_file(handle)?;
        }

        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Read one page into `buffer`. Reading past the end of the file yields
    /// zero bytes for the unread tail.
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &mut [u8],
    ) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        entry.file.seek(SeekFrom::Start((page_id * PAGE_SIZE) as u64))?;
        let bytes_read = entry.file.read(buffer)?;
        if bytes_read < PAGE_SIZE {
            buffer[bytes_read..].fill(0);
        }

        Ok(())
    }

    /// Write one page, extending the file if the offset is past its end.
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &[u8],
    ) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let offset = (page_id * PAGE_SIZE) as u64;
        let required = offset + PAGE_SIZE as u64;
        if entry.file.metadata()?.len() < required {
            entry.file.set_len(required)?;
        }

        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(buffer)?;
        // No per-write sync; sync_all() runs on flush and shutdown.

        Ok(())
    }

    pub fn page_count(&mut self, handle: FileHandle) -> FileResult<usize> {
        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        let file_size = entry.file.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as usize)
    }

    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    /// Handle of an already-open file, if any.
    pub fn handle_for<P: AsRef<Path>>(&self, path: P) -> Option<FileHandle> {
        path.as_ref()
            .canonicalize()
            .ok()
            .and_then(|canonical| self.path_to_handle.get(&canonical).copied())
    }

    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.open_files.contains_key(&handle)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_create_and_open_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.dat");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        assert!(test_file.exists());

        let handle = manager.open_file(&test_file).unwrap();
        assert!(manager.is_file_open(handle));

        // Re-creating must fail, re-opening must reuse the handle
        assert!(matches!(
            manager.create_file(&test_file),
            Err(FileError::FileAlreadyExists(_))
        ));
        assert_eq!(manager.open_file(&test_file).unwrap(), handle);
        assert_eq!(manager.open_file_count(), 1);
    }

    #[test]
    fn test_open_nonexistent_file() {
        let temp_dir = setup_test_dir();
        let mut manager = PagedFileManager::new();

        let result = manager.open_file(temp_dir.path().join("missing.dat"));
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_read_write_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.dat");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        write_buffer[PAGE_SIZE - 1] = 255;
        manager.write_page(handle, 3, &write_buffer).unwrap();

        let mut read_buffer = vec![0u8; PAGE_SIZE];
        manager.read_page(handle, 3, &mut read_buffer).unwrap();
        assert_eq!(read_buffer, write_buffer);

        // Pages 0..3 were implicitly extended with zeros
        manager.read_page(handle, 1, &mut read_buffer).unwrap();
        assert!(read_buffer.iter().all(|&b| b == 0));
        assert_eq!(manager.page_count(handle).unwrap(), 4);
    }

    #[test]
    fn test_read_past_end_zero_fills() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.dat");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        let mut buffer = vec![0xFFu8; PAGE_SIZE];
        manager.read_page(handle, 100, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_buffer_size() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.dat");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        let mut small = vec![0u8; PAGE_SIZE - 1];
        assert!(matches!(
            manager.read_page(handle, 0, &mut small),
            Err(FileError::InvalidPageSize { .. })
        ));
    }

    #[test]
    fn test_remove_open_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.dat");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle = manager.open_file(&test_file).unwrap();

        manager.remove_file(&test_file).unwrap();
        assert!(!test_file.exists());
        assert!(!manager.is_file_open(handle));
    }

    #[test]
    fn test_max_open_files() {
        let temp_dir = setup_test_dir();
        let mut manager = PagedFileManager::with_max_files(2);

        for name in ["a.dat", "b.dat", "c.dat"] {
            manager.create_file(temp_dir.path().join(name)).unwrap();
        }
        manager.open_file(temp_dir.path().join("a.dat")).unwrap();
        manager.open_file(temp_dir.path().join("b.dat")).unwrap();

        let result = manager.open_file(temp_dir.path().join("c.dat"));
        assert!(matches!(result, Err(FileError::TooManyOpenFiles)));
    }
}

//! The filesystem capability the embedder supplies for file-oriented
//! builtins (§4.6). The VM core never touches `std::fs` directly: it only
//! ever goes through this trait, so an embedder can hand a sandboxed VM an
//! in-memory filesystem with no real disk access at all.

use std::cell::RefCell;
use std::collections::HashMap;

/// Host filesystem access, as the VM needs it. An embedder implements this
/// once against the real filesystem (or a virtual, capability-restricted
/// view of it) and passes it to the `Engine`.
pub trait Filesystem {
    fn exists(&self, path: &str) -> bool;
    fn read_to_string(&self, path: &str) -> std::io::Result<String>;
    fn write(&self, path: &str, data: &str) -> std::io::Result<()>;
}

/// A real-disk implementation, for embedding the VM outside a sandbox.
pub struct RealFilesystem;

impl Filesystem for RealFilesystem {
    fn exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }

    fn read_to_string(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write(&self, path: &str, data: &str) -> std::io::Result<()> {
        std::fs::write(path, data)
    }
}

/// An in-memory filesystem, for tests and for sandboxes that want file
/// builtins to work without ever touching the real disk.
#[derive(Default)]
pub struct MemoryFilesystem {
    files: RefCell<HashMap<String, String>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, path: impl Into<String>, contents: impl Into<String>) {
        self.files.borrow_mut().insert(path.into(), contents.into());
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.files.borrow().clone()
    }
}

impl Filesystem for MemoryFilesystem {
    fn exists(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn read_to_string(&self, path: &str) -> std::io::Result<String> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
    }

    fn write(&self, path: &str, data: &str) -> std::io::Result<()> {
        self.files.borrow_mut().insert(path.to_string(), data.to_string());
        Ok(())
    }
}

/// One entry in the VM's open-file table (§4.5). Read-mode files load their
/// whole contents at `file_open` time and `file_read` drains the remaining
/// buffer in one call, so "EOF returns empty Str" falls out naturally from
/// a cursor that has reached the buffer's end.
pub struct OpenFile {
    pub path: String,
    pub write_mode: bool,
    pub buffer: String,
    pub cursor: usize,
    pub closed: bool,
}

/// The VM instance's file-handle table. Scoped to one VM, flushed (all
/// pending writes committed through the `Filesystem` capability) when the
/// VM is dropped or every handle is explicitly closed.
#[derive(Default)]
pub struct FileTable {
    files: HashMap<i64, OpenFile>,
    next_handle: i64,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, fs: &dyn Filesystem, path: &str, mode: &str) -> std::io::Result<i64> {
        let write_mode = mode.contains('w') || mode.contains('a');
        let buffer = if write_mode {
            if mode.contains('a') && fs.exists(path) {
                fs.read_to_string(path)?
            } else {
                String::new()
            }
        } else {
            fs.read_to_string(path)?
        };
        let handle = self.next_handle;
        self.next_handle += 1;
        self.files.insert(
            handle,
            OpenFile {
                path: path.to_string(),
                write_mode,
                buffer,
                cursor: 0,
                closed: false,
            },
        );
        Ok(handle)
    }

    pub fn read(&mut self, handle: i64) -> Option<String> {
        let file = self.files.get_mut(&handle)?;
        if file.closed || file.write_mode {
            return Some(String::new());
        }
        let rest = file.buffer[file.cursor..].to_string();
        file.cursor = file.buffer.len();
        Some(rest)
    }

    pub fn write(&mut self, handle: i64, data: &str) -> Option<()> {
        let file = self.files.get_mut(&handle)?;
        if !file.write_mode || file.closed {
            return None;
        }
        file.buffer.push_str(data);
        Some(())
    }

    /// Closing is idempotent (§4.5): closing an already-closed or
    /// never-opened handle is a no-op, not an error.
    pub fn close(&mut self, fs: &dyn Filesystem, handle: i64) -> std::io::Result<()> {
        if let Some(file) = self.files.get_mut(&handle) {
            if !file.closed {
                if file.write_mode {
                    fs.write(&file.path, &file.buffer)?;
                }
                file.closed = true;
            }
        }
        Ok(())
    }

    pub fn contains(&self, handle: i64) -> bool {
        self.files.contains_key(&handle)
    }

    /// Commits every still-open write-mode file. Called when the VM shuts
    /// down so an embedder doesn't lose writes to files the program never
    /// explicitly closed.
    pub fn flush(&mut self, fs: &dyn Filesystem) {
        let handles: Vec<i64> = self.files.keys().copied().collect();
        for handle in handles {
            let _ = self.close(fs, handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn read_then_eof_returns_empty_string() {
        let fs = MemoryFilesystem::new();
        fs.seed("a.txt", "hello");
        let mut table = FileTable::new();
        let handle = table.open(&fs, "a.txt", "r").unwrap();
        assert_eq!(table.read(handle).unwrap(), "hello");
        assert_eq!(table.read(handle).unwrap(), "");
    }

    #[test]
    fn write_then_close_commits_through_filesystem() {
        let fs = MemoryFilesystem::new();
        let mut table = FileTable::new();
        let handle = table.open(&fs, "out.txt", "w").unwrap();
        table.write(handle, "hi").unwrap();
        assert!(!fs.exists("out.txt"));
        table.close(&fs, handle).unwrap();
        assert_eq!(fs.read_to_string("out.txt").unwrap(), "hi");
    }

    #[test]
    fn closing_twice_is_a_no_op() {
        let fs = MemoryFilesystem::new();
        let mut table = FileTable::new();
        let handle = table.open(&fs, "out.txt", "w").unwrap();
        table.close(&fs, handle).unwrap();
        table.close(&fs, handle).unwrap();
    }
}

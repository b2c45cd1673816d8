//! Raw page I/O (component A). `Vfs` is the seam the pager and WAL write
//! through; tests substitute [`FaultyVfs`] to inject torn writes, dropped
//! fsyncs, and truncation without touching the rest of the stack.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{DecentError, Result};

/// Raw file access a pager or WAL writer can depend on, real or faulty.
pub trait Vfs: std::fmt::Debug + Send + Sync {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;
    fn fsync(&mut self) -> Result<()>;
    fn size(&mut self) -> Result<u64>;
    fn set_len(&mut self, len: u64) -> Result<()>;
}

#[derive(Debug)]
pub struct FileVfs {
    file: File,
}

impl FileVfs {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl Vfs for FileVfs {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .read_exact(buf)
            .map_err(|e| DecentError::Io(e))?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }
}

/// A fault a [`FaultyVfs`] applies at a chosen call count. Each fault fires
/// once then the wrapper reverts to passing calls through untouched.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Truncate the write to the first `n` bytes, silently dropping the rest.
    TruncateWrite { n: usize },
    /// Fail the call with a fixed error instead of performing it.
    FailNextWrite,
    /// Accept the write but make the following `fsync()` a no-op.
    DropNextFsync,
}

/// Test-only fault-injection wrapper. Production code never constructs one;
/// [`crate::db::Db::open`] always binds a bare [`FileVfs`].
#[derive(Debug)]
pub struct FaultyVfs {
    inner: Box<dyn Vfs>,
    pending: Option<Fault>,
    write_count: AtomicU64,
    fsync_count: Arc<AtomicU64>,
    label: String,
}

impl FaultyVfs {
    pub fn new(inner: Box<dyn Vfs>, label: impl Into<String>) -> Self {
        Self {
            inner,
            pending: None,
            write_count: AtomicU64::new(0),
            fsync_count: Arc::new(AtomicU64::new(0)),
            label: label.into(),
        }
    }

    /// Arm a one-shot fault for the next matching call.
    pub fn arm(&mut self, fault: Fault) {
        self.pending = Some(fault);
    }

    /// A handle that keeps counting `fsync()` calls that reach this `Vfs`
    /// after it's been boxed and moved into a `Wal`/`Pager`. Clone before
    /// handing the `FaultyVfs` away.
    pub fn fsync_count_handle(&self) -> Arc<AtomicU64> {
        self.fsync_count.clone()
    }

    fn log_fault(&self, detail: &str) {
        let n = self.write_count.load(Ordering::Relaxed);
        eprintln!("fault: {} call={n} {detail}", self.label);
    }
}

impl Vfs for FaultyVfs {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        match self.pending.take() {
            Some(Fault::TruncateWrite { n }) => {
                self.log_fault(&format!("truncate-write n={n}"));
                let n = n.min(buf.len());
                self.inner.write_at(offset, &buf[..n])
            }
            Some(Fault::FailNextWrite) => {
                self.log_fault("fail-next-write");
                Err(DecentError::DurabilityFailed("injected write failure".into()))
            }
            other => {
                self.pending = other;
                self.inner.write_at(offset, buf)
            }
        }
    }

    fn fsync(&mut self) -> Result<()> {
        self.fsync_count.fetch_add(1, Ordering::Relaxed);
        match self.pending.take() {
            Some(Fault::DropNextFsync) => {
                self.log_fault("drop-next-fsync");
                Ok(())
            }
            other => {
                self.pending = other;
                self.inner.fsync()
            }
        }
    }

    fn size(&mut self) -> Result<u64> {
        self.inner.size()
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.inner.set_len(len)
    }
}

//! Disk manager for page-level file I/O.

use lof_common::page::{DEFAULT_PAGE_SIZE, PageId};
use lof_common::store::PageStore;
use lof_common::{LofError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskManagerConfig {
    /// Directory holding the data file.
    pub data_dir: PathBuf,
    /// Name of the data file within `data_dir`.
    pub file_name: String,
    /// Page size in bytes.
    pub page_size: usize,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            file_name: "lof.dat".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            fsync_enabled: false,
        }
    }
}

impl DiskManagerConfig {
    /// Returns the full path of the data file.
    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }
}

/// Page store backed by a single data file.
///
/// Page `n` lives at byte offset `n * page_size`. Every call goes to the
/// file; caching is the page cache's job.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// The data file.
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a disk manager over a new, empty data file.
    ///
    /// An existing file at the same path is truncated.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        Self::validate(&config)?;
        std::fs::create_dir_all(&config.data_dir)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(config.file_path())?;

        Ok(Self {
            config,
            file,
            num_pages: 0,
        })
    }

    /// Opens an existing data file, keeping its pages.
    pub fn open(config: DiskManagerConfig) -> Result<Self> {
        Self::validate(&config)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(config.file_path())?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / config.page_size as u64) as u32;

        Ok(Self {
            config,
            file,
            num_pages,
        })
    }

    fn validate(config: &DiskManagerConfig) -> Result<()> {
        if config.page_size == 0 {
            return Err(LofError::ConfigError(
                "disk manager page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Returns the data file path.
    pub fn path(&self) -> PathBuf {
        self.config.file_path()
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.config.page_size {
            return Err(LofError::PageSizeMismatch {
                expected: self.config.page_size,
                actual: len,
            });
        }
        Ok(())
    }

    fn check_allocated(&self, page_id: PageId) -> Result<()> {
        if page_id.page_num() >= self.num_pages {
            return Err(LofError::IoError(format!(
                "{} does not exist in {}",
                page_id,
                self.config.file_path().display()
            )));
        }
        Ok(())
    }
}

impl PageStore for DiskManager {
    fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn allocate(&mut self) -> Result<PageId> {
        let page_id = PageId::new(self.num_pages);

        // Write an empty page to extend the file
        let zeroes = vec![0u8; self.config.page_size];
        self.file
            .seek(SeekFrom::Start(page_id.offset(self.config.page_size)))?;
        self.file.write_all(&zeroes)?;

        if self.config.fsync_enabled {
            self.file.sync_all()?;
        }

        self.num_pages += 1;
        Ok(page_id)
    }

    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len())?;
        self.check_allocated(page_id)?;

        // Read and Seek are implemented for &File
        let mut file = &self.file;
        file.seek(SeekFrom::Start(page_id.offset(self.config.page_size)))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        self.check_allocated(page_id)?;

        self.file
            .seek(SeekFrom::Start(page_id.offset(self.config.page_size)))?;
        self.file.write_all(data)?;

        if self.config.fsync_enabled {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn num_pages(&self) -> u32 {
        self.num_pages
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

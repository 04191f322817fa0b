use std::{io, ops::ControlFlow, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use sdcard::fat::{self, DirItem, FatError, FilePointer, PageIndex, Query, Volume};
use serde::Serialize;

use crate::disk::FileDisk;

/// A mounted card image; every command opens one of these.
pub struct Image {
    disk: FileDisk,
    volume: Volume,
}

#[derive(Debug, Serialize)]
pub struct ImageInfo {
    pub label: String,
    pub partition_start: u32,
    pub sectors_per_cluster: u8,
    pub fat_count: u8,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    pub data_begin: u32,
    pub max_cluster: u32,
    pub capacity_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct ListedEntry {
    pub index: u16,
    pub name: String,
    pub short_name: String,
    pub is_dir: bool,
    pub cluster: u32,
    pub size: u32,
}

#[derive(Debug, Serialize)]
pub struct Listing {
    pub folder: u32,
    pub page: Option<usize>,
    pub pages: usize,
    pub entries: Vec<ListedEntry>,
    pub files: u16,
    pub total_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct PutReport {
    pub name: String,
    pub folder: u32,
    pub cluster: u32,
    pub size: u32,
}

fn fat_error(err: FatError<io::Error>) -> anyhow::Error {
    match err {
        FatError::Device(io) => anyhow::Error::new(io).context("image I/O failed"),
        other => anyhow!("{other:?}"),
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    let path = path.trim_matches('/');
    path.rsplit_once('/').unwrap_or(("", path))
}

impl ListedEntry {
    fn from_item(item: &DirItem) -> Self {
        Self {
            index: item.index,
            name: item.name.to_string(),
            short_name: item.entry.short_name.to_string(),
            is_dir: item.entry.is_dir(),
            cluster: item.entry.first_cluster,
            size: item.entry.size,
        }
    }
}

impl Image {
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let mut disk = FileDisk::open(path, writable)
            .with_context(|| format!("failed to open image {}", path.display()))?;
        let volume = fat::mount(&mut disk)
            .map_err(fat_error)
            .with_context(|| format!("failed to mount {}", path.display()))?;
        Ok(Self { disk, volume })
    }

    pub fn info(&mut self) -> Result<ImageInfo> {
        let label = fat::read_volume_label(&mut self.disk, &self.volume).map_err(fat_error)?;
        let volume = &self.volume;
        Ok(ImageInfo {
            label: label.to_string(),
            partition_start: volume.partition_start(),
            sectors_per_cluster: volume.sectors_per_cluster(),
            fat_count: volume.fat_count(),
            sectors_per_fat: volume.sectors_per_fat(),
            root_cluster: volume.root_cluster(),
            data_begin: volume.data_begin(),
            max_cluster: volume.max_cluster(),
            capacity_bytes: volume.capacity_bytes(),
        })
    }

    /// Entry of `folder` whose display name or 8.3 form equals `name`,
    /// ignoring ASCII case.
    pub fn lookup(&mut self, folder: u32, name: &str) -> Result<DirItem> {
        let mut found = None;
        fat::list(&mut self.disk, &self.volume, folder, |item| {
            if item.name.eq_ignore_ascii_case(name)
                || item.entry.short_name.to_string().eq_ignore_ascii_case(name)
            {
                found = Some(item.clone());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .map_err(fat_error)?;
        found.ok_or_else(|| anyhow!("{name}: not found"))
    }

    /// Walks a `/`-separated folder path from the root.
    pub fn resolve_folder(&mut self, path: &str) -> Result<u32> {
        let mut folder = self.volume.root_cluster();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            let item = self.lookup(folder, part)?;
            if !item.entry.is_dir() {
                bail!("{part}: not a directory");
            }
            folder = match item.entry.first_cluster {
                0 => self.volume.root_cluster(),
                cluster => cluster,
            };
        }
        Ok(folder)
    }

    /// Lists a folder whole, or one page of it when `page` is set.
    pub fn list(&mut self, path: &str, page_size: u16, page: Option<usize>) -> Result<Listing> {
        let folder = self.resolve_folder(path)?;
        let mut entries = Vec::new();
        let visit = |item: &DirItem| {
            entries.push(ListedEntry::from_item(item));
            ControlFlow::Continue(())
        };

        let (summary, pages) = match page {
            Some(page) => {
                let index = PageIndex::build(&mut self.disk, &self.volume, folder, page_size)
                    .map_err(fat_error)?;
                if page == 0 || page > index.page_count() {
                    bail!("page {page} out of range (1..={})", index.page_count());
                }
                let summary = fat::list_page(&mut self.disk, &self.volume, &index, page, visit)
                    .map_err(fat_error)?;
                (summary, index.page_count())
            }
            None => {
                let summary =
                    fat::list(&mut self.disk, &self.volume, folder, visit).map_err(fat_error)?;
                (summary, 1)
            }
        };

        Ok(Listing {
            folder,
            page,
            pages,
            entries,
            files: summary.files,
            total_bytes: summary.total_bytes,
        })
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let (parent, name) = split_parent(path);
        let folder = self.resolve_folder(parent)?;
        let item = self.lookup(folder, name)?;
        let mut pointer = FilePointer::open(&mut self.disk, &self.volume, folder, &item.entry)
            .map_err(fat_error)
            .with_context(|| format!("failed to open {path}"))?;

        let mut data = vec![0u8; item.entry.size as usize];
        let mut total = 0;
        while total < data.len() {
            let read = fat::read_at(&mut self.disk, &self.volume, &mut pointer, &mut data[total..])
                .map_err(fat_error)?;
            if read == 0 {
                bail!(
                    "{path}: chain ends after {total} of {} bytes",
                    data.len()
                );
            }
            total += read;
        }
        Ok(data)
    }

    /// Stores `data` as a new file in `folder_path`. The name is reduced to
    /// 8.3 form and stepped past any existing file with the same name.
    pub fn put_file(&mut self, folder_path: &str, name: &str, data: &[u8]) -> Result<PutReport> {
        let folder = self.resolve_folder(folder_path)?;
        let short = fat::to_short_name(name);
        let entry = fat::create_unique(&mut self.disk, &self.volume, folder, short, 0)
            .map_err(fat_error)
            .with_context(|| format!("failed to create {name}"))?;
        let mut pointer = FilePointer::open(&mut self.disk, &self.volume, folder, &entry)
            .map_err(fat_error)?;
        fat::write_at(&mut self.disk, &self.volume, &mut pointer, data)
            .map_err(fat_error)
            .with_context(|| format!("failed to write {} bytes", data.len()))?;

        Ok(PutReport {
            name: entry.short_name.to_string(),
            folder,
            cluster: entry.first_cluster,
            size: pointer.size(),
        })
    }
}

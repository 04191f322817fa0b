use core::ops::ControlFlow;

use heapless::Vec;

use super::dir::{walk, WalkStart};
use super::{DirItem, FatError, ListSummary, Volume};
use crate::block::BlockDevice;

/// Pages tracked per folder; entries past the last tracked page are not
/// reachable through [`list_page`].
pub const MAX_PAGES: usize = 64;

/// Where a page starts: the chain position of the cluster holding the first
/// slot of its first entry, long-name fragments included, and the visible
/// entries counted before that cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageMark {
    pub chain_index: u8,
    pub entries_before: u16,
}

/// Page start positions for one folder, built by a single full scan so a
/// later page can be listed without rereading the clusters before it.
///
/// The index describes the folder as it was when built; callers drop it on
/// any folder change or entry creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageIndex {
    folder: u32,
    page_size: u16,
    entries: u16,
    marks: Vec<PageMark, MAX_PAGES>,
}

impl PageIndex {
    pub fn build<D: BlockDevice>(
        dev: &mut D,
        volume: &Volume,
        folder: u32,
        page_size: u16,
    ) -> Result<Self, FatError<D::Error>> {
        let page_size = page_size.max(1);
        let mut marks = Vec::new();
        let mut entries = 0u16;
        walk(dev, volume, folder, WalkStart::default(), |item, position| {
            if (item.index - 1) % page_size == 0
                && marks
                    .push(PageMark {
                        chain_index: position.chain_index,
                        entries_before: position.visible_before_cluster,
                    })
                    .is_err()
            {
                return ControlFlow::Break(());
            }
            entries = item.index;
            ControlFlow::Continue(())
        })?;

        log::debug!(
            "fat: page_index folder={} entries={} pages={}",
            folder,
            entries,
            marks.len()
        );
        Ok(Self {
            folder,
            page_size,
            entries,
            marks,
        })
    }

    pub fn folder(&self) -> u32 {
        self.folder
    }

    pub fn is_for(&self, folder: u32) -> bool {
        self.folder == folder
    }

    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    /// Visible entries covered by the tracked pages.
    pub fn entries(&self) -> u16 {
        self.entries
    }

    /// At least one page, even for an empty folder.
    pub fn page_count(&self) -> usize {
        self.marks.len().max(1)
    }

    /// Start of the 1-based `page`.
    pub fn mark(&self, page: usize) -> Option<PageMark> {
        self.marks.get(page.checked_sub(1)?).copied()
    }
}

/// Lists the entries of one 1-based page of `index.folder()`.
///
/// Scanning starts at the cluster recorded for the page. A page past the
/// end yields an empty summary.
pub fn list_page<D, F>(
    dev: &mut D,
    volume: &Volume,
    index: &PageIndex,
    page: usize,
    mut visit: F,
) -> Result<ListSummary, FatError<D::Error>>
where
    D: BlockDevice,
    F: FnMut(&DirItem) -> ControlFlow<()>,
{
    let mut summary = ListSummary::default();
    let Some(mark) = index.mark(page) else {
        return Ok(summary);
    };

    let first = (page - 1) * index.page_size as usize + 1;
    let last = first + index.page_size as usize - 1;
    let start = WalkStart {
        chain_index: mark.chain_index,
        visible_before: mark.entries_before,
    };
    let mut visitor_stopped = false;
    walk(dev, volume, index.folder, start, |item, _| {
        let position = item.index as usize;
        if position < first {
            return ControlFlow::Continue(());
        }
        if position > last {
            return ControlFlow::Break(());
        }
        summary.record(item);
        let flow = visit(item);
        visitor_stopped = flow.is_break();
        flow
    })?;
    summary.stopped_early = visitor_stopped;
    Ok(summary)
}

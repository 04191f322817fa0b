use core::ops::ControlFlow;

use sdcard::{
    fat::{self, DirItem, PageIndex, Query},
    BlockDevice,
};

use super::{fat_result_code, ResultCode, Storage};

impl<D: BlockDevice> Storage<D> {
    fn ensure_page_index(&mut self, reason: &str) -> Result<&PageIndex, ResultCode> {
        let volume = self.mounted(reason, "ls")?;
        let folder = volume.current_folder();
        let stale = !self.pages.as_ref().is_some_and(|pages| pages.is_for(folder));
        if stale {
            let index = PageIndex::build(&mut self.dev, &volume, folder, self.config.page_size)
                .map_err(|err| {
                    log::warn!("sdcart[{}]: ls_error folder={} err={:?}", reason, folder, err);
                    fat_result_code(&err)
                })?;
            self.pages = Some(index);
        }
        self.pages.as_ref().ok_or(ResultCode::OperationFailed)
    }

    /// Pages in the current folder, building the page index if needed.
    pub fn page_count(&mut self, reason: &str) -> Result<usize, ResultCode> {
        self.ensure_page_index(reason).map(PageIndex::page_count)
    }

    /// Hands each entry of the 1-based `page` of the current folder to
    /// `visit`.
    pub fn ls<F>(&mut self, reason: &str, page: usize, mut visit: F) -> ResultCode
    where
        F: FnMut(&DirItem),
    {
        let index = match self.ensure_page_index(reason) {
            Ok(index) => index.clone(),
            Err(code) => return code,
        };
        let volume = match self.mounted(reason, "ls") {
            Ok(volume) => volume,
            Err(code) => return code,
        };
        if page == 0 || page > index.page_count() {
            log::warn!(
                "sdcart[{}]: ls_error page={} pages={}",
                reason,
                page,
                index.page_count()
            );
            return ResultCode::NotFound;
        }

        let listed = fat::list_page(&mut self.dev, &volume, &index, page, |item| {
            let kind = if item.entry.is_dir() { "dir" } else { "file" };
            log::debug!(
                "sdcart[{}]: ls {} idx={} name={} size={}",
                reason,
                kind,
                item.index,
                item.name,
                item.entry.size
            );
            visit(item);
            ControlFlow::Continue(())
        });
        match listed {
            Ok(summary) => {
                log::info!(
                    "sdcart[{}]: ls_ok folder={} page={}/{} count={} files={} bytes={}",
                    reason,
                    index.folder(),
                    page,
                    index.page_count(),
                    summary.entries,
                    summary.files,
                    summary.total_bytes
                );
                ResultCode::Ok
            }
            Err(err) => {
                log::warn!("sdcart[{}]: ls_error page={} err={:?}", reason, page, err);
                fat_result_code(&err)
            }
        }
    }

    /// Enters the subfolder matched by `query`; `..` at the top level leads
    /// back to the root.
    pub fn change_folder(&mut self, reason: &str, query: Query<'_>) -> ResultCode {
        let volume = match self.mounted(reason, "cd") {
            Ok(volume) => volume,
            Err(code) => return code,
        };
        match fat::open_folder(&mut self.dev, &volume, volume.current_folder(), query) {
            Ok(folder) => {
                self.enter_folder(folder);
                log::info!("sdcart[{}]: cd_ok folder={}", reason, folder);
                ResultCode::Ok
            }
            Err(err) => {
                log::warn!("sdcart[{}]: cd_error query={:?} err={:?}", reason, query, err);
                fat_result_code(&err)
            }
        }
    }

    pub fn change_to_root(&mut self, reason: &str) -> ResultCode {
        let volume = match self.mounted(reason, "cd") {
            Ok(volume) => volume,
            Err(code) => return code,
        };
        self.enter_folder(volume.root_cluster());
        log::info!("sdcart[{}]: cd_ok folder={}", reason, volume.root_cluster());
        ResultCode::Ok
    }

    pub(super) fn enter_folder(&mut self, folder: u32) {
        if let Some(volume) = self.volume.as_mut() {
            volume.set_current_folder(folder);
        }
        self.forget_folder_state();
    }

    /// Remembers the entry matched by `query` in the current folder for a
    /// later load.
    pub fn select(&mut self, reason: &str, query: Query<'_>) -> ResultCode {
        let volume = match self.mounted(reason, "select") {
            Ok(volume) => volume,
            Err(code) => return code,
        };
        self.selected = None;
        self.pointer = None;
        match fat::find(&mut self.dev, &volume, volume.current_folder(), query) {
            Ok(Some(item)) => {
                log::info!(
                    "sdcart[{}]: select_ok name={} cluster={} size={}",
                    reason,
                    item.name,
                    item.entry.first_cluster,
                    item.entry.size
                );
                self.selected = Some(item);
                ResultCode::Ok
            }
            Ok(None) => {
                log::info!("sdcart[{}]: select not_found query={:?}", reason, query);
                ResultCode::NotFound
            }
            Err(err) => {
                log::warn!("sdcart[{}]: select_error err={:?}", reason, err);
                fat_result_code(&err)
            }
        }
    }
}

use std::collections::{HashMap, LinkedList};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{AccessType, FrameId, KeelError, PageId, Result, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskProxy, DiskRequest};

use super::{BasicPageGuard, FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Bookkeeping guarded by the single pool mutex
struct PoolInner {
    /// Maps resident page IDs to their frames
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page
    free_list: LinkedList<FrameId>,
    /// Next page id handed out by allocate_page
    next_page_id: i32,
}

/// State shared with page-guard release callbacks
struct PoolState {
    frames: Vec<Arc<FrameHeader>>,
    inner: Mutex<PoolInner>,
    replacer: LruKReplacer,
}

impl PoolState {
    /// Shared unpin path for UnpinPage and guard drops. Returns false if the
    /// page is not resident or was not pinned.
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() == 0 {
            return false;
        }

        // A true flag sets dirty; a false flag never clears it
        if is_dirty {
            frame.set_dirty(true);
        }
        if let Some(0) = frame.unpin() {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }
}

/// BufferPoolManager caches disk pages in a fixed array of frames. Victims
/// are chosen from the free list first, then by the LRU-K replacer; dirty
/// victims are written back asynchronously through the disk proxy. Pages are
/// handed out pinned, either raw or wrapped in RAII page guards.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
    disk_proxy: DiskProxy,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = LinkedList::new();

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let next_page_id = disk_manager.num_pages() as i32;

        let state = Arc::new(PoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                next_page_id,
            }),
            replacer: LruKReplacer::new(pool_size, replacer_k),
        });

        Self {
            pool_size,
            state,
            disk_proxy: DiskProxy::new(disk_manager),
        }
    }

    /// Creates a new page, pinned with count 1. Fails with `PoolExhausted`
    /// when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, Arc<FrameHeader>)> {
        let mut inner = self.state.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = PageId::new(inner.next_page_id);
        inner.next_page_id += 1;
        inner.page_table.insert(page_id, frame_id);

        let frame = &self.state.frames[frame_id.as_usize()];
        frame.reset();
        frame.set_page_id(page_id);

        self.state.replacer.record_access(frame_id, AccessType::Unknown);
        self.state.replacer.set_evictable(frame_id, false);
        frame.pin();

        Ok((page_id, Arc::clone(frame)))
    }

    /// Fetches a page, pinning it. If the page is not resident it is read
    /// through the disk proxy into a victim frame.
    pub fn fetch_page(&self, page_id: PageId, access_type: AccessType) -> Result<Arc<FrameHeader>> {
        if !page_id.is_valid() {
            return Err(KeelError::InvalidPageId(page_id));
        }

        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.record_access(frame_id, access_type);
            self.state.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        inner.page_table.insert(page_id, frame_id);

        let frame = &self.state.frames[frame_id.as_usize()];
        frame.reset();
        frame.set_page_id(page_id);
        {
            let mut data = frame.write_data();
            self.disk_proxy.read_from_disk(page_id, &mut data[..])?;
        }
        frame.set_dirty(false);

        self.state.replacer.record_access(frame_id, access_type);
        self.state.replacer.set_evictable(frame_id, false);
        frame.pin();

        Ok(Arc::clone(frame))
    }

    /// Unpins a page. Returns false if the page is not resident or its pin
    /// count was already zero. `is_dirty = true` sets the dirty flag;
    /// `is_dirty = false` leaves a previously set flag alone.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool, _access_type: AccessType) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Enqueues a write-back of the page regardless of its dirty flag and
    /// clears the flag. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(KeelError::InvalidPageId(page_id));
        }

        let inner = self.state.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_proxy.write_to_disk(DiskRequest::write(page_id, &data));
        frame.set_dirty(false);

        Ok(true)
    }

    /// Enqueues write-backs for every resident dirty page.
    pub fn flush_all_pages(&self) {
        let inner = self.state.inner.lock();

        for (&page_id, &frame_id) in inner.page_table.iter() {
            let frame = &self.state.frames[frame_id.as_usize()];
            if !frame.is_dirty() {
                continue;
            }

            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_proxy.write_to_disk(DiskRequest::write(page_id, &data));
            frame.set_dirty(false);
        }
    }

    /// Deletes a page from the pool. Returns true if the page was not
    /// resident or was deleted; false if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.state.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return true,
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return false;
        }

        inner.page_table.remove(&page_id);
        self.state.replacer.remove(frame_id);
        inner.free_list.push_back(frame_id);
        frame.reset();
        self.deallocate_page(page_id);

        true
    }

    /// Fetches a page wrapped in a basic guard (pin only).
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard> {
        let frame = self.fetch_page(page_id, AccessType::Unknown)?;
        Ok(BasicPageGuard::new(page_id, frame, self.release_callback()))
    }

    /// Fetches a page wrapped in a guard holding the shared page latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_page(page_id, AccessType::Unknown)?;
        let guard = unsafe { ReadPageGuard::new(page_id, frame, self.release_callback()) };
        Ok(guard)
    }

    /// Fetches a page wrapped in a guard holding the exclusive page latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_page(page_id, AccessType::Unknown)?;
        let guard = unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) };
        Ok(guard)
    }

    /// Creates a new page wrapped in a basic guard.
    pub fn new_page_guarded(&self) -> Result<(PageId, BasicPageGuard)> {
        let (page_id, frame) = self.new_page()?;
        Ok((
            page_id,
            BasicPageGuard::new(page_id, frame, self.release_callback()),
        ))
    }

    pub fn get_pool_size(&self) -> usize {
        self.pool_size
    }

    /// All frames of the pool, for tests.
    pub fn get_pages(&self) -> &[Arc<FrameHeader>] {
        &self.state.frames
    }

    /// Pin count of a resident page, for tests.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    /// Number of frames currently in the free list, for tests.
    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_proxy.disk_manager()
    }

    /// Picks a victim frame: free list first, then LRU-K eviction. A dirty
    /// victim's bytes are enqueued for write-back before its mapping is
    /// erased.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.state.replacer.evict() {
            Some(frame_id) => frame_id,
            None => return Err(KeelError::PoolExhausted),
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_proxy
                .write_to_disk(DiskRequest::write(old_page_id, &data));
            frame.set_dirty(false);
            debug!(page_id = old_page_id.as_i32(), "evicting dirty page, write-back enqueued");
        }

        inner.page_table.remove(&old_page_id);
        Ok(frame_id)
    }

    fn release_callback(&self) -> Box<dyn FnOnce(PageId, bool) + Send + Sync> {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            state.unpin(page_id, is_dirty);
        })
    }

    /// Imitates freeing the page on disk. Deallocated ids are not recycled.
    fn deallocate_page(&self, _page_id: PageId) {}
}

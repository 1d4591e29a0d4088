use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::common::{PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// Owned page-sized buffer carried by disk requests and scheduler caches
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

fn zeroed_buf() -> PageBuf {
    Box::new([0u8; PAGE_SIZE])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

/// A single disk I/O request. The request owns its buffer; for a write the
/// buffer is a snapshot of the page taken at enqueue time.
pub struct DiskRequest {
    pub kind: RequestKind,
    pub page_id: PageId,
    pub data: PageBuf,
}

impl DiskRequest {
    pub fn read(page_id: PageId) -> Self {
        Self {
            kind: RequestKind::Read,
            page_id,
            data: zeroed_buf(),
        }
    }

    pub fn write(page_id: PageId, data: &[u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        let mut buf = zeroed_buf();
        buf.copy_from_slice(data);
        Self {
            kind: RequestKind::Write,
            page_id,
            data: buf,
        }
    }
}

/// State shared between a scheduler handle and its worker thread.
///
/// `pending` counts requests submitted but not yet drained. `tail` mirrors
/// the buffer of the most recently submitted pending request, so readers can
/// observe bytes that have not reached the device yet. `cache` mirrors the
/// last drained request once the queue has emptied; a new write invalidates
/// it.
struct SchedulerState {
    pending: usize,
    tail: Option<PageBuf>,
    cache: Option<PageBuf>,
}

/// Per-page request scheduler: a FIFO of requests drained by one background
/// worker thread. Shutdown posts a `None` sentinel and joins the worker.
struct PageScheduler {
    state: Arc<Mutex<SchedulerState>>,
    sender: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl PageScheduler {
    fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = unbounded::<Option<DiskRequest>>();
        let state = Arc::new(Mutex::new(SchedulerState {
            pending: 0,
            tail: None,
            cache: None,
        }));

        let worker_state = Arc::clone(&state);
        let worker = thread::spawn(move || {
            Self::background_work(disk_manager, receiver, worker_state);
        });

        Self {
            state,
            sender,
            worker: Some(worker),
        }
    }

    /// Enqueues a request. The tail update, cache invalidation, and channel
    /// send happen under the state lock so readers never observe a gap
    /// between "write submitted" and "write visible".
    fn submit(&self, request: DiskRequest) {
        let mut state = self.state.lock();
        state.pending += 1;
        if request.kind == RequestKind::Write {
            let mut snapshot = zeroed_buf();
            snapshot.copy_from_slice(&request.data[..]);
            state.tail = Some(snapshot);
            state.cache = None;
        }
        self.sender
            .send(Some(request))
            .expect("page scheduler worker exited while scheduler alive");
    }

    /// Serves a read from the cache or the pending tail.
    /// Returns false if neither is available and the caller must go to the
    /// device.
    fn serve_read(&self, out: &mut [u8]) -> bool {
        let state = self.state.lock();
        if let Some(cache) = &state.cache {
            out.copy_from_slice(&cache[..]);
            return true;
        }
        if let Some(tail) = &state.tail {
            out.copy_from_slice(&tail[..]);
            return true;
        }
        false
    }

    fn background_work(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<Option<DiskRequest>>,
        state: Arc<Mutex<SchedulerState>>,
    ) {
        while let Ok(message) = receiver.recv() {
            let mut request = match message {
                Some(request) => request,
                None => break,
            };

            let io_result = match request.kind {
                RequestKind::Write => disk_manager.write_page(request.page_id, &request.data[..]),
                RequestKind::Read => disk_manager.read_page(request.page_id, &mut request.data[..]),
            };
            if let Err(e) = io_result {
                // Disk failures are fatal for this core.
                panic!("disk I/O failed for {}: {}", request.page_id, e);
            }

            let mut state = state.lock();
            state.pending -= 1;
            if state.pending == 0 {
                state.cache = Some(request.data);
                state.tail = None;
            }
        }
    }
}

impl Drop for PageScheduler {
    fn drop(&mut self) {
        let _ = self.sender.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// DiskProxy decouples the buffer pool's synchronous page I/O from the
/// device. Writes are enqueued to a per-page scheduler and applied in FIFO
/// order by its worker; reads are served from the in-flight tail or the
/// scheduler cache so they never wait on the worker, falling back to a
/// synchronous device read.
pub struct DiskProxy {
    disk_manager: Arc<DiskManager>,
    schedulers: Mutex<HashMap<PageId, PageScheduler>>,
}

impl DiskProxy {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self {
            disk_manager,
            schedulers: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueues a write-back and returns immediately.
    pub fn write_to_disk(&self, request: DiskRequest) {
        let mut schedulers = self.schedulers.lock();
        let scheduler = schedulers
            .entry(request.page_id)
            .or_insert_with(|| PageScheduler::new(Arc::clone(&self.disk_manager)));
        scheduler.submit(request);
    }

    /// Reads a page, observing any bytes submitted for it that the workers
    /// have not drained yet.
    pub fn read_from_disk(&self, page_id: PageId, out: &mut [u8]) -> Result<()> {
        assert_eq!(out.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        let schedulers = self.schedulers.lock();
        match schedulers.get(&page_id) {
            None => self.disk_manager.read_page(page_id, out),
            Some(scheduler) => {
                if scheduler.serve_read(out) {
                    Ok(())
                } else {
                    self.disk_manager.read_page(page_id, out)
                }
            }
        }
    }

    /// Quiesces every scheduler: posts the shutdown sentinel and joins each
    /// worker, draining all pending writes to the device.
    pub fn clear(&self) {
        let mut schedulers = self.schedulers.lock();
        let count = schedulers.len();
        schedulers.clear();
        if count > 0 {
            debug!(schedulers = count, "disk proxy quiesced");
        }
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskProxy {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(byte: u8) -> [u8; PAGE_SIZE] {
        [byte; PAGE_SIZE]
    }

    fn proxy() -> (DiskProxy, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dm = Arc::new(DiskManager::new(dir.path().join("proxy.db")).unwrap());
        (DiskProxy::new(dm), dir)
    }

    #[test]
    fn test_read_passthrough_without_scheduler() {
        let (proxy, _dir) = proxy();
        let page_id = PageId::new(0);
        proxy.disk_manager().write_page(page_id, &filled(9)).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        proxy.read_from_disk(page_id, &mut out).unwrap();
        assert_eq!(out[0], 9);
    }

    #[test]
    fn test_read_sees_submitted_write_immediately() {
        let (proxy, _dir) = proxy();
        let page_id = PageId::new(7);

        proxy.write_to_disk(DiskRequest::write(page_id, &filled(b'X')));
        let mut out = [0u8; PAGE_SIZE];
        proxy.read_from_disk(page_id, &mut out).unwrap();
        assert_eq!(out, filled(b'X'));

        proxy.write_to_disk(DiskRequest::write(page_id, &filled(b'Y')));
        proxy.read_from_disk(page_id, &mut out).unwrap();
        assert_eq!(out, filled(b'Y'));
    }

    #[test]
    fn test_read_after_drain_served_from_cache() {
        let (proxy, _dir) = proxy();
        let page_id = PageId::new(7);

        proxy.write_to_disk(DiskRequest::write(page_id, &filled(b'Y')));

        // Wait for the worker to drain the queue, then the cached image must
        // still return the written bytes.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let mut out = [0u8; PAGE_SIZE];
            proxy.read_from_disk(page_id, &mut out).unwrap();
            assert_eq!(out, filled(b'Y'));
            if proxy.disk_manager().num_writes() >= 1 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "worker never drained");
            std::thread::yield_now();
        }

        let mut out = [0u8; PAGE_SIZE];
        proxy.read_from_disk(page_id, &mut out).unwrap();
        assert_eq!(out, filled(b'Y'));
    }

    #[test]
    fn test_writes_applied_in_order() {
        let (proxy, _dir) = proxy();
        let page_id = PageId::new(2);

        for byte in 0..50u8 {
            proxy.write_to_disk(DiskRequest::write(page_id, &filled(byte)));
        }
        proxy.clear();

        let mut out = [0u8; PAGE_SIZE];
        proxy.disk_manager().read_page(page_id, &mut out).unwrap();
        assert_eq!(out, filled(49));
    }

    #[test]
    fn test_clear_drains_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drain.db");
        {
            let dm = Arc::new(DiskManager::new(&path).unwrap());
            let proxy = DiskProxy::new(dm);
            proxy.write_to_disk(DiskRequest::write(PageId::new(0), &filled(5)));
            proxy.write_to_disk(DiskRequest::write(PageId::new(1), &filled(6)));
            // Dropped here; Drop must quiesce both workers.
        }

        let dm = DiskManager::new(&path).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(PageId::new(0), &mut out).unwrap();
        assert_eq!(out[0], 5);
        dm.read_page(PageId::new(1), &mut out).unwrap();
        assert_eq!(out[0], 6);
    }

    #[test]
    fn test_independent_pages_do_not_interfere() {
        let (proxy, _dir) = proxy();

        proxy.write_to_disk(DiskRequest::write(PageId::new(1), &filled(1)));
        proxy.write_to_disk(DiskRequest::write(PageId::new(2), &filled(2)));

        let mut out = [0u8; PAGE_SIZE];
        proxy.read_from_disk(PageId::new(1), &mut out).unwrap();
        assert_eq!(out[0], 1);
        proxy.read_from_disk(PageId::new(2), &mut out).unwrap();
        assert_eq!(out[0], 2);
    }
}

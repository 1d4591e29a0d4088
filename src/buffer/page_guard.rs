use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Callback invoked exactly once when a guard releases its pin.
/// Arguments: page id, whether the guard marked the page dirty.
type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Shared plumbing for all guard variants: the pin, the dirty mark, and the
/// release callback fired on drop.
struct PageGuardBase {
    page_id: PageId,
    /// Keeps the frame alive for the guard's lifetime
    frame: Arc<FrameHeader>,
    release_callback: Option<ReleaseCallback>,
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }

    fn release(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// RAII pin on a page without a held latch. Latch access is explicit and
/// short-lived through `read()` / `write()`. Unpins on drop.
pub struct BasicPageGuard {
    base: PageGuardBase,
}

impl BasicPageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Takes the shared page latch for the lifetime of the returned guard.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.base.frame.read_data()
    }

    /// Takes the exclusive page latch and marks the page dirty.
    pub fn write(&mut self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.base.is_dirty = true;
        self.base.frame.write_data()
    }

    pub fn mark_dirty(&mut self) {
        self.base.is_dirty = true;
    }

    /// Drops this guard, releasing the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.base.release();
    }
}

/// RAII guard for read access: holds the pin and the shared page latch for
/// its whole lifetime. The latch is released before the pin.
pub struct ReadPageGuard {
    base: PageGuardBase,
    /// Held shared latch; taken in drop before the pin is released
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The caller must ensure the frame outlives this guard; the Arc held by
    /// the base guarantees it.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read();
        // Extend to 'static: the frame is kept alive via the Arc in base
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Drops this guard, releasing the latch and then the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch first, then pin
        self.data_guard.take();
        self.base.release();
    }
}

/// RAII guard for write access: holds the pin and the exclusive page latch.
/// `data_mut` marks the page dirty; the latch is released before the pin.
pub struct WritePageGuard {
    base: PageGuardBase,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// # Safety
    /// The caller must ensure the frame outlives this guard; the Arc held by
    /// the base guarantees it.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write();
        // Extend to 'static: the frame is kept alive via the Arc in base
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Mutable view of the page bytes; marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }

    /// Drops this guard, releasing the latch and then the pin.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Latch first, then pin
        self.data_guard.take();
        self.base.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameId;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn frame_with_byte(byte: u8) -> Arc<FrameHeader> {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));
        let mut data = [0u8; PAGE_SIZE];
        data[0] = byte;
        frame.copy_from(&data);
        frame
    }

    #[test]
    fn test_read_page_guard_releases_on_drop() {
        let frame = frame_with_byte(42);

        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let guard = unsafe {
            ReadPageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, _| {
                    released_clone.store(true, Ordering::SeqCst);
                }),
            )
        };

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard.data()[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_page_guard_marks_dirty() {
        let frame = frame_with_byte(0);

        let released = Arc::new(AtomicBool::new(false));
        let dirty = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();
        let dirty_clone = dirty.clone();

        let mut guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, is_dirty| {
                    released_clone.store(true, Ordering::SeqCst);
                    dirty_clone.store(is_dirty, Ordering::SeqCst);
                }),
            )
        };

        guard.data_mut()[0] = 42;
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
        assert!(dirty.load(Ordering::SeqCst));

        let mut read_back = [0u8; PAGE_SIZE];
        frame.copy_to(&mut read_back);
        assert_eq!(read_back[0], 42);
    }

    #[test]
    fn test_read_guard_drop_releases_latch_before_pin() {
        let frame = frame_with_byte(0);
        let latch_frame = frame.clone();

        // The callback runs while the latch must already be free: taking the
        // write latch inside it would deadlock otherwise.
        let guard = unsafe {
            ReadPageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, _| {
                    let _relatch = latch_frame.write_data();
                }),
            )
        };
        drop(guard);
    }

    #[test]
    fn test_basic_guard_untouched_is_clean() {
        let frame = frame_with_byte(0);

        let dirty = Arc::new(AtomicBool::new(false));
        let dirty_clone = dirty.clone();

        let guard = BasicPageGuard::new(
            PageId::new(1),
            frame,
            Box::new(move |_, is_dirty| {
                dirty_clone.store(is_dirty, Ordering::SeqCst);
            }),
        );

        assert_eq!(guard.read()[0], 0);
        drop(guard);
        assert!(!dirty.load(Ordering::SeqCst));
    }
}

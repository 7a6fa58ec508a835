//! Page sources - backing memory for colony buckets
//!
//! Design: buckets are always whole pages, mapped in one call and released
//! in one call. The source is passed in explicitly so embedders can swap the
//! OS mapping for a heap or a budgeted source without global state.

use core::ptr::NonNull;
use std::alloc::{alloc, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Fallback when the platform cannot report its page size.
const FALLBACK_PAGE_SIZE: usize = 4096;

static SYSTEM_PAGE_SIZE: Lazy<usize> = Lazy::new(query_page_size);

/// Provider of page-aligned memory regions.
///
/// # Safety
/// Pools write through every pointer a source hands out. An implementation
/// must guarantee that:
/// - `page_size()` is a power of two and never changes for the source's
///   lifetime.
/// - every pointer returned by `map(len)` is aligned to at least
///   `page_size()` and valid for reads and writes of `len` bytes until it is
///   passed to `unmap`.
/// - regions returned by separate `map` calls never overlap.
pub unsafe trait PageSource: Send + Sync {
    /// Granularity of every mapping, in bytes. Always a power of two.
    fn page_size(&self) -> usize;

    /// Map `len` bytes. Returns `None` when memory is unavailable.
    fn map(&self, len: usize) -> Option<NonNull<u8>>;

    /// Release a region previously returned by [`PageSource::map`].
    ///
    /// # Safety
    /// `ptr` and `len` must come from a single successful `map` call on this
    /// source, and nothing may access the region afterwards.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize);
}

/// Anonymous OS pages (`mmap` on Unix, `VirtualAlloc` on Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPages;

impl SystemPages {
    /// Shared handle, used as the default source for every pool.
    pub fn shared() -> Arc<dyn PageSource> {
        static SHARED: Lazy<Arc<dyn PageSource>> = Lazy::new(|| Arc::new(SystemPages));
        Arc::clone(&SHARED)
    }
}

// Safety: OS mappings are page aligned and cover the requested length
unsafe impl PageSource for SystemPages {
    #[inline]
    fn page_size(&self) -> usize {
        *SYSTEM_PAGE_SIZE
    }

    #[cfg(unix)]
    fn map(&self, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return None;
        }
        NonNull::new(addr as *mut u8)
    }

    #[cfg(unix)]
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        libc::munmap(ptr.as_ptr() as *mut libc::c_void, len);
    }

    #[cfg(windows)]
    fn map(&self, len: usize) -> Option<NonNull<u8>> {
        use winapi::um::memoryapi::VirtualAlloc;
        use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};

        if len == 0 {
            return None;
        }
        let addr = unsafe {
            VirtualAlloc(core::ptr::null_mut(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
        };
        NonNull::new(addr as *mut u8)
    }

    #[cfg(windows)]
    unsafe fn unmap(&self, ptr: NonNull<u8>, _len: usize) {
        use winapi::um::memoryapi::VirtualFree;
        use winapi::um::winnt::MEM_RELEASE;

        VirtualFree(ptr.as_ptr() as *mut _, 0, MEM_RELEASE);
    }

    #[cfg(not(any(unix, windows)))]
    fn map(&self, len: usize) -> Option<NonNull<u8>> {
        HeapPages::new(self.page_size()).map(len)
    }

    #[cfg(not(any(unix, windows)))]
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        HeapPages::new(self.page_size()).unmap(ptr, len)
    }
}

/// Page-aligned regions from the global Rust allocator.
///
/// Useful where OS mappings are unavailable and in tests that want a
/// page size different from the host's.
#[derive(Debug, Clone, Copy)]
pub struct HeapPages {
    page_size: usize,
}

impl HeapPages {
    /// # Panics
    /// Panics if `page_size` is not a power of two.
    pub fn new(page_size: usize) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of 2");
        Self { page_size }
    }
}

impl Default for HeapPages {
    fn default() -> Self {
        Self::new(*SYSTEM_PAGE_SIZE)
    }
}

// Safety: allocations use a `len`-byte layout aligned to the page size
unsafe impl PageSource for HeapPages {
    #[inline]
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn map(&self, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }
        let layout = Layout::from_size_align(len, self.page_size).ok()?;
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        // map() already validated this layout
        let layout = Layout::from_size_align_unchecked(len, self.page_size);
        dealloc(ptr.as_ptr(), layout);
    }
}

/// Wraps another source and refuses mappings beyond a byte budget.
///
/// Lets an embedder cap how much memory one subsystem's pools may hold.
pub struct PageBudget {
    inner: Arc<dyn PageSource>,
    limit: usize,
    mapped: AtomicUsize,
}

impl PageBudget {
    pub fn new(inner: Arc<dyn PageSource>, limit: usize) -> Self {
        Self {
            inner,
            limit,
            mapped: AtomicUsize::new(0),
        }
    }

    /// Bytes currently mapped through this budget.
    pub fn mapped(&self) -> usize {
        self.mapped.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

// Safety: forwards every region unchanged from the inner source
unsafe impl PageSource for PageBudget {
    #[inline]
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn map(&self, len: usize) -> Option<NonNull<u8>> {
        self.mapped
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(len).filter(|&total| total <= self.limit)
            })
            .ok()?;

        let ptr = self.inner.map(len);
        if ptr.is_none() {
            self.mapped.fetch_sub(len, Ordering::AcqRel);
        }
        ptr
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        self.inner.unmap(ptr, len);
        self.mapped.fetch_sub(len, Ordering::AcqRel);
    }
}

#[cfg(unix)]
fn query_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 && (size as usize).is_power_of_two() {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(windows)]
fn query_page_size() -> usize {
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

    let mut info: SYSTEM_INFO = unsafe { core::mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    let size = info.dwPageSize as usize;
    if size.is_power_of_two() {
        size
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(not(any(unix, windows)))]
fn query_page_size() -> usize {
    FALLBACK_PAGE_SIZE
}

//! Scratch buffers for the unpack path, with optional huge page advice.
//!
//! With the `huge_pages` feature on Linux, large scratch allocations are
//! advised with `MADV_HUGEPAGE`. Failure to advise is logged and ignored.

/// Allocations smaller than this are never advised.
pub const HUGE_PAGE_THRESHOLD: usize = 2 * 1024 * 1024;

/// Advise the kernel to back the page-aligned interior of a region with huge pages.
///
/// # Safety
/// `ptr..ptr + len` must lie inside a single live allocation.
#[cfg(all(feature = "huge_pages", target_os = "linux"))]
pub unsafe fn advise_huge_pages(ptr: *mut u8, len: usize) -> std::io::Result<()> {
    let page = match libc::sysconf(libc::_SC_PAGESIZE) {
        size if size > 0 => size as usize,
        _ => 4096,
    };
    let start = (ptr as usize).next_multiple_of(page);
    let end = (ptr as usize + len) / page * page;
    if end <= start {
        return Ok(());
    }
    let result = libc::madvise(start as *mut libc::c_void, end - start, libc::MADV_HUGEPAGE);
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// No-op without the `huge_pages` feature or off Linux.
///
/// # Safety
/// Always safe; the signature mirrors the Linux variant.
#[cfg(not(all(feature = "huge_pages", target_os = "linux")))]
pub unsafe fn advise_huge_pages(_ptr: *mut u8, _len: usize) -> std::io::Result<()> {
    Ok(())
}

/// Zero-initialised scratch vector of `len` elements.
pub fn allocate_scratch<T: Default + Clone>(len: usize) -> Vec<T> {
    let mut vec = vec![T::default(); len];
    let bytes = len * std::mem::size_of::<T>();
    if cfg!(feature = "huge_pages") && bytes >= HUGE_PAGE_THRESHOLD {
        // SAFETY: the range covers exactly the buffer just allocated.
        if let Err(err) = unsafe { advise_huge_pages(vec.as_mut_ptr() as *mut u8, bytes) } {
            tracing::warn!(bytes, error = %err, "could not enable huge pages for scratch buffer");
        }
    }
    vec
}

/// Widened rows and panels reused across the macro tiles of one matrix.
#[derive(Debug)]
pub struct UnpackScratch {
    pub rows: Vec<u16>,
    pub panels: Vec<u16>,
    pub line: Vec<u16>,
}

impl UnpackScratch {
    /// Room for `rows` widened rows and the panels of `cols` columns.
    pub fn new(size: usize, rows: usize, cols: usize) -> Self {
        Self {
            rows: allocate_scratch(rows * size),
            panels: allocate_scratch(crate::unpack::panels_len(cols, size)),
            line: allocate_scratch(size),
        }
    }
}

/// Whether transparent huge pages can be requested on this system.
#[cfg(all(feature = "huge_pages", target_os = "linux"))]
pub fn huge_pages_available() -> bool {
    std::fs::read_to_string("/sys/kernel/mm/transparent_hugepage/enabled")
        .map(|mode| mode.contains("[always]") || mode.contains("[madvise]"))
        .unwrap_or(false)
}

#[cfg(not(all(feature = "huge_pages", target_os = "linux")))]
pub fn huge_pages_available() -> bool {
    false
}

pub fn log_huge_page_status() {
    if !cfg!(feature = "huge_pages") {
        tracing::info!("huge pages disabled (build with --features huge_pages)");
    } else if huge_pages_available() {
        tracing::info!("huge pages available for scratch buffers");
    } else {
        tracing::info!("huge pages not available (transparent_hugepage is off)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_is_zeroed_and_sized() {
        let scratch = UnpackScratch::new(16, 6, 9);
        assert_eq!(scratch.rows.len(), 96);
        assert_eq!(scratch.panels.len(), 2 * 8 * 16);
        assert_eq!(scratch.line.len(), 16);
        assert!(scratch.panels.iter().all(|&x| x == 0));
    }

    #[test]
    fn large_allocation_succeeds_with_or_without_advice() {
        let buf: Vec<u16> = allocate_scratch(HUGE_PAGE_THRESHOLD);
        assert_eq!(buf.len(), HUGE_PAGE_THRESHOLD);
    }
}

//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! Provides safe abstraction over mmap and shm_open for the cable region.
//! All unsafe operations are encapsulated with bounds checking.

use std::ffi::CString;
use std::ptr::NonNull;

use crate::error::SharedMemoryError;

/// Represents a mapped shared memory region.
///
/// This struct owns the mapping and unmaps it on drop. A named region can be
/// opened by other processes; an anonymous one is only shared with threads
/// (and children) of the creating process.
pub struct SharedMemoryRegion {
    /// Name of the shared memory object, empty for anonymous mappings.
    name: String,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
    /// File descriptor for the shared memory object, -1 when anonymous.
    fd: i32,
    /// Whether this instance created the SHM (and should unlink on drop).
    is_owner: bool,
}

// SAFETY: SharedMemoryRegion owns its mapping; the pointer is valid for the
// lifetime of the value regardless of which thread holds it.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: all shared mutation goes through atomics in the register file or
// through ring windows whose single-writer rule is enforced by endpoint
// ownership.
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Minimum size for a shared memory region.
    pub const MIN_SIZE: usize = 4096;

    /// Maximum size for a shared memory region (1 GB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    fn check_size(name: &str, size: usize) -> Result<(), SharedMemoryError> {
        if size < Self::MIN_SIZE {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("Size {} is below minimum {}", size, Self::MIN_SIZE),
            });
        }
        if size > Self::MAX_SIZE {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("Size {} exceeds maximum {}", size, Self::MAX_SIZE),
            });
        }
        Ok(())
    }

    fn shm_name(name: &str) -> Result<CString, SharedMemoryError> {
        CString::new(format!("/{}", name)).map_err(|e| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })
    }

    /// Create a new named shared memory region.
    ///
    /// # Arguments
    /// * `name` - Name of the shared memory object (will be prefixed with /)
    /// * `size` - Size in bytes (must be between MIN_SIZE and MAX_SIZE)
    pub fn create(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        Self::check_size(name, size)?;

        if name.is_empty() {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: "Name cannot be empty".to_string(),
            });
        }

        let c_name = Self::shm_name(name)?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Err(SharedMemoryError::CreateFailed {
                    name: name.to_string(),
                    reason: "Shared memory already exists".to_string(),
                });
            }
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        // SAFETY: fd is a valid file descriptor
        let result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("ftruncate failed: {}", errno),
            });
        }

        let ptr = match Self::map(fd, size, 0) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        // SAFETY: ptr is valid for size bytes
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, size);
        }

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            is_owner: true,
        })
    }

    /// Open an existing named shared memory region.
    pub fn open(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("Invalid size: {}", size),
            });
        }

        let c_name = Self::shm_name(name)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        let ptr = match Self::map(fd, size, 0) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            is_owner: false,
        })
    }

    /// Create an anonymous shared mapping.
    ///
    /// Visible to every thread of this process and inherited across fork.
    pub fn anonymous(size: usize) -> Result<Self, SharedMemoryError> {
        Self::check_size("<anonymous>", size)?;

        // MAP_ANONYMOUS memory is zero-filled by the kernel.
        let ptr = Self::map(-1, size, libc::MAP_ANONYMOUS)?;

        tracing::debug!(size = size, "Created anonymous shared mapping");

        Ok(Self {
            name: String::new(),
            ptr,
            size,
            fd: -1,
            is_owner: false,
        })
    }

    fn map(fd: i32, size: usize, extra_flags: i32) -> Result<NonNull<u8>, SharedMemoryError> {
        // SAFETY: fd is valid or -1 with MAP_ANONYMOUS, size is validated
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | extra_flags,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
        })
    }

    /// Get the name of this shared memory region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether other processes can open this region by name.
    pub fn is_named(&self) -> bool {
        self.fd >= 0
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a raw pointer to the shared memory.
    ///
    /// Caller must ensure proper synchronization when accessing the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Base address of this process's mapping.
    pub fn base_address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Check that `[offset, offset + len)` lies inside the region.
    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .map(|end| end <= self.size)
            .unwrap_or(false)
    }

    /// Zero a byte range of the region.
    ///
    /// # Safety
    /// No other thread or process may be accessing the range.
    pub unsafe fn zero(&self, offset: usize, len: usize) {
        debug_assert!(self.contains(offset, len));
        std::ptr::write_bytes(self.ptr.as_ptr().add(offset), 0, len);
    }
}

impl std::fmt::Debug for SharedMemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemoryRegion")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("named", &self.is_named())
            .finish()
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set during creation
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                name = %self.name,
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }

        if self.fd >= 0 {
            // SAFETY: fd was opened during creation
            unsafe { libc::close(self.fd) };
        }

        if self.is_owner {
            if let Ok(c_name) = Self::shm_name(&self.name) {
                // SAFETY: c_name is a valid CString
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                tracing::debug!(name = %self.name, "Unlinked shared memory region");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_size_validation() {
        assert!(SharedMemoryRegion::create("vcable-test-small", 100).is_err());
        assert!(
            SharedMemoryRegion::create("vcable-test-large", SharedMemoryRegion::MAX_SIZE + 1)
                .is_err()
        );
        assert!(SharedMemoryRegion::anonymous(100).is_err());
    }

    #[test]
    fn test_shm_empty_name() {
        assert!(SharedMemoryRegion::create("", 4096).is_err());
    }

    #[test]
    fn test_anonymous_region_is_zeroed() {
        let region = SharedMemoryRegion::anonymous(8192).unwrap();
        assert!(!region.is_named());
        assert_eq!(region.size(), 8192);
        // SAFETY: freshly mapped, no other accessor
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.size()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_contains() {
        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        assert!(region.contains(0, 4096));
        assert!(region.contains(4000, 96));
        assert!(!region.contains(4000, 97));
        assert!(!region.contains(usize::MAX, 2));
    }

    #[test]
    fn test_open_missing_region_fails() {
        let name = format!("vcable-missing-{}", std::process::id());
        assert!(matches!(
            SharedMemoryRegion::open(&name, 4096),
            Err(SharedMemoryError::OpenFailed { .. })
        ));
    }
}

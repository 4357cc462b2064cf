use std::{fs::File, io, os::fd::AsRawFd, path::Path, ptr};

/// Read-only memory map of a served file. The mapping outlives the `File`
/// that created it and is unmapped on drop.
pub struct FileMap {
    ptr: *mut libc::c_void,
    len: usize,
}

// The mapping is immutable for its whole lifetime.
unsafe impl Send for FileMap {}
unsafe impl Sync for FileMap {}

impl FileMap {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Ok(Self { ptr: ptr::null_mut(), len: 0 });
        }
        let ptr = unsafe {
            libc::mmap(ptr::null_mut(), len, libc::PROT_READ, libc::MAP_PRIVATE, file.as_raw_fd(), 0)
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr.cast(), self.len) }
        }
    }
}

impl Drop for FileMap {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { libc::munmap(self.ptr, self.len) };
        }
    }
}

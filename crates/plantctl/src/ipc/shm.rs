//! POSIX shared memory transport: `shm_open`/`ftruncate`/`mmap`, a
//! process-shared `pthread_mutex_t` placed ahead of the `Region` payload in
//! the mapped bytes, and the unlink-then-recreate lifecycle the writer owns
//! (spec §4.6, §6).

use crate::error::{CoreError, CoreResult};
use crate::ipc::region::{Region, MAGIC, VERSION};
use std::ffi::CString;
use std::mem::{align_of, size_of};
use std::os::unix::io::RawFd;
use std::ptr;

/// Mutex footprint is rounded up to `Region`'s alignment so the payload that
/// follows it in the mapping is never misaligned.
fn mutex_footprint() -> usize {
    let raw = size_of::<libc::pthread_mutex_t>();
    let align = align_of::<Region>().max(align_of::<libc::pthread_mutex_t>());
    (raw + align - 1) / align * align
}

fn total_len() -> usize {
    mutex_footprint() + size_of::<Region>()
}

pub struct SharedRegion {
    fd: RawFd,
    ptr: *mut u8,
    len: usize,
    name: String,
    is_writer: bool,
}

// SAFETY: the segment is backed by a POSIX shared-memory object guarded by
// a process-shared pthread mutex; all field access goes through `lock()`.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create (or re-create) the segment as its sole writer. Any stale
    /// segment of the same name is unlinked first, per §6.
    pub fn create_writer(name: &str) -> CoreResult<Self> {
        let cname = shm_name(name)?;
        unsafe {
            libc::shm_unlink(cname.as_ptr());
        }
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_CREAT | libc::O_RDWR | libc::O_EXCL, 0o666) };
        if fd < 0 {
            return Err(CoreError::Io(format!("shm_open (writer) {name} failed: {}", std::io::Error::last_os_error())));
        }
        let len = total_len();
        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(CoreError::Io(format!("ftruncate {name} failed: {err}")));
        }
        let ptr = map(fd, len)?;

        let mut region = Self { fd, ptr, len, name: name.to_string(), is_writer: true };
        unsafe {
            region.init_mutex()?;
            (*region.region_ptr()).init();
        }
        Ok(region)
    }

    /// Attach as a reader to an already-created segment.
    pub fn open_reader(name: &str) -> CoreResult<Self> {
        let cname = shm_name(name)?;
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(CoreError::NotInitialized(format!("shm segment {name} not present")));
        }
        let len = total_len();
        let ptr = map(fd, len)?;
        let region = Self { fd, ptr, len, name: name.to_string(), is_writer: false };

        let header = unsafe { (*region.region_ptr()).header };
        if header.magic != MAGIC {
            return Err(CoreError::Protocol(format!("shm segment {name} has wrong magic")));
        }
        if header.version != VERSION {
            return Err(CoreError::Protocol(format!(
                "shm segment {name} version {} != expected {}",
                header.version, VERSION
            )));
        }
        Ok(region)
    }

    unsafe fn init_mutex(&mut self) -> CoreResult<()> {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        if libc::pthread_mutexattr_init(&mut attr) != 0 {
            return Err(CoreError::Io("pthread_mutexattr_init failed".into()));
        }
        if libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED) != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(CoreError::Io("pthread_mutexattr_setpshared failed".into()));
        }
        let rc = libc::pthread_mutex_init(self.mutex_ptr(), &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        if rc != 0 {
            return Err(CoreError::Io("pthread_mutex_init failed".into()));
        }
        Ok(())
    }

    fn mutex_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.ptr as *mut libc::pthread_mutex_t
    }

    fn region_ptr(&self) -> *mut Region {
        unsafe { self.ptr.add(mutex_footprint()) as *mut Region }
    }

    /// Run `f` with the region locked under the process-shared mutex.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut Region) -> R) -> CoreResult<R> {
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex_ptr()) };
        if rc != 0 {
            return Err(CoreError::Io(format!("pthread_mutex_lock failed: {rc}")));
        }
        let result = f(unsafe { &mut *self.region_ptr() });
        unsafe {
            libc::pthread_mutex_unlock(self.mutex_ptr());
        }
        Ok(result)
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
            libc::close(self.fd);
            if self.is_writer {
                if let Ok(cname) = shm_name(&self.name) {
                    libc::shm_unlink(cname.as_ptr());
                }
            }
        }
    }
}

fn shm_name(name: &str) -> CoreResult<CString> {
    CString::new(name).map_err(|_| CoreError::InvalidParam(format!("shm name {name} contains NUL")))
}

fn map(fd: RawFd, len: usize) -> CoreResult<*mut u8> {
    let ptr = unsafe {
        libc::mmap(ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0)
    };
    if ptr == libc::MAP_FAILED {
        return Err(CoreError::Io(format!("mmap failed: {}", std::io::Error::last_os_error())));
    }
    Ok(ptr as *mut u8)
}

//! Buffer objects and the allocation collaborator.
//!
//! The queue never allocates memory itself. It asks a [`BufferAllocator`]
//! for a [`SurfaceBuffer`], maps it, and from then on only moves the shared
//! handle between slots. [`ShmAllocator`] is the in-tree allocator backed by
//! anonymous shared memory; platform allocators (gralloc, dmabuf heaps)
//! implement the same traits.

use std::fmt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::{
    pixel_format, BufferRequestConfig, BufferVerifyAllocInfo, ExtraData, SURFACE_MAX_SIZE,
};
use crate::core::errors::{GsError, GsResult};

/// A graphics buffer shared between producer and consumer.
pub trait SurfaceBuffer: Send + Sync + fmt::Debug {
    /// Sequence number, unique within the owning context
    fn seq_num(&self) -> u32;
    fn width(&self) -> i32;
    fn height(&self) -> i32;
    fn stride(&self) -> i32;
    fn format(&self) -> i32;
    fn usage(&self) -> u64;
    /// Size of the backing memory in bytes
    fn size(&self) -> u32;

    fn map(&self) -> GsResult<()>;
    fn unmap(&self) -> GsResult<()>;
    fn flush_cache(&self) -> GsResult<()>;
    fn invalidate_cache(&self) -> GsResult<()>;

    /// Backing descriptor, `-1` when the buffer has none
    fn file_descriptor(&self) -> RawFd;

    /// Copy of the mapped contents. `None` while unmapped.
    fn read_contents(&self) -> Option<Vec<u8>>;
    fn write_contents(&self, offset: usize, bytes: &[u8]) -> GsResult<()>;

    fn extra_data(&self) -> ExtraData;
    fn set_extra_data(&self, data: ExtraData);
}

pub type SharedBuffer = Arc<dyn SurfaceBuffer>;

/// Allocation collaborator.
pub trait BufferAllocator: Send + Sync {
    /// Allocate backing memory for `config`. `seq` is minted by the caller.
    fn alloc(&self, seq: u32, config: &BufferRequestConfig) -> GsResult<SharedBuffer>;

    fn is_supported_alloc(&self, infos: &[BufferVerifyAllocInfo]) -> GsResult<Vec<bool>>;
}

fn align_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Compute `(stride, size)` for a request.
fn layout(config: &BufferRequestConfig) -> GsResult<(u32, u32)> {
    if config.width <= 0 || config.height <= 0 {
        return Err(GsError::invalid_arguments(format!(
            "buffer size must be positive, got {}x{}",
            config.width, config.height
        )));
    }
    let width = config.width as u64;
    let height = config.height as u64;
    if width * height > SURFACE_MAX_SIZE {
        return Err(GsError::invalid_arguments(format!(
            "buffer {}x{} exceeds {} pixels",
            width, height, SURFACE_MAX_SIZE
        )));
    }
    let bpp = pixel_format::bytes_per_pixel(config.format);
    let stride = align_up(config.width as u32 * bpp, config.stride_alignment.max(1) as u32);
    let rows = if config.format == pixel_format::YCBCR_420_SP {
        config.height as u32 * 3 / 2
    } else {
        config.height as u32
    };
    Ok((stride, stride * rows))
}

// ============================================================================
// Shared-memory buffer
// ============================================================================

struct Mapping {
    ptr: Option<*mut u8>,
}

/// Buffer backed by an anonymous shared-memory file.
pub struct ShmBuffer {
    seq: u32,
    fd: OwnedFd,
    width: i32,
    height: i32,
    stride: i32,
    format: i32,
    usage: u64,
    size: u32,
    mapping: Mutex<Mapping>,
    extra: Mutex<ExtraData>,
}

// SAFETY: the mmap'd pointer is only dereferenced while `mapping` is locked.
unsafe impl Send for ShmBuffer {}
unsafe impl Sync for ShmBuffer {}

impl fmt::Debug for ShmBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmBuffer")
            .field("seq", &self.seq)
            .field("fd", &self.fd.as_raw_fd())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("size", &self.size)
            .finish()
    }
}

impl ShmBuffer {
    pub fn new(seq: u32, config: &BufferRequestConfig) -> GsResult<Self> {
        let (stride, size) = layout(config)?;
        let fd = create_shm_fd(size)?;
        Ok(Self {
            seq,
            fd,
            width: config.width,
            height: config.height,
            stride: stride as i32,
            format: config.format,
            usage: config.usage,
            size,
            mapping: Mutex::new(Mapping { ptr: None }),
            extra: Mutex::new(ExtraData::new()),
        })
    }
}

#[cfg(target_os = "linux")]
fn create_shm_fd(size: u32) -> GsResult<OwnedFd> {
    use std::ffi::CString;
    use std::os::unix::io::FromRawFd;

    let name = CString::new("displaycore-buffer")
        .map_err(|e| GsError::api_failed(e.to_string()))?;
    // SAFETY: name is a valid NUL-terminated string.
    let raw = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: raw is a freshly created descriptor we exclusively own.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    truncate(&fd, size)?;
    Ok(fd)
}

#[cfg(not(target_os = "linux"))]
fn create_shm_fd(size: u32) -> GsResult<OwnedFd> {
    // No memfd here: temp file + unlink keeps the fd anonymous.
    let path = std::env::temp_dir().join(format!(
        "displaycore-buffer.{}.{}",
        std::process::id(),
        chrono::Local::now().timestamp_nanos_opt().unwrap_or(0)
    ));
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)?;
    std::fs::remove_file(&path)?;
    let fd = OwnedFd::from(file);
    truncate(&fd, size)?;
    Ok(fd)
}

fn truncate(fd: &OwnedFd, size: u32) -> GsResult<()> {
    // SAFETY: fd is open for writing.
    let ret = unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

impl SurfaceBuffer for ShmBuffer {
    fn seq_num(&self) -> u32 {
        self.seq
    }

    fn width(&self) -> i32 {
        self.width
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn stride(&self) -> i32 {
        self.stride
    }

    fn format(&self) -> i32 {
        self.format
    }

    fn usage(&self) -> u64 {
        self.usage
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn map(&self) -> GsResult<()> {
        let mut mapping = self.mapping.lock();
        if mapping.ptr.is_some() {
            return Ok(());
        }
        // SAFETY: fd is a valid shm file of `size` bytes.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                self.size as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            tracing::error!("Failed to mmap buffer (seq={}, size={})", self.seq, self.size);
            return Err(std::io::Error::last_os_error().into());
        }
        mapping.ptr = Some(ptr as *mut u8);
        Ok(())
    }

    fn unmap(&self) -> GsResult<()> {
        let mut mapping = self.mapping.lock();
        if let Some(ptr) = mapping.ptr.take() {
            // SAFETY: ptr came from mmap with the same length.
            unsafe {
                libc::munmap(ptr as *mut libc::c_void, self.size as usize);
            }
        }
        Ok(())
    }

    fn flush_cache(&self) -> GsResult<()> {
        let mapping = self.mapping.lock();
        let Some(ptr) = mapping.ptr else {
            return Err(GsError::invalid_operating(format!("buffer {} is not mapped", self.seq)));
        };
        // SAFETY: ptr/size describe a live mapping.
        let ret = unsafe { libc::msync(ptr as *mut libc::c_void, self.size as usize, libc::MS_SYNC) };
        if ret < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn invalidate_cache(&self) -> GsResult<()> {
        // Coherent shared memory, nothing to invalidate.
        Ok(())
    }

    fn file_descriptor(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn read_contents(&self) -> Option<Vec<u8>> {
        let mapping = self.mapping.lock();
        let ptr = mapping.ptr?;
        // SAFETY: mapping is live for `size` bytes while the lock is held.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, self.size as usize) };
        Some(bytes.to_vec())
    }

    fn write_contents(&self, offset: usize, bytes: &[u8]) -> GsResult<()> {
        let mapping = self.mapping.lock();
        let Some(ptr) = mapping.ptr else {
            return Err(GsError::invalid_operating(format!("buffer {} is not mapped", self.seq)));
        };
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.size as usize)
            .ok_or_else(|| GsError::out_of_range(format!("write past buffer {}", self.seq)))?;
        // SAFETY: bounds checked above, mapping is live while locked.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset), end - offset);
        }
        Ok(())
    }

    fn extra_data(&self) -> ExtraData {
        self.extra.lock().clone()
    }

    fn set_extra_data(&self, data: ExtraData) {
        *self.extra.lock() = data;
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        if let Some(ptr) = self.mapping.get_mut().ptr.take() {
            unsafe {
                libc::munmap(ptr as *mut libc::c_void, self.size as usize);
            }
        }
    }
}

/// Allocator producing [`ShmBuffer`]s.
#[derive(Debug, Default)]
pub struct ShmAllocator;

impl BufferAllocator for ShmAllocator {
    fn alloc(&self, seq: u32, config: &BufferRequestConfig) -> GsResult<SharedBuffer> {
        let buffer = ShmBuffer::new(seq, config)?;
        tracing::trace!(seq, size = buffer.size, "allocated shm buffer");
        Ok(Arc::new(buffer))
    }

    fn is_supported_alloc(&self, infos: &[BufferVerifyAllocInfo]) -> GsResult<Vec<bool>> {
        Ok(infos
            .iter()
            .map(|info| {
                info.width > 0
                    && info.height > 0
                    && (info.width as u64) * (info.height as u64) <= SURFACE_MAX_SIZE
            })
            .collect())
    }
}

//! Parcel codec for the values that cross the producer/consumer boundary.
//!
//! Little-endian, no padding. File descriptors travel out of band in the
//! parcel's fd list; the byte stream carries `1` or `-1` in their place.

use std::os::unix::io::OwnedFd;

use super::tunnel_handle::TunnelHandle;
use super::types::{BufferFlushConfig, BufferRequestConfig, ColorGamut, TransformType};
use crate::core::errors::{GsError, GsResult};
use crate::util::geometry::Rect;

#[derive(Debug, Default)]
pub struct Parcel {
    data: Vec<u8>,
    fds: Vec<Option<OwnedFd>>,
    read_pos: usize,
    fd_pos: usize,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Push a descriptor; `None` encodes as `-1`.
    pub fn write_fd(&mut self, fd: Option<OwnedFd>) {
        match fd {
            Some(fd) => {
                self.write_i32(1);
                self.fds.push(Some(fd));
            }
            None => self.write_i32(-1),
        }
    }

    fn read_bytes<const N: usize>(&mut self) -> GsResult<[u8; N]> {
        let end = self.read_pos + N;
        let bytes = self
            .data
            .get(self.read_pos..end)
            .ok_or_else(|| GsError::invalid_arguments(format!("parcel truncated at {}", self.read_pos)))?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.read_pos = end;
        Ok(out)
    }

    pub fn read_i32(&mut self) -> GsResult<i32> {
        Ok(i32::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_u32(&mut self) -> GsResult<u32> {
        Ok(u32::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_i64(&mut self) -> GsResult<i64> {
        Ok(i64::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_u64(&mut self) -> GsResult<u64> {
        Ok(u64::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_fd(&mut self) -> GsResult<Option<OwnedFd>> {
        if self.read_i32()? < 0 {
            return Ok(None);
        }
        let fd = self
            .fds
            .get_mut(self.fd_pos)
            .and_then(Option::take)
            .ok_or_else(|| GsError::invalid_arguments("parcel fd list exhausted"))?;
        self.fd_pos += 1;
        Ok(Some(fd))
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    pub fn write_request_config(&mut self, config: &BufferRequestConfig) {
        self.write_i32(config.width);
        self.write_i32(config.height);
        self.write_i32(config.stride_alignment);
        self.write_i32(config.format);
        self.write_u64(config.usage);
        self.write_i32(config.timeout);
        self.write_i32(config.color_gamut as i32);
        self.write_i32(config.transform as i32);
    }

    pub fn read_request_config(&mut self) -> GsResult<BufferRequestConfig> {
        Ok(BufferRequestConfig {
            width: self.read_i32()?,
            height: self.read_i32()?,
            stride_alignment: self.read_i32()?,
            format: self.read_i32()?,
            usage: self.read_u64()?,
            timeout: self.read_i32()?,
            color_gamut: ColorGamut::try_from(self.read_i32()?)?,
            transform: TransformType::try_from(self.read_i32()?)?,
        })
    }

    pub fn write_flush_config(&mut self, config: &BufferFlushConfig) {
        self.write_i32(config.damage.x);
        self.write_i32(config.damage.y);
        self.write_i32(config.damage.w);
        self.write_i32(config.damage.h);
        self.write_i64(config.timestamp);
    }

    pub fn read_flush_config(&mut self) -> GsResult<BufferFlushConfig> {
        let damage = Rect::new(self.read_i32()?, self.read_i32()?, self.read_i32()?, self.read_i32()?);
        Ok(BufferFlushConfig { damage, timestamp: self.read_i64()? })
    }

    /// `reserveInts, fd, reserve[..]`. The fd is duplicated; `handle` keeps its own.
    pub fn write_tunnel_handle(&mut self, handle: &TunnelHandle) -> GsResult<()> {
        self.write_u32(handle.reserve_ints());
        let fd = match handle.owned_fd() {
            Some(fd) => Some(fd.try_clone()?),
            None => None,
        };
        self.write_fd(fd);
        for value in handle.reserve() {
            self.write_i32(*value);
        }
        Ok(())
    }

    pub fn read_tunnel_handle(&mut self) -> GsResult<TunnelHandle> {
        let reserve_ints = self.read_u32()?;
        let fd = self.read_fd()?;
        let reserve = (0..reserve_ints)
            .map(|_| self.read_i32())
            .collect::<GsResult<Vec<_>>>()?;
        Ok(TunnelHandle::new(fd, reserve))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::types::usage;

    #[test]
    fn test_request_config_field_order() {
        let mut config = BufferRequestConfig::new(0x11, 0x22);
        config.usage = usage::CPU_READ;
        let mut parcel = Parcel::new();
        parcel.write_request_config(&config);

        let data = parcel.data();
        assert_eq!(data.len(), 4 * 4 + 8 + 4 * 3);
        assert_eq!(&data[0..4], &0x11i32.to_le_bytes());
        assert_eq!(&data[4..8], &0x22i32.to_le_bytes());
        assert_eq!(&data[16..24], &1u64.to_le_bytes());
        assert_eq!(parcel.read_request_config().unwrap(), config);
    }

    #[test]
    fn test_truncated_parcel_is_rejected() {
        let mut parcel = Parcel::new();
        parcel.write_i32(5);
        parcel.write_i32(6);
        let err = parcel.read_flush_config().unwrap_err();
        assert!(matches!(err, GsError::InvalidArguments(_)));
    }

    #[test]
    fn test_tunnel_handle_without_fd() {
        let handle = TunnelHandle::new(None, vec![3, 4, 5]);
        let mut parcel = Parcel::new();
        parcel.write_tunnel_handle(&handle).unwrap();
        assert_eq!(parcel.fd_count(), 0);
        assert_eq!(&parcel.data()[4..8], &(-1i32).to_le_bytes());

        let decoded = parcel.read_tunnel_handle().unwrap();
        assert!(!handle.different(Some(&decoded)));
    }
}

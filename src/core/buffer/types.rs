//! Plain value types exchanged through a [`BufferQueue`](super::BufferQueue).

use crate::core::errors::{GsError, GsResult};
use crate::util::geometry::Rect;

pub const SURFACE_MAX_QUEUE_SIZE: u32 = 32;
pub const SURFACE_DEFAULT_QUEUE_SIZE: u32 = 3;
pub const SURFACE_MAX_STRIDE_ALIGNMENT: i32 = 32;
pub const SURFACE_MIN_STRIDE_ALIGNMENT: i32 = 4;
pub const SURFACE_DEFAULT_STRIDE_ALIGNMENT: i32 = 4;
/// 8K * 8K
pub const SURFACE_MAX_SIZE: u64 = 58_982_400;

/// Buffer usage bits.
pub mod usage {
    pub const CPU_READ: u64 = 1 << 0;
    pub const CPU_WRITE: u64 = 1 << 1;
    pub const MEM_MMZ: u64 = 1 << 2;
    pub const MEM_DMA: u64 = 1 << 3;
    pub const MEM_SHARE: u64 = 1 << 4;
    pub const MEM_MMZ_CACHE: u64 = 1 << 5;
    pub const MEM_FB: u64 = 1 << 6;
    pub const ASSIGN_SIZE: u64 = 1 << 7;
    pub const HW_RENDER: u64 = 1 << 8;
    pub const HW_TEXTURE: u64 = 1 << 9;
    pub const HW_COMPOSER: u64 = 1 << 10;
    pub const PROTECTED: u64 = 1 << 11;
}

/// Pixel formats the shm allocator knows how to size.
pub mod pixel_format {
    pub const RGB_565: i32 = 3;
    pub const RGBA_8888: i32 = 12;
    pub const BGRA_8888: i32 = 20;
    pub const YCBCR_420_SP: i32 = 24;

    /// Bytes per pixel, rounded up. Planar YUV is accounted for by the caller.
    pub fn bytes_per_pixel(format: i32) -> u32 {
        match format {
            RGB_565 => 2,
            YCBCR_420_SP => 1,
            _ => 4,
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorGamut {
    Invalid = -1,
    Native = 0,
    StandardBt601 = 1,
    StandardBt709 = 2,
    DciP3 = 3,
    #[default]
    Srgb = 4,
    AdobeRgb = 5,
    DisplayP3 = 6,
    Bt2020 = 7,
    Bt2100Pq = 8,
    Bt2100Hlg = 9,
    DisplayBt2020 = 10,
}

impl TryFrom<i32> for ColorGamut {
    type Error = GsError;

    fn try_from(value: i32) -> GsResult<Self> {
        Ok(match value {
            -1 => ColorGamut::Invalid,
            0 => ColorGamut::Native,
            1 => ColorGamut::StandardBt601,
            2 => ColorGamut::StandardBt709,
            3 => ColorGamut::DciP3,
            4 => ColorGamut::Srgb,
            5 => ColorGamut::AdobeRgb,
            6 => ColorGamut::DisplayP3,
            7 => ColorGamut::Bt2020,
            8 => ColorGamut::Bt2100Pq,
            9 => ColorGamut::Bt2100Hlg,
            10 => ColorGamut::DisplayBt2020,
            other => return Err(GsError::invalid_arguments(format!("color gamut {other}"))),
        })
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransformType {
    #[default]
    RotateNone = 0,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipH,
    FlipV,
    FlipHRot90,
    FlipVRot90,
    FlipHRot180,
    FlipVRot180,
    FlipHRot270,
    FlipVRot270,
    /// Sentinel; never valid in a request
    RotateButt,
}

impl TryFrom<i32> for TransformType {
    type Error = GsError;

    fn try_from(value: i32) -> GsResult<Self> {
        use TransformType::*;
        const ALL: [TransformType; 13] = [
            RotateNone, Rotate90, Rotate180, Rotate270, FlipH, FlipV, FlipHRot90, FlipVRot90,
            FlipHRot180, FlipVRot180, FlipHRot270, FlipVRot270, RotateButt,
        ];
        usize::try_from(value)
            .ok()
            .and_then(|idx| ALL.get(idx).copied())
            .ok_or_else(|| GsError::invalid_arguments(format!("transform {value}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScalingMode {
    #[default]
    Freeze,
    ScaleToWindow,
    ScaleCrop,
    NoScaleCrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HdrMetaDataType {
    #[default]
    NotUsed,
    MetaData,
    MetaDataSet,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HdrMetadataKey {
    #[default]
    RedPrimaryX = 0,
    RedPrimaryY = 1,
    GreenPrimaryX = 2,
    GreenPrimaryY = 3,
    BluePrimaryX = 4,
    BluePrimaryY = 5,
    WhitePrimaryX = 6,
    WhitePrimaryY = 7,
    MaxLuminance = 8,
    MinLuminance = 9,
    MaxContentLightLevel = 10,
    MaxFrameAverageLightLevel = 11,
    Hdr10Plus = 12,
    HdrVivid = 13,
}

impl HdrMetadataKey {
    pub const FIRST: u32 = HdrMetadataKey::RedPrimaryX as u32;
    pub const LAST: u32 = HdrMetadataKey::HdrVivid as u32;
}

impl TryFrom<u32> for HdrMetadataKey {
    type Error = GsError;

    fn try_from(value: u32) -> GsResult<Self> {
        use HdrMetadataKey::*;
        const ALL: [HdrMetadataKey; 14] = [
            RedPrimaryX, RedPrimaryY, GreenPrimaryX, GreenPrimaryY, BluePrimaryX, BluePrimaryY,
            WhitePrimaryX, WhitePrimaryY, MaxLuminance, MinLuminance, MaxContentLightLevel,
            MaxFrameAverageLightLevel, Hdr10Plus, HdrVivid,
        ];
        ALL.get(value as usize).copied().ok_or_else(|| {
            GsError::invalid_arguments(format!(
                "metadata key [{}, {}], now is {}",
                Self::FIRST,
                Self::LAST,
                value
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HdrMetaData {
    pub key: HdrMetadataKey,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentTimestampType {
    #[default]
    Unsupported,
    Delay,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentTimestamp {
    pub kind: PresentTimestampType,
    pub time: i64,
}

/// What the producer asks for. Two configs are equal when every field is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRequestConfig {
    pub width: i32,
    pub height: i32,
    pub stride_alignment: i32,
    pub format: i32,
    pub usage: u64,
    pub timeout: i32,
    pub color_gamut: ColorGamut,
    pub transform: TransformType,
}

impl Default for BufferRequestConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            stride_alignment: SURFACE_DEFAULT_STRIDE_ALIGNMENT,
            format: pixel_format::RGBA_8888,
            usage: usage::CPU_READ | usage::CPU_WRITE | usage::MEM_DMA,
            timeout: 0,
            color_gamut: ColorGamut::Srgb,
            transform: TransformType::RotateNone,
        }
    }
}

impl BufferRequestConfig {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height, ..Default::default() }
    }

    /// Check the fields the queue cares about before touching any slot.
    pub fn validate(&self) -> GsResult<()> {
        let align = self.stride_alignment;
        if !(SURFACE_MIN_STRIDE_ALIGNMENT..=SURFACE_MAX_STRIDE_ALIGNMENT).contains(&align) {
            return Err(GsError::invalid_arguments(format!(
                "config.strideAlignment [{}, {}], now is {}",
                SURFACE_MIN_STRIDE_ALIGNMENT, SURFACE_MAX_STRIDE_ALIGNMENT, align
            )));
        }
        if align & (align - 1) != 0 {
            return Err(GsError::invalid_arguments(format!(
                "config.strideAlignment is not power of 2 like 4, 8, 16, 32; now is {align}"
            )));
        }
        if self.color_gamut == ColorGamut::Invalid {
            return Err(GsError::invalid_arguments("config.colorGamut is invalid"));
        }
        if self.transform == TransformType::RotateButt {
            return Err(GsError::invalid_arguments("config.transform out of range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlushConfig {
    pub damage: Rect,
    /// Microseconds; 0 means "stamp at flush time"
    pub timestamp: i64,
}

impl BufferFlushConfig {
    pub fn new(damage: Rect, timestamp: i64) -> Self {
        Self { damage, timestamp }
    }

    pub fn validate(&self) -> GsResult<()> {
        if self.damage.w < 0 {
            return Err(GsError::invalid_arguments(format!(
                "config.damage.w >= 0, now is {}",
                self.damage.w
            )));
        }
        if self.damage.h < 0 {
            return Err(GsError::invalid_arguments(format!(
                "config.damage.h >= 0, now is {}",
                self.damage.h
            )));
        }
        Ok(())
    }
}

/// Query for `is_supported_alloc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferVerifyAllocInfo {
    pub width: u32,
    pub height: u32,
    pub usage: u64,
    pub format: i32,
}

/// Opaque per-buffer key/value side data carried from producer to consumer.
pub type ExtraData = std::collections::BTreeMap<String, String>;

use std::fmt::{self, Display};

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 四字符代码 (Four Character Code)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct FourCC(pub u32);

impl FourCC {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self((a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24))
    }
}

impl Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// 输出流的像素格式
///
/// 客户端以驱动格式码创建输出，Core 只负责在描述符里原样传递。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum PixelFormat {
    /// RGBA 8888 (预览常用)
    Rgba8888,
    /// NV12
    YCbCr420Sp,
    /// NV21
    YCrCb420Sp,
    /// 拍照 JPEG
    Jpeg,
    /// 驱动私有格式码
    Vendor(u32),
}

impl PixelFormat {
    pub fn fourcc(&self) -> FourCC {
        match self {
            Self::Rgba8888 => FourCC::new(b'R', b'G', b'B', b'A'),
            Self::YCbCr420Sp => FourCC::new(b'N', b'V', b'1', b'2'),
            Self::YCrCb420Sp => FourCC::new(b'N', b'V', b'2', b'1'),
            Self::Jpeg => FourCC::new(b'J', b'P', b'E', b'G'),
            Self::Vendor(code) => FourCC(*code),
        }
    }

    /// 是否需要驱动侧做编码 (拍照流)
    pub fn is_encoded(&self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

impl From<FourCC> for PixelFormat {
    fn from(cc: FourCC) -> Self {
        [
            Self::Rgba8888,
            Self::YCbCr420Sp,
            Self::YCrCb420Sp,
            Self::Jpeg,
        ]
        .into_iter()
        .find(|f| f.fourcc() == cc)
        .unwrap_or(Self::Vendor(cc.0))
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fourcc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_maps_back_to_known_formats() {
        assert_eq!(PixelFormat::from(PixelFormat::Jpeg.fourcc()), PixelFormat::Jpeg);
        let vendor = FourCC::new(b'X', b'Y', b'Z', b'1');
        assert_eq!(PixelFormat::from(vendor), PixelFormat::Vendor(vendor.0));
        assert_eq!(PixelFormat::YCrCb420Sp.to_string(), "NV21");
    }
}

//! Pixel formats of decoded video frames.

use serde::{Deserialize, Serialize};

/// Pixel layout of a decoded picture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar Y, U, V at 4:2:0.
    #[default]
    Yuv420p,
    /// NV12: Y plane + interleaved UV at half resolution (HW decoder output).
    Nv12,
    /// P010: 10-bit NV12 variant (HDR content).
    P010,
    /// 4 channels, 8 bits each.
    Rgba8,
}

impl PixelFormat {
    /// Number of separate planes a frame of this format carries.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Yuv420p => 3,
            Self::Nv12 | Self::P010 => 2,
            Self::Rgba8 => 1,
        }
    }
}

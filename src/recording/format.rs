//! Pixel layout detection for raw capture buffers
//!
//! Capture buffers carry no format header. The layout is inferred from the
//! buffer length and, for the two 4:2:2 layouts that share a length, from the
//! byte statistics of the first scanline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Bytes inspected when telling packed from planar 4:2:2
pub const SCANLINE_PROBE_LEN: usize = 3840;

/// Minimum even/odd byte-average gap that indicates interleaved luma/chroma
pub const PACKED_AVG_THRESHOLD: f64 = 5.0;

/// Pixel layout of an incoming frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatTag {
    /// NV12, already what the encoder takes
    SemiPlanar420,
    /// YUYV: Y0 U0 Y1 V0 ...
    Packed422,
    /// I422: full-size Y plane, then half-width U and V planes
    Planar422,
    /// A JPEG-coded frame (MJPEG capture)
    Compressed,
}

impl FormatTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::SemiPlanar420 => "NV12",
            FormatTag::Packed422 => "YUYV",
            FormatTag::Planar422 => "I422",
            FormatTag::Compressed => "MJPEG",
        }
    }

    /// Whether a buffer of `len` bytes can hold this layout at `geometry`
    pub fn accepts_len(&self, len: usize, geometry: FrameGeometry) -> bool {
        match self {
            FormatTag::SemiPlanar420 => len == geometry.len_420(),
            FormatTag::Packed422 | FormatTag::Planar422 => len == geometry.len_422(),
            FormatTag::Compressed => len >= JPEG_SOI.len(),
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session frame dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// W·H·3/2
    pub fn len_420(&self) -> usize {
        self.pixels() * 3 / 2
    }

    /// W·H·2
    pub fn len_422(&self) -> usize {
        self.pixels() * 2
    }
}

/// Classify a raw buffer by length and content.
///
/// Returns `None` when the buffer matches no known layout; the caller drops it.
pub fn classify(data: &[u8], geometry: FrameGeometry) -> Option<FormatTag> {
    let len = data.len();
    if len == 0 {
        return None;
    }

    if len == geometry.len_420() {
        return Some(FormatTag::SemiPlanar420);
    }

    if len == geometry.len_422() {
        return Some(if looks_interleaved(data) {
            FormatTag::Packed422
        } else {
            FormatTag::Planar422
        });
    }

    if data.starts_with(&JPEG_SOI) {
        return Some(FormatTag::Compressed);
    }

    None
}

/// Classify, preferring an explicit tag from the capture source.
///
/// The hint wins whenever the buffer length is consistent with it. An
/// inconsistent hint falls back to [`classify`].
pub fn classify_with_hint(
    data: &[u8],
    geometry: FrameGeometry,
    hint: Option<FormatTag>,
) -> Option<FormatTag> {
    match hint {
        Some(tag) if tag.accepts_len(data.len(), geometry) => Some(tag),
        Some(tag) => {
            log::debug!(
                "Format hint {} inconsistent with {} byte buffer, inferring",
                tag,
                data.len()
            );
            classify(data, geometry)
        }
        None => classify(data, geometry),
    }
}

/// Even/odd byte averages over the first scanline
pub fn scanline_averages(data: &[u8]) -> (f64, f64) {
    let probe = &data[..data.len().min(SCANLINE_PROBE_LEN)];
    let (mut even_sum, mut even_n) = (0u64, 0u64);
    let (mut odd_sum, mut odd_n) = (0u64, 0u64);

    for (i, &b) in probe.iter().enumerate() {
        if i % 2 == 0 {
            even_sum += b as u64;
            even_n += 1;
        } else {
            odd_sum += b as u64;
            odd_n += 1;
        }
    }

    let avg = |sum: u64, n: u64| if n == 0 { 0.0 } else { sum as f64 / n as f64 };
    (avg(even_sum, even_n), avg(odd_sum, odd_n))
}

// In YUYV every odd byte is chroma, which sits near 128 while luma spans the
// whole range. A planar buffer starts with nothing but luma.
fn looks_interleaved(data: &[u8]) -> bool {
    let (even, odd) = scanline_averages(data);
    (even - odd).abs() >= PACKED_AVG_THRESHOLD
}

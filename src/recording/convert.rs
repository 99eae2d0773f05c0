//! Conversion of captured frames into the encoder's 4:2:0 layout
//!
//! Every path produces exactly W·H·3/2 bytes. Chroma planes are
//! (W/2)×(H/2); with odd dimensions the few bytes left over at the end of the
//! buffer are filled with neutral chroma (128).
//!
//! Output goes into a [`ConversionScratch`] sized once per session. Every
//! byte of it is overwritten on each frame, so nothing leaks between frames.

use std::borrow::Cow;
use std::collections::TryReserveError;

use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};

use super::codec::ColorLayout;
use super::format::{FormatTag, FrameGeometry};
use crate::errors::RecorderError;

const NEUTRAL_CHROMA: u8 = 128;

/// Pre-sized output arena owned by one [`FrameConverter`]
#[derive(Debug)]
pub struct ConversionScratch {
    buf: Vec<u8>,
}

impl ConversionScratch {
    /// Reserve W·H·3/2 bytes, reporting allocation failure instead of aborting
    pub fn allocate(geometry: FrameGeometry) -> Result<Self, TryReserveError> {
        let len = geometry.len_420();
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);
        Ok(Self { buf })
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Frame converter for one session geometry and target layout
#[derive(Debug)]
pub struct FrameConverter {
    geometry: FrameGeometry,
    layout: ColorLayout,
    scratch: Option<ConversionScratch>,
    degraded_logged: bool,
}

impl FrameConverter {
    /// Create a converter and allocate its scratch arena.
    ///
    /// If the arena cannot be allocated the converter still works, allocating
    /// a fresh buffer per frame.
    pub fn new(geometry: FrameGeometry, layout: ColorLayout) -> Self {
        let scratch = match ConversionScratch::allocate(geometry) {
            Ok(scratch) => {
                log::debug!(
                    "Conversion scratch ready: {} bytes for {}x{} {}",
                    scratch.len(),
                    geometry.width,
                    geometry.height,
                    layout
                );
                Some(scratch)
            }
            Err(e) => {
                log::warn!("Failed to allocate conversion scratch, using per-frame buffers: {}", e);
                None
            }
        };

        Self {
            geometry,
            layout,
            scratch,
            degraded_logged: false,
        }
    }

    /// Converter that always allocates per frame
    pub fn without_scratch(geometry: FrameGeometry, layout: ColorLayout) -> Self {
        Self {
            geometry,
            layout,
            scratch: None,
            degraded_logged: false,
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn layout(&self) -> ColorLayout {
        self.layout
    }

    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// Convert `raw` (classified as `tag`) into the target layout.
    ///
    /// NV12 input headed for an NV12 encoder is returned as-is. A length that
    /// does not fit `tag` is rejected before any work is done. Only the
    /// compressed path can fail on content.
    pub fn convert<'a>(
        &'a mut self,
        raw: &'a [u8],
        tag: FormatTag,
    ) -> Result<Cow<'a, [u8]>, RecorderError> {
        let geometry = self.geometry;
        if !tag.accepts_len(raw.len(), geometry) {
            return Err(RecorderError::FrameFormatUnrecognized { len: raw.len() });
        }

        let decoded;
        let source = match tag {
            FormatTag::SemiPlanar420 if self.layout == ColorLayout::SemiPlanar => {
                return Ok(Cow::Borrowed(raw));
            }
            FormatTag::SemiPlanar420 => Source::Nv12(raw),
            FormatTag::Packed422 => Source::Yuyv(raw),
            FormatTag::Planar422 => Source::I422(raw),
            FormatTag::Compressed => {
                decoded = decode_jpeg(raw, geometry)?;
                Source::Rgb(decoded.as_raw())
            }
        };

        let layout = self.layout;
        match &mut self.scratch {
            Some(scratch) => {
                fill(&mut scratch.buf, source, geometry, layout);
                Ok(Cow::Borrowed(scratch.buf.as_slice()))
            }
            None => {
                if !self.degraded_logged {
                    log::warn!("Conversion scratch unavailable, allocating per frame");
                    self.degraded_logged = true;
                }
                let mut owned = vec![0u8; geometry.len_420()];
                fill(&mut owned, source, geometry, layout);
                Ok(Cow::Owned(owned))
            }
        }
    }
}

enum Source<'s> {
    Nv12(&'s [u8]),
    Yuyv(&'s [u8]),
    I422(&'s [u8]),
    Rgb(&'s [u8]),
}

fn fill(out: &mut [u8], source: Source<'_>, geometry: FrameGeometry, layout: ColorLayout) {
    let (w, h) = (geometry.width as usize, geometry.height as usize);
    match source {
        Source::Nv12(src) => nv12_to_i420(src, w, h, out),
        Source::Yuyv(src) => yuyv_to_420(src, w, h, layout, out),
        Source::I422(src) => i422_to_420(src, w, h, layout, out),
        Source::Rgb(src) => rgb_to_420(src, w, h, layout, out),
    }
}

/// Decode a JPEG frame to RGB, rescaling to the session size if needed
pub fn decode_jpeg(data: &[u8], geometry: FrameGeometry) -> Result<RgbImage, RecorderError> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| RecorderError::Decode(e.to_string()))?
        .into_rgb8();

    if image.width() == geometry.width && image.height() == geometry.height {
        return Ok(image);
    }

    log::debug!(
        "Scaling decoded frame from {}x{} to {}x{}",
        image.width(),
        image.height(),
        geometry.width,
        geometry.height
    );
    Ok(image::imageops::resize(
        &image,
        geometry.width,
        geometry.height,
        FilterType::Triangle,
    ))
}

/// Writes chroma samples at (row, col) of the (W/2)×(H/2) grid
struct ChromaPlanes {
    y_size: usize,
    cw: usize,
    ch: usize,
    layout: ColorLayout,
}

impl ChromaPlanes {
    fn new(w: usize, h: usize, layout: ColorLayout) -> Self {
        Self {
            y_size: w * h,
            cw: w / 2,
            ch: h / 2,
            layout,
        }
    }

    #[inline]
    fn put(&self, out: &mut [u8], row: usize, col: usize, u: u8, v: u8) {
        let k = row * self.cw + col;
        match self.layout {
            ColorLayout::SemiPlanar => {
                out[self.y_size + 2 * k] = u;
                out[self.y_size + 2 * k + 1] = v;
            }
            ColorLayout::Planar => {
                out[self.y_size + k] = u;
                out[self.y_size + self.cw * self.ch + k] = v;
            }
        }
    }

    /// Neutral-fill whatever follows the chroma planes (odd dimensions only)
    fn pad_tail(&self, out: &mut [u8]) {
        let end = self.y_size + 2 * self.cw * self.ch;
        if end < out.len() {
            out[end..].fill(NEUTRAL_CHROMA);
        }
    }
}

/// YUYV 4:2:2 to 4:2:0.
///
/// Luma comes from the even bytes of every row. Chroma pairs (U at +1, V at
/// +3 of each 4-byte group) come from even rows only.
pub fn yuyv_to_420(src: &[u8], w: usize, h: usize, layout: ColorLayout, out: &mut [u8]) {
    let stride = w * 2;
    for (row, y_row) in out[..w * h].chunks_exact_mut(w.max(1)).enumerate().take(h) {
        let line = &src[row * stride..row * stride + stride];
        for (x, y) in y_row.iter_mut().enumerate() {
            *y = line[x * 2];
        }
    }

    let planes = ChromaPlanes::new(w, h, layout);
    for row in 0..planes.ch {
        let line = &src[2 * row * stride..2 * row * stride + stride];
        for col in 0..planes.cw {
            planes.put(out, row, col, line[col * 4 + 1], line[col * 4 + 3]);
        }
    }
    planes.pad_tail(out);
}

/// I422 to 4:2:0.
///
/// Luma is copied unchanged. Each (W/2)×H chroma plane keeps its even rows
/// and drops the odd ones.
pub fn i422_to_420(src: &[u8], w: usize, h: usize, layout: ColorLayout, out: &mut [u8]) {
    let y_size = w * h;
    out[..y_size].copy_from_slice(&src[..y_size]);

    let planes = ChromaPlanes::new(w, h, layout);
    let cw = planes.cw;
    let u_src = &src[y_size..y_size + cw * h];
    let v_src = &src[y_size + cw * h..y_size + 2 * cw * h];

    match layout {
        ColorLayout::Planar => {
            let plane = cw * planes.ch;
            for row in 0..planes.ch {
                let from = 2 * row * cw;
                let to = y_size + row * cw;
                out[to..to + cw].copy_from_slice(&u_src[from..from + cw]);
                out[to + plane..to + plane + cw].copy_from_slice(&v_src[from..from + cw]);
            }
        }
        ColorLayout::SemiPlanar => {
            for row in 0..planes.ch {
                let from = 2 * row * cw;
                for col in 0..cw {
                    planes.put(out, row, col, u_src[from + col], v_src[from + col]);
                }
            }
        }
    }
    planes.pad_tail(out);
}

/// NV12 to I420, for encoders that only take planar input
pub fn nv12_to_i420(src: &[u8], w: usize, h: usize, out: &mut [u8]) {
    let y_size = w * h;
    out[..y_size].copy_from_slice(&src[..y_size]);

    let planes = ChromaPlanes::new(w, h, ColorLayout::Planar);
    for row in 0..planes.ch {
        for col in 0..planes.cw {
            let k = y_size + 2 * (row * planes.cw + col);
            planes.put(out, row, col, src[k], src[k + 1]);
        }
    }
    planes.pad_tail(out);
}

/// RGB24 to 4:2:0 with BT.601 fixed-point coefficients.
///
/// Chroma is taken from the top-left pixel of each 2×2 block.
pub fn rgb_to_420(rgb: &[u8], w: usize, h: usize, layout: ColorLayout, out: &mut [u8]) {
    let planes = ChromaPlanes::new(w, h, layout);

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * 3;
            let r = rgb[idx] as i32;
            let g = rgb[idx + 1] as i32;
            let b = rgb[idx + 2] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            out[y * w + x] = y_val.clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 && y / 2 < planes.ch && x / 2 < planes.cw {
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                planes.put(
                    out,
                    y / 2,
                    x / 2,
                    u_val.clamp(0, 255) as u8,
                    v_val.clamp(0, 255) as u8,
                );
            }
        }
    }
    planes.pad_tail(out);
}

//! Synthetic capture frames in every layout the recorder ingests
//!
//! Patterns change with `frame_number` so the encoder sees temporal change,
//! and are shaped like real camera output: luma spread over the range, chroma
//! hovering around 128. That keeps packed and planar 4:2:2 frames on the
//! correct side of the format heuristic.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};

#[inline]
fn luma_at(frame_number: u64, x: u32, y: u32) -> u8 {
    16 + ((x as u64 + y as u64 + frame_number) % 64) as u8
}

#[inline]
fn chroma_at(frame_number: u64) -> (u8, u8) {
    let d = (frame_number % 8) as u8;
    (128 + d, 128 - d)
}

/// YUYV (packed 4:2:2) frame of W·H·2 bytes
pub fn synthetic_yuyv_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; (width * height * 2) as usize];
    let (u, v) = chroma_at(frame_number);

    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 2) as usize;
            data[idx] = luma_at(frame_number, x, y);
            data[idx + 1] = if x % 2 == 0 { u } else { v };
        }
    }
    data
}

/// I422 (planar 4:2:2) frame of W·H·2 bytes
pub fn synthetic_i422_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let y_size = (width * height) as usize;
    let cw = (width / 2) as usize;
    let mut data = vec![0u8; y_size * 2];
    let (u, v) = chroma_at(frame_number);

    // Neighbouring columns share a value so even/odd averages stay close
    for y in 0..height {
        for x in 0..width {
            data[(y * width + x) as usize] = luma_at(frame_number, x / 2, y);
        }
    }
    let chroma_len = cw * height as usize;
    data[y_size..y_size + chroma_len].fill(u);
    data[y_size + chroma_len..y_size + 2 * chroma_len].fill(v);
    data[y_size + 2 * chroma_len..].fill(128);
    data
}

/// NV12 (semi-planar 4:2:0) frame of W·H·3/2 bytes
pub fn synthetic_nv12_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let y_size = (width * height) as usize;
    let mut data = vec![0u8; y_size * 3 / 2];
    let (u, v) = chroma_at(frame_number);

    for y in 0..height {
        for x in 0..width {
            data[(y * width + x) as usize] = luma_at(frame_number, x, y);
        }
    }
    for (i, b) in data[y_size..].iter_mut().enumerate() {
        *b = if i % 2 == 0 { u } else { v };
    }
    data
}

/// RGB gradient encoded as a baseline JPEG (MJPEG capture frame)
pub fn synthetic_jpeg_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let base = (frame_number % 256) as u8;
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            base.wrapping_add((x % 256) as u8),
            base.wrapping_add((y % 256) as u8),
            base.wrapping_add(((x + y) % 256) as u8),
        ])
    });

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Jpeg)
        .expect("in-memory JPEG encoding");
    out.into_inner()
}

//! Testing utilities for CrabRecord
//!
//! Synthetic capture frames for offline tests, benches and CLI smoke runs,
//! plus an in-memory codec backend for protocol and lifecycle tests.

pub mod loopback;
pub mod synthetic_data;

pub use loopback::LoopbackBackend;
pub use synthetic_data::{
    synthetic_i422_frame, synthetic_jpeg_frame, synthetic_nv12_frame, synthetic_yuyv_frame,
};

//! Camera capture module: V4L2 webcam access and RGB24 frame delivery.
//!
//! This module provides a high-level API for camera capture operations:
//! - Capture via [`CameraCapture`]
//! - Frame delivery via [`FrameReceiver`] (latest-wins, loss-tolerant)
//! - Raw frame normalization via [`convert_frame`]
//! - Configuration via [`CameraSettings`] and [`Resolution`]

mod capture;
mod capture_loop;
mod convert;
mod device;
#[cfg(test)]
mod fake;
mod frame_channel;
mod pool;
mod types;
#[cfg(target_os = "linux")]
mod v4l2;

pub use capture::CameraCapture;
pub use convert::convert_frame;
pub use frame_channel::{FrameReceiver, RecvError, TryRecvError};
pub use types::{
    fourcc_name, CameraError, CameraSettings, Frame, PixelFormat, Resolution, StreamFormat,
};

//! End-to-end tests for camera capture against real hardware.
//!
//! These tests verify the capture pipeline on an actual V4L2 device:
//! - Camera opens and negotiates a supported format
//! - Frames arrive sized exactly width*height*3
//! - Stopping tears the stream down and closes the channel
//!
//! They self-skip when no capture device is present.

use camfeed::camera::{CameraCapture, CameraError, CameraSettings, RecvError};
use std::path::Path;
use std::time::{Duration, Instant};

fn device_available() -> bool {
    cfg!(target_os = "linux") && Path::new("/dev/video0").exists()
}

/// Test that the camera opens and reports a usable negotiated format.
#[test]
fn test_camera_opens_and_negotiates() {
    if !device_available() {
        println!("SKIP: no capture device available");
        return;
    }

    let mut camera = CameraCapture::open(CameraSettings::default()).expect("Should open camera");
    camera
        .start()
        .expect("Camera stream should start");

    let format = camera
        .stream_format()
        .expect("Format should be known after start");
    println!(
        "negotiated {}x{} {} stride {}",
        format.width, format.height, format.pixel_format, format.stride
    );
    assert!(format.width > 0);
    assert!(format.height > 0);
    assert!(format.stride >= format.tight_stride());

    camera.stop();
}

/// Test that frames arrive and are exactly one RGB24 image each.
#[test]
fn test_frames_have_exact_rgb24_size() {
    if !device_available() {
        println!("SKIP: no capture device available");
        return;
    }

    let mut camera = CameraCapture::open(CameraSettings::default()).expect("Should open camera");
    camera.start().expect("Camera stream should start");
    let format = camera.stream_format().expect("format");
    let frames = camera.frames().expect("frame stream");

    // Some cameras need a moment to produce the first frame
    let first = frames
        .recv_timeout(Duration::from_secs(5))
        .expect("Should capture a first frame within 5s");
    assert_eq!(first.width, format.width);
    assert_eq!(first.height, format.height);
    assert_eq!(first.data.len(), format.rgb_frame_len());

    // Collect for a second and make sure the stream keeps moving
    let started = Instant::now();
    let mut count = 1u32;
    let mut last_timestamp = first.timestamp;
    while started.elapsed() < Duration::from_secs(1) {
        if let Ok(frame) = frames.recv_timeout(Duration::from_millis(200)) {
            assert_eq!(frame.data.len(), format.rgb_frame_len());
            assert!(frame.timestamp >= last_timestamp);
            last_timestamp = frame.timestamp;
            count += 1;
        }
    }
    println!("captured {} frames in ~1s", count);
    assert!(count >= 2, "stream should keep producing frames");

    camera.stop();
}

/// Test that cancelling capture closes the stream for consumers.
#[test]
fn test_stop_reports_end_of_stream() {
    if !device_available() {
        println!("SKIP: no capture device available");
        return;
    }

    let mut camera = CameraCapture::open(CameraSettings::default()).expect("Should open camera");
    camera.start().expect("Camera stream should start");
    let frames = camera.frames().expect("frame stream");

    camera.stop();
    assert!(!camera.is_running());

    // Drain whatever was pending; the channel must then report closed
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        match frames.recv() {
            Ok(_) => {
                assert!(Instant::now() < deadline, "stream never closed");
            }
            Err(RecvError) => break,
        }
    }
}

/// Test that a missing device node fails cleanly at open time.
#[test]
fn test_missing_device_fails_at_open() {
    let settings = CameraSettings {
        device_path: "/dev/video-does-not-exist".into(),
        ..CameraSettings::default()
    };

    match CameraCapture::open(settings) {
        Err(CameraError::DeviceUnavailable { path, .. }) => {
            assert_eq!(path, Path::new("/dev/video-does-not-exist"));
        }
        Ok(_) => panic!("open should fail for a missing device node"),
        Err(other) => panic!("expected DeviceUnavailable, got: {:?}", other),
    }
}

//! Background capture loop: dequeue, convert, requeue, publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::convert::convert_frame;
use super::device::{Dequeued, DeviceSession, VideoDevice};
use super::frame_channel::FrameSender;
use super::types::Frame;

/// Pause between dequeue attempts while the device has no frame ready.
/// Also bounds how long a cancellation can go unnoticed.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Run the capture loop until cancelled or a fatal device error.
///
/// Takes ownership of the session; on exit the session is torn down and the
/// dropped sender reports end-of-stream to consumers. Dequeue, convert and
/// requeue stay strictly sequential so each buffer has exactly one reader.
pub(crate) fn run_capture_loop<D: VideoDevice>(
    mut session: DeviceSession<D>,
    frames: FrameSender,
    stop: Arc<AtomicBool>,
) {
    let format = session.format();

    while !stop.load(Ordering::Relaxed) {
        let (index, bytes_used) = match session.dequeue_filled() {
            Ok(Dequeued::NotReady) => {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            Ok(Dequeued::Rejected) => continue,
            Ok(Dequeued::Filled { index, bytes_used }) => (index, bytes_used),
            Err(err) => {
                log::error!("camera dequeue failed, stopping capture: {}", err);
                break;
            }
        };

        let converted = session
            .filled_bytes(index, bytes_used)
            .and_then(|src| convert_frame(src, &format));

        // Hand the buffer back before publishing so the device can refill it
        // while the consumer is still chewing on the previous frame.
        if let Err(err) = session.requeue(index) {
            log::error!("camera requeue failed, stopping capture: {}", err);
            break;
        }

        match converted {
            Some(data) => frames.publish(Frame {
                data,
                width: format.width,
                height: format.height,
                timestamp: Instant::now(),
            }),
            None => log::debug!("skipping malformed frame from buffer {}", index),
        }
    }

    session.close();
}

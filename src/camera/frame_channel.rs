//! Latest-wins frame delivery between the capture thread and consumers.
//!
//! A single-slot channel: publishing onto a full slot replaces the
//! unconsumed frame instead of blocking, so a slow consumer only ever costs
//! dropped intermediate frames, never producer stalls. Closing the channel
//! (dropping the sender) is a terminal state distinct from "no frame yet".

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::types::Frame;

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Frame>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    available: Condvar,
}

/// The stream has ended and no more frames will arrive.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("frame stream has ended")]
pub struct RecvError;

/// Why a non-blocking receive returned no frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// No frame is waiting right now; more may arrive
    #[error("no frame available yet")]
    Empty,
    /// The stream has ended and no more frames will arrive
    #[error("frame stream has ended")]
    Closed,
}

/// Producer half; exactly one exists per capture session.
#[derive(Debug)]
pub(crate) struct FrameSender {
    shared: Arc<Shared>,
}

/// Consumer half; clones share the same slot.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    shared: Arc<Shared>,
}

/// Create a connected sender/receiver pair around one empty slot.
pub(crate) fn frame_channel() -> (FrameSender, FrameReceiver) {
    let shared = Arc::new(Shared::default());
    (
        FrameSender {
            shared: Arc::clone(&shared),
        },
        FrameReceiver { shared },
    )
}

impl FrameSender {
    /// Install `frame` as the latest, replacing any unconsumed one.
    ///
    /// Never blocks. Publishing after close is a no-op.
    pub(crate) fn publish(&self, frame: Frame) {
        let Ok(mut slot) = self.shared.slot.lock() else {
            return;
        };
        if slot.closed {
            return;
        }
        slot.frame = Some(frame);
        self.shared.available.notify_all();
    }

    /// Mark the stream as ended; receivers drain any pending frame first.
    pub(crate) fn close(&self) {
        if let Ok(mut slot) = self.shared.slot.lock() {
            slot.closed = true;
        }
        self.shared.available.notify_all();
    }
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        self.close();
    }
}

impl FrameReceiver {
    /// Take the waiting frame, if any, without blocking.
    pub fn try_recv(&self) -> Result<Frame, TryRecvError> {
        let Ok(mut slot) = self.shared.slot.lock() else {
            return Err(TryRecvError::Closed);
        };
        match slot.frame.take() {
            Some(frame) => Ok(frame),
            None if slot.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Block until a frame arrives or the stream ends.
    pub fn recv(&self) -> Result<Frame, RecvError> {
        let Ok(mut slot) = self.shared.slot.lock() else {
            return Err(RecvError);
        };
        loop {
            if let Some(frame) = slot.frame.take() {
                return Ok(frame);
            }
            if slot.closed {
                return Err(RecvError);
            }
            slot = match self.shared.available.wait(slot) {
                Ok(guard) => guard,
                Err(_) => return Err(RecvError),
            };
        }
    }

    /// Block up to `timeout` for a frame.
    ///
    /// `Empty` means the timeout elapsed with the stream still live.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Frame, TryRecvError> {
        let deadline = Instant::now() + timeout;
        let Ok(mut slot) = self.shared.slot.lock() else {
            return Err(TryRecvError::Closed);
        };
        loop {
            if let Some(frame) = slot.frame.take() {
                return Ok(frame);
            }
            if slot.closed {
                return Err(TryRecvError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TryRecvError::Empty);
            }
            slot = match self.shared.available.wait_timeout(slot, remaining) {
                Ok((guard, _)) => guard,
                Err(_) => return Err(TryRecvError::Closed),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn frame(tag: u8) -> Frame {
        Frame {
            data: vec![tag; 3],
            width: 1,
            height: 1,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_latest_wins() {
        let (tx, rx) = frame_channel();
        tx.publish(frame(1));
        tx.publish(frame(2));
        // Only the most recent publish survives
        assert_eq!(rx.try_recv().unwrap().data, vec![2, 2, 2]);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_empty_vs_closed() {
        let (tx, rx) = frame_channel();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        drop(tx);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_pending_frame_drains_before_closed() {
        let (tx, rx) = frame_channel();
        tx.publish(frame(7));
        drop(tx);
        assert_eq!(rx.try_recv().unwrap().data, vec![7, 7, 7]);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_recv_blocks_until_publish() {
        let (tx, rx) = frame_channel();
        let handle = thread::spawn(move || rx.recv());
        thread::sleep(Duration::from_millis(20));
        tx.publish(frame(5));
        let got = handle.join().unwrap().unwrap();
        assert_eq!(got.data, vec![5, 5, 5]);
    }

    #[test]
    fn test_recv_unblocks_on_close() {
        let (tx, rx) = frame_channel();
        let handle = thread::spawn(move || rx.recv());
        thread::sleep(Duration::from_millis(20));
        drop(tx);
        assert_eq!(handle.join().unwrap().unwrap_err(), RecvError);
    }

    #[test]
    fn test_recv_timeout_reports_empty() {
        let (_tx, rx) = frame_channel();
        let started = Instant::now();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(30)),
            Err(TryRecvError::Empty)
        );
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_publish_after_close_is_dropped() {
        let (tx, rx) = frame_channel();
        tx.close();
        tx.publish(frame(9));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_cloned_receivers_share_the_slot() {
        let (tx, rx) = frame_channel();
        let rx2 = rx.clone();
        tx.publish(frame(3));
        assert_eq!(rx2.try_recv().unwrap().data, vec![3, 3, 3]);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }
}

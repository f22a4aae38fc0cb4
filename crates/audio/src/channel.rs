//! Capture ring and turn-tagged playback queue
//!
//! All cross-task audio state lives behind these queue operations; callers
//! never lock anything themselves. The capture side favors low latency over
//! completeness: when the consumer falls behind, the oldest buffered frame
//! is dropped and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use parley_core::{AudioFrame, TurnId};

use crate::device::{CaptureSource, PlaybackSink};

/// Bounded ring of captured frames, drop-oldest on overflow
pub struct CaptureRing {
    frames: Mutex<VecDeque<AudioFrame>>,
    depth: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl CaptureRing {
    pub fn new(depth: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(depth)),
            depth,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Push a captured frame, evicting the oldest when full
    pub fn push(&self, frame: AudioFrame) {
        {
            let mut frames = self.frames.lock();
            if frames.len() >= self.depth {
                frames.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!("parley_capture_frames_dropped").increment(1);
                if dropped % 50 == 1 {
                    tracing::debug!(dropped, "Capture ring overflow, dropping oldest frame");
                }
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<AudioFrame> {
        self.frames.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Total frames dropped to overflow since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Lazy, infinite, non-restartable stream of captured frames
    pub fn capture(self: &Arc<Self>) -> impl Stream<Item = AudioFrame> {
        let ring = Arc::clone(self);
        async_stream::stream! {
            loop {
                match ring.pop() {
                    Some(frame) => yield frame,
                    None => ring.notify.notified().await,
                }
            }
        }
    }
}

/// Turn-tagged playback queue with interrupt
///
/// `interrupt(turn_id)` discards everything queued for that turn or earlier
/// and raises a watermark so late-arriving frames for interrupted turns are
/// rejected at enqueue. It returns immediately; a frame already handed to
/// the device may still finish sounding.
pub struct PlaybackQueue {
    inner: Mutex<PlaybackInner>,
    depth: usize,
    notify: Notify,
}

struct PlaybackInner {
    queue: VecDeque<(TurnId, AudioFrame)>,
    interrupted_watermark: Option<TurnId>,
}

impl PlaybackQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Mutex::new(PlaybackInner {
                queue: VecDeque::with_capacity(depth),
                interrupted_watermark: None,
            }),
            depth,
            notify: Notify::new(),
        }
    }

    /// Queue a frame for playback. Returns false if the frame was rejected
    /// because its turn is at or below the interrupt watermark, or dropped
    /// to keep the queue bounded.
    pub fn enqueue(&self, frame: AudioFrame, turn_id: TurnId) -> bool {
        {
            let mut inner = self.inner.lock();
            if let Some(watermark) = inner.interrupted_watermark {
                if turn_id <= watermark {
                    tracing::trace!(turn = turn_id, "Rejecting playback frame for interrupted turn");
                    return false;
                }
            }
            if inner.queue.len() >= self.depth {
                inner.queue.pop_front();
                metrics::counter!("parley_playback_frames_dropped").increment(1);
            }
            inner.queue.push_back((turn_id, frame));
        }
        self.notify.notify_one();
        true
    }

    /// Discard all queued frames for `turn_id` or earlier; returns the
    /// number discarded
    pub fn interrupt(&self, turn_id: TurnId) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.queue.len();
        inner.queue.retain(|(t, _)| *t > turn_id);
        let discarded = before - inner.queue.len();

        inner.interrupted_watermark = Some(
            inner
                .interrupted_watermark
                .map_or(turn_id, |w| w.max(turn_id)),
        );

        tracing::debug!(turn = turn_id, discarded, "Playback interrupted");
        discarded
    }

    pub fn pop(&self) -> Option<(TurnId, AudioFrame)> {
        self.inner.lock().queue.pop_front()
    }

    /// Await the next playable frame
    pub async fn next(&self) -> (TurnId, AudioFrame) {
        loop {
            if let Some(entry) = self.pop() {
                return entry;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}

/// The audio I/O channel: one capture ring, one playback queue, and the two
/// device-facing tasks
pub struct AudioIoChannel {
    capture: Arc<CaptureRing>,
    playback: Arc<PlaybackQueue>,
}

impl AudioIoChannel {
    pub fn new(capture_depth: usize, playback_depth: usize) -> Self {
        Self {
            capture: Arc::new(CaptureRing::new(capture_depth)),
            playback: Arc::new(PlaybackQueue::new(playback_depth)),
        }
    }

    pub fn capture_ring(&self) -> Arc<CaptureRing> {
        Arc::clone(&self.capture)
    }

    pub fn playback_queue(&self) -> Arc<PlaybackQueue> {
        Arc::clone(&self.playback)
    }

    /// Queue a generated speech frame for playback, tagged with its turn
    pub fn enqueue_playback(&self, frame: AudioFrame, turn_id: TurnId) -> bool {
        self.playback.enqueue(frame, turn_id)
    }

    /// Flush/interrupt: no further frames for `turn_id` or earlier play
    pub fn interrupt(&self, turn_id: TurnId) -> usize {
        self.playback.interrupt(turn_id)
    }

    /// Spawn the capture task: pulls frames from the device at frame pacing
    /// and pushes them into the ring. Ends when the source is exhausted or
    /// shutdown is signalled.
    pub fn spawn_capture(
        &self,
        mut source: impl CaptureSource + 'static,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let ring = Arc::clone(&self.capture);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(20));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match source.next_frame() {
                            Some(frame) => ring.push(frame),
                            None => {
                                tracing::info!("Capture source exhausted");
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Spawn the playback task: drains the queue into the device
    pub fn spawn_playback(
        &self,
        mut sink: impl PlaybackSink + 'static,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(&self.playback);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    (turn_id, frame) = queue.next() => {
                        if let Err(e) = sink.play(&frame) {
                            tracing::warn!(turn = turn_id, error = %e, "Playback device error");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parley_core::{Channels, SampleRate};

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0.1; 320], SampleRate::Hz16000, Channels::Mono, seq)
    }

    #[test]
    fn test_capture_ring_drops_oldest() {
        let ring = CaptureRing::new(3);
        for i in 0..5 {
            ring.push(frame(i));
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.dropped_count(), 2);
        // Oldest two were evicted
        assert_eq!(ring.pop().unwrap().sequence, 2);
        assert_eq!(ring.pop().unwrap().sequence, 3);
        assert_eq!(ring.pop().unwrap().sequence, 4);
    }

    #[tokio::test]
    async fn test_capture_stream_yields_in_order() {
        let ring = Arc::new(CaptureRing::new(10));
        ring.push(frame(0));
        ring.push(frame(1));

        let mut stream = Box::pin(ring.capture());
        assert_eq!(stream.next().await.unwrap().sequence, 0);
        assert_eq!(stream.next().await.unwrap().sequence, 1);
    }

    #[test]
    fn test_playback_interrupt_discards_turn_and_earlier() {
        let queue = PlaybackQueue::new(10);
        queue.enqueue(frame(0), 1);
        queue.enqueue(frame(1), 1);
        queue.enqueue(frame(2), 2);

        let discarded = queue.interrupt(1);
        assert_eq!(discarded, 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().0, 2);
    }

    #[test]
    fn test_playback_rejects_late_frames_after_interrupt() {
        let queue = PlaybackQueue::new(10);
        queue.interrupt(3);

        // Frames for the interrupted turn or earlier never enter the queue
        assert!(!queue.enqueue(frame(0), 3));
        assert!(!queue.enqueue(frame(1), 2));
        assert!(queue.enqueue(frame(2), 4));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_playback_watermark_monotonic() {
        let queue = PlaybackQueue::new(10);
        queue.interrupt(5);
        queue.interrupt(2); // must not lower the watermark
        assert!(!queue.enqueue(frame(0), 5));
        assert!(queue.enqueue(frame(1), 6));
    }

    #[tokio::test]
    async fn test_capture_task_from_silence_source() {
        use crate::device::SilenceSource;

        let channel = AudioIoChannel::new(8, 8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = channel.spawn_capture(SilenceSource::new(SampleRate::Hz16000), shutdown_rx);

        let ring = channel.capture_ring();
        let mut stream = Box::pin(ring.capture());
        let first = stream.next().await.unwrap();
        assert_eq!(first.samples.len(), 320);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

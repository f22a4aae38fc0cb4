//! Audio I/O Channel
//!
//! Decouples real-time audio device timing from network/event timing. This
//! is the only crate permitted to touch audio devices; everything else
//! interacts with it through frames and turn ids.

pub mod channel;
pub mod device;

pub use channel::{AudioIoChannel, CaptureRing, PlaybackQueue};
pub use device::{AudioDeviceError, CaptureSource, PlaybackSink, SilenceSource, WavFileSink, WavFileSource};

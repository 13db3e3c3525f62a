// Sound event queue - lock-free hand-off from the scheduler to the audio thread
//
// The scheduler decides *what* sounds and *when* on the audio clock; the audio
// thread starts each event on its exact frame. Events travel through a single
// SPSC ring buffer so the audio callback never locks or allocates.
//
// Event flow:
// 1. Scheduler converts a beat's audio-clock time to a frame index
// 2. EventSender stamps the current transport epoch and pushes the event
// 3. Renderer pops events at the start of each block
// 4. Renderer drops events whose epoch is stale, starts the rest on their frame

use std::sync::{Arc, Mutex};

use rtrb::{Consumer, Producer, RingBuffer};

use super::clock::AudioClock;
use super::synth::SoundKind;
use crate::error::AudioError;

/// A fire-and-forget sound scheduled at an exact frame of the audio clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundEvent {
    pub kind: SoundKind,
    /// Frame index on the audio clock where the first sample plays
    pub start_frame: u64,
    /// Linear gain captured when the event was scheduled
    pub gain: f32,
    /// Transport epoch the event belongs to
    pub epoch: u64,
}

/// Receiving end, owned by the renderer on the audio thread.
pub type EventConsumer = Consumer<SoundEvent>;

/// Control-side end of the event queue.
///
/// The producer is wrapped in a mutex because the scheduler may run on any
/// control thread; the audio thread only ever touches the consumer.
pub struct EventSender {
    producer: Mutex<Producer<SoundEvent>>,
    clock: Arc<AudioClock>,
    capacity: usize,
}

/// Create a sound event queue bound to `clock`.
///
/// # Arguments
/// * `capacity` - Maximum number of events in flight between two audio blocks
/// * `clock` - Audio clock used for time-to-frame conversion and epochs
pub fn event_queue(capacity: usize, clock: Arc<AudioClock>) -> (EventSender, EventConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        EventSender {
            producer: Mutex::new(producer),
            clock,
            capacity,
        },
        consumer,
    )
}

impl EventSender {
    /// Schedule `kind` to start at `at_secs` on the audio clock.
    ///
    /// # Errors
    /// - `EventQueueFull` if the audio thread has not drained the queue
    /// - `LockPoisoned` if a previous sender panicked mid-push
    pub fn schedule(&self, kind: SoundKind, at_secs: f64, gain: f32) -> Result<SoundEvent, AudioError> {
        let event = SoundEvent {
            kind,
            start_frame: self.clock.time_to_frame(at_secs),
            gain,
            epoch: self.clock.epoch(),
        };

        let mut producer = self.producer.lock().map_err(|_| AudioError::LockPoisoned {
            component: "event_queue".to_string(),
        })?;
        producer.push(event).map_err(|_| AudioError::EventQueueFull {
            capacity: self.capacity,
        })?;

        Ok(event)
    }

    pub fn clock(&self) -> &Arc<AudioClock> {
        &self.clock
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_converts_time_and_stamps_epoch() {
        let clock = Arc::new(AudioClock::new(48000));
        clock.bump_epoch();
        let (sender, mut consumer) = event_queue(8, Arc::clone(&clock));

        let sent = sender.schedule(SoundKind::Kick, 0.25, 0.5).unwrap();
        assert_eq!(sent.start_frame, 12000);
        assert_eq!(sent.epoch, 1);

        let received = consumer.pop().unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn test_full_queue_reports_capacity() {
        let clock = Arc::new(AudioClock::new(48000));
        let (sender, _consumer) = event_queue(2, clock);

        sender.schedule(SoundKind::Kick, 0.1, 1.0).unwrap();
        sender.schedule(SoundKind::Click, 0.1, 1.0).unwrap();
        let err = sender.schedule(SoundKind::Kick, 0.6, 1.0).unwrap_err();
        assert_eq!(err, AudioError::EventQueueFull { capacity: 2 });
    }

    #[test]
    fn test_events_preserve_fifo_order() {
        let clock = Arc::new(AudioClock::new(44100));
        let (sender, mut consumer) = event_queue(8, clock);

        for i in 0..4 {
            sender.schedule(SoundKind::Kick, i as f64 * 0.5, 1.0).unwrap();
        }
        let frames: Vec<u64> = std::iter::from_fn(|| consumer.pop().ok())
            .map(|event| event.start_frame)
            .collect();
        assert_eq!(frames, vec![0, 22050, 44100, 66150]);
    }
}

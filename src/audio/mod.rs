// Audio module - audio clock, sound synthesis and real-time rendering

pub mod clock;
pub mod event;
pub mod gain;
pub mod renderer;
pub mod synth;

// Re-export commonly used types for convenience
pub use clock::AudioClock;
pub use event::{event_queue, EventConsumer, EventSender, SoundEvent};
pub use gain::{db_to_gain, volume_to_gain, GainStages};
pub use renderer::Renderer;
pub use synth::{SoundBank, SoundKind};

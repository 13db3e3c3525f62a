//! Engine module housing the rhythm engine core.
//!
//! `core` owns the control surface and state machine, `transport` computes
//! beat times on the audio clock, `beats` fans beats out to listeners,
//! `ticker` provides the recurring scheduling handle and `backend` hides the
//! platform audio output.

pub mod backend;
pub mod beats;
pub mod core;
pub mod ticker;
pub mod transport;

#[cfg(target_os = "android")]
pub use backend::OboeBackend;
#[cfg(not(target_os = "android"))]
pub use backend::CpalBackend;
pub use backend::{platform_factory, AudioBackend, BackendFactory, BackendFuture, OfflineBackend};
pub use beats::{BeatCallback, BeatEvent, BeatSubscription};
pub use self::core::{EngineState, RhythmEngine};
pub use transport::{BeatTick, TempoCurve, Transport};

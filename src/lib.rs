// Rhythm Engine - beat scheduling and audio/visual sync for rhythm mode
// Sample-accurate look-ahead scheduling on the audio clock

// Module declarations
pub mod api;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod telemetry;

// Re-exports for convenience
pub use config::RhythmConfig;
pub use engine::{BeatEvent, BeatSubscription, EngineState, RhythmEngine};
pub use error::AudioError;

#[cfg(target_os = "android")]
use log::info;

/// Install the Android logcat subscriber. Safe to call more than once.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let layer = match tracing_android::layer("RhythmEngine") {
        Ok(layer) => layer,
        Err(err) => {
            eprintln!("[RhythmEngine] logcat layer unavailable: {}", err);
            return;
        }
    };
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

/// Install a stderr subscriber honouring `RUST_LOG`. Safe to call more than
/// once.
#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// JNI_OnLoad is called when the native library is loaded by Android
/// This function initializes the Android context required by oboe-rs
#[cfg(target_os = "android")]
#[no_mangle]
pub extern "system" fn JNI_OnLoad(
    vm: jni::JavaVM,
    _reserved: *mut std::ffi::c_void,
) -> jni::sys::jint {
    init_logging();

    info!("JNI_OnLoad called - initializing Android context");

    // SAFETY: the JavaVM pointer is valid for the lifetime of the process and
    // this runs before any Oboe stream is opened. No Activity context is
    // available at load time; Oboe only needs the VM.
    unsafe {
        ndk_context::initialize_android_context(
            vm.get_java_vm_pointer().cast(),
            std::ptr::null_mut(),
        );
    }

    info!("Android context initialized successfully");

    jni::sys::JNI_VERSION_1_6
}

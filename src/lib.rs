pub mod audio;
pub mod backend;
pub mod config;
pub mod detection;
pub mod device_manager;
pub mod error;
pub mod listener;
mod lock;
pub mod probe;
pub mod stream;
pub mod telemetry;

pub use detection::{DetectorParams, DetectorState, EdgeDetector};
pub use error::{AudioError, DetectorError, DeviceErrorKind, ListenError};
pub use listener::{Listener, ListenerHandle, ListenerState, SessionReport, StopSignal};

pub const DEFAULT_SAMPLERATE: u32 = 44_100;
pub const DEFAULT_BLOCKSIZE: u32 = 256;
pub const DEFAULT_DEBOUNCE_MS: u64 = 40;
pub const DEFAULT_UPPER_OFFSET: f32 = -0.2;
pub const DEFAULT_LOWER_OFFSET: f32 = -0.5;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_LOG_LEVEL: &str = "warn";

pub const MIN_SAMPLERATE: u32 = 8_000;
pub const MAX_SAMPLERATE: u32 = 192_000;
pub const MIN_BLOCKSIZE: u32 = 16;
pub const MAX_BLOCKSIZE: u32 = 8_192;
pub const MIN_DEBOUNCE_MS: u64 = 1;
pub const MAX_DEBOUNCE_MS: u64 = 2_000;
pub const MIN_PROBE_TIMEOUT_MS: u64 = 100;
pub const MAX_PROBE_TIMEOUT_MS: u64 = 30_000;
pub const MAX_LISTEN_SECONDS: u64 = 86_400;
pub const MAX_SIMULATED_PRESSES: usize = 1_000;
pub const MAX_DEVICE_NAME_BYTES: usize = 256;

pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

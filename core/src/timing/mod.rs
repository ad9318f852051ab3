//! Time-windowed helpers for noisy event streams.

pub mod debounce;
pub mod throttle;

pub use debounce::Debouncer;
pub use throttle::Throttle;

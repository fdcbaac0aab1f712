pub mod atomic_write;
pub mod state;
pub mod telemetry;

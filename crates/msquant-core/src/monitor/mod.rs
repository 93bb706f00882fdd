//! GPU telemetry: polling and bounded history.

pub mod gpu;
pub mod history;

pub use gpu::{device_inventory, poll, GpuDevice, GpuSample};
pub use history::{GpuHistory, GpuMetric};

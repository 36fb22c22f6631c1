//! Buffered at-least-once delivery to the feature store
//!
//! Records are flushed in bulk when the buffer is full or when input has been
//! idle past the flush interval. Bus offsets are committed only after the
//! store accepted the write.

mod buffer;
mod service;
mod types;

pub use buffer::DeliveryBuffer;
pub use service::{DeliveryOutcome, DeliveryService};
pub use types::{BufferState, DeliveryError, DeliveryMode, FlushPolicy};

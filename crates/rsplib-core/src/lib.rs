//! rsplib-core: Core types, parameter store, and transport traits for rsplib.
//!
//! This crate defines the backend-agnostic pieces of receiver control. The
//! session logic in `rsplib-control` and every transport backend depend on
//! these types.
//!
//! # Key types
//!
//! - [`DeviceParams`] -- the validating parameter store
//! - [`ReasonSet`] / [`Field`] -- reason-for-update encoding
//! - [`Transport`] / [`CallbackSink`] -- the service boundary
//! - [`DeviceEvent`] / [`StreamBlock`] -- what the producer delivers
//! - [`Error`] / [`ApiStatus`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod gain;
pub mod params;
pub mod reason;
pub mod stream;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use rsplib_core::*`.
pub use error::{ApiStatus, Error, ErrorInfo, Result};
pub use events::{DeviceEvent, DuoModeChange, EventKind, PowerOverload};
pub use gain::{GainValues, LnaPath, MinGainReduction};
pub use params::{DeviceParams, ResetKind, RxChannelParams};
pub use reason::{Field, Reason, ReasonDomain, ReasonSet, encode};
pub use stream::StreamBlock;
pub use transport::{ApplyReport, CallbackSink, DuoModeSwap, Transport, UpdateBatch};
pub use types::*;

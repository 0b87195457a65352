//! rsplib-control: Session, dispatch, and callback routing for rsplib.
//!
//! This crate turns a [`Transport`](rsplib_core::Transport) into a usable
//! receiver session. It owns everything that is stateful about talking to a
//! device: the open/close contract, per-device serialization of control
//! operations, the staged parameter tree, and the routing of stream blocks
//! and events from the transport's producer to application handlers.
//!
//! # Key types
//!
//! - [`Api`] / [`ApiBuilder`] -- service session and its configuration
//! - [`RspDevice`] -- a selected device and its control operations
//! - [`ParamsRef`] -- staged access to a device's parameter tree
//! - [`CallbackRegistration`] -- stream and event handlers for `init`

pub mod api;
pub mod builder;
pub mod device;
pub mod router;

mod dispatcher;
mod duo;
mod state;

pub use api::Api;
pub use builder::{ApiBuilder, ApiConfig, PendingPolicy};
pub use device::RspDevice;
pub use router::{
    CallbackRegistration, EventHandler, EventRouter, Sequence, StreamHandler, StreamRouter,
    StreamStats,
};
pub use state::{ParamsRef, Transition};

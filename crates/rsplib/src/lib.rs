//! # rsplib -- Control and streaming for SDRplay RSP receivers
//!
//! `rsplib` is an asynchronous Rust client for SDRplay RSP receivers
//! (RSP1, RSP1A, RSP2, RSPduo, RSPdx). It selects devices through the
//! receiver service, stages parameter changes, applies them with
//! reason-for-update masks, and routes the sample stream and device events
//! to application handlers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rsplib::{ApiBuilder, CallbackRegistration, Sequence, StreamBlock, Transport, Tuner};
//!
//! # async fn example(transport: Arc<dyn Transport>) -> rsplib::Result<()> {
//! let api = ApiBuilder::new().build(transport);
//! api.open().await?;
//!
//! let devices = api.devices().await?;
//! let device = api.select(&devices[0]).await?;
//!
//! device
//!     .init(CallbackRegistration::new().stream_a(
//!         |block: &StreamBlock<'_>, seq: Sequence| {
//!             println!("{} samples (block {})", block.num_samples(), seq.block_index);
//!         },
//!     ))
//!     .await?;
//!
//! let params = device.params();
//! params.stage(|p| p.set_rf_frequency(Tuner::A, 100.1e6))?;
//! params.stage(|p| p.set_gain(Tuner::A, 40, 2))?;
//! device.commit(Tuner::A).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                           |
//! |-----------------------|---------------------------------------------------|
//! | `rsplib-core`         | Parameter store, reason encoding, transport trait |
//! | `rsplib-control`      | Sessions, update dispatch, callback routing       |
//! | `rsplib-test-harness` | In-memory fake transport for tests                |
//! | **`rsplib`**          | This facade crate -- re-exports everything        |
//!
//! ## Updates
//!
//! Setters on [`DeviceParams`] validate and change the in-memory tree only.
//! Nothing reaches the hardware until the change is dispatched, either with
//! an explicit [`ReasonSet`] through [`RspDevice::update`] or by committing
//! what was staged through a [`ParamsRef`]. Reasons are applied in a fixed
//! precedence order with gain first.
//!
//! ## RSPduo
//!
//! An RSPduo session is single-tuner, dual-tuner, master, or slave. A slave
//! shares the master's clock and may only change its own tuner; device-wide
//! changes fail with [`Error::ModeViolation`] before anything is sent.

pub use rsplib_control::*;
pub use rsplib_core::*;

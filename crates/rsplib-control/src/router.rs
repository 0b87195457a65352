//! Stream and event callback routing.
//!
//! The transport's producer calls into the [`StreamRouter`] for every sample
//! block and into the [`EventRouter`] for every device event. Both run on
//! the producer's context, concurrently with control operations.
//!
//! # Stream path
//!
//! At most one handler per channel. Routing a block is O(1): one
//! non-blocking read-lock attempt, an `Arc` clone, a handful of atomic
//! updates and the handler call. It never allocates and never waits on a
//! lock a control operation may hold. Blocks for a channel with no handler
//! (or whose handler is being replaced at that instant) are dropped and
//! counted, never queued.
//!
//! # Event path
//!
//! At most one handler per session. Events are delivered in arrival order
//! and never dropped.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, TryLockError};

use tokio::sync::Notify;

use rsplib_core::events::DeviceEvent;
use rsplib_core::stream::StreamBlock;
use rsplib_core::types::{MAX_TUNERS, Tuner};

// ---------------------------------------------------------------
// Handlers and registration
// ---------------------------------------------------------------

/// Sequencing metadata the router attaches to every delivered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    /// Index of this block on its channel since the stream started.
    pub block_index: u64,
    /// `true` if the block's first sample directly follows the previous
    /// block's last. Always `false` after a reset and for the first block.
    pub contiguous: bool,
}

/// Consumer of one channel's sample blocks.
///
/// Runs on the producer's real-time context and must return quickly. The
/// block's buffers are only valid for the duration of the call.
pub trait StreamHandler: Send + Sync {
    fn on_block(&self, block: &StreamBlock<'_>, seq: Sequence);
}

impl<F> StreamHandler for F
where
    F: Fn(&StreamBlock<'_>, Sequence) + Send + Sync,
{
    fn on_block(&self, block: &StreamBlock<'_>, seq: Sequence) {
        self(block, seq)
    }
}

/// Consumer of device events.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &DeviceEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&DeviceEvent) + Send + Sync,
{
    fn on_event(&self, event: &DeviceEvent) {
        self(event)
    }
}

/// The handlers bound to a streaming session.
///
/// Each handler is optional. Per-session context travels in whatever the
/// handlers capture. The session keeps the handlers until uninit, then
/// drops them.
#[derive(Clone, Default)]
pub struct CallbackRegistration {
    pub(crate) stream: [Option<Arc<dyn StreamHandler>>; MAX_TUNERS],
    pub(crate) event: Option<Arc<dyn EventHandler>>,
}

impl CallbackRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler for channel A (tuner A).
    pub fn stream_a(self, handler: impl StreamHandler + 'static) -> Self {
        self.stream(Tuner::A, handler)
    }

    /// Handler for channel B (tuner B).
    pub fn stream_b(self, handler: impl StreamHandler + 'static) -> Self {
        self.stream(Tuner::B, handler)
    }

    pub fn stream(mut self, tuner: Tuner, handler: impl StreamHandler + 'static) -> Self {
        self.stream[tuner.index()] = Some(Arc::new(handler));
        self
    }

    pub fn event(mut self, handler: impl EventHandler + 'static) -> Self {
        self.event = Some(Arc::new(handler));
        self
    }

    pub fn has_stream(&self, tuner: Tuner) -> bool {
        self.stream[tuner.index()].is_some()
    }

    pub fn has_event(&self) -> bool {
        self.event.is_some()
    }
}

impl std::fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("stream_a", &self.has_stream(Tuner::A))
            .field("stream_b", &self.has_stream(Tuner::B))
            .field("event", &self.has_event())
            .finish()
    }
}

// ---------------------------------------------------------------
// Update confirmation
// ---------------------------------------------------------------

/// Change flags carried on stream blocks.
pub(crate) mod change {
    pub const GAIN: u8 = 0x1;
    pub const RF: u8 = 0x2;
    pub const FS: u8 = 0x4;
}

/// Per-channel waiter for change flags on the stream path.
///
/// The control side arms a mask; the stream side clears bits as blocks
/// report them and wakes the waiter when the mask empties.
#[derive(Default)]
pub(crate) struct Confirmation {
    remaining: AtomicU8,
    done: Notify,
}

impl Confirmation {
    pub(crate) fn arm(&self, mask: u8) {
        self.remaining.store(mask, Ordering::Release);
    }

    pub(crate) fn disarm(&self) {
        self.remaining.store(0, Ordering::Release);
    }

    pub(crate) fn notify(&self) -> &Notify {
        &self.done
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    fn observe(&self, flags: u8) {
        let pending = self.remaining.load(Ordering::Acquire);
        let seen = pending & flags;
        if seen == 0 {
            return;
        }
        let before = self.remaining.fetch_and(!seen, Ordering::AcqRel);
        if before & seen != 0 && before & !seen == 0 {
            self.done.notify_waiters();
        }
    }
}

// ---------------------------------------------------------------
// Stream router
// ---------------------------------------------------------------

/// Delivered and dropped block counts for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct ChannelRoute {
    handler: RwLock<Option<Arc<dyn StreamHandler>>>,
    primed: AtomicBool,
    next_sample: AtomicU32,
    blocks: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    confirm: Confirmation,
}

impl ChannelRoute {
    fn current(&self) -> Option<Arc<dyn StreamHandler>> {
        match self.handler.try_read() {
            Ok(guard) => guard.clone(),
            Err(TryLockError::Poisoned(p)) => p.into_inner().clone(),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn sequence(&self, block: &StreamBlock<'_>) -> Sequence {
        let primed = self.primed.swap(true, Ordering::AcqRel);
        let expected = self
            .next_sample
            .swap(block.next_sample_num(), Ordering::AcqRel);
        Sequence {
            block_index: self.blocks.fetch_add(1, Ordering::Relaxed),
            contiguous: primed && !block.reset && block.first_sample_num == expected,
        }
    }

    fn reset(&self) {
        self.primed.store(false, Ordering::Release);
        self.blocks.store(0, Ordering::Relaxed);
    }
}

/// Routes sample blocks to the per-channel handlers.
#[derive(Default)]
pub struct StreamRouter {
    channels: [ChannelRoute; MAX_TUNERS],
}

impl StreamRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or clear) the handler for `tuner`'s channel.
    pub fn register(&self, tuner: Tuner, handler: Option<Arc<dyn StreamHandler>>) {
        let channel = &self.channels[tuner.index()];
        let mut slot = match channel.handler.write() {
            Ok(guard) => guard,
            Err(p) => p.into_inner(),
        };
        *slot = handler;
        channel.reset();
    }

    /// Drop every handler.
    pub fn clear(&self) {
        self.register(Tuner::A, None);
        self.register(Tuner::B, None);
    }

    /// Deliver `block` to `tuner`'s handler, or drop it.
    ///
    /// Returns `true` if a handler received the block.
    pub fn route(&self, tuner: Tuner, block: &StreamBlock<'_>) -> bool {
        let channel = &self.channels[tuner.index()];

        let mut flags = 0;
        if block.gr_changed {
            flags |= change::GAIN;
        }
        if block.rf_changed {
            flags |= change::RF;
        }
        if block.fs_changed {
            flags |= change::FS;
        }
        if flags != 0 {
            channel.confirm.observe(flags);
        }

        let seq = channel.sequence(block);
        match channel.current() {
            Some(handler) => {
                handler.on_block(block, seq);
                channel.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                channel.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self, tuner: Tuner) -> StreamStats {
        let channel = &self.channels[tuner.index()];
        StreamStats {
            delivered: channel.delivered.load(Ordering::Relaxed),
            dropped: channel.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn confirmation(&self, tuner: Tuner) -> &Confirmation {
        &self.channels[tuner.index()].confirm
    }
}

// ---------------------------------------------------------------
// Event router
// ---------------------------------------------------------------

/// Routes device events to the session's event handler.
#[derive(Default)]
pub struct EventRouter {
    handler: RwLock<Option<Arc<dyn EventHandler>>>,
    delivered: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Option<Arc<dyn EventHandler>>) {
        let mut slot = match self.handler.write() {
            Ok(guard) => guard,
            Err(p) => p.into_inner(),
        };
        *slot = handler;
    }

    /// Deliver `event` to the handler, if one is registered.
    ///
    /// Waits for a concurrent registration change rather than dropping.
    pub fn deliver(&self, event: &DeviceEvent) -> bool {
        let handler = match self.handler.read() {
            Ok(guard) => guard.clone(),
            Err(p) => p.into_inner().clone(),
        };
        match handler {
            Some(handler) => {
                handler.on_event(event);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use rsplib_core::events::{EventKind, PowerOverload};
    use rsplib_core::types::TunerSelect;

    fn recorder() -> (Arc<Mutex<Vec<(u32, Sequence)>>>, impl StreamHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |block: &StreamBlock<'_>, seq: Sequence| {
            sink.lock().unwrap().push((block.first_sample_num, seq));
        };
        (seen, handler)
    }

    #[test]
    fn blocks_without_handler_are_dropped() {
        let router = StreamRouter::new();
        let xi = [1i16; 8];
        let xq = [2i16; 8];
        assert!(!router.route(Tuner::A, &StreamBlock::new(0, &xi, &xq)));
        assert_eq!(
            router.stats(Tuner::A),
            StreamStats {
                delivered: 0,
                dropped: 1
            }
        );
    }

    #[test]
    fn channels_are_independent() {
        let router = StreamRouter::new();
        let (seen_a, handler_a) = recorder();
        router.register(Tuner::A, Some(Arc::new(handler_a)));
        let xi = [0i16; 4];
        let xq = [0i16; 4];
        assert!(router.route(Tuner::A, &StreamBlock::new(0, &xi, &xq)));
        assert!(!router.route(Tuner::B, &StreamBlock::new(0, &xi, &xq)));
        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert_eq!(router.stats(Tuner::B).dropped, 1);
    }

    #[test]
    fn contiguity_tracking() {
        let router = StreamRouter::new();
        let (seen, handler) = recorder();
        router.register(Tuner::A, Some(Arc::new(handler)));
        let xi = [0i16; 4];
        let xq = [0i16; 4];

        router.route(Tuner::A, &StreamBlock::new(100, &xi, &xq));
        router.route(Tuner::A, &StreamBlock::new(104, &xi, &xq));
        // Gap.
        router.route(Tuner::A, &StreamBlock::new(200, &xi, &xq));
        // Numerically contiguous, but flagged as a reset.
        let mut reset = StreamBlock::new(204, &xi, &xq);
        reset.reset = true;
        router.route(Tuner::A, &reset);
        router.route(Tuner::A, &StreamBlock::new(208, &xi, &xq));

        let seen = seen.lock().unwrap();
        let contiguous: Vec<bool> = seen.iter().map(|(_, s)| s.contiguous).collect();
        assert_eq!(contiguous, vec![false, true, false, false, true]);
        let indices: Vec<u64> = seen.iter().map(|(_, s)| s.block_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn reregister_restarts_sequence() {
        let router = StreamRouter::new();
        let (_, first) = recorder();
        router.register(Tuner::A, Some(Arc::new(first)));
        let xi = [0i16; 4];
        let xq = [0i16; 4];
        router.route(Tuner::A, &StreamBlock::new(0, &xi, &xq));

        let (seen, second) = recorder();
        router.register(Tuner::A, Some(Arc::new(second)));
        router.route(Tuner::A, &StreamBlock::new(4, &xi, &xq));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1, Sequence {
            block_index: 0,
            contiguous: false
        });
    }

    #[test]
    fn confirmation_settles_when_all_flags_seen() {
        let router = StreamRouter::new();
        let confirm = router.confirmation(Tuner::A);
        confirm.arm(change::GAIN | change::RF);
        let xi = [0i16; 4];
        let xq = [0i16; 4];

        let mut gain = StreamBlock::new(0, &xi, &xq);
        gain.gr_changed = true;
        router.route(Tuner::A, &gain);
        assert!(!confirm.is_settled());

        let mut rf = StreamBlock::new(4, &xi, &xq);
        rf.rf_changed = true;
        router.route(Tuner::A, &rf);
        assert!(confirm.is_settled());
    }

    #[test]
    fn events_delivered_in_order() {
        let router = EventRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.register(Some(Arc::new(move |ev: &DeviceEvent| {
            sink.lock().unwrap().push(ev.kind.clone());
        })));

        let kinds = [
            EventKind::PowerOverload(PowerOverload::Detected),
            EventKind::PowerOverload(PowerOverload::Corrected),
            EventKind::DeviceRemoved,
        ];
        for kind in &kinds {
            assert!(router.deliver(&DeviceEvent::new(TunerSelect::A, kind.clone())));
        }
        assert_eq!(*seen.lock().unwrap(), kinds.to_vec());
        assert_eq!(router.delivered(), 3);
    }

    #[test]
    fn registration_builder() {
        let reg = CallbackRegistration::new()
            .stream_b(|_: &StreamBlock<'_>, _: Sequence| {})
            .event(|_: &DeviceEvent| {});
        assert!(!reg.has_stream(Tuner::A));
        assert!(reg.has_stream(Tuner::B));
        assert!(reg.has_event());
    }
}

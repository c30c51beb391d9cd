//! Wait on several wake sources at once.
//!
//! A source reports readiness without consuming anything; the caller consumes
//! from whichever source `select` names. Anything that was ready but not picked
//! is still ready on the next call, so no wakeup is lost when two sources fire
//! together.

use core::future::{Future, poll_fn};
use core::task::{Context, Poll};

use embassy_futures::select::{Either, select as either};
use embassy_sync::waitqueue::AtomicWaker;
use portable_atomic::{AtomicBool, Ordering};

/// Something a task can block on.
pub trait EventSource: Sync {
    /// Register `cx` for wakeup and report whether something is waiting. Must
    /// not consume it.
    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()>;
}

/// Latched binary event set from interrupt context and cleared by the task.
///
/// Signalling an event that is already pending is a no-op, so several
/// interrupts before the task runs collapse into one wake.
pub struct IrqEvent {
    pending: AtomicBool,
    waker: AtomicWaker,
}

impl Default for IrqEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqEvent {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    /// Safe to call from an interrupt handler. Never blocks.
    pub fn signal(&self) {
        self.pending.store(true, Ordering::Release);
        self.waker.wake();
    }

    /// Clear the event, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl EventSource for IrqEvent {
    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        // Register first so a signal landing between the check and the return
        // still wakes us
        self.waker.register(cx.waker());
        if self.pending.load(Ordering::Acquire) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Block until one of `sources` is ready and return its tag.
///
/// Sources are checked in slice order, so put the most urgent one first. With
/// an empty slice this never completes.
pub async fn select<K: Copy>(sources: &[(K, &dyn EventSource)]) -> K {
    poll_fn(|cx| {
        for (tag, source) in sources {
            if source.poll_ready(cx).is_ready() {
                return Poll::Ready(*tag);
            }
        }
        Poll::Pending
    })
    .await
}

/// Like [`select`], giving up with `None` once `timeout` completes
/// (e.g. `embassy_time::Timer::after(..)`). A source that is ready wins over a
/// timeout that is also ready.
pub async fn select_timeout<K: Copy, T: Future>(
    sources: &[(K, &dyn EventSource)],
    timeout: T,
) -> Option<K> {
    match either(select(sources), timeout).await {
        Either::First(tag) => Some(tag),
        Either::Second(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_futures::yield_now;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Source {
        Urgent,
        Relaxed,
    }

    #[test]
    fn signal_before_wait_is_not_lost() {
        let event = IrqEvent::new();
        event.signal();
        let sources: [(Source, &dyn EventSource); 1] = [(Source::Urgent, &event)];
        assert_eq!(block_on(select(&sources)), Source::Urgent);
        // select only reports; the event is still there for the caller to take
        assert!(event.take());
        assert!(!event.take());
    }

    #[test]
    fn repeated_signals_collapse() {
        let event = IrqEvent::new();
        event.signal();
        event.signal();
        assert!(event.take());
        assert!(!event.is_pending());
    }

    #[test]
    fn one_source_per_call_in_priority_order() {
        let urgent = IrqEvent::new();
        let relaxed = IrqEvent::new();
        relaxed.signal();
        urgent.signal();

        let sources: [(Source, &dyn EventSource); 2] =
            [(Source::Urgent, &urgent), (Source::Relaxed, &relaxed)];

        assert_eq!(block_on(select(&sources)), Source::Urgent);
        urgent.take();
        assert_eq!(block_on(select(&sources)), Source::Relaxed);
        assert!(relaxed.is_pending());
    }

    #[test]
    fn wakes_on_signal_after_wait_started() {
        let urgent = IrqEvent::new();
        let relaxed = IrqEvent::new();
        let sources: [(Source, &dyn EventSource); 2] =
            [(Source::Urgent, &urgent), (Source::Relaxed, &relaxed)];

        let (tag, _) = block_on(join(select(&sources), async {
            yield_now().await;
            yield_now().await;
            relaxed.signal();
        }));
        assert_eq!(tag, Source::Relaxed);
    }

    #[test]
    fn timeout_yields_none() {
        let event = IrqEvent::new();
        let sources: [(Source, &dyn EventSource); 1] = [(Source::Urgent, &event)];
        assert_eq!(block_on(select_timeout(&sources, yield_now())), None);
    }

    #[test]
    fn ready_source_beats_expired_timeout() {
        let event = IrqEvent::new();
        event.signal();
        let sources: [(Source, &dyn EventSource); 1] = [(Source::Urgent, &event)];
        assert_eq!(
            block_on(select_timeout(&sources, core::future::ready(()))),
            Some(Source::Urgent)
        );
    }
}

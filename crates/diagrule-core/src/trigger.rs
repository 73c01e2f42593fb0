//! The trigger seam. A trigger watches its process and pushes a firing into
//! its [`TriggerNotifier`] whenever its condition is met; the pipeline
//! consumes firings one at a time.

use crate::error::Result;
use crate::process::ProcessHandle;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod trigger_types {
    /// Marker trigger: the action list runs once when the rule starts.
    pub const STARTUP: &str = "Startup";
    pub const EVENT_COUNTER: &str = "EventCounter";
    pub const EVENT_METER: &str = "EventMeter";
    pub const CPU_USAGE: &str = "CPUUsage";
    pub const GC_HEAP_SIZE: &str = "GCHeapSize";
    pub const THREADPOOL_QUEUE_LENGTH: &str = "ThreadpoolQueueLength";
    pub const ASPNET_REQUEST_COUNT: &str = "AspNetRequestCount";
    pub const ASPNET_REQUEST_DURATION: &str = "AspNetRequestDuration";
    pub const ASPNET_RESPONSE_STATUS: &str = "AspNetResponseStatus";

    /// Every well-known trigger type except the startup marker.
    pub const EVENT_DRIVEN: &[&str] = &[
        EVENT_COUNTER,
        EVENT_METER,
        CPU_USAGE,
        GC_HEAP_SIZE,
        THREADPOOL_QUEUE_LENGTH,
        ASPNET_REQUEST_COUNT,
        ASPNET_REQUEST_DURATION,
        ASPNET_RESPONSE_STATUS,
    ];
}

// ---------------------------------------------------------------------------
// TriggerNotifier
// ---------------------------------------------------------------------------

/// Sending half of a pipeline's firing channel.
///
/// The channel holds at most one pending firing. Firings that arrive while
/// one is already pending are coalesced into it.
#[derive(Debug, Clone)]
pub struct TriggerNotifier {
    tx: mpsc::Sender<()>,
}

impl TriggerNotifier {
    /// Signal that the trigger condition was met. Returns `false` if the
    /// firing was coalesced or the pipeline is gone.
    pub fn notify(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub(crate) fn channel() -> (TriggerNotifier, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerNotifier { tx }, rx)
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CollectionRuleTrigger: Send {
    /// Begin watching. Returns once the trigger is armed; it may fire
    /// before this returns.
    async fn start(&mut self, cancel: &CancellationToken) -> Result<()>;

    async fn stop(&mut self, cancel: &CancellationToken) -> Result<()>;
}

pub trait TriggerFactory: Send + Sync {
    fn create(
        &self,
        process: &ProcessHandle,
        settings: &serde_json::Value,
        notifier: TriggerNotifier,
    ) -> Result<Box<dyn CollectionRuleTrigger>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_firings_are_coalesced() {
        let (notifier, mut rx) = channel();
        assert!(notifier.notify());
        assert!(!notifier.notify());
        assert_eq!(rx.recv().await, Some(()));
        assert!(rx.try_recv().is_err());
        assert!(notifier.notify());
    }

    #[tokio::test]
    async fn notifier_reports_closed_pipeline() {
        let (notifier, rx) = channel();
        drop(rx);
        assert!(notifier.is_closed());
        assert!(!notifier.notify());
    }
}

//! Pipeline event bus.
//!
//! Lifecycle events for audit jobs, broadcast to any interested consumer
//! (the worker binary relays them to logs; tests assert on them).

use tokio::sync::broadcast;
use uuid::Uuid;

use geolens_core::defaults::EVENT_BUS_CAPACITY;
use geolens_core::JobPhase;

/// Event emitted by the audit pipeline.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    /// A job was claimed and started.
    JobStarted { job_id: Uuid },
    /// A job moved to a new phase.
    PhaseChanged { job_id: Uuid, phase: JobPhase },
    /// A job completed successfully (finalization flip performed).
    JobCompleted { job_id: Uuid },
    /// A job failed terminally.
    JobFailed { job_id: Uuid, error: String },
    /// The monitor flipped a job to completed without reprocessing.
    JobRepaired { job_id: Uuid },
    /// The monitor re-enqueued a stalled job.
    JobRequeued {
        job_id: Uuid,
        resume_from: JobPhase,
        attempt: i32,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
    /// Monitor started.
    MonitorStarted,
    /// Monitor stopped.
    MonitorStopped,
}

/// Broadcast bus for [`AuditEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuditEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Emit an event. Lagging or absent receivers are not an error.
    pub fn emit(&self, event: AuditEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }
}

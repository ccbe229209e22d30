//! Bulk reassignment of a disconnected staff member's customers.
//!
//! Presence changes push the staff id onto an unbounded queue and return
//! immediately. A [`FailoverWorker`] drains the queue and runs the cascade.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crewdesk_core::error::CrewError;
use crewdesk_core::events::{DomainEvent, EventBus};
use crewdesk_core::store::{AssignmentLedger, UserDirectory};

use crate::balancer::ChatBalancer;
use crate::error::ChatError;

/// Sending half of the failover job queue.
#[derive(Clone, Debug)]
pub struct FailoverQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl FailoverQueue {
    /// Queue a cascade for `staff_id`. Fails with `ShuttingDown` once the
    /// worker has dropped its receiver.
    pub fn enqueue(&self, staff_id: Uuid) -> Result<(), CrewError> {
        self.tx.send(staff_id).map_err(|_| CrewError::ShuttingDown)
    }
}

/// Create a failover queue and the receiver a [`FailoverWorker`] consumes.
pub fn failover_channel() -> (FailoverQueue, mpsc::UnboundedReceiver<Uuid>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FailoverQueue { tx }, rx)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reassignment {
    pub customer_id: Uuid,
    pub assignment_id: Uuid,
    pub staff_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedReassignment {
    pub customer_id: Uuid,
    pub reason: String,
}

/// Outcome of one cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailoverReport {
    pub staff_id: Uuid,
    /// The staff member was back online when the job ran; nothing moved.
    pub reconnected: bool,
    pub reassigned: Vec<Reassignment>,
    /// Customers whose assignment had already been moved by someone else.
    pub skipped: Vec<Uuid>,
    pub failed: Vec<FailedReassignment>,
}

pub struct FailoverCascade {
    ledger: Arc<dyn AssignmentLedger>,
    directory: Arc<dyn UserDirectory>,
    balancer: Arc<ChatBalancer>,
    events: EventBus,
}

impl FailoverCascade {
    pub fn new(
        ledger: Arc<dyn AssignmentLedger>,
        directory: Arc<dyn UserDirectory>,
        balancer: Arc<ChatBalancer>,
        events: EventBus,
    ) -> Self {
        Self {
            ledger,
            directory,
            balancer,
            events,
        }
    }

    /// Reassign every active customer of `staff_id` to other online staff.
    ///
    /// Per-customer failures are recorded in the report; the pass always
    /// covers every customer.
    pub fn handle_staff_offline(&self, staff_id: Uuid) -> Result<FailoverReport, ChatError> {
        let mut report = FailoverReport {
            staff_id,
            ..FailoverReport::default()
        };

        let user = self
            .directory
            .get_user(staff_id)?
            .ok_or(ChatError::UserNotFound(staff_id))?;
        if user.online {
            debug!(staff_id = %staff_id, "Staff reconnected before failover ran");
            report.reconnected = true;
            return Ok(report);
        }

        let assignments = self.ledger.active_for_staff(staff_id)?;
        for assignment in &assignments {
            match self.balancer.fail_over(assignment) {
                Ok(Some(moved)) => report.reassigned.push(Reassignment {
                    customer_id: moved.customer_id,
                    assignment_id: moved.id,
                    staff_id: moved.staff_id,
                }),
                Ok(None) => report.skipped.push(assignment.customer_id),
                Err(e) => {
                    warn!(
                        staff_id = %staff_id,
                        customer_id = %assignment.customer_id,
                        error = %e,
                        "Failover reassignment failed"
                    );
                    report.failed.push(FailedReassignment {
                        customer_id: assignment.customer_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            staff_id = %staff_id,
            reassigned = report.reassigned.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Failover cascade finished"
        );
        self.events.publish(DomainEvent::FailoverCompleted {
            staff_id,
            reassigned: report.reassigned.len(),
            skipped: report.skipped.len(),
            failed: report.failed.len(),
            timestamp: Utc::now(),
        });
        Ok(report)
    }
}

/// Background consumer of the failover queue.
pub struct FailoverWorker {
    cascade: Arc<FailoverCascade>,
    jobs: Mutex<mpsc::UnboundedReceiver<Uuid>>,
    shutdown: Arc<Notify>,
}

impl FailoverWorker {
    pub fn new(cascade: Arc<FailoverCascade>, jobs: mpsc::UnboundedReceiver<Uuid>) -> Self {
        Self {
            cascade,
            jobs: Mutex::new(jobs),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Process queued jobs until shutdown or until every queue handle is
    /// dropped.
    pub async fn run(&self) {
        let mut jobs = self.jobs.lock().await;
        info!("Failover worker started");
        loop {
            tokio::select! {
                job = jobs.recv() => match job {
                    Some(staff_id) => {
                        if let Err(e) = self.cascade.handle_staff_offline(staff_id) {
                            warn!(staff_id = %staff_id, error = %e, "Failover cascade failed");
                        }
                    }
                    None => {
                        info!("Failover queue closed");
                        return;
                    }
                },
                _ = self.shutdown.notified() => {
                    info!("Failover worker stopped");
                    return;
                }
            }
        }
    }

    /// Signal the worker to shut down gracefully.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

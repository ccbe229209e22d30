//! Periodic time-driven shift transitions.
//!
//! Starts scheduled shifts at their start time, completes in-progress
//! shifts at their end time, and reports pending shifts that reached their
//! start with nobody bound.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crewdesk_core::events::{DomainEvent, EventBus};
use crewdesk_core::store::ShiftStore;
use crewdesk_core::types::{ShiftRef, ShiftStatus};

use crate::error::ShiftError;
use crate::lifecycle::{evaluate, validate_transition, Evaluation};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub started: Vec<Uuid>,
    pub completed: Vec<Uuid>,
    /// Pending shifts past their start. Listed on every pass that sees them.
    pub late: Vec<ShiftRef>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.completed.is_empty() && self.late.is_empty()
    }
}

/// Background sweeper that advances shifts by the clock.
pub struct ShiftSweeper {
    store: Arc<dyn ShiftStore>,
    events: EventBus,
    interval: Duration,
    /// Late shifts already announced; each is alerted once.
    alerted: Mutex<HashSet<Uuid>>,
    shutdown: Arc<Notify>,
}

impl ShiftSweeper {
    pub fn new(store: Arc<dyn ShiftStore>, events: EventBus, interval: Duration) -> Self {
        Self {
            store,
            events,
            interval,
            alerted: Mutex::new(HashSet::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run one pass against `now`.
    ///
    /// Every step is its own compare-and-set, so a shift moved by someone
    /// else mid-pass is left alone and re-running the pass is a no-op.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, ShiftError> {
        let shifts = self.store.shifts_with_status(&[
            ShiftStatus::PendingAssignment,
            ShiftStatus::Scheduled,
            ShiftStatus::InProgress,
        ])?;

        let mut report = SweepReport::default();
        let mut late_now = HashSet::new();

        for mut shift in shifts {
            loop {
                match evaluate(&shift, now) {
                    Evaluation::Unchanged => break,
                    Evaluation::LateAssignment => {
                        late_now.insert(shift.id);
                        report.late.push(shift.to_ref());
                        if self.mark_alerted(shift.id) {
                            warn!(shift_id = %shift.id, start = %shift.window.start(), "Shift reached start without assignment");
                            self.events.publish(DomainEvent::ShiftLateAssignment {
                                shift_id: shift.id,
                                start: shift.window.start(),
                                timestamp: now,
                            });
                        }
                        break;
                    }
                    Evaluation::Advance(to) => {
                        let from = shift.status;
                        validate_transition(from, to)?;
                        match self.store.transition_status(shift.id, from, to) {
                            Ok(true) => {
                                info!(shift_id = %shift.id, from = %from, to = %to, "Shift advanced");
                                self.events.publish(DomainEvent::ShiftStatusChanged {
                                    shift_id: shift.id,
                                    from,
                                    to,
                                    timestamp: now,
                                });
                                match to {
                                    ShiftStatus::InProgress => report.started.push(shift.id),
                                    ShiftStatus::Completed => report.completed.push(shift.id),
                                    _ => {}
                                }
                                shift.status = to;
                            }
                            Ok(false) => {
                                debug!(shift_id = %shift.id, "Shift changed concurrently, skipping");
                                break;
                            }
                            Err(e) => {
                                warn!(shift_id = %shift.id, error = %e, "Shift transition failed");
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.forget_resolved(&late_now);
        Ok(report)
    }

    /// Start the sweep loop. Returns on shutdown signal.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Shift sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()) {
                        Ok(report) if !report.is_empty() => {
                            info!(
                                started = report.started.len(),
                                completed = report.completed.len(),
                                late = report.late.len(),
                                "Sweep pass finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Sweep pass failed"),
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shift sweeper stopped");
                    return;
                }
            }
        }
    }

    /// Signal the sweeper to shut down gracefully.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    fn mark_alerted(&self, id: Uuid) -> bool {
        match self.alerted.lock() {
            Ok(mut alerted) => alerted.insert(id),
            Err(poisoned) => poisoned.into_inner().insert(id),
        }
    }

    /// Drop alert records for shifts no longer late (assigned, cancelled
    /// or deleted).
    fn forget_resolved(&self, still_late: &HashSet<Uuid>) {
        let mut alerted = match self.alerted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        alerted.retain(|id| still_late.contains(id));
    }
}

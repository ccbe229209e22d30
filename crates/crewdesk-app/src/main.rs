//! CrewDesk application binary - composition root.
//!
//! Ties together the CrewDesk crates into a single executable:
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing and the SQLite database
//! 3. Build the scheduling and chat engines over the SQLite repositories
//! 4. Run the requested command (serve, one-off sweep, conflict query)

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast;

use crewdesk_chat::{failover_channel, ChatBalancer, FailoverCascade, FailoverWorker, PresenceTracker};
use crewdesk_core::config::{ConfigSource, CrewConfig};
use crewdesk_core::error::CrewError;
use crewdesk_core::events::{DomainEvent, EventBus};
use crewdesk_core::store::UserDirectory;
use crewdesk_core::types::TimeWindow;
use crewdesk_shift::{ConflictChecker, ShiftSweeper};
use crewdesk_storage::{AssignmentRepository, Database, ShiftRepository, UserRepository};

use crate::cli::{CliArgs, Command};

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Log every domain event until the bus closes.
async fn event_log_loop(mut rx: broadcast::Receiver<DomainEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(payload) => tracing::info!(event = event.event_name(), %payload, "Domain event"),
                Err(e) => tracing::warn!(event = event.event_name(), error = %e, "Unserializable event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Mark every staff member still flagged online as offline.
///
/// No session survives a restart. Their customers are queued for failover.
fn clear_stale_presence(
    users: &dyn UserDirectory,
    presence: &PresenceTracker,
) -> Result<usize, CrewError> {
    let mut cleared = 0;
    for user in users.online_staff()? {
        match presence.set_offline(user.id) {
            Ok(true) => cleared += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(user_id = %user.id, error = %e, "Failed to clear stale presence"),
        }
    }
    Ok(cleared)
}

fn log_config_source(path: &Path, source: &ConfigSource) {
    match source {
        ConfigSource::File => tracing::info!(path = %path.display(), "Configuration loaded"),
        ConfigSource::Missing => {
            tracing::info!(path = %path.display(), "No configuration file, using defaults")
        }
        ConfigSource::Rejected(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Configuration rejected, using defaults"
        ),
    }
}

struct Stores {
    users: Arc<UserRepository>,
    shifts: Arc<ShiftRepository>,
    ledger: Arc<AssignmentRepository>,
}

async fn serve(
    config: &CrewConfig,
    stores: Stores,
    events: EventBus,
) -> Result<(), Box<dyn std::error::Error>> {
    let sweeper = Arc::new(ShiftSweeper::new(
        stores.shifts.clone(),
        events.clone(),
        Duration::from_secs(config.scheduling.sweep_interval_secs),
    ));

    let balancer = Arc::new(
        ChatBalancer::new(stores.ledger.clone(), stores.users.clone(), events.clone())
            .with_ceiling(config.chat.max_active_per_staff),
    );
    let cascade = Arc::new(FailoverCascade::new(
        stores.ledger.clone(),
        stores.users.clone(),
        Arc::clone(&balancer),
        events.clone(),
    ));
    let (queue, jobs) = failover_channel();
    let worker = Arc::new(FailoverWorker::new(cascade, jobs));
    let presence = PresenceTracker::new(stores.users.clone(), events.clone()).with_failover(queue);

    let logger = tokio::spawn(event_log_loop(events.subscribe()));

    // Every stale flag is cleared before the worker starts, so no cascade
    // can move customers onto staff who are about to be cleared too.
    let cleared = clear_stale_presence(stores.users.as_ref(), &presence)?;
    if cleared > 0 {
        tracing::info!(cleared, "Cleared stale staff presence");
    }

    let sweep_task = {
        let sweeper = Arc::clone(&sweeper);
        tokio::spawn(async move { sweeper.run().await })
    };
    let worker_task = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run().await })
    };

    match balancer.staff_load() {
        Ok(load) => tracing::info!(online_staff = load.len(), "Chat balancer ready"),
        Err(e) => tracing::warn!(error = %e, "Failed to read staff load"),
    }

    tracing::info!("CrewDesk running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    sweeper.shutdown();
    worker.shutdown();
    if let Err(e) = sweep_task.await {
        tracing::warn!(error = %e, "Sweeper task ended abnormally");
    }
    if let Err(e) = worker_task.await {
        tracing::warn!(error = %e, "Failover task ended abnormally");
    }
    logger.abort();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. The file may set the log level, so it is read before tracing
    // is up and its outcome logged afterwards.
    let config_file = args.resolve_config_path();
    let (mut config, config_source) = CrewConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(secs) = args.sweep_interval {
        config.scheduling.sweep_interval_secs = secs;
    }
    let log_level = args
        .resolve_log_level()
        .unwrap_or_else(|| config.general.log_level.clone());

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting CrewDesk v{}", env!("CARGO_PKG_VERSION"));
    log_config_source(&config_file, &config_source);
    config.validate()?;

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join(&config.storage.db_file);
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let stores = Stores {
        users: Arc::new(UserRepository::new(Arc::clone(&db))),
        shifts: Arc::new(ShiftRepository::new(Arc::clone(&db))),
        ledger: Arc::new(AssignmentRepository::new(Arc::clone(&db))),
    };
    let events = EventBus::new(config.chat.event_buffer);

    match args.command() {
        Command::Serve => serve(&config, stores, events).await?,
        Command::Sweep => {
            let sweeper = ShiftSweeper::new(
                stores.shifts,
                events,
                Duration::from_secs(config.scheduling.sweep_interval_secs),
            );
            let report = sweeper.sweep_once(Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Conflicts {
            technician,
            start,
            end,
            exclude,
        } => {
            let window = TimeWindow::new(start, end)?;
            let checker = ConflictChecker::new(stores.shifts);
            let conflicts = checker.conflicts(technician, &window, exclude)?;
            println!("{}", serde_json::to_string_pretty(&conflicts)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewdesk_core::store::AssignmentLedger;
    use crewdesk_core::types::{ChatAssignment, Role, User};
    use crewdesk_storage::{MemoryAssignmentLedger, MemoryDirectory};

    fn online(directory: &MemoryDirectory, role: Role) -> uuid::Uuid {
        let mut user = User::new("U", role);
        user.online = true;
        let id = user.id;
        directory.insert(user).unwrap();
        id
    }

    #[tokio::test]
    async fn test_stale_presence_cleared_before_failover_runs() {
        let directory = Arc::new(MemoryDirectory::new());
        let ledger = Arc::new(MemoryAssignmentLedger::new());
        let events = EventBus::new(64);
        let s1 = online(&directory, Role::Staff);
        let s2 = online(&directory, Role::Admin);
        let customers: Vec<_> = [s1, s1, s2]
            .iter()
            .map(|&staff| {
                let customer = online(&directory, Role::Customer);
                ledger
                    .insert_active(&ChatAssignment::new(customer, staff, None))
                    .unwrap();
                customer
            })
            .collect();

        let balancer = Arc::new(ChatBalancer::new(
            ledger.clone(),
            directory.clone(),
            events.clone(),
        ));
        let cascade = Arc::new(FailoverCascade::new(
            ledger.clone(),
            directory.clone(),
            balancer,
            events.clone(),
        ));
        let (queue, jobs) = failover_channel();
        let worker = FailoverWorker::new(cascade, jobs);
        let presence = PresenceTracker::new(directory.clone(), events).with_failover(queue);

        assert_eq!(clear_stale_presence(directory.as_ref(), &presence).unwrap(), 2);
        assert!(directory.online_staff().unwrap().is_empty());
        // Customers stay online; only staff flags are stale.
        assert!(presence.is_online(customers[0]).unwrap());

        drop(presence);
        tokio::time::timeout(Duration::from_secs(2), worker.run())
            .await
            .expect("worker should exit once the queue closes");

        // Nobody was left online, so no customer bounced between staff.
        for customer in customers {
            assert_eq!(ledger.history(customer).unwrap().len(), 1);
        }
        assert_eq!(ledger.active_for_staff(s1).unwrap().len(), 2);
        assert_eq!(ledger.active_for_staff(s2).unwrap().len(), 1);
    }

    #[test]
    fn test_clear_stale_presence_is_noop_when_nobody_online() {
        let directory = Arc::new(MemoryDirectory::new());
        let presence = PresenceTracker::new(directory.clone(), EventBus::new(8));
        assert_eq!(clear_stale_presence(directory.as_ref(), &presence).unwrap(), 0);
    }
}

//! Chat assignment scenarios over the SQLite store.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use crewdesk_chat::{
    failover_channel, ChatBalancer, FailoverCascade, FailoverWorker, PresenceTracker,
};
use crewdesk_core::events::{DomainEvent, EventBus};
use crewdesk_core::store::{AssignmentLedger, UserDirectory};
use crewdesk_core::types::{ChatAssignment, Role, User};
use crewdesk_storage::{AssignmentRepository, Database, UserRepository};

struct Desk {
    users: Arc<UserRepository>,
    ledger: Arc<AssignmentRepository>,
    events: EventBus,
    balancer: Arc<ChatBalancer>,
}

impl Desk {
    fn open(db: Arc<Database>) -> Self {
        let users = Arc::new(UserRepository::new(db.clone()));
        let ledger = Arc::new(AssignmentRepository::new(db));
        let events = EventBus::new(256);
        let balancer = Arc::new(ChatBalancer::new(
            ledger.clone(),
            users.clone(),
            events.clone(),
        ));
        Self {
            users,
            ledger,
            events,
            balancer,
        }
    }

    fn user(&self, name: &str, role: Role, online: bool) -> Uuid {
        let mut user = User::new(name, role);
        user.online = online;
        self.users.upsert(&user).unwrap();
        user.id
    }

    fn give(&self, staff: Uuid, count: usize) {
        for i in 0..count {
            let customer = self.user(&format!("customer-{}", i), Role::Customer, true);
            self.ledger
                .insert_active(&ChatAssignment::new(customer, staff, None))
                .unwrap();
        }
    }
}

#[test]
fn least_loaded_online_staff_gets_new_customer() {
    let desk = Desk::open(Arc::new(Database::in_memory().unwrap()));
    let s1 = desk.user("S1", Role::Staff, true);
    let s2 = desk.user("S2", Role::Staff, true);
    desk.give(s2, 2);
    let customer = desk.user("C", Role::Customer, true);

    let assignment = desk.balancer.ensure_assigned(customer).unwrap();
    assert_eq!(assignment.staff_id, s1);

    let again = desk.balancer.ensure_assigned(customer).unwrap();
    assert_eq!(again.id, assignment.id);
    assert_eq!(desk.ledger.history(customer).unwrap().len(), 1);
}

#[tokio::test]
async fn disconnect_moves_every_customer_to_remaining_staff() {
    let desk = Desk::open(Arc::new(Database::in_memory().unwrap()));
    let s1 = desk.user("S1", Role::Staff, true);
    let s2 = desk.user("S2", Role::Staff, true);
    desk.give(s1, 3);

    let (queue, jobs) = failover_channel();
    let cascade = Arc::new(FailoverCascade::new(
        desk.ledger.clone(),
        desk.users.clone(),
        desk.balancer.clone(),
        desk.events.clone(),
    ));
    let worker = Arc::new(FailoverWorker::new(cascade, jobs));
    let presence =
        PresenceTracker::new(desk.users.clone(), desk.events.clone()).with_failover(queue);

    let mut events = desk.events.subscribe();
    let handle = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run().await })
    };

    assert!(presence.set_offline(s1).unwrap());
    assert!(!presence.is_online(s1).unwrap());

    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(DomainEvent::FailoverCompleted {
                    reassigned, failed, ..
                }) => return (reassigned, failed),
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("failover should complete");
    assert_eq!(completed, (3, 0));

    assert!(desk.ledger.active_for_staff(s1).unwrap().is_empty());
    assert_eq!(desk.ledger.active_for_staff(s2).unwrap().len(), 3);

    worker.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should stop")
        .unwrap();
}

#[test]
fn failover_with_nobody_online_leaves_rows_in_place() {
    let desk = Desk::open(Arc::new(Database::in_memory().unwrap()));
    let s1 = desk.user("S1", Role::Staff, false);
    desk.give(s1, 2);
    let cascade = FailoverCascade::new(
        desk.ledger.clone(),
        desk.users.clone(),
        desk.balancer.clone(),
        desk.events.clone(),
    );

    let report = cascade.handle_staff_offline(s1).unwrap();
    assert_eq!(report.failed.len(), 2);
    assert_eq!(desk.ledger.active_for_staff(s1).unwrap().len(), 2);
}

#[test]
fn concurrent_ensure_assigned_creates_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(&dir.path().join("desk.db")).unwrap());
    let desk = Arc::new(Desk::open(db));
    for name in ["S1", "S2", "S3"] {
        desk.user(name, Role::Staff, true);
    }
    let customer = desk.user("C", Role::Customer, true);

    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let desk = Arc::clone(&desk);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                desk.balancer.ensure_assigned(customer).unwrap()
            })
        })
        .collect();

    let results: Vec<ChatAssignment> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first = results[0].id;
    assert!(results.iter().all(|a| a.id == first));

    let history = desk.ledger.history(customer).unwrap();
    assert_eq!(history.len(), 1);
    assert!(desk.ledger.active_for_customer(customer).unwrap().is_some());
}

#[test]
fn presence_flag_round_trips_through_directory() {
    let desk = Desk::open(Arc::new(Database::in_memory().unwrap()));
    let staff = desk.user("S1", Role::Staff, false);
    let presence = PresenceTracker::new(desk.users.clone(), desk.events.clone());

    assert!(presence.set_online(staff).unwrap());
    assert_eq!(desk.users.online_staff().unwrap().len(), 1);
    assert!(presence.set_offline(staff).unwrap());
    assert!(desk.users.online_staff().unwrap().is_empty());
}

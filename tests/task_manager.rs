use curio::tasks::{FnTask, SearchTask, SingleFlight};
use curio::{Database, FilterCriteria, TaskContext, TaskEvent, TaskManager, TaskOutput};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Reports progress in small steps until cancelled, never reaching 100%.
fn endless(started: mpsc::Sender<()>) -> impl curio::Task {
    FnTask::new("endless", move |ctx: &TaskContext| {
        let _ = started.send(());
        let mut step = 0;
        while !ctx.is_cancelled() {
            step = (step + 1) % 99;
            ctx.report(step as u8, "working", step, 100);
            thread::sleep(Duration::from_millis(1));
        }
        Ok(TaskOutput::Message("stopped".into()))
    })
}

#[test]
fn second_start_with_same_id_is_rejected() {
    let manager = TaskManager::with_timings(Duration::from_millis(50), WAIT);
    let (tx, started) = mpsc::channel();

    assert!(manager.start("A", endless(tx.clone())));
    started.recv_timeout(WAIT).unwrap();
    assert!(!manager.start("A", endless(tx)));
    assert_eq!(manager.active_count(), 1);

    manager.cancel_all();
    assert!(manager.wait_for_all(WAIT));
}

#[test]
fn cancelled_task_never_completes() {
    let manager = TaskManager::with_timings(Duration::from_millis(5), Duration::from_secs(2));
    let events = manager.subscribe();
    let (tx, started) = mpsc::channel();

    manager.start("job", endless(tx));
    started.recv_timeout(WAIT).unwrap();
    thread::sleep(Duration::from_millis(20));

    let begin = Instant::now();
    assert!(manager.cancel("job"));
    assert!(begin.elapsed() <= Duration::from_secs(3));
    assert!(!manager.is_active("job"));

    // Give a late completion every chance to show up.
    thread::sleep(Duration::from_millis(50));
    let events: Vec<TaskEvent> = events.try_iter().collect();
    assert!(!events.iter().any(|e| matches!(e, TaskEvent::Completed { .. })));
    assert!(events.iter().any(|e| matches!(e, TaskEvent::Canceled { .. })));
    assert!(matches!(events.last(), Some(TaskEvent::AllFinished)));
}

#[test]
fn search_runs_through_the_manager() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_initialized(&dir.path().join("curio.db")).unwrap();

    let manager = TaskManager::default();
    let events = manager.subscribe();
    let flight = SingleFlight::new(manager.clone());

    let id = flight
        .start("search", SearchTask::new(db, FilterCriteria::new()))
        .unwrap();
    assert!(manager.wait_for_all(WAIT));

    let completed = events
        .try_iter()
        .find_map(|e| match e {
            TaskEvent::Completed { id: done, output } if done == id => Some(output),
            _ => None,
        })
        .unwrap();
    assert!(matches!(completed.as_ref(), TaskOutput::Search { count: 0, .. }));
}

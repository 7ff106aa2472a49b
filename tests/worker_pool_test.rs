//! Integration tests for the worker and drudger pools.
//!
//! These tests drive real threads against mock collaborators:
//! - Full CONF -> READ -> SIGN pipeline with inline signing
//! - Signing fanned out to drudgers
//! - Backoff on step failure and dropping on hard configuration errors
//! - Interrupts delivered to an in-flight task
//! - Halted steps resumed or dropped after a pre-empting step
//! - Removed zones and graceful shutdown

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use signerd::core::{
    AdapterStatus, Collaborators, DnsClass, EngineSignal, HandoffQueue, Scheduler, SignConf, SignConfLoader,
    SignConfStatus, SignJob, Signer, StepError, Task, TaskKind, WorkerContext, WorkerPool, Zone, ZoneAdapter,
    ZoneState, ZoneStatus,
};
use signerd::util::now_secs;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn zone(name: &str) -> Arc<Zone> {
    Arc::new(Zone::new(name, DnsClass::IN, ZoneState::default()))
}

struct Fixture {
    scheduler: Arc<Scheduler>,
    pool: WorkerPool,
    notify_rx: Receiver<EngineSignal>,
}

fn start_pool(workers: usize, drudgers: usize, collab: Collaborators) -> Fixture {
    let (notify, notify_rx) = crossbeam_channel::unbounded();
    let scheduler = Arc::new(Scheduler::new());
    let mut pool = WorkerPool::new(workers, drudgers);
    pool.start(WorkerContext {
        scheduler: Arc::clone(&scheduler),
        queue: Arc::new(HandoffQueue::new(16, 1)),
        collab,
        max_backoff_secs: 3600,
        notify,
        reloading: Arc::new(AtomicBool::new(false)),
    })
    .expect("pool starts");
    Fixture {
        scheduler,
        pool,
        notify_rx,
    }
}

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// Adapter producing a two-name zone, optionally failing every read.
#[derive(Default)]
struct MockAdapter {
    fail_reads: bool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl ZoneAdapter for MockAdapter {
    fn read(&self, zone: &Zone, state: &mut ZoneState) -> Result<AdapterStatus, StepError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(StepError::Adapter("input missing".into()));
        }
        state.db.names = BTreeSet::from([zone.name().to_owned(), format!("www.{}", zone.name())]);
        state.db.inbound_serial = Some(7);
        Ok(AdapterStatus::Ok)
    }

    fn write(&self, _zone: &Zone, _state: &mut ZoneState) -> Result<AdapterStatus, StepError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(AdapterStatus::Ok)
    }
}

/// Adapter whose read blocks until the test opens the gate.
struct GatedAdapter {
    entered: Sender<()>,
    gate: Receiver<()>,
}

impl ZoneAdapter for GatedAdapter {
    fn read(&self, zone: &Zone, state: &mut ZoneState) -> Result<AdapterStatus, StepError> {
        let _ = self.entered.send(());
        let _ = self.gate.recv_timeout(Duration::from_secs(5));
        state.db.names = BTreeSet::from([zone.name().to_owned()]);
        state.db.inbound_serial = Some(1);
        Ok(AdapterStatus::Ok)
    }

    fn write(&self, _zone: &Zone, _state: &mut ZoneState) -> Result<AdapterStatus, StepError> {
        Ok(AdapterStatus::Ok)
    }
}

/// Loader that reloads once and is unchanged afterwards, or always fails.
#[derive(Default)]
struct MockLoader {
    fail: bool,
    calls: AtomicUsize,
}

impl SignConfLoader for MockLoader {
    fn update(&self, _zone: &Zone, state: &ZoneState) -> Result<SignConfStatus, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StepError::SignConf("no such file".into()));
        }
        if state.signconf.is_some() {
            return Ok(SignConfStatus::Unchanged);
        }
        Ok(SignConfStatus::Reloaded(SignConf {
            resign_secs: 3600,
            ..SignConf::default()
        }))
    }
}

#[derive(Default)]
struct CountingSigner {
    signed: AtomicU64,
}

impl Signer for CountingSigner {
    fn sign(&self, _job: &SignJob) -> Result<(), StepError> {
        std::thread::sleep(Duration::from_millis(1));
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

#[test]
fn zone_goes_through_pipeline_with_inline_signing() {
    let adapter = Arc::new(MockAdapter::default());
    let loader = Arc::new(MockLoader::default());
    let signer = Arc::new(CountingSigner::default());
    let collab = Collaborators::new(adapter.clone(), loader.clone(), signer.clone());
    let fixture = start_pool(1, 0, collab);

    let z = zone("example.com");
    let start = now_secs();
    fixture.scheduler.schedule(Task::new(Arc::clone(&z), TaskKind::Conf, start)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || z.lock().db.outbound_serial == Some(7)));
    assert!(wait_until(Duration::from_secs(5), || fixture.scheduler.len() == 1));

    let tasks = fixture.scheduler.snapshot();
    assert_eq!(tasks[0].what, TaskKind::Sign);
    assert!(tasks[0].when >= start + 3600);
    assert_eq!(tasks[0].backoff, 0);
    assert_eq!(signer.signed.load(Ordering::SeqCst), 2);
    assert_eq!(z.lock().db.signatures, 2);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.writes.load(Ordering::SeqCst), 1);

    let stats = fixture.pool.stats();
    assert_eq!(stats.tasks_performed, 3);
    assert_eq!(stats.signatures, 2);
    fixture.pool.shutdown();
}

#[test]
fn drudgers_sign_handed_off_jobs() {
    let signer = Arc::new(CountingSigner::default());
    let collab = Collaborators::new(
        Arc::new(MockAdapter::default()),
        Arc::new(MockLoader::default()),
        signer.clone(),
    );
    let fixture = start_pool(2, 3, collab);

    let zones: Vec<_> = ["a.example", "b.example", "c.example"].into_iter().map(zone).collect();
    for z in &zones {
        fixture.scheduler.schedule(Task::new(Arc::clone(z), TaskKind::Conf, now_secs())).unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || {
        zones.iter().all(|z| z.lock().db.outbound_serial.is_some())
    }));
    assert_eq!(signer.signed.load(Ordering::SeqCst), 6);
    let stats = fixture.pool.stats();
    assert_eq!(stats.drudger_count, 3);
    assert_eq!(stats.signatures, 6);
    assert_eq!(stats.signatures_failed, 0);
    fixture.pool.shutdown();
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
fn failing_read_backs_off() {
    let adapter = Arc::new(MockAdapter {
        fail_reads: true,
        ..MockAdapter::default()
    });
    let collab = Collaborators::new(adapter.clone(), Arc::new(MockLoader::default()), Arc::new(CountingSigner::default()));
    let fixture = start_pool(1, 0, collab);

    let start = now_secs();
    fixture.scheduler.schedule(Task::new(zone("broken.example"), TaskKind::Conf, start)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        fixture.scheduler.snapshot().first().is_some_and(|t| t.backoff > 0)
    }));
    let task = &fixture.scheduler.snapshot()[0];
    assert_eq!(task.what, TaskKind::Read);
    assert_eq!(task.backoff, 60);
    assert!(task.when >= start + 60);
    assert_eq!(adapter.reads.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.pool.stats().tasks_failed, 1);
    fixture.pool.shutdown();
}

#[test]
fn configuration_error_without_configuration_drops_task() {
    let loader = Arc::new(MockLoader {
        fail: true,
        ..MockLoader::default()
    });
    let collab = Collaborators::new(Arc::new(MockAdapter::default()), loader.clone(), Arc::new(CountingSigner::default()));
    let fixture = start_pool(1, 0, collab);

    let z = zone("unconfigured.example");
    fixture.scheduler.schedule(Task::new(Arc::clone(&z), TaskKind::Conf, now_secs())).unwrap();

    assert!(wait_until(Duration::from_secs(5), || fixture.pool.stats().tasks_failed == 1));
    assert!(wait_until(Duration::from_secs(5), || !fixture.scheduler.lock().has_task(z.key())));
    assert!(fixture.scheduler.is_empty());
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    fixture.pool.shutdown();
}

// ============================================================================
// INTERRUPTS AND REMOVAL
// ============================================================================

#[test]
fn interrupt_received_in_flight_runs_next() {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
    let loader = Arc::new(MockLoader::default());
    let collab = Collaborators::new(
        Arc::new(GatedAdapter {
            entered: entered_tx,
            gate: gate_rx,
        }),
        loader.clone(),
        Arc::new(CountingSigner::default()),
    );
    let fixture = start_pool(1, 0, collab);

    let z = zone("busy.example");
    fixture.scheduler.schedule(Task::new(Arc::clone(&z), TaskKind::Conf, now_secs())).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).expect("read step started");

    // the task is in flight: the request is recorded, not lost
    assert!(fixture.scheduler.lock().is_in_flight(z.key()));
    fixture.scheduler.reschedule(z.key(), TaskKind::Conf, now_secs()).unwrap();
    gate_tx.send(()).unwrap();

    assert!(wait_until(Duration::from_secs(5), || loader.calls.load(Ordering::SeqCst) == 2));
    assert!(wait_until(Duration::from_secs(5), || z.lock().db.outbound_serial == Some(1)));
    fixture.pool.shutdown();
}

/// A zone that has been configured and read, with its resign due far ahead.
fn signed_zone(name: &str, resign_at: u64) -> (Arc<Zone>, Task) {
    let z = zone(name);
    {
        let mut state = z.lock();
        state.signconf = Some(SignConf {
            resign_secs: 3600,
            ..SignConf::default()
        });
        state.db.names = BTreeSet::from([name.to_owned()]);
        state.db.inbound_serial = Some(7);
    }
    let task = Task::new(Arc::clone(&z), TaskKind::Sign, resign_at);
    (z, task)
}

#[test]
fn unchanged_configuration_resumes_halted_sign() {
    let adapter = Arc::new(MockAdapter::default());
    let loader = Arc::new(MockLoader::default());
    let signer = Arc::new(CountingSigner::default());
    let collab = Collaborators::new(adapter.clone(), loader.clone(), signer.clone());
    let fixture = start_pool(1, 0, collab);

    let due = now_secs() + 5000;
    let (z, task) = signed_zone("resume.example", due);
    fixture.scheduler.schedule(task).unwrap();
    fixture.scheduler.reschedule(z.key(), TaskKind::Conf, now_secs()).unwrap();

    assert!(wait_until(Duration::from_secs(5), || loader.calls.load(Ordering::SeqCst) == 1));
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.scheduler.snapshot().first().is_some_and(|t| t.what == TaskKind::Sign)
    }));
    let tasks = fixture.scheduler.snapshot();
    assert_eq!(tasks[0].when, due);
    assert_eq!(tasks[0].halted, None);
    assert_eq!(adapter.reads.load(Ordering::SeqCst), 0);
    assert_eq!(signer.signed.load(Ordering::SeqCst), 0);
    fixture.pool.shutdown();
}

#[test]
fn read_ahead_of_halted_sign_signs_now() {
    let adapter = Arc::new(MockAdapter::default());
    let loader = Arc::new(MockLoader::default());
    let signer = Arc::new(CountingSigner::default());
    let collab = Collaborators::new(adapter.clone(), loader, signer.clone());
    let fixture = start_pool(1, 0, collab);

    let start = now_secs();
    let (z, task) = signed_zone("resign.example", start + 5000);
    fixture.scheduler.schedule(task).unwrap();
    fixture.scheduler.reschedule(z.key(), TaskKind::Read, start).unwrap();
    fixture.scheduler.flush_zone(z.key()).unwrap();

    // READ hands off to SIGN now instead of the displaced resign time
    assert!(wait_until(Duration::from_secs(5), || signer.signed.load(Ordering::SeqCst) == 2));
    assert_eq!(adapter.reads.load(Ordering::SeqCst), 1);
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.scheduler.snapshot().first().is_some_and(|t| t.when >= start + 3600)
    }));
    let tasks = fixture.scheduler.snapshot();
    assert_eq!(tasks[0].what, TaskKind::Sign);
    assert!(tasks[0].when < start + 5000);
    assert_eq!(tasks[0].halted, None);
    fixture.pool.shutdown();
}

#[test]
fn removed_zone_task_is_dropped_and_engine_notified() {
    let collab = Collaborators::new(
        Arc::new(MockAdapter::default()),
        Arc::new(MockLoader::default()),
        Arc::new(CountingSigner::default()),
    );
    let fixture = start_pool(1, 0, collab);

    let z = zone("gone.example");
    z.lock().status = ZoneStatus::Removed;
    fixture.scheduler.schedule(Task::new(Arc::clone(&z), TaskKind::Conf, now_secs())).unwrap();

    let signal = fixture.notify_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(signal, EngineSignal::WorkerIdle);
    assert!(!fixture.scheduler.lock().has_task(z.key()));
    fixture.pool.shutdown();
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn shutdown_wakes_idle_threads_promptly() {
    let collab = Collaborators::new(
        Arc::new(MockAdapter::default()),
        Arc::new(MockLoader::default()),
        Arc::new(CountingSigner::default()),
    );
    let fixture = start_pool(4, 2, collab);
    std::thread::sleep(Duration::from_millis(50));
    assert!(fixture.pool.workers().iter().all(|w| w.is_sleeping()));

    let started = Instant::now();
    fixture.pool.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(fixture.pool.workers().iter().all(|w| w.should_exit()));
    assert!(fixture.pool.drudgers().iter().all(|d| d.should_exit()));
}

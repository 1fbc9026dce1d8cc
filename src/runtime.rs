//! Runtime entrypoint (spec §3/§4.J): `init`/`finalize` own the worker
//! pool and the top-level finish scope; `spawn`/`start_finish`/`end_finish`
//! and friends are free functions that look up "the calling worker" the
//! same way the teacher's `sched::spawn` free functions do, through a
//! thread-local rather than an explicit handle threaded through every
//! call site.

use std::sync::Arc;
use std::time::Instant;

use lazy_static::lazy_static;

use crate::config::Config;
use crate::deque::BoundedDeque;
use crate::errors::Result;
use crate::finish::FinishScope;
use crate::isolation::IsolationMap;
use crate::place::{self, Place};
use crate::task::Job;
use crate::worker::{self, Scheduler, WorkerThread};

lazy_static! {
    static ref ISOLATION: IsolationMap<usize> = IsolationMap::new();
}

/// Owns the worker pool, the place tree, and the root finish scope for
/// one `init`/`finalize` session. The master `WorkerThread` lives here
/// (not only on the stack of whoever called `init`) so free functions
/// like `spawn`/`num_workers` can reach it via `WorkerThread::current`
/// for as long as the master thread is the one calling them.
pub struct Runtime {
    scheduler: Arc<Scheduler>,
    handles: Vec<std::thread::JoinHandle<()>>,
    master: Box<WorkerThread>,
    root_finish: Arc<FinishScope>,
    top_level_finish: std::sync::Mutex<Option<Arc<FinishScope>>>,
    started_at: Instant,
    stats_enabled: bool,
}

impl Runtime {
    /// Reads configuration from the environment, builds the place tree
    /// (default single-level, or from `CRT_HPT_FILE`), spawns `N-1`
    /// worker OS threads, and installs the calling thread as worker 0 --
    /// matching the teacher's priming-barrier pool startup, generalized
    /// to this spec's place tree and finish-scope root.
    pub fn init() -> Result<Runtime> {
        let config = Config::from_env()?;

        let (places, num_workers) = if let Some(path) = &config.hpt_file {
            let root = place::load_hierarchy(std::path::Path::new(path))?;
            let mut flat = Vec::new();
            flatten_places(&root, &mut flat);
            let num_workers = flat
                .iter()
                .flat_map(|p| p.worker_ids.iter())
                .max()
                .map(|m| m + 1)
                .unwrap_or(1);
            let places = (0..num_workers)
                .map(|w| {
                    flat.iter()
                        .find(|p| p.worker_ids.contains(&w))
                        .cloned()
                        .unwrap_or_else(|| root.clone())
                })
                .collect();
            (places, num_workers)
        } else {
            let root = Place::single_level(config.workers);
            let places = (0..config.workers).map(|_| root.clone()).collect();
            (places, config.workers)
        };

        let deques: Vec<Arc<BoundedDeque<Job>>> = (0..num_workers)
            .map(|_| Arc::new(BoundedDeque::with_capacity(config.alloc_batch_size)))
            .collect();
        let comm_deque = Arc::new(BoundedDeque::with_capacity(config.alloc_batch_size));

        let scheduler = Scheduler::new(deques, places.clone(), comm_deque);

        let root_finish = FinishScope::root();
        let (master, handles) =
            worker::spawn_pool(scheduler.clone(), places, root_finish.clone(), config.bind_threads);

        let top_level = FinishScope::nested(root_finish.clone());
        master.set_current_finish(top_level.clone());

        Ok(Runtime {
            scheduler,
            handles,
            master,
            root_finish,
            top_level_finish: std::sync::Mutex::new(Some(top_level)),
            started_at: Instant::now(),
            stats_enabled: config.stats,
        })
    }

    /// Ends the top-level finish scope (helper-joining until quiescent,
    /// same as any other `end_finish`), then signals every worker to
    /// stop, joins them, and -- when `CRT_STATS` is set -- logs the
    /// fixed-format stats line.
    pub fn finalize(self) {
        if let Some(top_level) = self.top_level_finish.lock().unwrap().take() {
            self.master.help_until_quiescent(&top_level);
            self.root_finish.check_out();
        }

        self.scheduler.shutdown();
        for handle in self.handles {
            let _ = handle.join();
        }

        if self.stats_enabled {
            log::info!("{}", self.scheduler.stats.report(self.started_at));
        }
    }

    pub fn master(&self) -> &WorkerThread {
        &self.master
    }

    pub fn num_workers(&self) -> usize {
        self.scheduler.num_workers()
    }
}

fn flatten_places(place: &Arc<Place>, out: &mut Vec<Arc<Place>>) {
    out.push(place.clone());
    for child in &place.children {
        flatten_places(child, out);
    }
}

fn current_worker() -> &'static WorkerThread {
    let ptr = WorkerThread::current();
    assert!(
        !ptr.is_null(),
        "runtime call made from a thread that is not a worker; call this from inside init()'s \
         caller thread or a spawned task"
    );
    unsafe { &*ptr }
}

/// Creates a new finish scope nested under the calling worker's current
/// one and makes it current (spec §4.D).
pub fn start_finish() -> Arc<FinishScope> {
    let worker = current_worker();
    let child = FinishScope::nested(worker.current_finish());
    worker.set_current_finish(child.clone());
    child
}

/// Helper-joins until the calling worker's current scope is quiescent,
/// then pops back to its parent (spec §4.D). Panics if called with no
/// parent scope (i.e. outside any `start_finish`/`finish`).
pub fn end_finish() {
    let worker = current_worker();
    let scope = worker.current_finish();
    worker.help_until_quiescent(&scope);
    let parent = scope
        .parent
        .clone()
        .expect("end_finish called without a matching start_finish");
    parent.check_out();
    worker.set_current_finish(parent);
}

/// `start_finish(); lambda(); end_finish();` as a single call, matching
/// the teacher's `Scope::scope`-style bracketing helper.
pub fn finish<F: FnOnce()>(lambda: F) {
    start_finish();
    lambda();
    end_finish();
}

/// Spawns `body` into the calling worker's local deque under its current
/// finish scope (spec §4.D: "`spawn(task)` increments the current scope's
/// counter before enqueue").
pub fn spawn<F>(body: F)
where
    F: FnOnce() + Send + 'static,
{
    let worker = current_worker();
    let scope = worker.current_finish();
    scope.check_in();
    worker.push(Job::new(scope, body));
}

/// Spawns `body` onto the master's dedicated communication deque (spec
/// §4.C). Only the master ever drains it, so `body` will run on worker 0.
pub fn spawn_comm<F>(body: F)
where
    F: FnOnce() + Send + 'static,
{
    let worker = current_worker();
    let scope = worker.current_finish();
    scope.check_in();
    worker.push_comm(Job::new(scope, body));
}

/// Spawns `body` so that any worker may eventually pick it up by
/// stealing, matching the original's `spawn_asyncAnyTask`: the task still
/// lands on the *calling* worker's own deque (`rt_schedule_async(task, 0)`
/// always schedules locally), it's only "any" from the perspective of
/// which worker ends up running it once other workers start stealing.
/// `BoundedDeque` is single-producer at the bottom -- pushing onto another
/// worker's deque from here would race that worker's own push/pop.
pub fn spawn_async_any<F>(body: F)
where
    F: FnOnce() + Send + 'static,
{
    let worker = current_worker();
    let scope = worker.current_finish();
    scope.check_in();
    worker.push(Job::new(scope, body));
}

/// Number of workers in the running pool.
pub fn num_workers() -> usize {
    current_worker().scheduler.num_workers()
}

/// The calling worker's own id.
pub fn current_worker_id() -> usize {
    current_worker().id
}

/// Sum of tasks sitting in every worker's local deque -- the pool of work
/// currently "available to any" stealer (spec introspection surface).
pub fn total_async_any_available() -> usize {
    current_worker()
        .scheduler
        .deques
        .iter()
        .map(|d| d.len())
        .sum()
}

/// Tasks sitting in the calling worker's own local deque.
pub fn total_pending_local_asyncs() -> usize {
    current_worker().scheduler.deques[current_worker_id()].len()
}

pub fn enable_isolation(addr: usize) {
    ISOLATION.enable_isolation(addr);
}

pub fn enable_isolation_1d<I: IntoIterator<Item = usize>>(addrs: I) {
    ISOLATION.enable_isolation_1d(addrs);
}

pub fn enable_isolation_2d<I: IntoIterator<Item = usize>>(rows: I) {
    ISOLATION.enable_isolation_2d(rows);
}

pub fn disable_isolation(addr: usize) {
    ISOLATION.disable_isolation(&addr);
}

pub fn disable_isolation_1d<'a, I: IntoIterator<Item = &'a usize>>(addrs: I) {
    ISOLATION.disable_isolation_1d(addrs);
}

pub fn isolated_execution<R>(addrs: &[usize], func: impl FnOnce() -> R) -> R {
    ISOLATION.isolated_execution(addrs, func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[test]
    fn init_and_finalize_round_trip_with_one_worker() {
        std::env::set_var(crate::config::ENV_WORKERS, "1");
        let runtime = Runtime::init().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            finish(move || {
                for _ in 0..10 {
                    let counter = counter.clone();
                    spawn(move || {
                        counter.fetch_add(1, AtomicOrdering::SeqCst);
                    });
                }
            });
        }
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 10);

        runtime.finalize();
        std::env::remove_var(crate::config::ENV_WORKERS);
    }
}

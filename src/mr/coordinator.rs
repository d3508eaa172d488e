use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{ready, Ready};
use tarpc::context;
use tokio::time::Instant;
use uuid::Uuid;

use crate::mr::rpc::{Output, Task, TaskKind, TaskRequest};

/// Default lease timeout: how long a worker may hold a task before the
/// coordinator gives up on it and hands it to someone else.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// The job's two sequential stages. Advances exactly once, map -> reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Map,
    Reduce,
}

/// Coordinator-side state for one planned task. Lives for the process
/// lifetime once created; `done` is monotonic false -> true.
#[derive(Debug, Clone)]
struct TaskRecord {
    task_id: String,
    kind: TaskKind,
    file_name: String,
    bucket_id: usize,
    assigned_worker: Option<String>,
    lease_start: Option<Instant>,
    done: bool,
}

impl TaskRecord {
    fn new_map(task_id: String, file_name: String) -> Self {
        Self {
            task_id,
            kind: TaskKind::Map,
            file_name,
            bucket_id: 0,
            assigned_worker: None,
            lease_start: None,
            done: false,
        }
    }

    fn new_reduce(task_id: String, bucket_id: usize) -> Self {
        Self {
            task_id,
            kind: TaskKind::Reduce,
            file_name: String::new(),
            bucket_id,
            assigned_worker: None,
            lease_start: None,
            done: false,
        }
    }
}

/// Singleton job state: the task table, counters, and phase flag, all
/// guarded by one coarse mutex. Every `GetTask`/`Notify` does at most a
/// single bounded scan over the task table, so one lock for everything is
/// simpler than per-task locking and doesn't cost anything in practice.
struct JobState {
    coordinator_id: String,
    n_reduce: usize,
    total_map_tasks: usize,
    maps_done: usize,
    reduces_done: usize,
    phase: Phase,
    tasks: HashMap<String, TaskRecord>,
    lease_timeout: Duration,
}

impl JobState {
    fn new(files: &[String], n_reduce: usize, lease_timeout: Duration) -> Self {
        let mut tasks = HashMap::new();
        for file_name in files {
            let id = Uuid::new_v4().to_string();
            tasks.insert(id.clone(), TaskRecord::new_map(id, file_name.clone()));
        }
        for bucket_id in 0..n_reduce {
            let id = Uuid::new_v4().to_string();
            tasks.insert(id.clone(), TaskRecord::new_reduce(id, bucket_id));
        }

        Self {
            coordinator_id: Uuid::new_v4().to_string(),
            n_reduce,
            total_map_tasks: files.len(),
            maps_done: 0,
            reduces_done: 0,
            phase: Phase::Map,
            tasks,
            lease_timeout,
        }
    }

    /// Single scan per `GetTask`: for every eligible record, expire a
    /// stale lease before considering it unassigned, then assign and
    /// return the first one found unassigned. Expiring first matters — a
    /// worker that died mid-task must free its slot in the same scan that
    /// would otherwise skip right past it.
    fn dispatch(&mut self, worker_id: &str) -> Task {
        let wanted = match self.phase {
            Phase::Map => TaskKind::Map,
            Phase::Reduce => TaskKind::Reduce,
        };
        let now = Instant::now();

        for record in self.tasks.values_mut() {
            if record.kind != wanted || record.done {
                continue;
            }
            if record.assigned_worker.is_some() {
                let expired = record
                    .lease_start
                    .map(|start| now.saturating_duration_since(start) > self.lease_timeout)
                    .unwrap_or(false);
                if expired {
                    println!(
                        "[Coordinator] lease for {:?} task {} expired, reassigning",
                        record.kind, record.task_id
                    );
                    record.assigned_worker = None;
                    record.lease_start = None;
                }
            }
            if record.assigned_worker.is_none() {
                record.assigned_worker = Some(worker_id.to_string());
                record.lease_start = Some(now);
                return match record.kind {
                    TaskKind::Map => Task {
                        task_id: record.task_id.clone(),
                        coordinator_id: self.coordinator_id.clone(),
                        kind: TaskKind::Map,
                        n_reduce: self.n_reduce,
                        file_name: record.file_name.clone(),
                        bucket_id: 0,
                    },
                    TaskKind::Reduce => Task {
                        task_id: record.task_id.clone(),
                        coordinator_id: self.coordinator_id.clone(),
                        kind: TaskKind::Reduce,
                        n_reduce: self.n_reduce,
                        file_name: String::new(),
                        bucket_id: record.bucket_id,
                    },
                    _ => unreachable!("wanted is always Map or Reduce"),
                };
            }
        }

        Task::wait()
    }

    /// Marks a task done iff the record's current assignment matches
    /// exactly; every other call is a silently-ignored no-op. This is the
    /// sole guard against double-counting a task that was reassigned
    /// after its original worker went slow: the zombie's late notify
    /// names a worker that's no longer the assignee and gets dropped.
    fn notify(&mut self, task_id: &str, worker_id: &str, kind: TaskKind) {
        let Some(record) = self.tasks.get_mut(task_id) else {
            println!("[Coordinator] Notify for unknown task {task_id}, ignored");
            return;
        };
        let matches = record.kind == kind
            && !record.done
            && record.assigned_worker.as_deref() == Some(worker_id);
        if !matches {
            println!(
                "[Coordinator] Notify for task {task_id} did not match current assignment, ignored"
            );
            return;
        }

        record.done = true;
        match kind {
            TaskKind::Map => {
                self.maps_done += 1;
                if self.maps_done == self.total_map_tasks {
                    self.phase = Phase::Reduce;
                    println!("[Coordinator] all map tasks done, entering reduce phase");
                }
            }
            TaskKind::Reduce => {
                self.reduces_done += 1;
            }
            _ => {}
        }
    }

    fn done(&self) -> bool {
        self.maps_done >= self.total_map_tasks && self.reduces_done >= self.n_reduce
    }
}

/// RPC-facing handle. Cheap to clone: every clone shares the same
/// underlying `JobState` behind one `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<JobState>>,
}

impl Coordinator {
    pub fn new(files: Vec<String>, n_reduce: usize) -> Self {
        Self::with_lease_timeout(files, n_reduce, DEFAULT_LEASE_TIMEOUT)
    }

    pub fn with_lease_timeout(files: Vec<String>, n_reduce: usize, lease_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(JobState::new(&files, n_reduce, lease_timeout))),
        }
    }

    /// True iff every map task and every reduce task is done. Consulted
    /// directly by the coordinator binary's own poll loop; there is no
    /// reason for a remote caller to ask this, so it stays off the wire.
    pub fn done(&self) -> bool {
        self.state.lock().unwrap().done()
    }
}

/// RPC surface a worker calls to get work and report it finished.
#[tarpc::service]
pub trait Server {
    async fn get_task(request: TaskRequest) -> Task;
    async fn notify(output: Output);
}

#[tarpc::server]
impl Server for Coordinator {
    type GetTaskFut = Ready<Task>;
    type NotifyFut = Ready<()>;

    fn get_task(self, _: context::Context, request: TaskRequest) -> Self::GetTaskFut {
        let mut state = self.state.lock().unwrap();
        if state.done() {
            return ready(Task::exit());
        }
        ready(state.dispatch(&request.worker_id))
    }

    fn notify(self, _: context::Context, output: Output) -> Self::NotifyFut {
        self.state
            .lock()
            .unwrap()
            .notify(&output.task_id, &output.worker_id, output.kind);
        ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pg-{i}.txt")).collect()
    }

    #[test]
    fn map_tasks_dispatch_before_reduce() {
        let c = Coordinator::new(files(2), 3);
        let mut state = c.state.lock().unwrap();
        let t = state.dispatch("w1");
        assert_eq!(t.kind, TaskKind::Map);
    }

    #[test]
    fn no_reduce_dispatched_while_maps_remain() {
        let c = Coordinator::new(files(1), 2);
        let mut state = c.state.lock().unwrap();
        // consume the only map task
        let t1 = state.dispatch("w1");
        assert_eq!(t1.kind, TaskKind::Map);
        // second dispatch: nothing unassigned, phase still Map -> Wait
        let t2 = state.dispatch("w2");
        assert_eq!(t2.kind, TaskKind::Wait);
    }

    #[test]
    fn phase_advances_exactly_once_when_maps_complete() {
        let c = Coordinator::new(files(1), 1);
        let task_id = {
            let mut state = c.state.lock().unwrap();
            let t = state.dispatch("w1");
            assert_eq!(state.phase, Phase::Map);
            t.task_id
        };
        {
            let mut state = c.state.lock().unwrap();
            state.notify(&task_id, "w1", TaskKind::Map);
            assert_eq!(state.phase, Phase::Reduce);
        }
        // idempotent re-check
        assert_eq!(c.state.lock().unwrap().phase, Phase::Reduce);
    }

    #[test]
    fn notify_ignored_unless_worker_and_kind_match_current_assignment() {
        let c = Coordinator::new(files(1), 1);
        let task_id = {
            let mut state = c.state.lock().unwrap();
            state.dispatch("w1").task_id
        };

        // wrong worker id: ignored
        {
            let mut state = c.state.lock().unwrap();
            state.notify(&task_id, "imposter", TaskKind::Map);
            assert_eq!(state.maps_done, 0);
        }
        // wrong kind: ignored
        {
            let mut state = c.state.lock().unwrap();
            state.notify(&task_id, "w1", TaskKind::Reduce);
            assert_eq!(state.maps_done, 0);
        }
        // correct worker + kind: counted
        {
            let mut state = c.state.lock().unwrap();
            state.notify(&task_id, "w1", TaskKind::Map);
            assert_eq!(state.maps_done, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_reassigned_and_duplicate_notify_counts_once() {
        let c = Coordinator::new(files(1), 1);
        let task_id = {
            let mut state = c.state.lock().unwrap();
            state.dispatch("slow-worker").task_id
        };

        tokio::time::advance(DEFAULT_LEASE_TIMEOUT + Duration::from_secs(1)).await;

        let reassigned = {
            let mut state = c.state.lock().unwrap();
            state.dispatch("fast-worker")
        };
        assert_eq!(reassigned.task_id, task_id);

        {
            let mut state = c.state.lock().unwrap();
            state.notify(&task_id, "fast-worker", TaskKind::Map);
            assert_eq!(state.maps_done, 1);
        }
        // the slow worker's late Notify must not double-count (scenario F)
        {
            let mut state = c.state.lock().unwrap();
            state.notify(&task_id, "slow-worker", TaskKind::Map);
            assert_eq!(state.maps_done, 1);
        }
    }

    #[test]
    fn done_requires_both_phases_complete() {
        let c = Coordinator::new(files(1), 1);
        assert!(!c.done());
        let task_id = {
            let mut state = c.state.lock().unwrap();
            state.dispatch("w1").task_id
        };
        {
            let mut state = c.state.lock().unwrap();
            state.notify(&task_id, "w1", TaskKind::Map);
        }
        assert!(!c.done());

        let reduce_id = {
            let mut state = c.state.lock().unwrap();
            state.dispatch("w1").task_id
        };
        {
            let mut state = c.state.lock().unwrap();
            state.notify(&reduce_id, "w1", TaskKind::Reduce);
        }
        assert!(c.done());
    }
}

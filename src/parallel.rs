// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Concurrency & resource model (spec.md §5): a worker thread pool with a
//! bounded per-worker job queue, a start condition variable workers wait on
//! between schedules, and a completion condition variable the dispatching
//! thread waits on.
//!
//! System scheduling/dependency ordering is an external collaborator's job
//! (spec.md §1); this module only runs whatever row-range job it is handed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::stage::StageId;

/// Bound on a single worker's pending job queue.
pub const MAX_JOBS_PER_WORKER: usize = 16;

/// Tags a stage reference so it can be passed around uniformly and
/// dereferenced to the right stage at the call site (spec.md §5 "Magic
/// numbers"). The magic constants themselves are not meaningful beyond
/// being distinct; callers should match on the enum, not the raw tag.
pub const WORLD_MAGIC: u32 = 0xEC5_0000;
pub const THREAD_MAGIC: u32 = 0xEC5_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRef {
    World,
    Thread(StageId),
}

impl StageRef {
    pub fn magic(&self) -> u32 {
        match self {
            StageRef::World => WORLD_MAGIC,
            StageRef::Thread(_) => THREAD_MAGIC,
        }
    }
}

/// A contiguous row range within one matched table, handed to a worker.
/// `task` stands in for the external scheduler's system invocation.
pub struct Job {
    pub offset: u32,
    pub limit: u32,
    pub task: Box<dyn FnOnce(u32, u32) + Send + 'static>,
}

struct ScheduleGate {
    quit: bool,
}

/// A pool of worker threads, each bound to its own [`StageId`] and fed jobs
/// through a bounded channel. `dispatch` posts one batch of jobs per worker
/// and blocks until every worker has drained its queue for this round.
pub struct ThreadPool {
    senders: Vec<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    thread_gate: Arc<Mutex<ScheduleGate>>,
    thread_cond: Arc<Condvar>,
    job_mutex: Arc<Mutex<usize>>,
    job_cond: Arc<Condvar>,
    threads_running: usize,
    quit_workers: Arc<AtomicBool>,
    should_quit: Arc<AtomicBool>,
    rounds_posted: Arc<AtomicUsize>,
}

impl ThreadPool {
    pub fn new(worker_count: usize) -> Self {
        let thread_gate = Arc::new(Mutex::new(ScheduleGate { quit: false }));
        let thread_cond = Arc::new(Condvar::new());
        let job_mutex = Arc::new(Mutex::new(0usize));
        let job_cond = Arc::new(Condvar::new());
        let quit_workers = Arc::new(AtomicBool::new(false));
        let should_quit = Arc::new(AtomicBool::new(false));
        let rounds_posted = Arc::new(AtomicUsize::new(0));

        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (tx, rx): (Sender<Job>, Receiver<Job>) = bounded(MAX_JOBS_PER_WORKER);
            senders.push(tx);

            let thread_gate = Arc::clone(&thread_gate);
            let thread_cond = Arc::clone(&thread_cond);
            let job_mutex = Arc::clone(&job_mutex);
            let job_cond = Arc::clone(&job_cond);
            let quit_workers = Arc::clone(&quit_workers);
            let rounds_posted = Arc::clone(&rounds_posted);

            let handle = std::thread::Builder::new()
                .name(format!("ecs-worker-{worker_id}"))
                .spawn(move || {
                    let mut seen_round = 0usize;
                    loop {
                        {
                            let mut gate = thread_gate.lock();
                            while rounds_posted.load(Ordering::Acquire) <= seen_round
                                && !gate.quit
                            {
                                thread_cond.wait(&mut gate);
                            }
                            if gate.quit {
                                return;
                            }
                        }
                        seen_round = rounds_posted.load(Ordering::Acquire);

                        while let Ok(job) = rx.try_recv() {
                            (job.task)(job.offset, job.limit);
                            if quit_workers.load(Ordering::Acquire) {
                                break;
                            }
                        }

                        let mut finished = job_mutex.lock();
                        *finished += 1;
                        job_cond.notify_one();
                    }
                })
                .expect("failed to spawn ecs worker thread");
            handles.push(handle);
        }

        ThreadPool {
            senders,
            handles,
            thread_gate,
            thread_cond,
            job_mutex,
            job_cond,
            threads_running: worker_count,
            quit_workers,
            should_quit,
            rounds_posted,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.threads_running
    }

    /// Post one job batch per worker and block until every worker has
    /// drained its queue this round (`jobs_finished == threads_running`).
    pub fn dispatch(&self, mut jobs_by_worker: Vec<Vec<Job>>) {
        jobs_by_worker.resize_with(self.threads_running, Vec::new);

        for (sender, jobs) in self.senders.iter().zip(jobs_by_worker) {
            for job in jobs {
                let _ = sender.send(job);
            }
        }

        *self.job_mutex.lock() = 0;
        self.rounds_posted.fetch_add(1, Ordering::Release);
        self.thread_cond.notify_all();

        let mut finished = self.job_mutex.lock();
        while *finished < self.threads_running {
            self.job_cond.wait(&mut finished);
        }
    }

    /// Cooperative frame-boundary shutdown request; honoured between
    /// frames, never mid-merge (spec.md §5 "Cancellation").
    pub fn request_quit(&self) {
        self.should_quit.store(true, Ordering::Release);
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit.load(Ordering::Acquire)
    }

    /// Tell every worker to exit its dispatch loop at the next schedule
    /// fence and join all threads.
    pub fn shutdown(mut self) {
        self.quit_workers.store(true, Ordering::Release);
        {
            let mut gate = self.thread_gate.lock();
            gate.quit = true;
        }
        self.thread_cond.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

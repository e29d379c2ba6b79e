//! Computationally-heavy tasks
//!
//! Rounds of MPC protocols often need to do expensive independent checks, e.g. verify a
//! proof received from every party. [`Pool`] spreads such batches over a dedicated multi-thread
//! tokio runtime with a bounded amount of workers, and gathers results back in submission order.
//!
//! The pool is owned by the caller: it's handed to protocol start functions explicitly, shared
//! by all rounds of a session (and possibly by several sessions of one party), and released with
//! [`Pool::tear_down`].
//!
//! Executing a batch blocks the calling thread until the batch is completed, so rounds must be
//! driven from synchronous code or from [`spawn_blocking`](tokio::task::spawn_blocking), as
//! [`handler_loop`](crate::dev::handler_loop) does.
//!
//! ```rust
//! use mpc_rounds::{Pool, PoolConfig};
//!
//! # fn main() -> Result<(), mpc_rounds::PoolError> {
//! let pool = Pool::new(PoolConfig::from_count(2));
//! let squares = pool.map(0..10u64, |x| x * x)?;
//! assert_eq!(squares[9], 81);
//! pool.tear_down()?;
//! # Ok(()) }
//! ```

use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::{self, Runtime};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace, warn};

use crate::error::PoolError;

/// Zero-argument computation submitted to the pool
pub type Task<R> = Box<dyn FnOnce() -> R + Send + 'static>;

/// Defines how many workers the pool has
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolConfig {
    /// Tasks are executed on the calling thread, one after another
    Synchronous,
    /// One worker per available CPU
    #[default]
    AvailableParallelism,
    /// Fixed amount of workers
    Workers(NonZeroUsize),
}

impl PoolConfig {
    /// Interprets a worker count
    ///
    /// Negative count means synchronous execution, zero means "use available parallelism".
    pub fn from_count(count: i64) -> Self {
        match usize::try_from(count) {
            Err(_) => PoolConfig::Synchronous,
            Ok(count) => match NonZeroUsize::new(count) {
                None => PoolConfig::AvailableParallelism,
                Some(count) => PoolConfig::Workers(count),
            },
        }
    }

    fn workers(&self) -> usize {
        match self {
            PoolConfig::Synchronous => 0,
            PoolConfig::AvailableParallelism => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            PoolConfig::Workers(n) => n.get(),
        }
    }
}

impl FromStr for PoolConfig {
    type Err = ParsePoolConfigError;

    /// Parses `none`, `sync` or an integer (see [`PoolConfig::from_count`])
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" | "sync" | "synchronous" => Ok(PoolConfig::Synchronous),
            s => s
                .parse::<i64>()
                .map(PoolConfig::from_count)
                .map_err(|_| ParsePoolConfigError(s.to_owned())),
        }
    }
}

/// Pool configuration couldn't be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid worker count `{0}`: expected an integer, `none` or `sync`")]
pub struct ParsePoolConfigError(String);

/// Bounded pool of workers
///
/// Cheap to clone: clones refer to the same workers.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

struct Shared {
    workers: usize,
    state: Mutex<State>,
}

enum State {
    /// `runtime` is `None` for synchronous pool
    Open { runtime: Option<Runtime> },
    Closed,
}

impl Pool {
    /// Starts workers according to `config`
    ///
    /// Falls back to synchronous execution if the worker runtime can't be built.
    pub fn new(config: PoolConfig) -> Self {
        let workers = config.workers();
        if workers == 0 {
            return Self::synchronous();
        }

        let built = runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("mpc-pool")
            .build();
        let runtime = match built {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(%err, "couldn't start pool workers, falling back to synchronous execution");
                return Self::synchronous();
            }
        };
        debug!(workers, "worker pool started");

        Self {
            shared: Arc::new(Shared {
                workers,
                state: Mutex::new(State::Open {
                    runtime: Some(runtime),
                }),
            }),
        }
    }

    /// Pool that executes every task in place, on the calling thread
    pub fn synchronous() -> Self {
        Self {
            shared: Arc::new(Shared {
                workers: 0,
                state: Mutex::new(State::Open { runtime: None }),
            }),
        }
    }

    /// Amount of workers, `0` for a synchronous pool
    pub fn workers(&self) -> usize {
        self.shared.workers
    }

    /// Checks whether the pool was torn down
    pub fn is_closed(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Closed)
    }

    /// Executes a batch of independent tasks
    ///
    /// Every task is executed exactly once. Returns results in the order tasks were submitted,
    /// once the whole batch is completed. If any task panics, the batch fails with
    /// [`PoolError::TaskPanicked`] pointing at the first panicked task.
    ///
    /// ## Panics
    /// Must not be called from an asynchronous context (see [module docs](self)).
    pub fn submit<R>(&self, batch: Vec<Task<R>>) -> Result<Vec<R>, PoolError>
    where
        R: Send + 'static,
    {
        let handle = match &*self.shared.state.lock() {
            State::Closed => return Err(PoolError::Closed),
            State::Open { runtime } => runtime.as_ref().map(|rt| rt.handle().clone()),
        };
        trace!(tasks = batch.len(), workers = self.shared.workers, "execute batch");

        let handle = match handle {
            Some(handle) => handle,
            None => return execute_in_place(batch),
        };
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let tasks: Vec<JoinHandle<R>> = batch
            .into_iter()
            .map(|task| handle.spawn(async move { task() }))
            .collect();
        let joined = handle.block_on(async move {
            let mut joined = Vec::with_capacity(tasks.len());
            for task in tasks {
                joined.push(task.await);
            }
            joined
        });
        gather(joined)
    }

    /// Applies `f` to every item on the pool
    ///
    /// Returns outputs in the order of `items`.
    pub fn map<T, R, F>(&self, items: impl IntoIterator<Item = T>, f: F) -> Result<Vec<R>, PoolError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let batch = items
            .into_iter()
            .map(|item| {
                let f = f.clone();
                Box::new(move || f(item)) as Task<R>
            })
            .collect();
        self.submit(batch)
    }

    /// Stops the pool
    ///
    /// Shuts the workers down without blocking, so it can be called from async code. Batches
    /// still in flight fail with [`PoolError::Closed`]. Any later call to
    /// [`submit`](Self::submit), [`map`](Self::map) or `tear_down` returns [`PoolError::Closed`].
    pub fn tear_down(&self) -> Result<(), PoolError> {
        let state = std::mem::replace(&mut *self.shared.state.lock(), State::Closed);
        match state {
            State::Closed => Err(PoolError::Closed),
            State::Open { runtime } => {
                if let Some(runtime) = runtime {
                    runtime.shutdown_background();
                }
                debug!("worker pool torn down");
                Ok(())
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which isn't allowed within async context
        if let State::Open {
            runtime: Some(runtime),
        } = std::mem::replace(self.state.get_mut(), State::Closed)
        {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("workers", &self.shared.workers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn gather<R>(joined: Vec<Result<R, JoinError>>) -> Result<Vec<R>, PoolError> {
    let mut results = Vec::with_capacity(joined.len());
    let mut panicked = None;
    let mut cancelled = false;
    for (index, output) in joined.into_iter().enumerate() {
        match output {
            Ok(output) => results.push(output),
            Err(err) if err.is_panic() => {
                panicked.get_or_insert(index);
            }
            // Runtime was shut down while the task was queued
            Err(_) => cancelled = true,
        }
    }
    match (panicked, cancelled) {
        (Some(index), _) => Err(PoolError::TaskPanicked { index }),
        (None, true) => Err(PoolError::Closed),
        (None, false) => Ok(results),
    }
}

fn execute_in_place<R>(batch: Vec<Task<R>>) -> Result<Vec<R>, PoolError> {
    let mut results = Vec::with_capacity(batch.len());
    let mut panicked = None;
    for (index, task) in batch.into_iter().enumerate() {
        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(output) => results.push(output),
            Err(_) => {
                panicked.get_or_insert(index);
            }
        }
    }
    match panicked {
        Some(index) => Err(PoolError::TaskPanicked { index }),
        None => Ok(results),
    }
}

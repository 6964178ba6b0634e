//! Provides a small connection pool for blocking store clients.
//!
//! **rusqlite**, which backs the ledger, blocks the calling thread. We therefore must never use
//! it on a tokio worker directly. Instead [Pool::run](Pool::run) acquires a permit, checks out an idle
//! connection (or opens a new one), runs the given closure via **spawn_blocking** and returns the
//! connection into the pool afterwards. Connections are never pinned to a thread, and the number
//! of permits caps the number of connections being opened.
//!
//! # Example
//!
//! ```
//! # use tally::pool::{Manager, Pool};
//! struct Numbers;
//!
//! impl Manager for Numbers {
//!     type Connection = Vec<i64>;
//!
//!     fn name(&self) -> &str {
//!         "numbers"
//!     }
//!
//!     fn connect(&self) -> anyhow::Result<Vec<i64>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = Pool::new(Numbers, 1);
//! pool.run(|numbers| { numbers.push(42); Ok(()) }).await.unwrap();
//!
//! // As there is only a single connection, we get the same one back...
//! let len = pool.run(|numbers| Ok(numbers.len())).await.unwrap();
//! assert_eq!(len, 1);
//! # }
//! ```
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::Semaphore;

/// Opens and checks the connections of a [Pool](Pool).
pub trait Manager: Send + Sync + 'static {
    /// The type of connection being managed.
    type Connection: Send + 'static;

    /// Returns a short name used when logging.
    fn name(&self) -> &str;

    /// Opens a new connection.
    ///
    /// This is invoked within **spawn_blocking**, therefore blocking is fine here.
    fn connect(&self) -> anyhow::Result<Self::Connection>;

    /// Determines if the connection is unusable after a task ran.
    ///
    /// Broken connections are dropped instead of being returned into the pool.
    fn is_broken(&self, _connection: &mut Self::Connection) -> bool {
        false
    }
}

/// A pool of at most **size** connections.
pub struct Pool<M: Manager> {
    manager: Arc<M>,
    idle: Arc<Mutex<Vec<M::Connection>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl<M: Manager> Pool<M> {
    /// Creates a new pool which opens up to **size** connections lazily.
    pub fn new(manager: M, size: usize) -> Self {
        let size = size.max(1);
        Pool {
            manager: Arc::new(manager),
            idle: Arc::new(Mutex::new(Vec::with_capacity(size))),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Returns the maximal number of connections.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of connections which are currently idle.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    /// Runs the given task with a pooled connection.
    ///
    /// Waits until a connection is available. The task itself runs on the blocking thread pool of
    /// tokio. Errors of the task are passed through. Errors when opening a connection are reported
    /// as such, so that a store which is down surfaces as a failed request.
    pub async fn run<T, F>(&self, task: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut M::Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .with_context(|| format!("The {} pool has been closed", self.manager.name()))?;
        let manager = self.manager.clone();
        let idle = self.idle.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;

            let pooled = idle.lock().unwrap().pop();
            let mut connection = match pooled {
                Some(connection) => connection,
                None => {
                    log::debug!("Opening a new {} connection...", manager.name());
                    manager
                        .connect()
                        .with_context(|| format!("Cannot connect to {}", manager.name()))?
                }
            };

            let result = task(&mut connection);

            if manager.is_broken(&mut connection) {
                log::warn!("Discarding a broken {} connection.", manager.name());
            } else {
                idle.lock().unwrap().push(connection);
            }

            result
        })
        .await
        .with_context(|| format!("A task using the {} pool panicked", self.manager.name()))?
    }
}

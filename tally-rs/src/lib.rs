//! Tally is a small voting site which is used as a target for load-testing benchmarks.
//!
//! # Introduction
//! Visitors browse the rankings of candidates and political parties and cast votes. An
//! administrative endpoint resets all state between two benchmark runs. The interesting part
//! isn't the CRUD itself but how the rankings are computed under load: either directly by
//! aggregating the vote ledger in SQL or from a counter cache which is updated on every vote.
//!
//! # Architecture
//! * **Platform**: A tiny registry which keeps all central components around. See
//!   [platform](platform).
//! * **Vote Ledger**: The append-only record of all votes, stored in SQLite. This is the single
//!   source of truth. See [ledger](ledger).
//! * **Counter Cache**: Counters and ranked sets which mirror the ledger so that the hot read paths
//!   don't need to scan the votes table. Either kept in memory or in Redis. See
//!   [counters](counters).
//! * **Ranking Aggregator**: Computes the rankings shown on the pages, using either the ledger or
//!   the counter cache as source. See [ranking](ranking).
//! * **Vote Validator** and **Ballot Box**: Check and record incoming votes. See
//!   [validator](validator) and [ballot](ballot).
//! * **Pages**: The HTTP handlers which are dispatched by the [server](server) via the
//!   [routes](routes) dictionary.
//!
//! # Example
//! The runnable instance lives in **tally-io**. A minimal setup looks like:
//! ```no_run
//! # use tally::builder::Builder;
//! # use tally::server::Server;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     tally::ledger::install(&platform).await?;
//!     tally::counters::install(&platform).await?;
//!     tally::ranking::install(&platform).await?;
//!     tally::ballot::install(&platform)?;
//!     tally::pages::install(&platform)?;
//!
//!     platform.require::<Server>().event_loop().await;
//!     Ok(())
//! }
//! ```
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod average;
pub mod ballot;
pub mod builder;
pub mod config;
pub mod counters;
pub mod diagnostics;
pub mod fmt;
pub mod ledger;
pub mod model;
pub mod pages;
pub mod platform;
pub mod pool;
pub mod ranking;
pub mod request;
pub mod response;
pub mod routes;
pub mod seed;
pub mod server;
pub mod signals;
pub mod validator;
pub mod views;

/// Contains the version of the Tally library.
pub const TALLY_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Tally build being used.
pub const TALLY_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests build several platforms within one process, so this must only run once...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned join handle as we never
/// await the spawned task.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate tally;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing {
    use std::sync::{Arc, Mutex};

    use crate::builder::Builder;
    use crate::config::Config;
    use crate::ledger::Ledger;
    use crate::model::{Candidate, Sex, Voter};
    use crate::platform::Platform;

    lazy_static::lazy_static! {
        /// Provides a global lock which has to be acquired if a test binds our test port (1503).
        /// All other tests can still run in parallel and only block if required.
        pub static ref SHARED_TEST_RESOURCES: Mutex<()> = Mutex::new(());
    }

    /// Executes async code within a single threaded tokio runtime.
    pub fn test_async<F: std::future::Future>(future: F) {
        use tokio::runtime;

        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let _ = rt.block_on(future);
    }

    /// Builds a platform whose config is loaded from the given YAML string.
    pub async fn configured_platform(config: &str) -> Arc<Platform> {
        let platform = Builder::new().enable_config().build().await;
        platform
            .require::<Config>()
            .load_from_string(config, None)
            .unwrap();

        platform
    }

    /// Opens an in-memory ledger which contains a small, well known set of candidates and voters.
    ///
    /// Candidates (id, name, party, sex):
    /// 1. Bob, Green, female
    /// 2. Carol, Blue, female
    /// 3. Dave, Green, male
    /// 4. Erin, Red, female
    ///
    /// Voters (id, name, address, mynumber, quota):
    /// 1. Alice, 1 Main St, 123, 5
    /// 2. Mallory, 2 Side St, 456, 100
    pub async fn seeded_ledger() -> Arc<Ledger> {
        let ledger = Arc::new(Ledger::open(":memory:", 1).unwrap());
        ledger.ensure_schema().await.unwrap();

        for (id, name, party, sex) in [
            (1, "Bob", "Green", Sex::Female),
            (2, "Carol", "Blue", Sex::Female),
            (3, "Dave", "Green", Sex::Male),
            (4, "Erin", "Red", Sex::Female),
        ] {
            ledger
                .insert_candidate(Candidate {
                    id,
                    name: name.to_owned(),
                    political_party: party.to_owned(),
                    sex,
                })
                .await
                .unwrap();
        }

        for (id, name, address, mynumber, votes) in [
            (1, "Alice", "1 Main St", "123", 5),
            (2, "Mallory", "2 Side St", "456", 100),
        ] {
            ledger
                .insert_voter(Voter {
                    id,
                    name: name.to_owned(),
                    address: address.to_owned(),
                    mynumber: mynumber.to_owned(),
                    votes,
                })
                .await
                .unwrap();
        }

        ledger
    }
}

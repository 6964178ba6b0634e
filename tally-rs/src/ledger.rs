//! Provides the vote ledger which is the single source of truth of the system.
//!
//! The ledger is a SQLite database containing three tables:
//! * **candidates**: The candidates (immutable reference data, seeded once).
//! * **users**: The voters along with their vote quota (immutable reference data, seeded once).
//! * **votes**: One row per accepted submission carrying the number of votes cast with it. This
//!   table is append-only and only ever cleared by [Ledger::reset](Ledger::reset).
//!
//! All access happens through a [Pool](crate::pool::Pool) of connections, so that SQLite never
//! blocks a tokio worker. Concurrent writes are serialized by SQLite itself (we run in WAL mode
//! with a busy timeout), so that no vote is lost when several voters submit at once.
//!
//! Besides recording votes, the ledger can compute all rankings on its own by aggregating the
//! votes table (see the [TallySource](crate::ranking::TallySource) implementation). This is
//! the **direct** ranking strategy.
//!
//! # Configuration
//! ```yaml
//! database:
//!     path: tally.db
//!     pool_size: 8
//!     seed_dir: seed
//! ```
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use itertools::Itertools;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::config::Config;
use crate::model::{Candidate, SexTotals, Vote, Voter};
use crate::platform::Platform;
use crate::pool::{Manager, Pool};
use crate::ranking::TallySource;

/// Specifies how long a connection waits for a lock held by another writer.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS candidates (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        political_party TEXT NOT NULL,
        sex TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        address TEXT NOT NULL,
        mynumber TEXT NOT NULL UNIQUE,
        votes INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS votes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        candidate_id INTEGER NOT NULL,
        keyword TEXT NOT NULL,
        count INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS votes_by_candidate ON votes (candidate_id);
    CREATE INDEX IF NOT EXISTS votes_by_user ON votes (user_id);
";

const INSERT_CANDIDATE: &str =
    "INSERT INTO candidates (id, name, political_party, sex) VALUES (?1, ?2, ?3, ?4)";

const INSERT_VOTER: &str =
    "INSERT INTO users (id, name, address, mynumber, votes) VALUES (?1, ?2, ?3, ?4, ?5)";

/// Opens SQLite connections for the ledger pool.
struct SqliteManager {
    path: String,
}

impl Manager for SqliteManager {
    type Connection = Connection;

    fn name(&self) -> &str {
        "sqlite"
    }

    fn connect(&self) -> anyhow::Result<Connection> {
        let connection = Connection::open(&self.path)
            .with_context(|| format!("Cannot open database {}", &self.path))?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        let _: String =
            connection.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        Ok(connection)
    }
}

/// Provides access to the votes and the reference data stored in SQLite.
pub struct Ledger {
    path: String,
    pool: Pool<SqliteManager>,
}

impl Ledger {
    /// Creates a ledger for the given database file.
    ///
    /// Connections are opened lazily. Note that **:memory:** creates a separate database per
    /// connection, therefore the pool is limited to a single connection in this case.
    pub fn open(path: &str, pool_size: usize) -> anyhow::Result<Ledger> {
        if path.is_empty() {
            return Err(anyhow::anyhow!("No database path has been given."));
        }

        let pool_size = if path == ":memory:" { 1 } else { pool_size };

        Ok(Ledger {
            path: path.to_owned(),
            pool: Pool::new(
                SqliteManager {
                    path: path.to_owned(),
                },
                pool_size,
            ),
        })
    }

    /// Returns the path of the underlying database.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Creates all tables and indices unless they already exist.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        self.pool
            .run(|connection| {
                connection
                    .execute_batch(SCHEMA)
                    .context("Failed to create the database schema")
            })
            .await
    }

    /// Loads all candidates ordered by their id.
    pub async fn candidates(&self) -> anyhow::Result<Vec<Candidate>> {
        self.pool
            .run(|connection| {
                let mut statement = connection.prepare_cached(
                    "SELECT id, name, political_party, sex FROM candidates ORDER BY id",
                )?;
                let candidates = statement
                    .query_map([], Candidate::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(candidates)
            })
            .await
    }

    /// Resolves a voter by an exact match of all three identifying fields.
    pub async fn find_voter(
        &self,
        name: &str,
        address: &str,
        mynumber: &str,
    ) -> anyhow::Result<Option<Voter>> {
        let (name, address, mynumber) = (name.to_owned(), address.to_owned(), mynumber.to_owned());
        self.pool
            .run(move |connection| {
                let voter = connection
                    .prepare_cached(
                        "SELECT id, name, address, mynumber, votes FROM users \
                         WHERE name = ?1 AND address = ?2 AND mynumber = ?3 LIMIT 1",
                    )?
                    .query_row(params![name, address, mynumber], Voter::from_row)
                    .optional()?;

                Ok(voter)
            })
            .await
    }

    /// Stores a candidate.
    pub async fn insert_candidate(&self, candidate: Candidate) -> anyhow::Result<()> {
        self.pool
            .run(move |connection| {
                let _ = connection.execute(
                    INSERT_CANDIDATE,
                    params![
                        candidate.id,
                        candidate.name,
                        candidate.political_party,
                        candidate.sex.as_str()
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Stores a voter.
    pub async fn insert_voter(&self, voter: Voter) -> anyhow::Result<()> {
        self.pool
            .run(move |connection| {
                let _ = connection.execute(
                    INSERT_VOTER,
                    params![voter.id, voter.name, voter.address, voter.mynumber, voter.votes],
                )?;
                Ok(())
            })
            .await
    }

    /// Stores the given reference data within a single transaction unless candidates are present.
    ///
    /// Either all records are stored or none at all. Returns **true** if the data has been stored.
    pub async fn import_reference_data(
        &self,
        candidates: Vec<Candidate>,
        voters: Vec<Voter>,
    ) -> anyhow::Result<bool> {
        self.pool
            .run(move |connection| {
                let transaction = connection.transaction()?;
                let existing: i64 =
                    transaction.query_row("SELECT COUNT(*) FROM candidates", [], |row| {
                        row.get(0)
                    })?;
                if existing > 0 {
                    return Ok(false);
                }

                {
                    let mut insert = transaction.prepare(INSERT_CANDIDATE)?;
                    for candidate in &candidates {
                        let _ = insert
                            .execute(params![
                                candidate.id,
                                candidate.name,
                                candidate.political_party,
                                candidate.sex.as_str()
                            ])
                            .with_context(|| format!("Cannot store candidate {}", candidate.id))?;
                    }

                    let mut insert = transaction.prepare(INSERT_VOTER)?;
                    for voter in &voters {
                        let _ = insert
                            .execute(params![
                                voter.id,
                                voter.name,
                                voter.address,
                                voter.mynumber,
                                voter.votes
                            ])
                            .with_context(|| format!("Cannot store voter {}", voter.id))?;
                    }
                }

                transaction.commit()?;
                Ok(true)
            })
            .await
    }

    /// Counts the known candidates.
    pub async fn count_candidates(&self) -> anyhow::Result<i64> {
        self.pool
            .run(|connection| {
                Ok(connection.query_row("SELECT COUNT(*) FROM candidates", [], |row| {
                    row.get(0)
                })?)
            })
            .await
    }

    /// Appends the given vote.
    pub async fn record(&self, vote: &Vote) -> anyhow::Result<()> {
        let vote = vote.clone();
        self.pool
            .run(move |connection| {
                let _ = connection
                    .prepare_cached(
                        "INSERT INTO votes (user_id, candidate_id, keyword, count) VALUES (?1, ?2, ?3, ?4)",
                    )?
                    .execute(params![vote.voter_id, vote.candidate_id, vote.keyword, vote.count])
                    .context("Failed to record a vote")?;
                Ok(())
            })
            .await
    }

    /// Loads all recorded votes in the order in which they were cast.
    ///
    /// This is used to rebuild the counter cache from the ledger.
    pub async fn votes(&self) -> anyhow::Result<Vec<Vote>> {
        self.pool
            .run(|connection| {
                let mut statement = connection.prepare(
                    "SELECT v.user_id, v.candidate_id, c.political_party, c.sex, v.keyword, v.count \
                     FROM votes v JOIN candidates c ON c.id = v.candidate_id ORDER BY v.id",
                )?;
                let rows = statement
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                rows.into_iter()
                    .map(
                        |(voter_id, candidate_id, political_party, sex, keyword, count)| -> anyhow::Result<Vote> {
                        Ok(Vote {
                            voter_id,
                            candidate_id,
                            political_party,
                            sex: sex.parse()?,
                            keyword,
                            count,
                        })
                    })
                    .collect()
            })
            .await
    }

    /// Removes all recorded votes.
    pub async fn reset(&self) -> anyhow::Result<()> {
        self.pool
            .run(|connection| {
                let removed = connection.execute("DELETE FROM votes", [])?;
                log::info!("Removed {} votes from the ledger.", removed);
                Ok(())
            })
            .await
    }

    async fn sum(&self, query: &'static str, parameter: Value) -> anyhow::Result<i64> {
        self.pool
            .run(move |connection| {
                Ok(connection
                    .prepare_cached(query)?
                    .query_row([parameter], |row| row.get(0))?)
            })
            .await
    }
}

#[async_trait]
impl TallySource for Ledger {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn top_candidates(&self, limit: usize) -> anyhow::Result<Vec<(i64, i64)>> {
        self.pool
            .run(move |connection| {
                let mut statement = connection.prepare_cached(
                    "SELECT candidate_id, SUM(count) AS total FROM votes \
                     GROUP BY candidate_id ORDER BY total DESC, candidate_id ASC LIMIT ?1",
                )?;
                let ranking = statement
                    .query_map([limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(ranking)
            })
            .await
    }

    async fn ranked_count(&self) -> anyhow::Result<usize> {
        self.pool
            .run(|connection| {
                let count = connection
                    .prepare_cached("SELECT COUNT(DISTINCT candidate_id) FROM votes")?
                    .query_row([], |row| row.get::<_, i64>(0))?;
                Ok(count as usize)
            })
            .await
    }

    async fn is_ranked(&self, candidate_id: i64) -> anyhow::Result<bool> {
        self.pool
            .run(move |connection| {
                Ok(connection
                    .prepare_cached(
                        "SELECT EXISTS(SELECT 1 FROM votes WHERE candidate_id = ?1)",
                    )?
                    .query_row([candidate_id], |row| row.get(0))?)
            })
            .await
    }

    async fn last_candidate(&self) -> anyhow::Result<Option<(i64, i64)>> {
        self.pool
            .run(|connection| {
                Ok(connection
                    .prepare_cached(
                        "SELECT candidate_id, SUM(count) AS total FROM votes \
                         GROUP BY candidate_id ORDER BY total ASC, candidate_id DESC LIMIT 1",
                    )?
                    .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()?)
            })
            .await
    }

    async fn candidate_votes(&self, candidate_id: i64) -> anyhow::Result<i64> {
        self.sum(
            "SELECT COALESCE(SUM(count), 0) FROM votes WHERE candidate_id = ?1",
            Value::Integer(candidate_id),
        )
        .await
    }

    async fn voter_votes(&self, voter_id: i64) -> anyhow::Result<i64> {
        self.sum(
            "SELECT COALESCE(SUM(count), 0) FROM votes WHERE user_id = ?1",
            Value::Integer(voter_id),
        )
        .await
    }

    async fn party_votes(&self, party: &str) -> anyhow::Result<i64> {
        self.sum(
            "SELECT COALESCE(SUM(v.count), 0) FROM votes v \
             JOIN candidates c ON c.id = v.candidate_id WHERE c.political_party = ?1",
            Value::Text(party.to_owned()),
        )
        .await
    }

    async fn party_totals(&self) -> anyhow::Result<Vec<(String, i64)>> {
        self.pool
            .run(|connection| {
                let mut statement = connection.prepare_cached(
                    "SELECT c.political_party, SUM(v.count) AS total FROM votes v \
                     JOIN candidates c ON c.id = v.candidate_id \
                     GROUP BY c.political_party ORDER BY total DESC, c.political_party ASC",
                )?;
                let totals = statement
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(totals)
            })
            .await
    }

    async fn sex_totals(&self) -> anyhow::Result<SexTotals> {
        self.pool
            .run(|connection| {
                let mut statement = connection.prepare_cached(
                    "SELECT c.sex, SUM(v.count) FROM votes v \
                     JOIN candidates c ON c.id = v.candidate_id GROUP BY c.sex",
                )?;
                let rows = statement
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut totals = SexTotals::default();
                for (sex, votes) in rows {
                    totals.add(sex.parse()?, votes);
                }

                Ok(totals)
            })
            .await
    }

    async fn keywords(&self, candidate_ids: &[i64], limit: usize) -> anyhow::Result<Vec<String>> {
        if candidate_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT keyword, SUM(count) AS total FROM votes WHERE candidate_id IN ({}) \
             GROUP BY keyword ORDER BY total DESC, MIN(id) ASC LIMIT {}",
            candidate_ids.iter().map(|_| "?").join(", "),
            limit
        );
        let candidate_ids = candidate_ids.to_vec();

        self.pool
            .run(move |connection| {
                let mut statement = connection.prepare(&query)?;
                let keywords = statement
                    .query_map(params_from_iter(candidate_ids), |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;

                Ok(keywords)
            })
            .await
    }
}

/// Creates the ledger as configured, ensures its schema, seeds the reference data if requested and
/// installs it into the given platform.
pub async fn install(platform: &Arc<Platform>) -> anyhow::Result<Arc<Ledger>> {
    let (path, pool_size, seed_dir) = match platform.find::<Config>() {
        Some(config) => {
            let handle = config.current();
            (
                handle.str_or("database.path", "tally.db"),
                handle.int_or("database.pool_size", num_cpus::get() as i64),
                handle.query("database.seed_dir").as_str().map(str::to_owned),
            )
        }
        None => ("tally.db".to_owned(), num_cpus::get() as i64, None),
    };

    let ledger = Arc::new(Ledger::open(&path, pool_size.max(1) as usize)?);
    ledger.ensure_schema().await?;
    log::info!(
        "Opened ledger {} (pool size: {}).",
        ledger.path(),
        ledger.pool.size()
    );

    if let Some(seed_dir) = seed_dir {
        crate::seed::import_dir(&ledger, seed_dir).await?;
    }

    platform.register::<Ledger>(ledger.clone());

    Ok(ledger)
}

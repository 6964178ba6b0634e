//! Provides the counter cache, a materialized view of the ledger used on the hot read paths.
//!
//! Computing the rankings from the ledger requires scanning the votes table. Under load this is
//! way too slow, therefore each accepted vote also increments a set of counters and ranked sets.
//! Reading a ranking then boils down to reading a few keys.
//!
//! The cache is never authoritative: it is always a pure function of the votes in the ledger and
//! can be rebuilt at any time by replaying them (see [CounterCache::rebuild_from]). Note however,
//! that the ledger and the cache are written one after another without a transaction spanning
//! both. A crash (or a cache failure) in between leaves the cache behind the ledger until the next
//! rebuild.
//!
//! # Keys
//! * **candidate:&lt;id&gt;**, **voter:&lt;id&gt;**, **party:&lt;name&gt;**, **sex:&lt;male|female&gt;**:
//!   Plain counters of votes.
//! * **rank:candidates**, **rank:parties**, **rank:sexes**: Ranked sets (leaderboards) which map
//!   the candidate id, party name or sex to its number of votes.
//! * **keywords:&lt;candidate id&gt;**: Ranked set which maps each keyword given by supporters of
//!   the candidate to its frequency.
//!
//! # Backends
//! * **memory**: Keeps everything within the process. See [memory](memory).
//! * **redis**: Uses a Redis server, so that several instances can share the counters. See
//!   [redis](redis).
//!
//! Equal scores are ordered differently by both backends: the memory backend keeps the order in
//! which the members were first seen, Redis orders them reverse-lexicographically.
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use crate::config::Config;
use crate::ledger::Ledger;
use crate::model::{Sex, SexTotals, Vote};
use crate::platform::Platform;
use crate::ranking::TallySource;

pub mod memory;
pub mod redis;

/// Contains the naming scheme of all keys used by the cache.
pub mod keys {
    use crate::model::Sex;

    /// The ranked set of candidate ids by votes.
    pub const CANDIDATE_RANKING: &str = "rank:candidates";

    /// The ranked set of parties by votes.
    pub const PARTY_RANKING: &str = "rank:parties";

    /// The ranked set of sex categories by votes.
    pub const SEX_RANKING: &str = "rank:sexes";

    /// The vote counter of a candidate.
    pub fn candidate(candidate_id: i64) -> String {
        format!("candidate:{}", candidate_id)
    }

    /// The counter of votes cast by a voter.
    pub fn voter(voter_id: i64) -> String {
        format!("voter:{}", voter_id)
    }

    /// The vote counter of a party.
    pub fn party(party: &str) -> String {
        format!("party:{}", party)
    }

    /// The vote counter of a sex category.
    pub fn sex(sex: Sex) -> String {
        format!("sex:{}", sex.as_str())
    }

    /// The ranked set of keywords given by supporters of a candidate.
    pub fn keywords(candidate_id: i64) -> String {
        format!("keywords:{}", candidate_id)
    }
}

/// Represents a single modification of the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Increment {
    /// Adds **count** to the counter **key**.
    Counter {
        /// The counter to increment.
        key: String,
        /// The amount to add.
        count: i64,
    },
    /// Adds **count** to the score of **member** within the ranked set **set**.
    Score {
        /// The ranked set to update.
        set: String,
        /// The member whose score is increased.
        member: String,
        /// The amount to add.
        count: i64,
    },
}

/// Describes the primitive operations a counter backend has to provide.
///
/// Counters and scores only ever grow by the given amounts. Backends have to apply each single
/// operation atomically, so that concurrent votes for the same candidate are never lost.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Returns the name of the backend as used in the config.
    fn name(&self) -> &'static str;

    /// Adds the given amount to a counter and returns the new value.
    async fn increment_by(&self, key: &str, count: i64) -> anyhow::Result<i64>;

    /// Reads a counter. Absent counters are 0.
    async fn get(&self, key: &str) -> anyhow::Result<i64>;

    /// Adds the given amount to the score of a member in a ranked set.
    async fn increase_score(&self, set: &str, member: &str, count: i64) -> anyhow::Result<()>;

    /// Returns the **n** members with the highest scores, highest first.
    async fn top_n(&self, set: &str, n: usize) -> anyhow::Result<Vec<(String, i64)>>;

    /// Returns the number of members in a ranked set.
    async fn cardinality(&self, set: &str) -> anyhow::Result<usize>;

    /// Returns the score of a member or **None** if it isn't part of the set.
    async fn score(&self, set: &str, member: &str) -> anyhow::Result<Option<i64>>;

    /// Returns the member which **top_n** would report last, if the set isn't empty.
    async fn bottom(&self, set: &str) -> anyhow::Result<Option<(String, i64)>>;

    /// Sums up the scores of the given ranked sets and returns the **k** best members.
    async fn merge_top_k(&self, sets: &[String], k: usize) -> anyhow::Result<Vec<(String, i64)>>;

    /// Applies all increments caused by a single vote.
    ///
    /// Backends which support it apply these as one unit.
    async fn apply(&self, increments: &[Increment]) -> anyhow::Result<()> {
        for increment in increments {
            match increment {
                Increment::Counter { key, count } => {
                    let _ = self.increment_by(key, *count).await?;
                }
                Increment::Score { set, member, count } => {
                    self.increase_score(set, member, *count).await?
                }
            }
        }

        Ok(())
    }

    /// Removes all counters and ranked sets.
    async fn flush(&self) -> anyhow::Result<()>;
}

/// Wraps a [CounterStore] and maps votes and ranking queries onto its keys.
pub struct CounterCache {
    store: Box<dyn CounterStore>,
}

impl CounterCache {
    /// Creates a cache on top of the given backend.
    pub fn new(store: Box<dyn CounterStore>) -> Self {
        CounterCache { store }
    }

    /// Returns the name of the backend being used.
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Provides direct access to the underlying backend.
    pub fn store(&self) -> &dyn CounterStore {
        self.store.as_ref()
    }

    /// Lists all increments caused by the given vote.
    pub fn increments(vote: &Vote) -> Vec<Increment> {
        let counter = |key: String| Increment::Counter {
            key,
            count: vote.count,
        };
        let score = |set: String, member: String| Increment::Score {
            set,
            member,
            count: vote.count,
        };

        vec![
            counter(keys::candidate(vote.candidate_id)),
            counter(keys::voter(vote.voter_id)),
            counter(keys::party(&vote.political_party)),
            counter(keys::sex(vote.sex)),
            score(
                keys::CANDIDATE_RANKING.to_owned(),
                vote.candidate_id.to_string(),
            ),
            score(
                keys::PARTY_RANKING.to_owned(),
                vote.political_party.clone(),
            ),
            score(keys::SEX_RANKING.to_owned(), vote.sex.as_str().to_owned()),
            score(keys::keywords(vote.candidate_id), vote.keyword.clone()),
        ]
    }

    /// Updates all counters and ranked sets for the given vote.
    pub async fn record_vote(&self, vote: &Vote) -> anyhow::Result<()> {
        self.store
            .apply(&CounterCache::increments(vote))
            .await
            .with_context(|| format!("Failed to update the {} counters", self.backend()))
    }

    /// Removes all counters and ranked sets.
    pub async fn clear(&self) -> anyhow::Result<()> {
        self.store.flush().await
    }

    /// Clears the cache and replays all votes of the given ledger.
    ///
    /// Returns the number of replayed votes.
    pub async fn rebuild_from(&self, ledger: &Ledger) -> anyhow::Result<usize> {
        self.clear().await?;

        let votes = ledger.votes().await?;
        for vote in &votes {
            self.record_vote(vote).await?;
        }

        Ok(votes.len())
    }
}

/// Parses a candidate id stored as member of a ranked set.
fn parse_candidate_id(member: &str) -> anyhow::Result<i64> {
    member
        .parse()
        .with_context(|| format!("Invalid candidate id in ranking: '{}'", member))
}

#[async_trait]
impl TallySource for CounterCache {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn top_candidates(&self, limit: usize) -> anyhow::Result<Vec<(i64, i64)>> {
        self.store
            .top_n(keys::CANDIDATE_RANKING, limit)
            .await?
            .into_iter()
            .map(|(member, votes)| Ok((parse_candidate_id(&member)?, votes)))
            .collect()
    }

    async fn ranked_count(&self) -> anyhow::Result<usize> {
        self.store.cardinality(keys::CANDIDATE_RANKING).await
    }

    async fn is_ranked(&self, candidate_id: i64) -> anyhow::Result<bool> {
        Ok(self
            .store
            .score(keys::CANDIDATE_RANKING, &candidate_id.to_string())
            .await?
            .is_some())
    }

    async fn last_candidate(&self) -> anyhow::Result<Option<(i64, i64)>> {
        match self.store.bottom(keys::CANDIDATE_RANKING).await? {
            Some((member, votes)) => Ok(Some((parse_candidate_id(&member)?, votes))),
            None => Ok(None),
        }
    }

    async fn candidate_votes(&self, candidate_id: i64) -> anyhow::Result<i64> {
        self.store.get(&keys::candidate(candidate_id)).await
    }

    async fn voter_votes(&self, voter_id: i64) -> anyhow::Result<i64> {
        self.store.get(&keys::voter(voter_id)).await
    }

    async fn party_votes(&self, party: &str) -> anyhow::Result<i64> {
        self.store.get(&keys::party(party)).await
    }

    async fn party_totals(&self) -> anyhow::Result<Vec<(String, i64)>> {
        self.store.top_n(keys::PARTY_RANKING, usize::MAX).await
    }

    async fn sex_totals(&self) -> anyhow::Result<SexTotals> {
        let mut totals = SexTotals::default();
        for sex in Sex::ALL {
            totals.add(sex, self.store.get(&keys::sex(sex)).await?);
        }

        Ok(totals)
    }

    async fn keywords(&self, candidate_ids: &[i64], limit: usize) -> anyhow::Result<Vec<String>> {
        if candidate_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sets = candidate_ids
            .iter()
            .map(|id| keys::keywords(*id))
            .collect::<Vec<_>>();

        Ok(self
            .store
            .merge_top_k(&sets, limit)
            .await?
            .into_iter()
            .map(|(keyword, _)| keyword)
            .collect())
    }
}

/// Creates the counter cache as configured and installs it into the given platform.
///
/// Uses **counters.backend** to select the backend (**memory**, **redis** or **none**). If a
/// [Ledger] is present, the cache is rebuilt from its votes so that it starts out consistent.
/// Returns **None** if the cache has been disabled.
pub async fn install(platform: &Arc<Platform>) -> anyhow::Result<Option<Arc<CounterCache>>> {
    let (backend, redis_url) = match platform.find::<Config>() {
        Some(config) => {
            let handle = config.current();
            (
                handle.str_or("counters.backend", "memory"),
                handle.str_or("counters.redis_url", "redis://127.0.0.1/"),
            )
        }
        None => ("memory".to_owned(), "redis://127.0.0.1/".to_owned()),
    };

    let store: Box<dyn CounterStore> = match backend.as_str() {
        "memory" => Box::new(memory::MemoryCounters::new()),
        "redis" => Box::new(redis::RedisCounters::open(&redis_url).await?),
        "none" => {
            log::info!("The counter cache is disabled.");
            return Ok(None);
        }
        other => return Err(anyhow::anyhow!("Unknown counter backend: '{}'", other)),
    };

    let cache = Arc::new(CounterCache::new(store));
    if let Some(ledger) = platform.find::<Ledger>() {
        let replayed = cache.rebuild_from(&ledger).await?;
        log::info!(
            "Rebuilt the {} counter cache from {} recorded votes.",
            cache.backend(),
            replayed
        );
    }

    platform.register::<CounterCache>(cache.clone());

    Ok(Some(cache))
}

//! Keeps all counters and ranked sets in Redis.
//!
//! Counters are plain strings modified via **INCRBY**, ranked sets are sorted sets modified via
//! **ZINCRBY**. All increments of a vote are sent as one **MULTI/EXEC** pipeline.
//!
//! Commands are sent through a [ConnectionManager], which multiplexes all requests over a single
//! connection and transparently reconnects if the server went away.
//!
//! Note that Redis orders members with equal scores reverse-lexicographically when reading a
//! sorted set from the highest score downwards.
use anyhow::Context;
use async_trait::async_trait;
use itertools::Itertools;
use redis::aio::ConnectionManager;
use redis::Client;

use crate::counters::{CounterStore, Increment};

/// Provides the **redis** counter backend.
pub struct RedisCounters {
    connection: ConnectionManager,
}

impl RedisCounters {
    /// Connects to the given server URL (e.g. **redis://127.0.0.1/**).
    pub async fn open(url: &str) -> anyhow::Result<Self> {
        let client =
            Client::open(url).with_context(|| format!("Invalid redis URL: '{}'", url))?;
        let connection = ConnectionManager::new(client)
            .await
            .with_context(|| format!("Cannot connect to redis at '{}'", url))?;

        Ok(RedisCounters { connection })
    }

    /// Returns a handle to the shared multiplexed connection.
    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

/// Computes the **stop** index of a **ZREVRANGE** which yields at most **n** members.
fn stop_index(n: usize) -> isize {
    if n >= isize::MAX as usize {
        -1
    } else {
        n as isize - 1
    }
}

/// Computes the scratch key which receives the union of the given sets.
fn union_key(sets: &[String]) -> String {
    format!("union:{}", sets.iter().join("|"))
}

#[async_trait]
impl CounterStore for RedisCounters {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn increment_by(&self, key: &str, count: i64) -> anyhow::Result<i64> {
        Ok(redis::cmd("INCRBY")
            .arg(key)
            .arg(count)
            .query_async::<_, i64>(&mut self.connection())
            .await?)
    }

    async fn get(&self, key: &str) -> anyhow::Result<i64> {
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<i64>>(&mut self.connection())
            .await?;

        Ok(value.unwrap_or(0))
    }

    async fn increase_score(&self, set: &str, member: &str, count: i64) -> anyhow::Result<()> {
        Ok(redis::cmd("ZINCRBY")
            .arg(set)
            .arg(count)
            .arg(member)
            .query_async::<_, ()>(&mut self.connection())
            .await?)
    }

    async fn top_n(&self, set: &str, n: usize) -> anyhow::Result<Vec<(String, i64)>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        Ok(redis::cmd("ZREVRANGE")
            .arg(set)
            .arg(0)
            .arg(stop_index(n))
            .arg("WITHSCORES")
            .query_async::<_, Vec<(String, i64)>>(&mut self.connection())
            .await?)
    }

    async fn cardinality(&self, set: &str) -> anyhow::Result<usize> {
        Ok(redis::cmd("ZCARD")
            .arg(set)
            .query_async::<_, usize>(&mut self.connection())
            .await?)
    }

    async fn score(&self, set: &str, member: &str) -> anyhow::Result<Option<i64>> {
        Ok(redis::cmd("ZSCORE")
            .arg(set)
            .arg(member)
            .query_async::<_, Option<i64>>(&mut self.connection())
            .await?)
    }

    async fn bottom(&self, set: &str) -> anyhow::Result<Option<(String, i64)>> {
        let lowest = redis::cmd("ZRANGE")
            .arg(set)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async::<_, Vec<(String, i64)>>(&mut self.connection())
            .await?;

        Ok(lowest.into_iter().next())
    }

    /// Computes the union within a **MULTI/EXEC** block, so that concurrent merges of the same
    /// sets never observe the scratch key of one another.
    async fn merge_top_k(&self, sets: &[String], k: usize) -> anyhow::Result<Vec<(String, i64)>> {
        if sets.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let destination = union_key(sets);
        let (merged,) = redis::pipe()
            .atomic()
            .cmd("ZUNIONSTORE")
            .arg(&destination)
            .arg(sets.len())
            .arg(sets)
            .ignore()
            .cmd("ZREVRANGE")
            .arg(&destination)
            .arg(0)
            .arg(stop_index(k))
            .arg("WITHSCORES")
            .cmd("DEL")
            .arg(&destination)
            .ignore()
            .query_async::<_, (Vec<(String, i64)>,)>(&mut self.connection())
            .await?;

        Ok(merged)
    }

    async fn apply(&self, increments: &[Increment]) -> anyhow::Result<()> {
        let mut pipe = redis::pipe();
        let _ = pipe.atomic();
        for increment in increments {
            match increment {
                Increment::Counter { key, count } => {
                    let _ = pipe.cmd("INCRBY").arg(key).arg(*count).ignore();
                }
                Increment::Score { set, member, count } => {
                    let _ = pipe
                        .cmd("ZINCRBY")
                        .arg(set)
                        .arg(*count)
                        .arg(member)
                        .ignore();
                }
            }
        }

        Ok(pipe.query_async::<_, ()>(&mut self.connection()).await?)
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut self.connection())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::counters::redis::{stop_index, union_key, RedisCounters};
    use crate::counters::CounterStore;
    use crate::testing::test_async;

    #[test]
    fn stop_index_covers_unlimited_ranges() {
        assert_eq!(stop_index(1), 0);
        assert_eq!(stop_index(10), 9);
        assert_eq!(stop_index(usize::MAX), -1);
    }

    #[test]
    fn union_keys_name_all_sets() {
        assert_eq!(
            union_key(&["keywords:1".to_owned(), "keywords:3".to_owned()]),
            "union:keywords:1|keywords:3"
        );
    }

    #[test]
    fn invalid_urls_are_rejected() {
        test_async(async {
            assert_eq!(RedisCounters::open("not a url").await.is_err(), true);
        });
    }

    /// Requires a Redis server on localhost whose database 15 may be flushed.
    #[test]
    #[ignore]
    fn counters_are_stored_in_redis() {
        test_async(async {
            let store = RedisCounters::open("redis://127.0.0.1/15").await.unwrap();
            store.flush().await.unwrap();

            assert_eq!(store.increment_by("candidate:1", 3).await.unwrap(), 3);
            assert_eq!(store.get("candidate:1").await.unwrap(), 3);
            assert_eq!(store.get("candidate:2").await.unwrap(), 0);

            store.increase_score("keywords:1", "jobs", 3).await.unwrap();
            store.increase_score("keywords:2", "jobs", 1).await.unwrap();
            store.increase_score("keywords:2", "parks", 2).await.unwrap();
            assert_eq!(
                store.top_n("keywords:2", 10).await.unwrap(),
                vec![("parks".to_owned(), 2), ("jobs".to_owned(), 1)]
            );
            assert_eq!(
                store
                    .merge_top_k(&["keywords:1".to_owned(), "keywords:2".to_owned()], 1)
                    .await
                    .unwrap(),
                vec![("jobs".to_owned(), 4)]
            );

            assert_eq!(store.cardinality("keywords:2").await.unwrap(), 2);
            assert_eq!(store.score("keywords:2", "jobs").await.unwrap(), Some(1));
            assert_eq!(store.score("keywords:2", "taxes").await.unwrap(), None);
            assert_eq!(
                store.bottom("keywords:2").await.unwrap(),
                Some(("jobs".to_owned(), 1))
            );
            assert_eq!(store.bottom("keywords:3").await.unwrap(), None);

            store.flush().await.unwrap();
        });
    }

    /// Requires a Redis server on localhost whose database 14 may be flushed.
    #[test]
    #[ignore]
    fn concurrent_merges_see_all_keywords() {
        test_async(async {
            let store = Arc::new(RedisCounters::open("redis://127.0.0.1/14").await.unwrap());
            store.flush().await.unwrap();
            store.increase_score("keywords:1", "jobs", 3).await.unwrap();
            store.increase_score("keywords:2", "parks", 2).await.unwrap();

            let sets = vec!["keywords:1".to_owned(), "keywords:2".to_owned()];
            let mut merges = Vec::new();
            for _ in 0..32 {
                let store = store.clone();
                let sets = sets.clone();
                merges.push(tokio::spawn(
                    async move { store.merge_top_k(&sets, 10).await },
                ));
            }

            for merge in merges {
                assert_eq!(
                    merge.await.unwrap().unwrap(),
                    vec![("jobs".to_owned(), 3), ("parks".to_owned(), 2)]
                );
            }

            // The scratch key never outlives a merge...
            assert_eq!(store.top_n(&union_key(&sets), 10).await.unwrap(), Vec::new());

            store.flush().await.unwrap();
        });
    }
}

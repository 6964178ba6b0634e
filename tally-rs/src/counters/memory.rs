//! Keeps all counters and ranked sets within the process.
//!
//! Everything lives in a single map guarded by a mutex. As a vote touches eight keys, holding the
//! lock once per vote (see [apply](MemoryCounters::apply)) makes the whole vote visible at once.
//!
//! Ranked sets remember when a member was first seen. Members with equal scores are reported in
//! this order, which keeps rankings stable across reads.
use std::sync::Mutex;

use async_trait::async_trait;
use fnv::FnvHashMap;

use crate::counters::{CounterStore, Increment};

/// A ranked set which orders its members by score (descending) and by first appearance.
#[derive(Default)]
struct RankedSet {
    members: FnvHashMap<String, (i64, u64)>,
    next_sequence: u64,
}

impl RankedSet {
    fn increase(&mut self, member: &str, count: i64) {
        if let Some((score, _)) = self.members.get_mut(member) {
            *score += count;
        } else {
            let _ = self
                .members
                .insert(member.to_owned(), (count, self.next_sequence));
            self.next_sequence += 1;
        }
    }

    fn ranked(&self) -> Vec<(&String, i64)> {
        let mut entries = self.members.iter().collect::<Vec<_>>();
        entries.sort_by(|(_, (left_score, left_seq)), (_, (right_score, right_seq))| {
            right_score
                .cmp(left_score)
                .then_with(|| left_seq.cmp(right_seq))
        });

        entries
            .into_iter()
            .map(|(member, (score, _))| (member, *score))
            .collect()
    }

    /// Returns the member which [ranked](RankedSet::ranked) would report last.
    fn last(&self) -> Option<(&String, i64)> {
        self.members
            .iter()
            .min_by(|(_, (left_score, left_seq)), (_, (right_score, right_seq))| {
                left_score
                    .cmp(right_score)
                    .then_with(|| right_seq.cmp(left_seq))
            })
            .map(|(member, (score, _))| (member, *score))
    }
}

#[derive(Default)]
struct State {
    counters: FnvHashMap<String, i64>,
    sets: FnvHashMap<String, RankedSet>,
}

impl State {
    fn increment_by(&mut self, key: &str, count: i64) -> i64 {
        let value = self.counters.entry(key.to_owned()).or_insert(0);
        *value += count;
        *value
    }

    fn increase_score(&mut self, set: &str, member: &str, count: i64) {
        self.sets
            .entry(set.to_owned())
            .or_default()
            .increase(member, count);
    }
}

/// Provides the **memory** counter backend.
#[derive(Default)]
pub struct MemoryCounters {
    state: Mutex<State>,
}

impl MemoryCounters {
    /// Creates an empty store.
    pub fn new() -> Self {
        MemoryCounters::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn increment_by(&self, key: &str, count: i64) -> anyhow::Result<i64> {
        Ok(self.state.lock().unwrap().increment_by(key, count))
    }

    async fn get(&self, key: &str) -> anyhow::Result<i64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .counters
            .get(key)
            .copied()
            .unwrap_or(0))
    }

    async fn increase_score(&self, set: &str, member: &str, count: i64) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .increase_score(set, member, count);
        Ok(())
    }

    async fn top_n(&self, set: &str, n: usize) -> anyhow::Result<Vec<(String, i64)>> {
        let state = self.state.lock().unwrap();
        Ok(match state.sets.get(set) {
            Some(ranked_set) => ranked_set
                .ranked()
                .into_iter()
                .take(n)
                .map(|(member, score)| (member.clone(), score))
                .collect(),
            None => Vec::new(),
        })
    }

    async fn cardinality(&self, set: &str) -> anyhow::Result<usize> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sets
            .get(set)
            .map(|ranked_set| ranked_set.members.len())
            .unwrap_or(0))
    }

    async fn score(&self, set: &str, member: &str) -> anyhow::Result<Option<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sets
            .get(set)
            .and_then(|ranked_set| ranked_set.members.get(member))
            .map(|(score, _)| *score))
    }

    async fn bottom(&self, set: &str) -> anyhow::Result<Option<(String, i64)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sets
            .get(set)
            .and_then(|ranked_set| ranked_set.last())
            .map(|(member, score)| (member.clone(), score)))
    }

    async fn merge_top_k(&self, sets: &[String], k: usize) -> anyhow::Result<Vec<(String, i64)>> {
        let state = self.state.lock().unwrap();

        // Members keep the position of their first appearance, which then acts as tie-break...
        let mut positions = FnvHashMap::<&String, usize>::default();
        let mut merged = Vec::<(String, i64)>::new();
        for ranked_set in sets.iter().filter_map(|set| state.sets.get(set)) {
            for (member, score) in ranked_set.ranked() {
                match positions.get(member) {
                    Some(position) => merged[*position].1 += score,
                    None => {
                        let _ = positions.insert(member, merged.len());
                        merged.push((member.clone(), score));
                    }
                }
            }
        }

        merged.sort_by(|(_, left), (_, right)| right.cmp(left));
        merged.truncate(k);

        Ok(merged)
    }

    async fn apply(&self, increments: &[Increment]) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        for increment in increments {
            match increment {
                Increment::Counter { key, count } => {
                    let _ = state.increment_by(key, *count);
                }
                Increment::Score { set, member, count } => {
                    state.increase_score(set, member, *count)
                }
            }
        }

        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.clear();
        state.sets.clear();

        Ok(())
    }
}

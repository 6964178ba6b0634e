//! Computes the rankings shown on the pages.
//!
//! The [RankingAggregator] combines the reference data (candidates and parties, which never
//! change and are therefore loaded once) with the vote totals provided by a [TallySource]. There
//! are two sources:
//! * **direct**: The [Ledger](crate::ledger::Ledger) aggregates the votes table on each request.
//! * **cached**: The [CounterCache](crate::counters::CounterCache) reads its counters and ranked
//!   sets.
//!
//! Both yield the same totals for the same votes. The only difference is the order of candidates
//! (or keywords) having the same number of votes, which depends on the source.
//!
//! # Configuration
//! ```yaml
//! rankings:
//!     strategy: cached
//! ```
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use itertools::Itertools;

use crate::config::Config;
use crate::counters::CounterCache;
use crate::ledger::Ledger;
use crate::model::{Candidate, CandidateDetail, PartyDetail, RankedCandidate, SexTotals};
use crate::platform::Platform;

/// Determines how many candidates make up the top section of the home page.
pub const TOP_CANDIDATES: usize = 10;

/// Determines how many supporting keywords are shown for a candidate or party.
pub const TOP_KEYWORDS: usize = 10;

/// Provides the raw vote totals a [RankingAggregator] is built upon.
///
/// All rankings are ordered by votes (descending). Entries with equal votes are ordered in a
/// stable but source specific way.
#[async_trait]
pub trait TallySource: Send + Sync {
    /// Returns the name of the strategy as used in the config.
    fn name(&self) -> &'static str;

    /// Returns up to **limit** candidate ids along with their votes, most votes first.
    async fn top_candidates(&self, limit: usize) -> anyhow::Result<Vec<(i64, i64)>>;

    /// Returns the number of candidates which received a vote (even with a count of 0).
    async fn ranked_count(&self) -> anyhow::Result<usize>;

    /// Determines if the given candidate received a vote (even with a count of 0).
    async fn is_ranked(&self, candidate_id: i64) -> anyhow::Result<bool>;

    /// Returns the candidate which [top_candidates](TallySource::top_candidates) would report
    /// last when asked for all of them.
    async fn last_candidate(&self) -> anyhow::Result<Option<(i64, i64)>>;

    /// Returns the number of votes of a candidate.
    async fn candidate_votes(&self, candidate_id: i64) -> anyhow::Result<i64>;

    /// Returns the number of votes cast by a voter.
    async fn voter_votes(&self, voter_id: i64) -> anyhow::Result<i64>;

    /// Returns the number of votes of all candidates of a party.
    async fn party_votes(&self, party: &str) -> anyhow::Result<i64>;

    /// Returns the totals of all parties which received a vote, most votes first.
    async fn party_totals(&self) -> anyhow::Result<Vec<(String, i64)>>;

    /// Returns the votes per sex category.
    async fn sex_totals(&self) -> anyhow::Result<SexTotals>;

    /// Returns the most frequent keywords given by supporters of any of the given candidates.
    async fn keywords(&self, candidate_ids: &[i64], limit: usize) -> anyhow::Result<Vec<String>>;
}

/// Computes the rankings and details shown on the pages.
pub struct RankingAggregator {
    candidates: Vec<Candidate>,
    parties: Vec<String>,
    source: Arc<dyn TallySource>,
}

impl RankingAggregator {
    /// Creates an aggregator for the given candidates which reads its totals from **source**.
    pub fn new(mut candidates: Vec<Candidate>, source: Arc<dyn TallySource>) -> Self {
        candidates.sort_by_key(|candidate| candidate.id);
        let parties = candidates
            .iter()
            .map(|candidate| candidate.political_party.clone())
            .sorted()
            .dedup()
            .collect();

        RankingAggregator {
            candidates,
            parties,
            source,
        }
    }

    /// Returns the name of the strategy being used.
    pub fn strategy(&self) -> &'static str {
        self.source.name()
    }

    /// Returns all candidates ordered by id.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Returns all distinct parties ordered by name.
    pub fn parties(&self) -> &[String] {
        &self.parties
    }

    /// Looks up a candidate by id.
    pub fn find_candidate(&self, id: i64) -> Option<&Candidate> {
        self.candidates
            .binary_search_by_key(&id, |candidate| candidate.id)
            .ok()
            .map(|index| &self.candidates[index])
    }

    /// Looks up a candidate by an exact match of its name.
    pub fn find_candidate_by_name(&self, name: &str) -> Option<&Candidate> {
        self.candidates
            .iter()
            .find(|candidate| candidate.name == name)
    }

    /// Computes the ranking shown on the home page.
    ///
    /// This contains the [TOP_CANDIDATES] candidates with the most votes. If fewer candidates
    /// received a vote, the remaining places are filled up with candidates without votes (by
    /// id). The ranking is then completed by one more candidate which represents the current last
    /// place: the first candidate (by id) which has not received any vote, or if all candidates
    /// received a vote, the one with the fewest votes. If all candidates are already shown,
    /// nothing is added.
    pub async fn home_ranking(&self) -> anyhow::Result<Vec<RankedCandidate>> {
        let mut result = self.resolve(self.source.top_candidates(TOP_CANDIDATES).await?);
        let ranked_count = self.source.ranked_count().await?;

        // If the top section already holds every ranked candidate, all others are unranked...
        if ranked_count <= result.len() {
            let top_ids = result
                .iter()
                .map(|entry| entry.candidate.id)
                .collect::<Vec<_>>();
            let mut unranked = self
                .candidates
                .iter()
                .filter(|candidate| !top_ids.contains(&candidate.id));

            while result.len() <= TOP_CANDIDATES {
                match unranked.next() {
                    Some(candidate) => result.push(RankedCandidate::without_votes(candidate)),
                    None => break,
                }
            }

            return Ok(result);
        }

        if ranked_count < self.candidates.len() {
            for candidate in &self.candidates {
                if !result.iter().any(|entry| entry.candidate.id == candidate.id)
                    && !self.source.is_ranked(candidate.id).await?
                {
                    result.push(RankedCandidate::without_votes(candidate));
                    return Ok(result);
                }
            }
        }

        if let Some(last) = self.source.last_candidate().await? {
            result.extend(self.resolve(vec![last]));
        }

        Ok(result)
    }

    /// Maps candidate ids along with their votes to the known candidates.
    fn resolve(&self, totals: Vec<(i64, i64)>) -> Vec<RankedCandidate> {
        totals
            .into_iter()
            .filter_map(|(id, votes)| {
                self.find_candidate(id).map(|candidate| RankedCandidate {
                    candidate: candidate.clone(),
                    votes,
                })
            })
            .collect()
    }

    /// Computes the votes of all parties, including those without any votes.
    ///
    /// The result is ordered by votes (descending) and then by name.
    pub async fn party_totals(&self) -> anyhow::Result<Vec<(String, i64)>> {
        let totals = self.source.party_totals().await?;
        let mut result = self
            .parties
            .iter()
            .map(|party| {
                let votes = totals
                    .iter()
                    .find(|(name, _)| name == party)
                    .map(|(_, votes)| *votes)
                    .unwrap_or(0);
                (party.clone(), votes)
            })
            .collect::<Vec<_>>();
        result.sort_by(|(left_name, left_votes), (right_name, right_votes)| {
            right_votes
                .cmp(left_votes)
                .then_with(|| left_name.cmp(right_name))
        });

        Ok(result)
    }

    /// Computes the votes per sex category.
    pub async fn sex_totals(&self) -> anyhow::Result<SexTotals> {
        self.source.sex_totals().await
    }

    /// Computes the details of a candidate or returns **None** if the id is unknown.
    pub async fn candidate_detail(&self, id: i64) -> anyhow::Result<Option<CandidateDetail>> {
        let candidate = match self.find_candidate(id) {
            Some(candidate) => candidate.clone(),
            None => return Ok(None),
        };

        let votes = self.source.candidate_votes(id).await?;
        let keywords = self.source.keywords(&[id], TOP_KEYWORDS).await?;

        Ok(Some(CandidateDetail {
            candidate,
            votes,
            keywords,
        }))
    }

    /// Computes the details of a party.
    ///
    /// An unknown party yields an empty result (no votes, no candidates and no keywords).
    pub async fn party_detail(&self, name: &str) -> anyhow::Result<PartyDetail> {
        let candidates = self
            .candidates
            .iter()
            .filter(|candidate| candidate.political_party == name)
            .cloned()
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return Ok(PartyDetail {
                name: name.to_owned(),
                votes: 0,
                candidates,
                keywords: Vec::new(),
            });
        }

        let candidate_ids = candidates
            .iter()
            .map(|candidate| candidate.id)
            .collect::<Vec<_>>();
        let votes = self.source.party_votes(name).await?;
        let keywords = self.source.keywords(&candidate_ids, TOP_KEYWORDS).await?;

        Ok(PartyDetail {
            name: name.to_owned(),
            votes,
            candidates,
            keywords,
        })
    }

    /// Returns the number of votes already cast by the given voter.
    pub async fn votes_cast_by(&self, voter_id: i64) -> anyhow::Result<i64> {
        self.source.voter_votes(voter_id).await
    }
}

/// Creates the ranking aggregator as configured and installs it into the given platform.
///
/// Requires a [Ledger] to be installed. The strategy is selected via **rankings.strategy**. If the
/// **cached** strategy is selected but no [CounterCache] is available, the **direct** strategy is
/// used instead.
pub async fn install(platform: &Arc<Platform>) -> anyhow::Result<Arc<RankingAggregator>> {
    let ledger = platform
        .find::<Ledger>()
        .context("A ledger is required to compute rankings")?;

    let strategy = platform
        .find::<Config>()
        .map(|config| config.current().str_or("rankings.strategy", "cached"))
        .unwrap_or_else(|| "cached".to_owned());

    let source: Arc<dyn TallySource> = match strategy.as_str() {
        "direct" => ledger.clone(),
        "cached" => match platform.find::<CounterCache>() {
            Some(cache) => cache,
            None => {
                log::warn!(
                    "The cached ranking strategy requires a counter cache. Using the direct strategy..."
                );
                ledger.clone()
            }
        },
        other => return Err(anyhow::anyhow!("Unknown ranking strategy: '{}'", other)),
    };

    let aggregator = Arc::new(RankingAggregator::new(ledger.candidates().await?, source));
    log::info!(
        "Computing rankings for {} candidates using the {} strategy.",
        aggregator.candidates().len(),
        aggregator.strategy()
    );

    platform.register::<RankingAggregator>(aggregator.clone());

    Ok(aggregator)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::counters::memory::MemoryCounters;
    use crate::counters::CounterCache;
    use crate::ledger::Ledger;
    use crate::model::{Candidate, Sex, SexTotals, Vote};
    use crate::ranking::{install, RankingAggregator, TallySource, TOP_CANDIDATES};
    use crate::testing::{configured_platform, seeded_ledger, test_async};

    /// Records the given votes in a ledger and a cache and returns an aggregator for each.
    async fn aggregators(votes: &[(i64, usize, &str, i64)]) -> Vec<RankingAggregator> {
        let ledger = seeded_ledger().await;
        let cache = Arc::new(CounterCache::new(Box::new(MemoryCounters::new())));
        let candidates = ledger.candidates().await.unwrap();

        for (voter, candidate, keyword, count) in votes {
            let vote = Vote::new(*voter, &candidates[*candidate], *keyword, *count);
            ledger.record(&vote).await.unwrap();
            cache.record_vote(&vote).await.unwrap();
        }

        vec![
            RankingAggregator::new(candidates.clone(), ledger as Arc<dyn TallySource>),
            RankingAggregator::new(candidates, cache as Arc<dyn TallySource>),
        ]
    }

    fn many_candidates(count: i64) -> Vec<Candidate> {
        (1..=count)
            .map(|id| Candidate {
                id,
                name: format!("Candidate {}", id),
                political_party: (if id % 2 == 0 { "Even" } else { "Odd" }).to_owned(),
                sex: if id % 3 == 0 { Sex::Male } else { Sex::Female },
            })
            .collect()
    }

    #[test]
    fn both_strategies_agree_on_totals() {
        test_async(async {
            for aggregator in aggregators(&[
                (1, 0, "jobs", 3),
                (2, 2, "parks", 2),
                (2, 1, "parks", 4),
                (2, 0, "taxes", 2),
            ])
            .await
            {
                let ranking = aggregator.home_ranking().await.unwrap();
                assert_eq!(ranking[0].candidate.name, "Bob");
                assert_eq!(ranking[0].votes, 5);
                assert_eq!(ranking[1].candidate.name, "Carol");
                assert_eq!(ranking[2].candidate.name, "Dave");
                // Erin never received a vote...
                assert_eq!(ranking.len(), 4);
                assert_eq!(ranking[3].candidate.name, "Erin");
                assert_eq!(ranking[3].votes, 0);

                assert_eq!(
                    aggregator.party_totals().await.unwrap(),
                    vec![
                        ("Green".to_owned(), 7),
                        ("Blue".to_owned(), 4),
                        ("Red".to_owned(), 0)
                    ]
                );

                let sexes = aggregator.sex_totals().await.unwrap();
                assert_eq!(sexes.female, 9);
                assert_eq!(sexes.male, 2);

                assert_eq!(aggregator.votes_cast_by(2).await.unwrap(), 8);
                assert_eq!(aggregator.votes_cast_by(3).await.unwrap(), 0);
            }
        });
    }

    #[test]
    fn an_empty_ledger_yields_zero_totals() {
        test_async(async {
            for aggregator in aggregators(&[]).await {
                let ranking = aggregator.home_ranking().await.unwrap();
                assert_eq!(
                    ranking
                        .iter()
                        .map(|entry| (entry.candidate.id, entry.votes))
                        .collect::<Vec<_>>(),
                    vec![(1, 0), (2, 0), (3, 0), (4, 0)]
                );

                let parties = aggregator.party_totals().await.unwrap();
                assert_eq!(parties.len(), 3);
                assert_eq!(parties.iter().all(|(_, votes)| *votes == 0), true);
                assert_eq!(parties[0].0, "Blue");

                assert_eq!(aggregator.sex_totals().await.unwrap().male, 0);
                assert_eq!(aggregator.sex_totals().await.unwrap().female, 0);
            }
        });
    }

    #[test]
    fn a_single_vote_makes_its_candidate_the_leader() {
        test_async(async {
            for aggregator in aggregators(&[(1, 3, "jobs", 1)]).await {
                let ranking = aggregator.home_ranking().await.unwrap();
                assert_eq!(ranking[0].candidate.name, "Erin");
                assert_eq!(ranking[0].votes, 1);
                assert_eq!(ranking[1..].iter().all(|entry| entry.votes == 0), true);
            }
        });
    }

    #[test]
    fn details_contain_votes_and_keywords() {
        test_async(async {
            for aggregator in aggregators(&[
                (1, 0, "jobs", 3),
                (2, 0, "parks", 1),
                (2, 2, "parks", 5),
                (2, 2, "taxes", 1),
            ])
            .await
            {
                let bob = aggregator.candidate_detail(1).await.unwrap().unwrap();
                assert_eq!(bob.candidate.name, "Bob");
                assert_eq!(bob.votes, 4);
                assert_eq!(bob.keywords, vec!["jobs", "parks"]);

                assert_eq!(aggregator.candidate_detail(99).await.unwrap().is_none(), true);

                let green = aggregator.party_detail("Green").await.unwrap();
                assert_eq!(green.votes, 10);
                assert_eq!(
                    green
                        .candidates
                        .iter()
                        .map(|candidate| candidate.name.as_str())
                        .collect::<Vec<_>>(),
                    vec!["Bob", "Dave"]
                );
                assert_eq!(green.keywords, vec!["parks", "jobs", "taxes"]);

                let unknown = aggregator.party_detail("Purple").await.unwrap();
                assert_eq!(unknown.votes, 0);
                assert_eq!(unknown.candidates.is_empty(), true);
                assert_eq!(unknown.keywords.is_empty(), true);
            }
        });
    }

    /// Forwards to another source and remembers the largest ranking requested from it.
    struct LimitRecorder {
        inner: Arc<dyn TallySource>,
        largest_limit: AtomicUsize,
    }

    #[async_trait]
    impl TallySource for LimitRecorder {
        fn name(&self) -> &'static str {
            self.inner.name()
        }

        async fn top_candidates(&self, limit: usize) -> anyhow::Result<Vec<(i64, i64)>> {
            let _ = self.largest_limit.fetch_max(limit, Ordering::SeqCst);
            self.inner.top_candidates(limit).await
        }

        async fn ranked_count(&self) -> anyhow::Result<usize> {
            self.inner.ranked_count().await
        }

        async fn is_ranked(&self, candidate_id: i64) -> anyhow::Result<bool> {
            self.inner.is_ranked(candidate_id).await
        }

        async fn last_candidate(&self) -> anyhow::Result<Option<(i64, i64)>> {
            self.inner.last_candidate().await
        }

        async fn candidate_votes(&self, candidate_id: i64) -> anyhow::Result<i64> {
            self.inner.candidate_votes(candidate_id).await
        }

        async fn voter_votes(&self, voter_id: i64) -> anyhow::Result<i64> {
            self.inner.voter_votes(voter_id).await
        }

        async fn party_votes(&self, party: &str) -> anyhow::Result<i64> {
            self.inner.party_votes(party).await
        }

        async fn party_totals(&self) -> anyhow::Result<Vec<(String, i64)>> {
            self.inner.party_totals().await
        }

        async fn sex_totals(&self) -> anyhow::Result<SexTotals> {
            self.inner.sex_totals().await
        }

        async fn keywords(
            &self,
            candidate_ids: &[i64],
            limit: usize,
        ) -> anyhow::Result<Vec<String>> {
            self.inner.keywords(candidate_ids, limit).await
        }
    }

    #[test]
    fn home_ranking_appends_the_last_place() {
        test_async(async {
            let ledger = Arc::new(Ledger::open(":memory:", 1).unwrap());
            ledger.ensure_schema().await.unwrap();
            let cache = Arc::new(CounterCache::new(Box::new(MemoryCounters::new())));
            let candidates = many_candidates(14);
            for candidate in &candidates {
                ledger.insert_candidate(candidate.clone()).await.unwrap();
            }

            let record = |candidate: &Candidate| {
                let vote = Vote::new(1, candidate, "jobs", candidate.id);
                let ledger = ledger.clone();
                let cache = cache.clone();
                async move {
                    ledger.record(&vote).await.unwrap();
                    cache.record_vote(&vote).await.unwrap();
                }
            };

            let recorders = vec![
                Arc::new(LimitRecorder {
                    inner: ledger.clone(),
                    largest_limit: AtomicUsize::new(0),
                }),
                Arc::new(LimitRecorder {
                    inner: cache.clone(),
                    largest_limit: AtomicUsize::new(0),
                }),
            ];
            let aggregators = recorders
                .iter()
                .map(|recorder| {
                    RankingAggregator::new(
                        candidates.clone(),
                        recorder.clone() as Arc<dyn TallySource>,
                    )
                })
                .collect::<Vec<_>>();

            // Candidates 2..=13 receive votes, 1 and 14 don't...
            for candidate in &candidates[1..13] {
                record(candidate).await;
            }

            for aggregator in &aggregators {
                let ranking = aggregator.home_ranking().await.unwrap();
                assert_eq!(ranking.len(), 11);
                assert_eq!(
                    ranking[..10]
                        .iter()
                        .map(|entry| entry.candidate.id)
                        .collect::<Vec<_>>(),
                    vec![13, 12, 11, 10, 9, 8, 7, 6, 5, 4]
                );
                assert_eq!(ranking[10].candidate.id, 1);
                assert_eq!(ranking[10].votes, 0);
                assert_eq!(
                    ranking.windows(2).all(|pair| pair[0].votes >= pair[1].votes),
                    true
                );
            }

            // Once everybody received a vote, the candidate with the fewest votes is appended...
            for candidate in [&candidates[0], &candidates[13]] {
                record(candidate).await;
            }
            for aggregator in &aggregators {
                let ranking = aggregator.home_ranking().await.unwrap();
                assert_eq!(ranking.len(), 11);
                assert_eq!(ranking[0].candidate.id, 14);
                assert_eq!(ranking[10].candidate.id, 1);
                assert_eq!(ranking[10].votes, 1);
                assert_eq!(
                    ranking[..10]
                        .iter()
                        .any(|entry| entry.candidate.id == ranking[10].candidate.id),
                    false
                );
            }

            // The ranking never reads more than the top section from its source...
            for recorder in &recorders {
                assert_eq!(
                    recorder.largest_limit.load(Ordering::SeqCst),
                    TOP_CANDIDATES
                );
            }
        });
    }

    fn store_config(backend: &str, strategy: &str) -> String {
        format!(
            "database:\n    path: ':memory:'\ncounters:\n    backend: {}\nrankings:\n    strategy: {}\n",
            backend, strategy
        )
    }

    #[test]
    fn the_configured_strategy_is_installed() {
        test_async(async {
            for (backend, strategy, has_cache, expected_strategy) in [
                ("memory", "cached", true, "cached"),
                ("memory", "direct", true, "direct"),
                ("none", "direct", false, "direct"),
                // Without counters, the cached strategy falls back to the ledger...
                ("none", "cached", false, "direct"),
            ] {
                let platform = configured_platform(&store_config(backend, strategy)).await;
                let _ = crate::ledger::install(&platform).await.unwrap();
                let cache = crate::counters::install(&platform).await.unwrap();
                assert_eq!(cache.is_some(), has_cache);
                assert_eq!(platform.find::<CounterCache>().is_some(), has_cache);

                let aggregator = install(&platform).await.unwrap();
                assert_eq!(aggregator.strategy(), expected_strategy);
                assert_eq!(
                    platform.require::<RankingAggregator>().strategy(),
                    expected_strategy
                );
            }
        });
    }

    #[test]
    fn an_unknown_strategy_is_rejected() {
        test_async(async {
            let platform = configured_platform(&store_config("memory", "bogus")).await;
            let _ = crate::ledger::install(&platform).await.unwrap();
            let _ = crate::counters::install(&platform).await.unwrap();

            match install(&platform).await {
                Ok(_) => panic!("An unknown strategy must not be installed"),
                Err(error) => assert_eq!(error.to_string(), "Unknown ranking strategy: 'bogus'"),
            }
            assert_eq!(platform.find::<RankingAggregator>().is_none(), true);
        });
    }

    #[test]
    fn rankings_require_a_ledger() {
        test_async(async {
            let platform = configured_platform(&store_config("memory", "cached")).await;
            assert_eq!(install(&platform).await.is_err(), true);
        });
    }

    #[test]
    fn candidates_can_be_looked_up() {
        let aggregator = RankingAggregator::new(
            many_candidates(3).into_iter().rev().collect(),
            Arc::new(CounterCache::new(Box::new(MemoryCounters::new()))),
        );

        assert_eq!(aggregator.candidates()[0].id, 1);
        assert_eq!(aggregator.find_candidate(2).unwrap().name, "Candidate 2");
        assert_eq!(aggregator.find_candidate(4).is_none(), true);
        assert_eq!(
            aggregator.find_candidate_by_name("Candidate 3").unwrap().id,
            3
        );
        assert_eq!(aggregator.find_candidate_by_name("Nobody").is_none(), true);
        assert_eq!(aggregator.parties(), &["Even".to_owned(), "Odd".to_owned()]);
        assert_eq!(aggregator.strategy(), "cached");
    }
}

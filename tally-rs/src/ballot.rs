//! Records votes and resets the election.
//!
//! The [BallotBox] validates a submission and, if it is accepted, writes the vote into the
//! [Ledger] and then into the [CounterCache] (if one is installed). These two writes are not
//! covered by a common transaction. If updating the cache fails, the vote remains in the ledger
//! and the error is reported. The cache then lags behind until it is rebuilt.
//!
//! Submissions of the same voter are not serialized. Two concurrent submissions might therefore
//! both pass the quota check.
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use crate::counters::CounterCache;
use crate::ledger::Ledger;
use crate::model::{Candidate, Voter};
use crate::platform::Platform;
use crate::ranking::RankingAggregator;
use crate::validator::{validate, Electorate, Submission, Verdict, VoteMessage};

/// Accepts votes and resets the recorded state.
pub struct BallotBox {
    ledger: Arc<Ledger>,
    counters: Option<Arc<CounterCache>>,
    rankings: Arc<RankingAggregator>,
}

impl BallotBox {
    /// Creates a ballot box on top of the given stores.
    pub fn new(
        ledger: Arc<Ledger>,
        counters: Option<Arc<CounterCache>>,
        rankings: Arc<RankingAggregator>,
    ) -> Self {
        BallotBox {
            ledger,
            counters,
            rankings,
        }
    }

    /// Provides access to the rankings, which also know all candidates.
    pub fn rankings(&self) -> &Arc<RankingAggregator> {
        &self.rankings
    }

    /// Validates and records the given submission.
    ///
    /// Returns the message to show. Errors are only reported if a store fails.
    pub async fn submit(&self, submission: &Submission) -> anyhow::Result<VoteMessage> {
        let vote = match validate(submission, self).await? {
            Verdict::Accepted(vote) => vote,
            Verdict::Rejected(message) => {
                log::debug!("Rejected a vote: {:?}", message);
                return Ok(message);
            }
        };

        self.ledger.record(&vote).await?;
        if let Some(counters) = &self.counters {
            counters.record_vote(&vote).await?;
        }

        Ok(VoteMessage::Success)
    }

    /// Removes all votes from the ledger and the counter cache.
    ///
    /// This is not synchronized with votes being submitted concurrently.
    pub async fn reset(&self) -> anyhow::Result<()> {
        self.ledger.reset().await?;
        if let Some(counters) = &self.counters {
            counters.clear().await?;
        }

        log::info!("The election has been reset.");

        Ok(())
    }
}

#[async_trait]
impl Electorate for BallotBox {
    async fn find_voter(
        &self,
        name: &str,
        address: &str,
        mynumber: &str,
    ) -> anyhow::Result<Option<Voter>> {
        self.ledger.find_voter(name, address, mynumber).await
    }

    async fn votes_cast_by(&self, voter_id: i64) -> anyhow::Result<i64> {
        self.rankings.votes_cast_by(voter_id).await
    }

    fn find_candidate(&self, name: &str) -> Option<Candidate> {
        self.rankings.find_candidate_by_name(name).cloned()
    }
}

/// Creates the ballot box and installs it into the given platform.
///
/// Requires the [Ledger] and the [RankingAggregator] to be installed. The [CounterCache] is
/// optional.
pub fn install(platform: &Arc<Platform>) -> anyhow::Result<Arc<BallotBox>> {
    let ballot_box = Arc::new(BallotBox::new(
        platform
            .find::<Ledger>()
            .context("A ledger is required to record votes")?,
        platform.find::<CounterCache>(),
        platform
            .find::<RankingAggregator>()
            .context("Rankings are required to record votes")?,
    ));

    platform.register::<BallotBox>(ballot_box.clone());

    Ok(ballot_box)
}

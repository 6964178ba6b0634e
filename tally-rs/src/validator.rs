//! Checks vote submissions before they are recorded.
//!
//! A [Submission] is checked in a fixed order and the first failing check determines the
//! outcome:
//! 1. The voter must be known (exact match of name, address and mynumber).
//! 2. The requested votes plus those already cast must not exceed the quota of the voter.
//! 3. A candidate must be given.
//! 4. The candidate must be known (exact match of the name).
//! 5. A keyword (the reason of the vote) must be given.
//!
//! All lookups are performed lazily, so that e.g. the votes already cast are only computed for a
//! known voter. Validation itself has no side effects.
use async_trait::async_trait;
use serde::Deserialize;

use crate::model::{Candidate, Vote, Voter};

/// Contains the fields of the vote form as submitted.
///
/// Missing fields are treated as empty.
#[derive(Deserialize, Default, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Submission {
    /// The name of the voter.
    pub name: String,
    /// The address of the voter.
    pub address: String,
    /// The mynumber of the voter.
    pub mynumber: String,
    /// The name of the candidate.
    pub candidate: String,
    /// The reason of the vote.
    pub keyword: String,
    /// The number of votes as entered. See [parse_count].
    pub vote_count: String,
}

/// Enumerates the messages shown on the vote form.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VoteMessage {
    /// A fresh form without message.
    Empty,
    /// The vote has been recorded.
    Success,
    /// The voter is unknown.
    UnknownVoter,
    /// The voter would exceed the quota.
    QuotaExceeded,
    /// No candidate has been given.
    CandidateMissing,
    /// The candidate is unknown.
    UnknownCandidate,
    /// No keyword has been given.
    KeywordMissing,
}

impl VoteMessage {
    /// Returns the text shown to the user.
    pub fn text(&self) -> &'static str {
        match self {
            VoteMessage::Empty => "",
            VoteMessage::Success => "投票に成功しました",
            VoteMessage::UnknownVoter => "個人情報に誤りがあります",
            VoteMessage::QuotaExceeded => "投票数が上限を超えています",
            VoteMessage::CandidateMissing => "候補者を記入してください",
            VoteMessage::UnknownCandidate => "候補者を正しく記入してください",
            VoteMessage::KeywordMissing => "投票理由を記入してください",
        }
    }

    /// Determines if this message reports a rejected submission.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, VoteMessage::Empty | VoteMessage::Success)
    }
}

/// Represents the outcome of a validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The submission is valid and yields the given vote.
    Accepted(Vote),
    /// The submission is invalid for the given reason.
    Rejected(VoteMessage),
}

/// Provides the lookups required to validate a submission.
#[async_trait]
pub trait Electorate: Send + Sync {
    /// Resolves a voter by an exact match of all three fields.
    async fn find_voter(
        &self,
        name: &str,
        address: &str,
        mynumber: &str,
    ) -> anyhow::Result<Option<Voter>>;

    /// Returns the number of votes already cast by the given voter.
    async fn votes_cast_by(&self, voter_id: i64) -> anyhow::Result<i64>;

    /// Resolves a candidate by an exact match of its name.
    fn find_candidate(&self, name: &str) -> Option<Candidate>;
}

/// Parses the number of votes leniently.
///
/// Leading whitespace and a sign are skipped and as many digits as present are parsed. Anything
/// else yields 0, as do negative numbers. Numbers which are too large saturate.
///
/// # Example
/// ```
/// # use tally::validator::parse_count;
/// assert_eq!(parse_count("3"), 3);
/// assert_eq!(parse_count(" 12 votes"), 12);
/// assert_eq!(parse_count("many"), 0);
/// assert_eq!(parse_count("-4"), 0);
/// ```
pub fn parse_count(value: &str) -> i64 {
    let value = value.trim_start();
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };

    let count = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |count, digit| {
            count
                .saturating_mul(10)
                .saturating_add(i64::from(digit - b'0'))
        });

    if negative {
        0
    } else {
        count
    }
}

/// Validates the given submission.
///
/// Errors are only reported if a lookup fails. An invalid submission yields
/// [Verdict::Rejected].
pub async fn validate(
    submission: &Submission,
    electorate: &dyn Electorate,
) -> anyhow::Result<Verdict> {
    let voter = match electorate
        .find_voter(
            &submission.name,
            &submission.address,
            &submission.mynumber,
        )
        .await?
    {
        Some(voter) => voter,
        None => return Ok(Verdict::Rejected(VoteMessage::UnknownVoter)),
    };

    let count = parse_count(&submission.vote_count);
    let already_cast = electorate.votes_cast_by(voter.id).await?;
    if count.saturating_add(already_cast) > voter.votes {
        return Ok(Verdict::Rejected(VoteMessage::QuotaExceeded));
    }

    if submission.candidate.is_empty() {
        return Ok(Verdict::Rejected(VoteMessage::CandidateMissing));
    }

    let candidate = match electorate.find_candidate(&submission.candidate) {
        Some(candidate) => candidate,
        None => return Ok(Verdict::Rejected(VoteMessage::UnknownCandidate)),
    };

    if submission.keyword.is_empty() {
        return Ok(Verdict::Rejected(VoteMessage::KeywordMissing));
    }

    Ok(Verdict::Accepted(Vote::new(
        voter.id,
        &candidate,
        submission.keyword.as_str(),
        count,
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::model::{Candidate, Sex, Voter};
    use crate::testing::test_async;
    use crate::validator::{
        parse_count, validate, Electorate, Submission, Verdict, VoteMessage,
    };

    /// Knows Alice and Bob and counts every lookup being performed.
    #[derive(Default)]
    struct Recorder {
        already_cast: i64,
        voter_lookups: AtomicUsize,
        quota_lookups: AtomicUsize,
        candidate_lookups: AtomicUsize,
    }

    #[async_trait]
    impl Electorate for Recorder {
        async fn find_voter(
            &self,
            name: &str,
            address: &str,
            mynumber: &str,
        ) -> anyhow::Result<Option<Voter>> {
            let _ = self.voter_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(
                if (name, address, mynumber) == ("Alice", "1 Main St", "123") {
                    Some(Voter {
                        id: 1,
                        name: name.to_owned(),
                        address: address.to_owned(),
                        mynumber: mynumber.to_owned(),
                        votes: 5,
                    })
                } else {
                    None
                },
            )
        }

        async fn votes_cast_by(&self, _voter_id: i64) -> anyhow::Result<i64> {
            let _ = self.quota_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.already_cast)
        }

        fn find_candidate(&self, name: &str) -> Option<Candidate> {
            let _ = self.candidate_lookups.fetch_add(1, Ordering::SeqCst);
            if name == "Bob" {
                Some(Candidate {
                    id: 1,
                    name: "Bob".to_owned(),
                    political_party: "Green".to_owned(),
                    sex: Sex::Female,
                })
            } else {
                None
            }
        }
    }

    fn submission(candidate: &str, keyword: &str, vote_count: &str) -> Submission {
        Submission {
            name: "Alice".to_owned(),
            address: "1 Main St".to_owned(),
            mynumber: "123".to_owned(),
            candidate: candidate.to_owned(),
            keyword: keyword.to_owned(),
            vote_count: vote_count.to_owned(),
        }
    }

    async fn verdict(submission: Submission, already_cast: i64) -> Verdict {
        let recorder = Recorder {
            already_cast,
            ..Default::default()
        };
        validate(&submission, &recorder).await.unwrap()
    }

    #[test]
    fn counts_are_parsed_leniently() {
        assert_eq!(parse_count("5"), 5);
        assert_eq!(parse_count("+5"), 5);
        assert_eq!(parse_count("  7abc"), 7);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("abc"), 0);
        assert_eq!(parse_count("-3"), 0);
        assert_eq!(parse_count("1.5"), 1);
        assert_eq!(parse_count("99999999999999999999999"), i64::MAX);
    }

    #[test]
    fn a_valid_submission_is_accepted() {
        test_async(async {
            match verdict(submission("Bob", "jobs", "3"), 0).await {
                Verdict::Accepted(vote) => {
                    assert_eq!(vote.voter_id, 1);
                    assert_eq!(vote.candidate_id, 1);
                    assert_eq!(vote.political_party, "Green");
                    assert_eq!(vote.sex, Sex::Female);
                    assert_eq!(vote.keyword, "jobs");
                    assert_eq!(vote.count, 3);
                }
                other => panic!("Unexpected verdict: {:?}", other),
            }
        });
    }

    #[test]
    fn a_missing_count_yields_an_empty_vote() {
        test_async(async {
            match verdict(submission("Bob", "jobs", "lots"), 5).await {
                Verdict::Accepted(vote) => assert_eq!(vote.count, 0),
                other => panic!("Unexpected verdict: {:?}", other),
            }
        });
    }

    #[test]
    fn checks_are_applied_in_order() {
        test_async(async {
            let mut unknown = submission("", "", "9");
            unknown.mynumber = "999".to_owned();
            assert_eq!(
                verdict(unknown, 0).await,
                Verdict::Rejected(VoteMessage::UnknownVoter)
            );

            assert_eq!(
                verdict(submission("", "", "3"), 3).await,
                Verdict::Rejected(VoteMessage::QuotaExceeded)
            );
            assert_eq!(
                verdict(submission("", "", "2"), 3).await,
                Verdict::Rejected(VoteMessage::CandidateMissing)
            );
            assert_eq!(
                verdict(submission("Nobody", "", "2"), 3).await,
                Verdict::Rejected(VoteMessage::UnknownCandidate)
            );
            assert_eq!(
                verdict(submission("Bob", "", "2"), 3).await,
                Verdict::Rejected(VoteMessage::KeywordMissing)
            );
        });
    }

    #[test]
    fn lookups_are_performed_lazily() {
        test_async(async {
            let recorder = Recorder::default();
            let mut unknown = submission("Bob", "jobs", "1");
            unknown.name = "Mallory".to_owned();
            let _ = validate(&unknown, &recorder).await.unwrap();
            assert_eq!(recorder.voter_lookups.load(Ordering::SeqCst), 1);
            assert_eq!(recorder.quota_lookups.load(Ordering::SeqCst), 0);
            assert_eq!(recorder.candidate_lookups.load(Ordering::SeqCst), 0);

            let recorder = Recorder::default();
            let _ = validate(&submission("Bob", "jobs", "6"), &recorder)
                .await
                .unwrap();
            assert_eq!(recorder.quota_lookups.load(Ordering::SeqCst), 1);
            assert_eq!(recorder.candidate_lookups.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn messages_are_classified() {
        assert_eq!(VoteMessage::Empty.text(), "");
        assert_eq!(VoteMessage::Success.is_rejection(), false);
        assert_eq!(VoteMessage::QuotaExceeded.is_rejection(), true);
        assert_eq!(VoteMessage::UnknownVoter.text(), "個人情報に誤りがあります");
    }
}

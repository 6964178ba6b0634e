//! Contains the typed records which are exchanged between the stores and the pages.
//!
//! All rows read from the ledger are mapped into these records right at the store boundary
//! (see the **from_row** functions) so that no other part of the system deals with raw columns.
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::anyhow;
use rusqlite::Row;

/// Enumerates the two recognized sex categories of candidates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Sex {
    /// Stored as **male** (seed files might also use **男**).
    Male,
    /// Stored as **female** (seed files might also use **女**).
    Female,
}

impl Sex {
    /// Lists all categories in the order in which they are reported.
    pub const ALL: [Sex; 2] = [Sex::Male, Sex::Female];

    /// Returns the value used in the database and in counter keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }

    /// Returns the label shown on the pages.
    pub fn label(&self) -> &'static str {
        match self {
            Sex::Male => "男",
            Sex::Female => "女",
        }
    }
}

impl FromStr for Sex {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "male" | "男" => Ok(Sex::Male),
            "female" | "女" => Ok(Sex::Female),
            other => Err(anyhow!("Unknown sex: '{}'", other)),
        }
    }
}

impl Display for Sex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a candidate. This is immutable reference data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Stable identifier, assigned when seeding.
    pub id: i64,
    /// The display name, which is also what voters enter in the vote form.
    pub name: String,
    /// The political party of the candidate.
    pub political_party: String,
    /// The sex of the candidate.
    pub sex: Sex,
}

impl Candidate {
    /// Maps a row of **SELECT id, name, political_party, sex FROM candidates**.
    pub fn from_row(row: &Row) -> rusqlite::Result<Candidate> {
        let sex: String = row.get(3)?;
        Ok(Candidate {
            id: row.get(0)?,
            name: row.get(1)?,
            political_party: row.get(2)?,
            sex: sex.parse().map_err(|error: anyhow::Error| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    error.into(),
                )
            })?,
        })
    }
}

/// Represents a voter. This is immutable reference data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Voter {
    /// Stable identifier, assigned when seeding.
    pub id: i64,
    /// The name as entered in the vote form.
    pub name: String,
    /// The address as entered in the vote form.
    pub address: String,
    /// The national-id-like token as entered in the vote form.
    pub mynumber: String,
    /// The maximal number of votes this voter may ever cast (across all candidates).
    pub votes: i64,
}

impl Voter {
    /// Maps a row of **SELECT id, name, address, mynumber, votes FROM users**.
    pub fn from_row(row: &Row) -> rusqlite::Result<Voter> {
        Ok(Voter {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            mynumber: row.get(3)?,
            votes: row.get(4)?,
        })
    }
}

/// Represents a vote which passed validation and is about to be recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    /// The voter who cast the vote.
    pub voter_id: i64,
    /// The candidate being voted for.
    pub candidate_id: i64,
    /// The party of the candidate (kept along so that the counters don't need a lookup).
    pub political_party: String,
    /// The sex of the candidate.
    pub sex: Sex,
    /// The free-text reason given by the voter.
    pub keyword: String,
    /// The number of votes cast with this submission (might be 0).
    pub count: i64,
}

impl Vote {
    /// Creates a vote for the given candidate.
    pub fn new(voter_id: i64, candidate: &Candidate, keyword: impl Into<String>, count: i64) -> Self {
        Vote {
            voter_id,
            candidate_id: candidate.id,
            political_party: candidate.political_party.clone(),
            sex: candidate.sex,
            keyword: keyword.into(),
            count,
        }
    }
}

/// A candidate along with its current number of votes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedCandidate {
    /// The candidate itself.
    pub candidate: Candidate,
    /// The number of votes.
    pub votes: i64,
}

impl RankedCandidate {
    /// Lists a candidate which hasn't received any vote.
    pub fn without_votes(candidate: &Candidate) -> Self {
        RankedCandidate {
            candidate: candidate.clone(),
            votes: 0,
        }
    }
}

/// Everything shown on the page of a single candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateDetail {
    /// The candidate itself.
    pub candidate: Candidate,
    /// The number of votes.
    pub votes: i64,
    /// The ten most frequent keywords given by supporters (most frequent first).
    pub keywords: Vec<String>,
}

/// Everything shown on the page of a political party.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartyDetail {
    /// The name of the party.
    pub name: String,
    /// The total number of votes of all member candidates.
    pub votes: i64,
    /// All member candidates ordered by id.
    pub candidates: Vec<Candidate>,
    /// The ten most frequent keywords given by supporters of any member.
    pub keywords: Vec<String>,
}

/// Contains the number of votes per sex category.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SexTotals {
    /// Votes for male candidates.
    pub male: i64,
    /// Votes for female candidates.
    pub female: i64,
}

impl SexTotals {
    /// Returns the total of the given category.
    pub fn get(&self, sex: Sex) -> i64 {
        match sex {
            Sex::Male => self.male,
            Sex::Female => self.female,
        }
    }

    /// Adds the given number of votes to the given category.
    pub fn add(&mut self, sex: Sex, votes: i64) {
        match sex {
            Sex::Male => self.male += votes,
            Sex::Female => self.female += votes,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::Sex;

    #[test]
    fn sex_accepts_both_spellings() {
        assert_eq!("male".parse::<Sex>().unwrap(), Sex::Male);
        assert_eq!("男".parse::<Sex>().unwrap(), Sex::Male);
        assert_eq!(" female ".parse::<Sex>().unwrap(), Sex::Female);
        assert_eq!("女".parse::<Sex>().unwrap(), Sex::Female);
        assert_eq!("other".parse::<Sex>().is_err(), true);
    }

    #[test]
    fn sex_renders_storage_value_and_label() {
        assert_eq!(Sex::Female.to_string(), "female");
        assert_eq!(Sex::Male.label(), "男");
    }
}

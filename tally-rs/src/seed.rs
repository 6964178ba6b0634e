//! Imports the reference data (candidates and voters) from CSV files.
//!
//! A seed directory contains two files with a header line each:
//! * **candidates.csv**: `id,name,political_party,sex`
//! * **users.csv**: `id,name,address,mynumber,votes`
//!
//! The reference data is immutable. Therefore seeding is skipped entirely as soon as the ledger
//! contains any candidate.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::ledger::Ledger;
use crate::model::{Candidate, Voter};

#[derive(Deserialize)]
struct CandidateRecord {
    id: i64,
    name: String,
    political_party: String,
    sex: String,
}

#[derive(Deserialize)]
struct VoterRecord {
    id: i64,
    name: String,
    address: String,
    mynumber: String,
    votes: i64,
}

/// Parses candidates from the given CSV data.
pub fn read_candidates(input: impl Read) -> anyhow::Result<Vec<Candidate>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut candidates = Vec::new();
    for (index, record) in reader.deserialize::<CandidateRecord>().enumerate() {
        let record = record.with_context(|| format!("Invalid candidate in line {}", index + 2))?;
        candidates.push(Candidate {
            id: record.id,
            name: record.name,
            political_party: record.political_party,
            sex: record
                .sex
                .parse()
                .with_context(|| format!("Invalid candidate in line {}", index + 2))?,
        });
    }

    Ok(candidates)
}

/// Parses voters from the given CSV data.
pub fn read_voters(input: impl Read) -> anyhow::Result<Vec<Voter>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    reader
        .deserialize::<VoterRecord>()
        .enumerate()
        .map(|(index, record)| {
            let record = record.with_context(|| format!("Invalid voter in line {}", index + 2))?;
            Ok(Voter {
                id: record.id,
                name: record.name,
                address: record.address,
                mynumber: record.mynumber,
                votes: record.votes,
            })
        })
        .collect()
}

/// Stores the given reference data unless the ledger already contains candidates.
///
/// The data is stored in a single transaction, so that a failed import leaves an empty ledger
/// behind which is seeded again on the next start. Returns **true** if the data has been imported.
pub async fn import(
    ledger: &Ledger,
    candidates: Vec<Candidate>,
    voters: Vec<Voter>,
) -> anyhow::Result<bool> {
    let (num_candidates, num_voters) = (candidates.len(), voters.len());
    if !ledger.import_reference_data(candidates, voters).await? {
        log::info!("The ledger already contains reference data. Skipping seed...");
        return Ok(false);
    }

    log::info!(
        "Seeded {} candidates and {} voters.",
        num_candidates,
        num_voters
    );

    Ok(true)
}

/// Imports **candidates.csv** and **users.csv** of the given directory.
pub async fn import_dir(ledger: &Ledger, dir: impl AsRef<Path>) -> anyhow::Result<bool> {
    let dir = dir.as_ref();
    let open = |name: &str| {
        let path = dir.join(name);
        File::open(&path).with_context(|| format!("Cannot open seed file {}", path.display()))
    };

    let candidates = read_candidates(open("candidates.csv")?)?;
    let voters = read_voters(open("users.csv")?)?;

    import(ledger, candidates, voters).await
}

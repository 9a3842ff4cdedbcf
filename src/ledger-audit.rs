//! A simple CLI tool for auditing a ballot box ledger offline.
//! This uses the server's own reconciliation logic, and is by definition
//! compatible with the output of `GET /results/ledger`.

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use ballotbox_backend::model::{
    api::ledger::{ConsistencyReport, LedgerDump},
    common::candidate::Slate,
};

const PROGRAM_NAME: &str = "ledger-audit";

const ABOUT_TEXT: &str = "Check that a ballot box ledger is internally consistent.

EXIT CODES:
     0: Audit succeeded.
   255: Ran successfully, but the ledger is inconsistent.
 Other: Error.";

const DUMP_PATH: &str = "DUMP_PATH";

const DUMP_PATH_HELP: &str = "The path to a JSON ledger dump,\n\
as returned by `GET /results/ledger`";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME).about(ABOUT_TEXT).arg(
        Arg::new(DUMP_PATH)
            .help(DUMP_PATH_HELP)
            .action(ArgAction::Set)
            .required(true),
    )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON dump.
    Format(String),
    /// The ledger breaks at least one of its invariants.
    Inconsistent(ConsistencyReport),
}

/// Per-candidate result line.
#[derive(Debug, Eq, PartialEq)]
struct CandidateResult {
    pub candidate_name: String,
    pub slate: Slate,
    pub votes: u64,
}

impl Display for CandidateResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {} vote{}",
            self.slate,
            self.candidate_name,
            self.votes,
            if self.votes != 1 { "s" } else { "" }
        )
    }
}

/// Run the audit.
fn audit(path: &str) -> Result<Vec<CandidateResult>, Error> {
    // Load the file.
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let dump: LedgerDump =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;

    let report = dump.verify();
    if !report.is_consistent() {
        return Err(Error::Inconsistent(report));
    }

    // Consistent, so the cached counters can be trusted.
    let mut results: Vec<CandidateResult> = dump
        .candidates
        .into_iter()
        .map(|candidate| CandidateResult {
            candidate_name: candidate.name,
            slate: candidate.slate,
            votes: candidate.vote_count,
        })
        .collect();

    // Order by slate, then votes, then name.
    results.sort_by(|a, b| {
        a.slate
            .cmp(&b.slate)
            .then(b.votes.cmp(&a.votes))
            .then_with(|| a.candidate_name.cmp(&b.candidate_name))
    });
    Ok(results)
}

fn describe(report: &ConsistencyReport) -> Vec<String> {
    let mut problems = Vec::new();
    for drift in &report.tally_drift {
        problems.push(format!(
            "Candidate {} has a cached count of {} but {} ballot{}.",
            drift.candidate_id,
            drift.cached,
            drift.counted,
            if drift.counted != 1 { "s" } else { "" }
        ));
    }
    for voter in &report.duplicate_ballots {
        problems.push(format!("Voter {voter} has more than one ballot."));
    }
    for voter in &report.flagged_without_ballot {
        problems.push(format!("Voter {voter} is marked as voted but has no ballot."));
    }
    for voter in &report.ballot_without_flag {
        problems.push(format!("Voter {voter} has a ballot but is not marked as voted."));
    }
    for voter in &report.unknown_candidate {
        problems.push(format!("Voter {voter} voted for a candidate that does not exist."));
    }
    problems
}

/// Run the audit, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let path: &String = args.get_one(DUMP_PATH).unwrap(); // Required argument is guaranteed to be present.
    match audit(path) {
        Ok(results) => {
            println!("Audit succeeded.");
            for result in results {
                println!("{result}");
            }
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {msg}");
            1
        }
        Err(Error::Inconsistent(report)) => {
            println!("Audit failed:");
            for problem in describe(&report) {
                println!("  {problem}");
            }
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}

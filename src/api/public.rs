use chrono::Utc;
use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::{phase::PhaseDescription, tally::CandidateDescription},
        common::candidate::Slate,
    },
    voting::VotingCore,
};

pub fn routes() -> Vec<Route> {
    routes![get_phase, get_candidates]
}

#[get("/phase")]
async fn get_phase(core: &State<VotingCore>) -> Result<Json<PhaseDescription>> {
    let phase = core.phase().current().await?;
    Ok(Json(PhaseDescription::at(phase, Utc::now())))
}

/// The ballot paper: candidates without any counts.
#[get("/candidates?<slate>")]
async fn get_candidates(
    slate: Option<Slate>,
    core: &State<VotingCore>,
) -> Result<Json<Vec<CandidateDescription>>> {
    let candidates = core
        .store()
        .candidates(slate)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(candidates))
}

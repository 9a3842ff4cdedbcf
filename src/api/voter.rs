use chrono::Utc;
use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::api::voter::{BallotRequest, CastReceipt, VoterHandleDescription, VoterLogin},
    voting::VotingCore,
};

pub fn routes() -> Vec<Route> {
    routes![authenticate_voter, cast_ballot]
}

/// Check a voter's identity and token, so the client can decide whether to
/// show a ballot.
#[post("/voter/authenticate", data = "<login>", format = "json")]
async fn authenticate_voter(
    login: Json<VoterLogin>,
    core: &State<VotingCore>,
) -> Result<Json<VoterHandleDescription>> {
    let handle = core
        .authenticator()
        .authenticate(&login.identity, &login.token, Utc::now())
        .await?;
    Ok(Json(handle.into()))
}

#[post("/voter/ballot", data = "<request>", format = "json")]
async fn cast_ballot(
    request: Json<BallotRequest>,
    core: &State<VotingCore>,
) -> Result<Json<CastReceipt>> {
    let now = Utc::now();
    let handle = core
        .authenticator()
        .authenticate(&request.login.identity, &request.login.token, now)
        .await?;
    let event = core
        .ledger()
        .cast_vote(&handle, request.candidate, now)
        .await?;
    Ok(Json(event.into()))
}

use chrono::Utc;
use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            admin::{
                CandidateSpec, IssuedToken, OperatorSpec, OperatorSummary, PhaseUpdate,
                VoterDescription, VoterSpec,
            },
            auth::{AuthToken, SuperAdmin},
            phase::PhaseDescription,
            tally::CandidateDescription,
            voter::CastReceipt,
        },
        common::{phase::PhaseWindow, role::OperatorRole, voter::VoterCategory},
        db::admin::{NewOperator, Operator},
        mongodb::Id,
    },
    store::StoreError,
    voting::{registry_for, VoteError, VotingCore},
};

pub fn routes() -> Vec<Route> {
    routes![
        register_voter,
        get_voter,
        find_voter,
        rotate_token,
        reset_ballot,
        set_phase,
        set_window,
        add_candidate,
        get_operators,
        create_operator,
        delete_operator,
    ]
}

#[post("/admin/voters", data = "<spec>", format = "json")]
async fn register_voter(
    _token: AuthToken<Operator>,
    spec: Json<VoterSpec>,
    core: &State<VotingCore>,
) -> Result<Json<IssuedToken>> {
    let (voter, token) = core.register_voter(spec.0, Utc::now()).await?;
    Ok(Json(IssuedToken {
        voter_id: voter.id.into(),
        token,
    }))
}

#[get("/admin/voters/<voter_id>")]
async fn get_voter(
    _token: AuthToken<Operator>,
    voter_id: Id,
    core: &State<VotingCore>,
) -> Result<Json<VoterDescription>> {
    let voter = core
        .store()
        .voter(voter_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter '{voter_id}'")))?;
    Ok(Json(voter.into()))
}

/// Look a voter up by its natural key, within one category only.
#[get("/admin/voters/<category>/<key>")]
async fn find_voter(
    _token: AuthToken<Operator>,
    category: VoterCategory,
    key: &str,
    core: &State<VotingCore>,
) -> Result<Json<VoterDescription>> {
    let voter = registry_for(category, core.store())
        .find_by_key(key)
        .await?
        .ok_or_else(|| Error::not_found(format!("{category} '{key}'")))?;
    Ok(Json(voter.into()))
}

/// Issue a fresh token, invalidating the old one.
#[post("/admin/voters/<voter_id>/token")]
async fn rotate_token(
    _token: AuthToken<Operator>,
    voter_id: Id,
    core: &State<VotingCore>,
) -> Result<Json<IssuedToken>> {
    let token = match core.credentials().rotate(voter_id, Utc::now()).await {
        Ok(token) => token,
        Err(VoteError::VoterNotFound(_)) => {
            return Err(Error::not_found(format!("Voter '{voter_id}'")))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Json(IssuedToken {
        voter_id: voter_id.into(),
        token,
    }))
}

/// Undo a voter's ballot so they may vote again. Responds with the removed
/// ballot, or nothing if there was none.
#[delete("/admin/voters/<voter_id>/ballot")]
async fn reset_ballot(
    token: AuthToken<Operator>,
    voter_id: Id,
    core: &State<VotingCore>,
) -> Result<Json<Option<CastReceipt>>> {
    // An unknown ID here is an operator typo, not a ledger fault.
    if core.store().voter(voter_id).await?.is_none() {
        return Err(Error::not_found(format!("Voter '{voter_id}'")));
    }
    let removed = core.ledger().reset_voter_ballot(voter_id).await?;
    info!("Operator {} reset the ballot of voter {voter_id}", token.id);
    Ok(Json(removed.map(Into::into)))
}

#[put("/admin/phase", data = "<update>", format = "json")]
async fn set_phase(
    _token: AuthToken<Operator>,
    update: Json<PhaseUpdate>,
    core: &State<VotingCore>,
) -> Result<Json<PhaseDescription>> {
    let phase = core.phase().set_phase(update.active).await?;
    Ok(Json(PhaseDescription::at(phase, Utc::now())))
}

/// Set or clear (with `null`) the voting window.
#[put("/admin/phase/window", data = "<window>", format = "json")]
async fn set_window(
    _token: AuthToken<Operator>,
    window: Json<Option<PhaseWindow>>,
    core: &State<VotingCore>,
) -> Result<Json<PhaseDescription>> {
    let phase = core.phase().set_window(window.0).await?;
    Ok(Json(PhaseDescription::at(phase, Utc::now())))
}

#[post("/admin/candidates", data = "<spec>", format = "json")]
async fn add_candidate(
    _token: AuthToken<Operator>,
    spec: Json<CandidateSpec>,
    core: &State<VotingCore>,
) -> Result<Json<CandidateDescription>> {
    let candidate = core.add_candidate(spec.0.into()).await?;
    Ok(Json(candidate.into()))
}

#[get("/admin/operators")]
async fn get_operators(
    _token: AuthToken<Operator>,
    core: &State<VotingCore>,
) -> Result<Json<Vec<OperatorSummary>>> {
    let operators = core
        .store()
        .operators()
        .await?
        .into_iter()
        .map(|operator| OperatorSummary {
            username: operator.operator.username,
            role: operator.operator.role,
        })
        .collect();
    Ok(Json(operators))
}

#[post("/admin/operators", data = "<spec>", format = "json")]
async fn create_operator(
    _token: AuthToken<SuperAdmin>,
    spec: Json<OperatorSpec>,
    core: &State<VotingCore>,
) -> Result<()> {
    let username = spec.credentials.username.clone();
    let operator: NewOperator = spec
        .0
        .try_into()
        .map_err(|_| Error::bad_request("Illegal operator credentials"))?;
    core.store().insert_operator(&operator).await.map_err(|e| match e {
        StoreError::Duplicate => Error::Status(
            Status::Conflict,
            format!("Operator username already in use: {username}"),
        ),
        e => e.into(),
    })?;
    info!("Created {:?} operator '{username}'", operator.role);
    Ok(())
}

#[delete("/admin/operators/<username>")]
async fn delete_operator(
    _token: AuthToken<SuperAdmin>,
    username: &str,
    core: &State<VotingCore>,
) -> Result<()> {
    let Some(target) = core.store().operator_by_username(username).await? else {
        return Err(Error::not_found(format!("Operator '{username}'")));
    };

    // Someone must be left who can manage operators.
    let operators = core.store().operators().await?;
    if operators.len() == 1 {
        return Err(Error::Status(
            Status::UnprocessableEntity,
            "Cannot delete last operator!".to_string(),
        ));
    }
    let superadmins = operators
        .iter()
        .filter(|operator| operator.role == OperatorRole::SuperAdmin)
        .count();
    if target.role == OperatorRole::SuperAdmin && superadmins == 1 {
        return Err(Error::Status(
            Status::UnprocessableEntity,
            "Cannot delete last superadmin!".to_string(),
        ));
    }

    if core.store().delete_operator(username).await? {
        info!("Deleted operator '{username}'");
        Ok(())
    } else {
        Err(Error::not_found(format!("Operator '{username}'")))
    }
}

use chrono::Utc;
use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::{AuthToken, SuperAdmin},
            ledger::{ConsistencyReport, LedgerDump},
            tally::{TallyFilter, TallyReport},
        },
        common::candidate::Slate,
        db::admin::Operator,
    },
    voting::VotingCore,
};

pub fn routes() -> Vec<Route> {
    routes![list_results, ledger_dump, consistency]
}

/// Refuse unless the operator's role allows disclosure in the current phase.
async fn ensure_visible(token: &AuthToken<Operator>, core: &VotingCore) -> Result<()> {
    if core.results_visible_to(token.role, Utc::now()).await? {
        Ok(())
    } else {
        debug!("Results hidden from operator {} while voting is open", token.id);
        Err(Error::Status(
            Status::Forbidden,
            "Results are hidden while voting is open".to_string(),
        ))
    }
}

#[get("/results?<slate>&<cohort>")]
async fn list_results(
    token: AuthToken<Operator>,
    slate: Option<Slate>,
    cohort: Option<String>,
    core: &State<VotingCore>,
) -> Result<Json<TallyReport>> {
    ensure_visible(&token, core).await?;
    let filter = TallyFilter {
        slate,
        cohort: cohort
            .map(|cohort| cohort.trim().to_string())
            .filter(|cohort| !cohort.is_empty()),
    };
    Ok(Json(core.tallies().list_tallies(filter).await?))
}

#[get("/results/ledger")]
async fn ledger_dump(
    token: AuthToken<Operator>,
    core: &State<VotingCore>,
) -> Result<Json<LedgerDump>> {
    ensure_visible(&token, core).await?;
    Ok(Json(core.tallies().ledger_dump().await?))
}

#[get("/results/consistency")]
async fn consistency(
    _token: AuthToken<SuperAdmin>,
    core: &State<VotingCore>,
) -> Result<Json<ConsistencyReport>> {
    Ok(Json(core.tallies().consistency().await?))
}

#[cfg(test)]
mod tests {
    use rocket::local::asynchronous::Client;

    use crate::{
        error::ErrorBody,
        model::{api::admin::VoterSpec, db::candidate::Candidate},
        store::MemoryStore,
    };

    use super::*;

    /// Two senior candidates, two junior ones, and one ballot each from a
    /// 9B senior and a 7A junior.
    async fn run_election(client: &Client) {
        let core = client.rocket().state::<VotingCore>().unwrap();
        for (id, slate) in [
            (1, Slate::Junior),
            (2, Slate::Junior),
            (7, Slate::Senior),
            (8, Slate::Senior),
        ] {
            core.add_candidate(Candidate::example(id, slate)).await.unwrap();
        }
        core.phase().set_phase(true).await.unwrap();
        for (key, cohort, slate, candidate) in [
            ("S-100", "9B", Slate::Senior, 7),
            ("S-200", "7A", Slate::Junior, 2),
        ] {
            let (_, token) = core
                .register_voter(VoterSpec::student_example(key, cohort, slate), Utc::now())
                .await
                .unwrap();
            let handle = core
                .authenticator()
                .authenticate(key, &token, Utc::now())
                .await
                .unwrap();
            core.ledger()
                .cast_vote(&handle, candidate, Utc::now())
                .await
                .unwrap();
        }
    }

    async fn close_election(client: &Client) {
        let core = client.rocket().state::<VotingCore>().unwrap();
        core.phase().set_phase(false).await.unwrap();
    }

    #[backend_test(admin)]
    async fn admin_sees_results_only_when_closed(client: Client) {
        run_election(&client).await;

        let response = client.get(uri!(list_results(_, _))).dispatch().await;
        assert_eq!(Status::Forbidden, response.status());
        let body: ErrorBody = response.into_json().await.unwrap();
        assert_eq!(body.error, "forbidden");

        let response = client.get(uri!(ledger_dump)).dispatch().await;
        assert_eq!(Status::Forbidden, response.status());

        close_election(&client).await;

        let response = client.get(uri!(list_results(_, _))).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let report: TallyReport = response.into_json().await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.votes_for(7), Some(1));
        assert_eq!(report.votes_for(2), Some(1));
        assert_eq!(report.votes_for(8), Some(0));

        let response = client.get(uri!(ledger_dump)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let dump: LedgerDump = response.into_json().await.unwrap();
        assert_eq!(dump.ballots.len(), 2);
        assert_eq!(dump.voted_voters.len(), 2);
        assert!(dump.verify().is_consistent());
    }

    #[backend_test(superadmin)]
    async fn superadmin_always_sees_results(client: Client) {
        run_election(&client).await;

        let response = client.get(uri!(list_results(_, _))).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let response = client.get("/results?slate=senior").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let report: TallyReport = response.into_json().await.unwrap();
        assert_eq!(report.filter.slate, Some(Slate::Senior));
        assert_eq!(report.tallies.len(), 2);
        assert_eq!(report.total, 1);

        let response = client.get("/results?cohort=7A").dispatch().await;
        let report: TallyReport = response.into_json().await.unwrap();
        assert_eq!(report.votes_for(2), Some(1));
        assert_eq!(report.votes_for(7), Some(0));
        assert_eq!(report.total, 1);

        // Cohorts are matched the way they are stored, without padding.
        let response = client.get("/results?cohort=%207A%20").dispatch().await;
        let report: TallyReport = response.into_json().await.unwrap();
        assert_eq!(report.filter.cohort.as_deref(), Some("7A"));
        assert_eq!(report.votes_for(2), Some(1));
        assert_eq!(report.total, 1);

        // An empty cohort means no cohort filter.
        let response = client.get("/results?cohort=").dispatch().await;
        let report: TallyReport = response.into_json().await.unwrap();
        assert_eq!(report.filter.cohort, None);
        assert_eq!(report.total, 2);
    }

    #[backend_test(superadmin)]
    async fn consistency_reports_drift(client: Client, memory: MemoryStore) {
        run_election(&client).await;

        let response = client.get(uri!(consistency)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let report: ConsistencyReport = response.into_json().await.unwrap();
        assert!(report.is_consistent());

        // Tamper with a cached counter behind the ledger's back.
        memory.overwrite_vote_count(7, 5).await;

        let response = client.get(uri!(consistency)).dispatch().await;
        let report: ConsistencyReport = response.into_json().await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.tally_drift.len(), 1);
        assert_eq!(report.tally_drift[0].cached, 5);
        assert_eq!(report.tally_drift[0].counted, 1);
    }

    #[backend_test(admin)]
    async fn consistency_requires_superadmin(client: Client) {
        close_election(&client).await;
        let response = client.get(uri!(consistency)).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn results_require_login(client: Client) {
        let response = client.get(uri!(list_results(_, _))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
        let response = client.get(uri!(ledger_dump)).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }
}

use chrono::{DateTime, Utc};

use crate::{
    model::common::phase::{ElectionPhase, PhaseWindow},
    store::DynStore,
};

use super::VoteError;

/// Reads and changes the persisted election phase.
#[derive(Clone)]
pub struct ElectionPhaseController {
    store: DynStore,
}

impl ElectionPhaseController {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    pub async fn current(&self) -> Result<ElectionPhase, VoteError> {
        Ok(self.store.phase().await?)
    }

    /// Is voting permitted at `now`?
    pub async fn is_open(&self, now: DateTime<Utc>) -> Result<bool, VoteError> {
        Ok(self.current().await?.is_open(now))
    }

    /// Turn the election on or off. Idempotent; the window is left alone.
    pub async fn set_phase(&self, active: bool) -> Result<ElectionPhase, VoteError> {
        let phase = self.store.set_phase_active(active).await?;
        info!(
            "Election phase set to {}",
            if active { "active" } else { "inactive" }
        );
        Ok(phase)
    }

    /// Replace or clear the voting window. The active flag is left alone.
    pub async fn set_window(
        &self,
        window: Option<PhaseWindow>,
    ) -> Result<ElectionPhase, VoteError> {
        if let Some(window) = window {
            if !window.is_well_formed() {
                return Err(VoteError::InvalidWindow);
            }
        }
        let phase = self.store.set_phase_window(window).await?;
        match window {
            Some(window) => info!("Voting window set to {} - {}", window.start, window.end),
            None => info!("Voting window cleared"),
        }
        Ok(phase)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use crate::store::MemoryStore;

    use super::*;

    fn controller() -> ElectionPhaseController {
        ElectionPhaseController::new(Arc::new(MemoryStore::new()))
    }

    #[rocket::async_test]
    async fn starts_closed_and_toggles() {
        let phase = controller();
        let now = Utc::now();
        assert!(!phase.is_open(now).await.unwrap());

        phase.set_phase(true).await.unwrap();
        phase.set_phase(true).await.unwrap();
        assert!(phase.is_open(now).await.unwrap());

        phase.set_phase(false).await.unwrap();
        assert!(!phase.is_open(now).await.unwrap());

        // Reopening a closed election is allowed.
        phase.set_phase(true).await.unwrap();
        assert!(phase.is_open(now).await.unwrap());
    }

    #[rocket::async_test]
    async fn window_and_flag_are_independent() {
        let phase = controller();
        let now = Utc::now();
        let window = PhaseWindow {
            start: now - Duration::hours(2),
            end: now - Duration::hours(1),
        };

        // A window alone does not open the election.
        let current = phase
            .set_window(Some(PhaseWindow {
                start: now - Duration::hours(1),
                end: now + Duration::hours(1),
            }))
            .await
            .unwrap();
        assert!(!current.active);
        assert!(!phase.is_open(now).await.unwrap());

        // The flag stays set after the window has ended.
        phase.set_phase(true).await.unwrap();
        let current = phase.set_window(Some(window)).await.unwrap();
        assert!(current.active);
        assert!(!phase.is_open(now).await.unwrap());

        let current = phase.set_window(None).await.unwrap();
        assert_eq!(current.window, None);
        assert!(phase.is_open(now).await.unwrap());
    }

    #[rocket::async_test]
    async fn rejects_backwards_window() {
        let phase = controller();
        let now = Utc::now();
        let result = phase
            .set_window(Some(PhaseWindow {
                start: now,
                end: now - Duration::minutes(5),
            }))
            .await;
        assert!(matches!(result, Err(VoteError::InvalidWindow)));
        assert_eq!(phase.current().await.unwrap().window, None);
    }
}

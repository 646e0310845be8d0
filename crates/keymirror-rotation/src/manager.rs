//! Drives the rotation engine against the persisted state.

use crate::engine::RotationEngine;
use crate::error::Result;
use crate::store::StateStore;
use crate::types::{RotationEvent, RotationState};
use chrono::{DateTime, Utc};
use keymirror_commons::{Deadline, Jwks};
use log::info;
use std::sync::Arc;

/// Load-update-save orchestration around the pure engine. One instance per
/// replica; concurrent replicas are reconciled by the store's conflict
/// retry and by the idempotence of the transitions.
pub struct RotationManager {
    store: Arc<dyn StateStore>,
    engine: RotationEngine,
}

impl RotationManager {
    pub fn new(store: Arc<dyn StateStore>, overlap_seconds: u64) -> Self {
        Self { store, engine: RotationEngine::new(overlap_seconds) }
    }

    /// Process a freshly fetched JWKS: update the persisted state and
    /// return the JWKS to publish plus any rotation events. Store round
    /// trips run against the caller's deadline.
    pub async fn process_jwks(
        &self,
        current: &Jwks,
        deadline: Deadline,
    ) -> Result<(Jwks, Vec<RotationEvent>)> {
        self.process_jwks_at(current, Utc::now(), deadline).await
    }

    /// `process_jwks` with an explicit instant, for deterministic tests.
    pub async fn process_jwks_at(
        &self,
        current: &Jwks,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(Jwks, Vec<RotationEvent>)> {
        let mut state = self.store.load(deadline).await?;

        let mut events = self.engine.update_state(current, &mut state, now);
        events.extend(self.engine.expire_keys(&mut state, now));

        self.store.save(&state, deadline).await?;

        let publishable = self.engine.publishable(current, &state, now);

        for event in &events {
            info!("rotation event: {} key={} ({})", event.kind.as_str(), event.key_id, event.message);
        }

        Ok((publishable, events))
    }

    /// The current persisted state.
    pub async fn state(&self, deadline: Deadline) -> Result<RotationState> {
        self.store.load(deadline).await
    }
}

//! The rotation state machine. Pure: every transition is a function of the
//! source JWKS, the prior state, and the instant passed in by the caller.

use crate::types::{KeyState, RotationEvent, RotationState};
use chrono::{DateTime, Duration, Utc};
use keymirror_commons::Jwks;

/// Applies JWKS diffs to the rotation state and selects the publishable
/// key set.
#[derive(Debug, Clone)]
pub struct RotationEngine {
    overlap: Duration,
}

impl RotationEngine {
    /// `overlap_seconds` is how long a departed key stays published. Zero
    /// disables overlap: departing keys are removed on the next pass.
    pub fn new(overlap_seconds: u64) -> Self {
        Self { overlap: Duration::seconds(overlap_seconds as i64) }
    }

    /// Fold the source JWKS into the state.
    ///
    /// New keys become Live and emit `NewKey`. Keys present again after
    /// being marked return to Live with the mark cleared. Keys absent from
    /// the source are marked for removal.
    pub fn update_state(
        &self,
        current: &Jwks,
        state: &mut RotationState,
        now: DateTime<Utc>,
    ) -> Vec<RotationEvent> {
        let mut events = Vec::new();

        for key in &current.keys {
            match state.keys.get_mut(&key.kid) {
                Some(existing) => {
                    existing.last_seen = now;
                    existing.marked_for_removal = None;
                    existing.key = key.clone();
                }
                None => {
                    state.keys.insert(
                        key.kid.clone(),
                        KeyState {
                            key_id: key.kid.clone(),
                            key: key.clone(),
                            first_seen: now,
                            last_seen: now,
                            marked_for_removal: None,
                        },
                    );
                    events.push(RotationEvent::new_key(&key.kid, now));
                }
            }
        }

        for (key_id, key_state) in state.keys.iter_mut() {
            if !current.contains_kid(key_id) && key_state.marked_for_removal.is_none() {
                key_state.marked_for_removal = Some(now);
            }
        }

        state.version += 1;
        state.last_updated = Some(now);

        events
    }

    /// Remove keys whose overlap window has elapsed, emitting `KeyExpired`
    /// once per removed key.
    pub fn expire_keys(
        &self,
        state: &mut RotationState,
        now: DateTime<Utc>,
    ) -> Vec<RotationEvent> {
        let mut expired: Vec<String> = state
            .keys
            .values()
            .filter(|ks| {
                ks.marked_for_removal
                    .map(|marked| now.signed_duration_since(marked) >= self.overlap)
                    .unwrap_or(false)
            })
            .map(|ks| ks.key_id.clone())
            .collect();
        expired.sort_unstable();

        let events: Vec<RotationEvent> =
            expired.iter().map(|kid| RotationEvent::key_expired(kid, now)).collect();

        for key_id in &expired {
            state.keys.remove(key_id);
        }
        if !expired.is_empty() {
            state.version += 1;
            state.last_updated = Some(now);
        }

        events
    }

    /// The JWKS to publish: every key in the source plus marked keys still
    /// inside the overlap window. Source order first, then retained keys
    /// sorted by key ID.
    pub fn publishable(
        &self,
        current: &Jwks,
        state: &RotationState,
        now: DateTime<Utc>,
    ) -> Jwks {
        let mut merged = current.clone();

        let mut retained: Vec<&KeyState> = state
            .keys
            .values()
            .filter(|ks| !current.contains_kid(&ks.key_id))
            .filter(|ks| self.should_keep(ks, now))
            .collect();
        retained.sort_unstable_by(|a, b| a.key_id.cmp(&b.key_id));

        merged.keys.extend(retained.into_iter().map(|ks| ks.key.clone()));
        merged
    }

    fn should_keep(&self, key_state: &KeyState, now: DateTime<Utc>) -> bool {
        match key_state.marked_for_removal {
            None => true,
            Some(marked) => now.signed_duration_since(marked) < self.overlap,
        }
    }
}

// Baseline lifecycle: creation from a first verified session, EMA
// updates from subsequent verified sessions, reliability gating, and
// bounded device/country history.

mod store;

pub use store::{BaselineStore, FileBaselineStore, MemoryBaselineStore};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::models::{LoginAttempt, UserBaseline};

/// Below this many verified sessions, deviation features are noisy and
/// callers should weight decisions accordingly. Scoring itself does not
/// special-case it; it is exposed as a separate signal.
pub const MIN_SESSIONS_FOR_RELIABLE_BASELINE: u32 = 3;

/// EMA weight for baseline updates: 80% history, 20% new sample.
pub const BASELINE_UPDATE_WEIGHT: f64 = 0.2;

pub const MAX_KNOWN_FINGERPRINTS: usize = 10;
pub const MAX_KNOWN_COUNTRIES: usize = 20;

// Initial-uncertainty priors for std fields seeded at enrollment. A
// single session has no variance, and a zero std would make the very
// next attempt score the z-cap. Dwell is the exception: the attempt
// itself reports a within-session std for it.
const INITIAL_FLIGHT_STD_MS: f64 = 20.0;
const INITIAL_TYPING_SPEED_STD_CPM: f64 = 50.0;
const INITIAL_VELOCITY_STD_PX_MS: f64 = 0.3;
const INITIAL_CURVATURE_STD: f64 = 0.1;
const INITIAL_PRECISION_STD_PX: f64 = 3.0;
const INITIAL_CORRECTIONS_STD: f64 = 1.0;
const INITIAL_FORM_TIME_STD_MS: f64 = 2000.0;

/// Recency-weighted running mean update.
fn ema(old: f64, new: f64) -> f64 {
    (1.0 - BASELINE_UPDATE_WEIGHT) * old + BASELINE_UPDATE_WEIGHT * new
}

/// Running std approximation: EMA of the absolute deviation of the new
/// sample from the pre-update mean. Numerically stable and needs no
/// stored history.
fn ema_std(old_mean: f64, old_std: f64, new: f64) -> f64 {
    ema(old_std, (new - old_mean).abs())
}

/// Owns the behavioral-baseline lifecycle on top of a [`BaselineStore`].
///
/// The read-modify-write of create/update is serialized per user via
/// keyed locks; attempts for different users never contend.
pub struct BaselineManager {
    store: Arc<dyn BaselineStore>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BaselineManager {
    pub fn new(store: Arc<dyn BaselineStore>) -> Self {
        BaselineManager {
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock();
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // Clones are only handed out under the map lock, so a strong count
    // of 1 here means no task is holding or waiting on the lock and the
    // entry can go. Keeps the registry from growing with every user id
    // ever seen.
    fn release_user_lock(&self, user_id: &str) {
        let mut locks = self.user_locks.lock();
        if let Some(lock) = locks.get(user_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(user_id);
            }
        }
    }

    /// Retrieve the user's baseline. No side effects.
    pub async fn get_baseline(&self, user_id: &str) -> Result<Option<UserBaseline>, StoreError> {
        self.store.get(user_id).await
    }

    /// Create the initial baseline from a first verified session.
    ///
    /// Means are seeded directly from the attempt; stds from fixed
    /// priors. Device/country histories start with the observed values.
    pub async fn create_baseline(
        &self,
        user_id: &str,
        attempt: &LoginAttempt,
    ) -> Result<UserBaseline, StoreError> {
        let lock = self.user_lock(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.create_baseline_locked(user_id, attempt).await
        };
        drop(lock);
        self.release_user_lock(user_id);
        result
    }

    async fn create_baseline_locked(
        &self,
        user_id: &str,
        attempt: &LoginAttempt,
    ) -> Result<UserBaseline, StoreError> {
        let now = Utc::now();
        let baseline = UserBaseline {
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
            session_count: 1,
            keystroke_dwell_mean: attempt.keystroke.dwell_time_mean_ms,
            keystroke_dwell_std: attempt.keystroke.dwell_time_std_ms,
            keystroke_flight_mean: attempt.keystroke.flight_time_mean_ms,
            keystroke_flight_std: INITIAL_FLIGHT_STD_MS,
            typing_speed_mean: attempt.keystroke.typing_speed_cpm,
            typing_speed_std: INITIAL_TYPING_SPEED_STD_CPM,
            mouse_velocity_mean: attempt.mouse.avg_velocity_px_ms,
            mouse_velocity_std: INITIAL_VELOCITY_STD_PX_MS,
            curvature_mean: attempt.mouse.path_curvature_ratio,
            curvature_std: INITIAL_CURVATURE_STD,
            click_precision_mean: attempt.mouse.click_precision_px,
            click_precision_std: INITIAL_PRECISION_STD_PX,
            micro_corrections_mean: attempt.mouse.micro_corrections_per_movement,
            micro_corrections_std: INITIAL_CORRECTIONS_STD,
            typical_form_time_mean: attempt.interaction.form_completion_time_ms,
            typical_form_time_std: INITIAL_FORM_TIME_STD_MS,
            known_fingerprints: vec![attempt.device.fingerprint_hash.clone()],
            known_countries: vec![attempt.network.country_code.clone()],
        };
        self.store.put(&baseline).await?;
        info!("created baseline for {}", user_id);
        Ok(baseline)
    }

    /// Update the baseline with a new session.
    ///
    /// Unverified sessions never touch the baseline: that is a security
    /// invariant. Verified sessions update every tracked (mean, std)
    /// pair via EMA, append unseen device/country values, and truncate
    /// histories oldest-first to their caps.
    pub async fn update_baseline(
        &self,
        user_id: &str,
        attempt: &LoginAttempt,
        verified: bool,
    ) -> Result<UserBaseline, StoreError> {
        let lock = self.user_lock(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.update_baseline_locked(user_id, attempt, verified).await
        };
        drop(lock);
        self.release_user_lock(user_id);
        result
    }

    async fn update_baseline_locked(
        &self,
        user_id: &str,
        attempt: &LoginAttempt,
        verified: bool,
    ) -> Result<UserBaseline, StoreError> {
        let Some(mut baseline) = self.store.get(user_id).await? else {
            return self.create_baseline_locked(user_id, attempt).await;
        };

        if !verified {
            debug!("skipping baseline update for unverified session of {}", user_id);
            return Ok(baseline);
        }

        let k = &attempt.keystroke;
        let m = &attempt.mouse;
        let i = &attempt.interaction;

        // Each std is computed against the pre-update mean, then the
        // pair is replaced together.
        let updates: [(&mut f64, &mut f64, f64); 8] = [
            (
                &mut baseline.keystroke_dwell_mean,
                &mut baseline.keystroke_dwell_std,
                k.dwell_time_mean_ms,
            ),
            (
                &mut baseline.keystroke_flight_mean,
                &mut baseline.keystroke_flight_std,
                k.flight_time_mean_ms,
            ),
            (
                &mut baseline.typing_speed_mean,
                &mut baseline.typing_speed_std,
                k.typing_speed_cpm,
            ),
            (
                &mut baseline.mouse_velocity_mean,
                &mut baseline.mouse_velocity_std,
                m.avg_velocity_px_ms,
            ),
            (
                &mut baseline.curvature_mean,
                &mut baseline.curvature_std,
                m.path_curvature_ratio,
            ),
            (
                &mut baseline.click_precision_mean,
                &mut baseline.click_precision_std,
                m.click_precision_px,
            ),
            (
                &mut baseline.micro_corrections_mean,
                &mut baseline.micro_corrections_std,
                m.micro_corrections_per_movement,
            ),
            (
                &mut baseline.typical_form_time_mean,
                &mut baseline.typical_form_time_std,
                i.form_completion_time_ms,
            ),
        ];
        for (mean, std, new_value) in updates {
            *std = ema_std(*mean, *std, new_value);
            *mean = ema(*mean, new_value);
        }

        push_bounded(
            &mut baseline.known_fingerprints,
            &attempt.device.fingerprint_hash,
            MAX_KNOWN_FINGERPRINTS,
        );
        push_bounded(
            &mut baseline.known_countries,
            &attempt.network.country_code,
            MAX_KNOWN_COUNTRIES,
        );

        baseline.session_count += 1;
        baseline.updated_at = Utc::now();

        self.store.put(&baseline).await?;
        debug!(
            "updated baseline for {} (session {})",
            user_id, baseline.session_count
        );
        Ok(baseline)
    }

    /// True iff a baseline exists with enough verified sessions.
    pub async fn is_baseline_reliable(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get(user_id)
            .await?
            .map(|b| b.session_count >= MIN_SESSIONS_FOR_RELIABLE_BASELINE)
            .unwrap_or(false))
    }

    /// Remove the stored baseline; returns whether one existed.
    /// Deletion is terminal: a later enrollment starts the lifecycle
    /// over at session count 1.
    pub async fn delete_baseline(&self, user_id: &str) -> Result<bool, StoreError> {
        let lock = self.user_lock(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.store.delete(user_id).await
        };
        drop(lock);
        self.release_user_lock(user_id);

        let deleted = result?;
        if deleted {
            info!("deleted baseline for {}", user_id);
        }
        Ok(deleted)
    }
}

// Append if unseen, then drop oldest entries beyond the cap.
fn push_bounded(history: &mut Vec<String>, value: &str, cap: usize) {
    if history.iter().any(|v| v == value) {
        return;
    }
    history.push(value.to_string());
    if history.len() > cap {
        let excess = history.len() - cap;
        history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::human_attempt;

    fn manager() -> BaselineManager {
        BaselineManager::new(Arc::new(MemoryBaselineStore::new()))
    }

    #[tokio::test]
    async fn test_create_seeds_means_from_attempt() {
        let manager = manager();
        let attempt = human_attempt("u1");
        let baseline = manager.create_baseline("u1", &attempt).await.unwrap();

        assert_eq!(baseline.session_count, 1);
        assert_eq!(baseline.keystroke_dwell_mean, 90.0);
        assert_eq!(baseline.typing_speed_mean, 320.0);
        assert_eq!(baseline.typical_form_time_mean, 8000.0);
        // Std priors are non-zero so the next attempt does not hit the z-cap
        assert!(baseline.typing_speed_std > 0.0);
        assert!(baseline.typical_form_time_std > 0.0);
        assert_eq!(baseline.known_fingerprints, vec![attempt.device.fingerprint_hash]);
        assert_eq!(baseline.known_countries, vec!["US".to_string()]);
    }

    #[tokio::test]
    async fn test_update_applies_ema_against_pre_update_mean() {
        let manager = manager();
        let attempt = human_attempt("u1");
        let before = manager.create_baseline("u1", &attempt).await.unwrap();

        let mut faster = attempt.clone();
        faster.keystroke.typing_speed_cpm = 420.0;
        let after = manager.update_baseline("u1", &faster, true).await.unwrap();

        // mean' = 0.8*320 + 0.2*420
        assert!((after.typing_speed_mean - 340.0).abs() < 1e-9);
        // std' = 0.8*old_std + 0.2*|420 - 320|
        let expected_std = 0.8 * before.typing_speed_std + 0.2 * 100.0;
        assert!((after.typing_speed_std - expected_std).abs() < 1e-9);
        assert_eq!(after.session_count, 2);
    }

    #[tokio::test]
    async fn test_unverified_update_is_a_no_op() {
        let manager = manager();
        let attempt = human_attempt("u1");
        let before = manager.create_baseline("u1", &attempt).await.unwrap();

        let mut wild = attempt.clone();
        wild.keystroke.typing_speed_cpm = 9999.0;
        wild.network.country_code = "RU".to_string();
        let after = manager.update_baseline("u1", &wild, false).await.unwrap();

        assert_eq!(after, before);
        assert_eq!(
            manager.get_baseline("u1").await.unwrap().unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_update_without_baseline_delegates_to_create() {
        let manager = manager();
        let attempt = human_attempt("u1");
        let baseline = manager.update_baseline("u1", &attempt, true).await.unwrap();
        assert_eq!(baseline.session_count, 1);
    }

    #[tokio::test]
    async fn test_ema_idempotence_on_identical_attempts() {
        let manager = manager();
        let attempt = human_attempt("u1");
        manager.create_baseline("u1", &attempt).await.unwrap();

        let mut baseline = manager.update_baseline("u1", &attempt, true).await.unwrap();
        for _ in 0..5 {
            baseline = manager.update_baseline("u1", &attempt, true).await.unwrap();
        }

        // Means stay pinned to the repeated values; stds decay toward zero
        assert!((baseline.typing_speed_mean - 320.0).abs() < 1e-9);
        assert!((baseline.keystroke_dwell_mean - 90.0).abs() < 1e-9);
        assert!(baseline.typing_speed_std < INITIAL_TYPING_SPEED_STD_CPM);
    }

    #[tokio::test]
    async fn test_fingerprint_history_caps_at_ten_most_recent() {
        let manager = manager();
        let attempt = human_attempt("u1");
        manager.create_baseline("u1", &attempt).await.unwrap();

        for n in 0..14 {
            let mut next = attempt.clone();
            next.device.fingerprint_hash = format!("fingerprint-{:02}-aaaaaaaa", n);
            manager.update_baseline("u1", &next, true).await.unwrap();
        }

        let baseline = manager.get_baseline("u1").await.unwrap().unwrap();
        assert_eq!(baseline.known_fingerprints.len(), MAX_KNOWN_FINGERPRINTS);
        // Most recent kept, in recency order
        assert_eq!(
            baseline.known_fingerprints.last().unwrap(),
            "fingerprint-13-aaaaaaaa"
        );
        assert_eq!(
            baseline.known_fingerprints.first().unwrap(),
            "fingerprint-04-aaaaaaaa"
        );
    }

    #[tokio::test]
    async fn test_country_history_caps_at_twenty_most_recent() {
        let manager = manager();
        let attempt = human_attempt("u1");
        manager.create_baseline("u1", &attempt).await.unwrap();

        // 24 distinct codes on top of the seeded "US"
        for n in 0..24u8 {
            let mut next = attempt.clone();
            next.network.country_code =
                format!("{}{}", (b'A' + n / 5) as char, (b'A' + n % 5) as char);
            manager.update_baseline("u1", &next, true).await.unwrap();
        }

        let baseline = manager.get_baseline("u1").await.unwrap().unwrap();
        assert_eq!(baseline.known_countries.len(), MAX_KNOWN_COUNTRIES);
        // Oldest entries dropped, seeded country first among them
        assert!(!baseline.knows_country("US"));
        assert_eq!(baseline.known_countries.first().unwrap(), "AE");
        assert_eq!(baseline.known_countries.last().unwrap(), "ED");
    }

    #[tokio::test]
    async fn test_known_country_is_not_duplicated() {
        let manager = manager();
        let attempt = human_attempt("u1");
        manager.create_baseline("u1", &attempt).await.unwrap();
        manager.update_baseline("u1", &attempt, true).await.unwrap();
        manager.update_baseline("u1", &attempt, true).await.unwrap();

        let baseline = manager.get_baseline("u1").await.unwrap().unwrap();
        assert_eq!(baseline.known_countries, vec!["US".to_string()]);
    }

    #[tokio::test]
    async fn test_reliability_gate() {
        let manager = manager();
        let attempt = human_attempt("u1");

        assert!(!manager.is_baseline_reliable("u1").await.unwrap());
        manager.create_baseline("u1", &attempt).await.unwrap();
        assert!(!manager.is_baseline_reliable("u1").await.unwrap());
        manager.update_baseline("u1", &attempt, true).await.unwrap();
        assert!(!manager.is_baseline_reliable("u1").await.unwrap());
        manager.update_baseline("u1", &attempt, true).await.unwrap();
        assert!(manager.is_baseline_reliable("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_terminal_and_restarts_lifecycle() {
        let manager = manager();
        let attempt = human_attempt("u1");
        manager.create_baseline("u1", &attempt).await.unwrap();
        manager.update_baseline("u1", &attempt, true).await.unwrap();

        assert!(manager.delete_baseline("u1").await.unwrap());
        assert!(!manager.delete_baseline("u1").await.unwrap());
        assert!(manager.get_baseline("u1").await.unwrap().is_none());

        let restarted = manager.create_baseline("u1", &attempt).await.unwrap();
        assert_eq!(restarted.session_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_for_same_user_do_not_lose_sessions() {
        let manager = Arc::new(manager());
        let attempt = human_attempt("u1");
        manager.create_baseline("u1", &attempt).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let attempt = attempt.clone();
            handles.push(tokio::spawn(async move {
                manager.update_baseline("u1", &attempt, true).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let baseline = manager.get_baseline("u1").await.unwrap().unwrap();
        assert_eq!(baseline.session_count, 9);
    }

    #[tokio::test]
    async fn test_lock_registry_does_not_retain_idle_users() {
        let manager = Arc::new(manager());

        for user in ["u1", "u2", "u3"] {
            let attempt = human_attempt(user);
            manager.create_baseline(user, &attempt).await.unwrap();
            manager.update_baseline(user, &attempt, true).await.unwrap();
        }
        manager.delete_baseline("u1").await.unwrap();

        assert_eq!(manager.user_locks.lock().len(), 0);

        // Contended updates also leave nothing behind once they settle
        let attempt = human_attempt("u4");
        manager.create_baseline("u4", &attempt).await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            let attempt = attempt.clone();
            handles.push(tokio::spawn(async move {
                manager.update_baseline("u4", &attempt, true).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(manager.user_locks.lock().len(), 0);
    }
}

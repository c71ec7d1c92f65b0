// Caller-facing assessment service: orchestrates validation, baseline
// reads, the decision engine, session-token issuance, and verified
// baseline updates.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::baseline::{BaselineManager, MIN_SESSIONS_FOR_RELIABLE_BASELINE};
use crate::engine::{action_for, RiskDecisionEngine};
use crate::error::RiskError;
use crate::models::{LoginAttempt, RiskAssessment, RiskLevel};

/// Score reported when a step-up challenge is answered correctly: the
/// attempt stays medium-risk on record even though access is allowed.
pub const STEP_UP_ALLOWED_SCORE: u8 = 35;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String, // user id
    sid: String, // session id
    jti: String, // unique token id, for revocation lists
    iat: i64,
    exp: i64,
}

/// Issues HMAC-signed session tokens for allowed attempts.
pub struct SessionTokenIssuer {
    key: EncodingKey,
    ttl_hours: i64,
}

impl SessionTokenIssuer {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        SessionTokenIssuer {
            key: EncodingKey::from_secret(secret.as_bytes()),
            ttl_hours,
        }
    }

    pub fn issue(&self, user_id: &str, session_id: &str) -> Result<String, RiskError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.ttl_hours)).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.key)?)
    }
}

/// Result of an enrollment call.
#[derive(Clone, Debug, Serialize)]
pub struct EnrollmentStatus {
    pub status: &'static str, // "created" or "updated"
    pub user_id: String,
    pub session_count: u32,
    pub baseline_reliable: bool,
}

/// Admin/debug view of a stored baseline.
#[derive(Clone, Debug, Serialize)]
pub struct BaselineStatus {
    pub user_id: String,
    pub session_count: u32,
    pub baseline_reliable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub known_devices: usize,
    pub known_countries: Vec<String>,
}

/// Front door for risk assessment.
///
/// Each call is a pure synchronous computation plus one baseline read
/// and, for allowed attempts, one baseline write.
pub struct RiskAssessmentService {
    engine: Arc<RiskDecisionEngine>,
    baselines: Arc<BaselineManager>,
    tokens: SessionTokenIssuer,
}

impl RiskAssessmentService {
    pub fn new(
        engine: Arc<RiskDecisionEngine>,
        baselines: Arc<BaselineManager>,
        tokens: SessionTokenIssuer,
    ) -> Self {
        RiskAssessmentService {
            engine,
            baselines,
            tokens,
        }
    }

    pub fn engine(&self) -> &RiskDecisionEngine {
        &self.engine
    }

    /// Assess one attempt. A session token is issued only when the
    /// resulting level is low; a low-risk attempt also counts as a
    /// verified session for the baseline.
    pub async fn assess(&self, attempt: &LoginAttempt) -> Result<RiskAssessment, RiskError> {
        attempt.validate()?;

        // A failed read is scored like a genuine miss but logged
        // distinctly: it masks a real failure (telemetry must be able
        // to tell the two apart)
        let baseline = match self.baselines.get_baseline(&attempt.user_id).await {
            Ok(baseline) => baseline,
            Err(err) => {
                warn!(
                    "baseline read failed for {}: {}; scoring without baseline",
                    attempt.user_id, err
                );
                None
            }
        };

        let decision = self.engine.assess(attempt, baseline.as_ref());

        let mut session_token = None;
        if decision.level == RiskLevel::Low {
            session_token = Some(self.tokens.issue(&attempt.user_id, &attempt.session_id)?);
            // The risk response is already computed: a failed write must
            // not fail the request, only get reported for retry
            if let Err(err) = self
                .baselines
                .update_baseline(&attempt.user_id, attempt, true)
                .await
            {
                error!(
                    "baseline write failed for {} after low-risk attempt: {}",
                    attempt.user_id, err
                );
            }
        }

        Ok(RiskAssessment {
            risk_score: decision.score,
            risk_level: decision.level,
            action: decision.action.to_string(),
            flags: decision.flags,
            session_token,
        })
    }

    /// Resolve a step-up challenge issued for a medium-risk attempt.
    ///
    /// A correct answer allows access at the documented medium score; an
    /// incorrect answer blocks outright regardless of feature content.
    pub async fn verify_step_up(
        &self,
        attempt: &LoginAttempt,
        answer_correct: bool,
    ) -> Result<RiskAssessment, RiskError> {
        attempt.validate()?;

        if !answer_correct {
            return Ok(RiskAssessment {
                risk_score: 100,
                risk_level: RiskLevel::High,
                action: action_for(RiskLevel::High).to_string(),
                flags: vec!["failed_security_question".to_string()],
                session_token: None,
            });
        }

        let session_token = self.tokens.issue(&attempt.user_id, &attempt.session_id)?;

        // Step-up success makes this a verified session
        if let Err(err) = self
            .baselines
            .update_baseline(&attempt.user_id, attempt, true)
            .await
        {
            error!(
                "baseline write failed for {} after step-up: {}",
                attempt.user_id, err
            );
        }

        Ok(RiskAssessment {
            risk_score: STEP_UP_ALLOWED_SCORE,
            risk_level: RiskLevel::Medium,
            action: "allow".to_string(),
            flags: vec!["step_up_verified".to_string()],
            session_token: Some(session_token),
        })
    }

    /// Enroll a user during onboarding: create the initial baseline, or
    /// fold another verified session into an existing one.
    pub async fn enroll(&self, attempt: &LoginAttempt) -> Result<EnrollmentStatus, RiskError> {
        attempt.validate()?;

        // Create-or-update must happen under the manager's per-user
        // lock: a separate pre-read here would let two concurrent
        // enrollments both observe "no baseline" and lose a session
        let baseline = self
            .baselines
            .update_baseline(&attempt.user_id, attempt, true)
            .await?;

        Ok(EnrollmentStatus {
            status: if baseline.session_count == 1 {
                "created"
            } else {
                "updated"
            },
            user_id: baseline.user_id,
            session_count: baseline.session_count,
            baseline_reliable: baseline.session_count >= MIN_SESSIONS_FOR_RELIABLE_BASELINE,
        })
    }

    /// Baseline summary for admin/debug surfaces.
    pub async fn baseline_status(
        &self,
        user_id: &str,
    ) -> Result<Option<BaselineStatus>, RiskError> {
        let Some(baseline) = self.baselines.get_baseline(user_id).await? else {
            return Ok(None);
        };
        let baseline_reliable = self.baselines.is_baseline_reliable(user_id).await?;
        Ok(Some(BaselineStatus {
            user_id: baseline.user_id,
            session_count: baseline.session_count,
            baseline_reliable,
            created_at: baseline.created_at,
            updated_at: baseline.updated_at,
            known_devices: baseline.known_fingerprints.len(),
            known_countries: baseline.known_countries,
        }))
    }

    /// Remove a user's baseline (account deletion or reset).
    pub async fn delete_baseline(&self, user_id: &str) -> Result<bool, RiskError> {
        Ok(self.baselines.delete_baseline(user_id).await?)
    }
}

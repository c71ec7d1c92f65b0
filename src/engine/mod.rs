// Risk decision engine: converts classifier output (or a deterministic
// rule-based surrogate when no model is loaded) into a score, level,
// action, and explanatory flags.

mod service;

pub use service::{
    BaselineStatus, EnrollmentStatus, RiskAssessmentService, SessionTokenIssuer,
    STEP_UP_ALLOWED_SCORE,
};

use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;

use crate::classifier::{ClassLabel, Scorer, CLASS_COUNT};
use crate::features::{
    build_feature_vector, z_score, BOT_CURVATURE_MIN, BOT_DWELL_MIN_MS,
    BOT_DWELL_STD_MIN_MS, BOT_FORM_TIME_MIN_MS, BOT_PRECISION_MIN_PX, BOT_TYPING_SPEED_CPM,
    BOT_VELOCITY_MAX_PX_MS,
};
use crate::models::{LoginAttempt, RiskLevel, UserBaseline};

pub const LOW_RISK_MAX: u8 = 30;
pub const MEDIUM_RISK_MAX: u8 = 70;

// Bot evidence weighs 1.5x impersonation evidence; legitimate evidence
// contributes nothing.
const CLASS_SCORE_WEIGHTS: [f64; CLASS_COUNT] = [0.0, 60.0, 90.0];

// Rule-fallback scoring constants.
const BOT_SHORT_CIRCUIT_COUNT: u32 = 4;
const BOT_SHORT_CIRCUIT_SCORE: u8 = 85;
const BOT_SIGNAL_POINTS: u32 = 8;
const DATACENTER_POINTS: u32 = 10;
const NEW_DEVICE_POINTS: u32 = 8;
const NEW_COUNTRY_POINTS: u32 = 12;
const IMPERSONATION_BONUS: u32 = 20;
const IMPERSONATION_Z_THRESHOLD: f64 = 2.0;
const PATTERN_DEVIATION_FLAG_THRESHOLD: f64 = 2.5;

/// Full outcome of one engine pass, before session-token policy.
#[derive(Clone, Debug)]
pub struct RiskDecision {
    pub score: u8,
    pub level: RiskLevel,
    pub action: &'static str,
    pub predicted: ClassLabel,
    pub probabilities: [f64; CLASS_COUNT],
    pub flags: Vec<String>,
}

/// Stateless-per-call decision engine. The scorer is injected at
/// construction and replaced only through [`RiskDecisionEngine::replace_scorer`];
/// absence of a scorer means rule-based fallback for every call.
pub struct RiskDecisionEngine {
    scorer: RwLock<Option<Arc<dyn Scorer>>>,
}

impl RiskDecisionEngine {
    pub fn new(scorer: Option<Arc<dyn Scorer>>) -> Self {
        if scorer.is_none() {
            // Logged once here, not per request
            info!("no trained model available; rule-based fallback active");
        }
        RiskDecisionEngine {
            scorer: RwLock::new(scorer),
        }
    }

    /// Swap the scorer after a successful reload. `None` reverts the
    /// engine to rule-based mode.
    pub fn replace_scorer(&self, scorer: Option<Arc<dyn Scorer>>) {
        *self.scorer.write() = scorer;
    }

    pub fn has_scorer(&self) -> bool {
        self.scorer.read().is_some()
    }

    /// Score one attempt against the user's baseline (if any).
    pub fn assess(&self, attempt: &LoginAttempt, baseline: Option<&UserBaseline>) -> RiskDecision {
        let vector = build_feature_vector(attempt, baseline);

        let scorer = self.scorer.read().clone();
        let (score, predicted, probabilities) = match scorer {
            Some(scorer) => {
                let probs = scorer.predict_proba(&vector);
                if usable_probabilities(&probs) {
                    (classifier_score(&probs), scorer.predict(&vector), probs)
                } else {
                    warn!("scorer returned unusable probabilities; using rule-based surrogate");
                    rule_based_score(attempt, baseline)
                }
            }
            None => rule_based_score(attempt, baseline),
        };

        let level = risk_level(score);
        let flags = derive_flags(attempt, baseline, predicted, &probabilities);

        RiskDecision {
            score,
            level,
            action: action_for(level),
            predicted,
            probabilities,
            flags,
        }
    }
}

fn usable_probabilities(probs: &[f64; CLASS_COUNT]) -> bool {
    probs.iter().all(|p| p.is_finite() && *p >= 0.0) && probs.iter().sum::<f64>() > 0.0
}

/// Weighted blend of class probabilities, clipped to 0-100.
fn classifier_score(probs: &[f64; CLASS_COUNT]) -> u8 {
    let raw: f64 = probs
        .iter()
        .zip(CLASS_SCORE_WEIGHTS.iter())
        .map(|(p, w)| p * w)
        .sum();
    raw.clamp(0.0, 100.0).round() as u8
}

pub fn risk_level(score: u8) -> RiskLevel {
    if score <= LOW_RISK_MAX {
        RiskLevel::Low
    } else if score <= MEDIUM_RISK_MAX {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

pub fn action_for(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "allow",
        RiskLevel::Medium => "step_up_auth",
        RiskLevel::High => "block",
    }
}

/// Deterministic surrogate used when no trained scorer is available.
///
/// The bot-signal subset here intentionally excludes micro-corrections
/// and idle time: those two are the noisiest heuristics and would push
/// ordinary touchpad users over the short-circuit threshold.
fn rule_based_score(
    attempt: &LoginAttempt,
    baseline: Option<&UserBaseline>,
) -> (u8, ClassLabel, [f64; CLASS_COUNT]) {
    let k = &attempt.keystroke;
    let m = &attempt.mouse;
    let i = &attempt.interaction;

    let bot_count = [
        k.typing_speed_cpm > BOT_TYPING_SPEED_CPM,
        k.dwell_time_mean_ms < BOT_DWELL_MIN_MS,
        k.dwell_time_std_ms < BOT_DWELL_STD_MIN_MS,
        m.avg_velocity_px_ms > BOT_VELOCITY_MAX_PX_MS,
        m.path_curvature_ratio < BOT_CURVATURE_MIN,
        m.click_precision_px < BOT_PRECISION_MIN_PX,
        i.form_completion_time_ms < BOT_FORM_TIME_MIN_MS,
    ]
    .iter()
    .filter(|&&hit| hit)
    .count() as u32;

    if bot_count >= BOT_SHORT_CIRCUIT_COUNT {
        return (BOT_SHORT_CIRCUIT_SCORE, ClassLabel::Bot, [0.05, 0.1, 0.85]);
    }

    let mut score = bot_count * BOT_SIGNAL_POINTS;

    if attempt.network.is_datacenter {
        score += DATACENTER_POINTS;
    }

    let mut predicted = ClassLabel::Legitimate;
    if let Some(baseline) = baseline {
        if !baseline.knows_fingerprint(&attempt.device.fingerprint_hash) {
            score += NEW_DEVICE_POINTS;
        }
        if !baseline.knows_country(&attempt.network.country_code) {
            score += NEW_COUNTRY_POINTS;
        }

        // Same-human check: strong deviation on several core metrics
        // with plausible raw values points at a different person
        let deviations = [
            z_score(
                k.dwell_time_mean_ms,
                baseline.keystroke_dwell_mean,
                baseline.keystroke_dwell_std,
            ),
            z_score(
                k.typing_speed_cpm,
                baseline.typing_speed_mean,
                baseline.typing_speed_std,
            ),
            z_score(
                m.avg_velocity_px_ms,
                baseline.mouse_velocity_mean,
                baseline.mouse_velocity_std,
            ),
        ];
        let high_deviation_count = deviations
            .iter()
            .filter(|&&d| d > IMPERSONATION_Z_THRESHOLD)
            .count();
        if high_deviation_count >= 2 {
            score += IMPERSONATION_BONUS;
            predicted = ClassLabel::Impersonation;
        }
    }

    let score = score.min(100) as u8;

    // Synthetic probability triples keep downstream flag logic uniform
    // between classifier and fallback modes
    let probabilities = if predicted == ClassLabel::Impersonation {
        [0.3, 0.6, 0.1]
    } else if bot_count >= 2 {
        [0.2, 0.2, 0.6]
    } else {
        [0.8, 0.15, 0.05]
    };

    (score, predicted, probabilities)
}

/// Explanatory flag identifiers for a decision. Deduplicated; order is
/// not significant.
fn derive_flags(
    attempt: &LoginAttempt,
    baseline: Option<&UserBaseline>,
    predicted: ClassLabel,
    probabilities: &[f64; CLASS_COUNT],
) -> Vec<String> {
    let k = &attempt.keystroke;
    let m = &attempt.mouse;
    let i = &attempt.interaction;

    let mut flags: Vec<&'static str> = Vec::new();

    match predicted {
        ClassLabel::Impersonation => flags.push("possible_impersonation"),
        ClassLabel::Bot => flags.push("likely_bot"),
        ClassLabel::Legitimate => {}
    }

    if probabilities[1] > 0.4 {
        flags.push("behavioral_mismatch");
    }
    if probabilities[2] > 0.5 {
        flags.push("automation_detected");
    }

    if k.typing_speed_cpm > BOT_TYPING_SPEED_CPM {
        flags.push("inhuman_typing_speed");
    }
    if k.dwell_time_std_ms < BOT_DWELL_STD_MIN_MS {
        flags.push("robotic_typing_consistency");
    }
    if m.path_curvature_ratio < BOT_CURVATURE_MIN {
        flags.push("robotic_mouse_movement");
    }
    if m.click_precision_px < BOT_PRECISION_MIN_PX {
        flags.push("inhuman_click_precision");
    }
    if i.form_completion_time_ms < BOT_FORM_TIME_MIN_MS {
        flags.push("instant_form_completion");
    }

    if attempt.network.is_datacenter {
        flags.push("datacenter_ip");
    }

    match baseline {
        Some(baseline) => {
            if !baseline.knows_fingerprint(&attempt.device.fingerprint_hash) {
                flags.push("new_device");
            }
            if !baseline.knows_country(&attempt.network.country_code) {
                flags.push("new_location");
            }
            if z_score(
                k.typing_speed_cpm,
                baseline.typing_speed_mean,
                baseline.typing_speed_std,
            ) > PATTERN_DEVIATION_FLAG_THRESHOLD
            {
                flags.push("typing_pattern_deviation");
            }
            if z_score(
                m.avg_velocity_px_ms,
                baseline.mouse_velocity_mean,
                baseline.mouse_velocity_std,
            ) > PATTERN_DEVIATION_FLAG_THRESHOLD
            {
                flags.push("mouse_pattern_deviation");
            }
        }
        None => flags.push("no_baseline"),
    }

    flags.sort_unstable();
    flags.dedup();
    flags.into_iter().map(|f| f.to_string()).collect()
}

// Fixed-order feature synthesis for the risk classifier.
//
// The feature order here is the single source of truth shared by
// offline training and online inference. Any reordering silently
// corrupts every downstream score, so the vector is a fixed-arity
// array and the names below are the only place order is defined.

use crate::models::{LoginAttempt, UserBaseline};

pub const RAW_FEATURE_COUNT: usize = 12;
pub const DEVIATION_FEATURE_COUNT: usize = 8;
pub const BOT_SIGNAL_COUNT: usize = 9;
pub const CONTEXT_SIGNAL_COUNT: usize = 3;
pub const FEATURE_COUNT: usize =
    RAW_FEATURE_COUNT + DEVIATION_FEATURE_COUNT + BOT_SIGNAL_COUNT + CONTEXT_SIGNAL_COUNT;

pub type FeatureVector = [f64; FEATURE_COUNT];

/// Feature names aligned to [`build_feature_vector`] output, for
/// importance reporting and artifact sanity checks.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // Raw signals (12)
    "raw_dwell_mean",
    "raw_dwell_std",
    "raw_flight_mean",
    "raw_typing_speed",
    "raw_mouse_velocity",
    "raw_curvature",
    "raw_click_precision",
    "raw_micro_corrections",
    "raw_total_distance",
    "raw_form_time",
    "raw_first_interaction",
    "raw_idle_pct",
    // Deviation signals (8)
    "dev_dwell",
    "dev_flight",
    "dev_typing_speed",
    "dev_velocity",
    "dev_curvature",
    "dev_precision",
    "dev_micro_corrections",
    "dev_form_time",
    // Bot signals (9)
    "bot_fast_typing",
    "bot_short_dwell",
    "bot_consistent_dwell",
    "bot_fast_mouse",
    "bot_straight_path",
    "bot_precise_click",
    "bot_no_corrections",
    "bot_instant_form",
    "bot_no_idle",
    // Context signals (3)
    "ctx_datacenter",
    "ctx_new_country",
    "ctx_expected_vpn",
];

// Human behavior bounds, calibrated from expected human ranges.
// Fixed constants, not learned.
pub const BOT_TYPING_SPEED_CPM: f64 = 800.0;
pub const BOT_DWELL_MIN_MS: f64 = 30.0;
pub const BOT_DWELL_STD_MIN_MS: f64 = 5.0;
pub const BOT_VELOCITY_MAX_PX_MS: f64 = 5.0;
pub const BOT_CURVATURE_MIN: f64 = 1.05;
pub const BOT_PRECISION_MIN_PX: f64 = 2.0;
pub const BOT_CORRECTIONS_MIN: f64 = 0.5;
pub const BOT_FORM_TIME_MIN_MS: f64 = 1000.0;
pub const BOT_IDLE_MIN_PCT: f64 = 1.0;

/// Deviations beyond this many baseline stds are treated as equally
/// extreme. One cap convention everywhere: training and inference must
/// agree.
pub const Z_SCORE_CAP: f64 = 5.0;

const STD_EPSILON: f64 = 1e-3;

/// Capped z-score of `value` against a baseline (mean, std) pair.
///
/// A near-zero std is an expected state (single-session baselines,
/// perfectly consistent users): an exact match scores 0, anything else
/// scores the cap.
pub fn z_score(value: f64, mean: f64, std: f64) -> f64 {
    if std < STD_EPSILON {
        if (value - mean).abs() < STD_EPSILON {
            0.0
        } else {
            Z_SCORE_CAP
        }
    } else {
        (((value - mean) / std).abs()).min(Z_SCORE_CAP)
    }
}

fn raw_features(attempt: &LoginAttempt) -> [f64; RAW_FEATURE_COUNT] {
    let k = &attempt.keystroke;
    let m = &attempt.mouse;
    let i = &attempt.interaction;
    [
        k.dwell_time_mean_ms,
        k.dwell_time_std_ms,
        k.flight_time_mean_ms,
        k.typing_speed_cpm,
        m.avg_velocity_px_ms,
        m.path_curvature_ratio,
        m.click_precision_px,
        m.micro_corrections_per_movement,
        m.total_distance_px,
        i.form_completion_time_ms,
        i.time_to_first_interaction_ms,
        i.idle_time_percentage,
    ]
}

/// Z-score deviations of the attempt against every baseline-tracked
/// metric. Critical for impersonation detection.
pub fn deviation_features(
    attempt: &LoginAttempt,
    baseline: &UserBaseline,
) -> [f64; DEVIATION_FEATURE_COUNT] {
    let k = &attempt.keystroke;
    let m = &attempt.mouse;
    let i = &attempt.interaction;
    [
        z_score(
            k.dwell_time_mean_ms,
            baseline.keystroke_dwell_mean,
            baseline.keystroke_dwell_std,
        ),
        z_score(
            k.flight_time_mean_ms,
            baseline.keystroke_flight_mean,
            baseline.keystroke_flight_std,
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
        z_score(
            m.path_curvature_ratio,
            baseline.curvature_mean,
            baseline.curvature_std,
        ),
        z_score(
            m.click_precision_px,
            baseline.click_precision_mean,
            baseline.click_precision_std,
        ),
        z_score(
            m.micro_corrections_per_movement,
            baseline.micro_corrections_mean,
            baseline.micro_corrections_std,
        ),
        z_score(
            i.form_completion_time_ms,
            baseline.typical_form_time_mean,
            baseline.typical_form_time_std,
        ),
    ]
}

/// Boolean-as-float indicators of automation.
pub fn bot_signals(attempt: &LoginAttempt) -> [f64; BOT_SIGNAL_COUNT] {
    let k = &attempt.keystroke;
    let m = &attempt.mouse;
    let i = &attempt.interaction;
    [
        (k.typing_speed_cpm > BOT_TYPING_SPEED_CPM) as u8 as f64,
        (k.dwell_time_mean_ms < BOT_DWELL_MIN_MS) as u8 as f64,
        (k.dwell_time_std_ms < BOT_DWELL_STD_MIN_MS) as u8 as f64,
        (m.avg_velocity_px_ms > BOT_VELOCITY_MAX_PX_MS) as u8 as f64,
        (m.path_curvature_ratio < BOT_CURVATURE_MIN) as u8 as f64,
        (m.click_precision_px < BOT_PRECISION_MIN_PX) as u8 as f64,
        (m.micro_corrections_per_movement < BOT_CORRECTIONS_MIN) as u8 as f64,
        (i.form_completion_time_ms < BOT_FORM_TIME_MIN_MS) as u8 as f64,
        (i.idle_time_percentage < BOT_IDLE_MIN_PCT) as u8 as f64,
    ]
}

fn context_signals(
    attempt: &LoginAttempt,
    baseline: Option<&UserBaseline>,
) -> [f64; CONTEXT_SIGNAL_COUNT] {
    let new_country = baseline
        .map(|b| !b.knows_country(&attempt.network.country_code))
        .unwrap_or(false);
    // The baseline schema does not persist VPN-usage history, so the
    // habitual-VPN slot is always 0. It stays in the vector to keep the
    // feature order stable for already-trained artifacts.
    let expected_vpn = false;
    [
        attempt.network.is_datacenter as u8 as f64,
        new_country as u8 as f64,
        (expected_vpn && attempt.network.is_datacenter) as u8 as f64,
    ]
}

/// Build the complete fixed-order feature vector for an attempt.
///
/// Absent a baseline, every deviation slot is exactly 0.
pub fn build_feature_vector(
    attempt: &LoginAttempt,
    baseline: Option<&UserBaseline>,
) -> FeatureVector {
    let raw = raw_features(attempt);
    let deviations = match baseline {
        Some(b) => deviation_features(attempt, b),
        None => [0.0; DEVIATION_FEATURE_COUNT],
    };
    let bots = bot_signals(attempt);
    let context = context_signals(attempt, baseline);

    let mut vector = [0.0; FEATURE_COUNT];
    let mut offset = 0;
    for block in [&raw[..], &deviations[..], &bots[..], &context[..]] {
        vector[offset..offset + block.len()].copy_from_slice(block);
        offset += block.len();
    }
    vector
}

// Shared fixtures for unit tests.

use chrono::Utc;

use crate::classifier::{ModelArtifact, CLASS_COUNT};
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use crate::models::{
    ClientMetadata, DeviceInfo, InteractionMetrics, KeystrokeMetrics, LoginAttempt, MouseMetrics,
    NetworkInfo, UserBaseline,
};

/// A plausible human login attempt from a known device in the US.
pub fn human_attempt(user_id: &str) -> LoginAttempt {
    LoginAttempt {
        session_id: "sess-0001".to_string(),
        user_id: user_id.to_string(),
        timestamp: Utc::now(),
        event_type: "login_attempt".to_string(),
        keystroke: KeystrokeMetrics {
            dwell_time_mean_ms: 90.0,
            dwell_time_std_ms: 15.0,
            flight_time_mean_ms: 115.0,
            typing_speed_cpm: 320.0,
        },
        mouse: MouseMetrics {
            avg_velocity_px_ms: 1.2,
            path_curvature_ratio: 1.3,
            click_precision_px: 10.0,
            micro_corrections_per_movement: 3.0,
            total_distance_px: 4200.0,
        },
        device: DeviceInfo {
            fingerprint_hash: "a1b2c3d4e5f6a7b8c9d0".to_string(),
        },
        network: NetworkInfo {
            ip_address: "203.0.113.7".to_string(),
            is_datacenter: false,
            country_code: "US".to_string(),
        },
        interaction: InteractionMetrics {
            form_completion_time_ms: 8000.0,
            time_to_first_interaction_ms: 900.0,
            idle_time_percentage: 12.0,
        },
        metadata: ClientMetadata {
            user_agent: "Mozilla/5.0".to_string(),
            screen_resolution: "1920x1080".to_string(),
        },
    }
}

/// An automated attempt: inhuman speed and precision from a datacenter IP.
pub fn bot_attempt(user_id: &str) -> LoginAttempt {
    let mut attempt = human_attempt(user_id);
    attempt.keystroke = KeystrokeMetrics {
        dwell_time_mean_ms: 15.0,
        dwell_time_std_ms: 2.0,
        flight_time_mean_ms: 12.0,
        typing_speed_cpm: 1200.0,
    };
    attempt.mouse = MouseMetrics {
        avg_velocity_px_ms: 12.0,
        path_curvature_ratio: 1.01,
        click_precision_px: 0.5,
        micro_corrections_per_movement: 0.0,
        total_distance_px: 800.0,
    };
    attempt.interaction = InteractionMetrics {
        form_completion_time_ms: 300.0,
        time_to_first_interaction_ms: 50.0,
        idle_time_percentage: 0.0,
    };
    attempt.network.is_datacenter = true;
    attempt.device.fingerprint_hash = "ffffeeeeddddccccbbbb".to_string();
    attempt
}

/// A structurally valid model artifact with zero weights: every class
/// scores equal probability.
pub fn uniform_artifact() -> ModelArtifact {
    ModelArtifact {
        version: 1,
        feature_names: FEATURE_NAMES.iter().map(|n| n.to_string()).collect(),
        scaler_mean: vec![0.0; FEATURE_COUNT],
        scaler_std: vec![1.0; FEATURE_COUNT],
        weights: vec![vec![0.0; FEATURE_COUNT]; CLASS_COUNT],
        intercepts: vec![0.0; CLASS_COUNT],
    }
}

/// A mature baseline whose means match [`human_attempt`] exactly, with
/// realistic low stds and the attempt's device/country already known.
pub fn settled_baseline(attempt: &LoginAttempt) -> UserBaseline {
    let now = Utc::now();
    UserBaseline {
        user_id: attempt.user_id.clone(),
        created_at: now,
        updated_at: now,
        session_count: 5,
        keystroke_dwell_mean: attempt.keystroke.dwell_time_mean_ms,
        keystroke_dwell_std: 8.0,
        keystroke_flight_mean: attempt.keystroke.flight_time_mean_ms,
        keystroke_flight_std: 12.0,
        typing_speed_mean: attempt.keystroke.typing_speed_cpm,
        typing_speed_std: 30.0,
        mouse_velocity_mean: attempt.mouse.avg_velocity_px_ms,
        mouse_velocity_std: 0.2,
        curvature_mean: attempt.mouse.path_curvature_ratio,
        curvature_std: 0.08,
        click_precision_mean: attempt.mouse.click_precision_px,
        click_precision_std: 2.5,
        micro_corrections_mean: attempt.mouse.micro_corrections_per_movement,
        micro_corrections_std: 0.8,
        typical_form_time_mean: attempt.interaction.form_completion_time_ms,
        typical_form_time_std: 1500.0,
        known_fingerprints: vec![attempt.device.fingerprint_hash.clone()],
        known_countries: vec![attempt.network.country_code.clone()],
    }
}

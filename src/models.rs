// Shared data model for the behavioral risk engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Risk classification for a login attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

// Keystroke timing signals captured while the user typed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeystrokeMetrics {
    pub dwell_time_mean_ms: f64,  // Average key hold duration
    pub dwell_time_std_ms: f64,   // Std dev of key hold duration
    pub flight_time_mean_ms: f64, // Average time between keys
    pub typing_speed_cpm: f64,    // Characters per minute
}

// Mouse dynamics captured during the session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MouseMetrics {
    pub avg_velocity_px_ms: f64,   // Average mouse speed
    pub path_curvature_ratio: f64, // Actual path / straight line, 1.0 = straight
    pub click_precision_px: f64,   // Distance from target center
    pub micro_corrections_per_movement: f64, // Small direction changes
    pub total_distance_px: f64,    // Total mouse travel
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub fingerprint_hash: String, // Opaque stable identifier, 16-64 chars
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip_address: String,
    pub is_datacenter: bool,  // True if IP is from datacenter/VPN
    pub country_code: String, // 2-letter code
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractionMetrics {
    pub form_completion_time_ms: f64,
    pub time_to_first_interaction_ms: f64,
    pub idle_time_percentage: f64, // 0-100
}

// Passed through for telemetry, never scored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub user_agent: String,
    pub screen_resolution: String,
}

/// A single login/card-entry attempt as reported by the client.
///
/// Immutable per request. Must pass [`LoginAttempt::validate`] before it
/// reaches feature synthesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    pub keystroke: KeystrokeMetrics,
    pub mouse: MouseMetrics,
    pub device: DeviceInfo,
    pub network: NetworkInfo,
    pub interaction: InteractionMetrics,
    pub metadata: ClientMetadata,
}

fn default_event_type() -> String {
    "login_attempt".to_string()
}

impl LoginAttempt {
    /// Reject malformed or out-of-range fields before any scoring.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.session_id.is_empty() {
            return Err(ValidationError::EmptyField("session_id"));
        }
        if self.user_id.is_empty() {
            return Err(ValidationError::EmptyField("user_id"));
        }

        let non_negative: [(&'static str, f64); 10] = [
            ("dwell_time_mean_ms", self.keystroke.dwell_time_mean_ms),
            ("dwell_time_std_ms", self.keystroke.dwell_time_std_ms),
            ("flight_time_mean_ms", self.keystroke.flight_time_mean_ms),
            ("typing_speed_cpm", self.keystroke.typing_speed_cpm),
            ("avg_velocity_px_ms", self.mouse.avg_velocity_px_ms),
            ("click_precision_px", self.mouse.click_precision_px),
            (
                "micro_corrections_per_movement",
                self.mouse.micro_corrections_per_movement,
            ),
            ("total_distance_px", self.mouse.total_distance_px),
            (
                "form_completion_time_ms",
                self.interaction.form_completion_time_ms,
            ),
            (
                "time_to_first_interaction_ms",
                self.interaction.time_to_first_interaction_ms,
            ),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::NegativeValue { field, value });
            }
        }

        if !self.mouse.path_curvature_ratio.is_finite() || self.mouse.path_curvature_ratio < 1.0 {
            return Err(ValidationError::CurvatureBelowStraightLine(
                self.mouse.path_curvature_ratio,
            ));
        }

        let idle = self.interaction.idle_time_percentage;
        if !idle.is_finite() || !(0.0..=100.0).contains(&idle) {
            return Err(ValidationError::PercentageOutOfRange(idle));
        }

        let country = &self.network.country_code;
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::MalformedCountryCode(country.clone()));
        }

        let fp_len = self.device.fingerprint_hash.len();
        if !(16..=64).contains(&fp_len) {
            return Err(ValidationError::MalformedFingerprint(fp_len));
        }

        Ok(())
    }
}

/// Per-user behavioral baseline: running (mean, std) pairs for each
/// tracked metric plus bounded device/country history.
///
/// Stds are always >= 0 and each (mean, std) pair is only ever updated
/// together by the baseline manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserBaseline {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub session_count: u32,
    pub keystroke_dwell_mean: f64,
    pub keystroke_dwell_std: f64,
    pub keystroke_flight_mean: f64,
    pub keystroke_flight_std: f64,
    pub typing_speed_mean: f64,
    pub typing_speed_std: f64,
    pub mouse_velocity_mean: f64,
    pub mouse_velocity_std: f64,
    pub curvature_mean: f64,
    pub curvature_std: f64,
    pub click_precision_mean: f64,
    pub click_precision_std: f64,
    pub micro_corrections_mean: f64,
    pub micro_corrections_std: f64,
    pub typical_form_time_mean: f64,
    pub typical_form_time_std: f64,
    pub known_fingerprints: Vec<String>, // Most recent 10, no duplicates
    pub known_countries: Vec<String>,    // Most recent 20, no duplicates
}

impl UserBaseline {
    pub fn knows_fingerprint(&self, fingerprint: &str) -> bool {
        self.known_fingerprints.iter().any(|f| f == fingerprint)
    }

    pub fn knows_country(&self, country_code: &str) -> bool {
        self.known_countries.iter().any(|c| c == country_code)
    }
}

/// Outcome of a risk assessment, returned to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: u8, // 0-100
    pub risk_level: RiskLevel,
    pub action: String,
    pub flags: Vec<String>, // Deduplicated, order not significant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_attempt() -> LoginAttempt {
        crate::test_support::human_attempt("user-001")
    }

    #[test]
    fn test_valid_attempt_passes() {
        assert!(sample_attempt().validate().is_ok());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut attempt = sample_attempt();
        attempt.keystroke.dwell_time_mean_ms = -1.0;
        assert_eq!(
            attempt.validate(),
            Err(ValidationError::NegativeValue {
                field: "dwell_time_mean_ms",
                value: -1.0
            })
        );
    }

    #[test]
    fn test_idle_percentage_bounds() {
        let mut attempt = sample_attempt();
        attempt.interaction.idle_time_percentage = 100.5;
        assert_eq!(
            attempt.validate(),
            Err(ValidationError::PercentageOutOfRange(100.5))
        );
    }

    #[test]
    fn test_curvature_below_one_rejected() {
        let mut attempt = sample_attempt();
        attempt.mouse.path_curvature_ratio = 0.98;
        assert!(matches!(
            attempt.validate(),
            Err(ValidationError::CurvatureBelowStraightLine(_))
        ));
    }

    #[test]
    fn test_malformed_country_code_rejected() {
        let mut attempt = sample_attempt();
        attempt.network.country_code = "USA".to_string();
        assert!(matches!(
            attempt.validate(),
            Err(ValidationError::MalformedCountryCode(_))
        ));

        attempt.network.country_code = "U1".to_string();
        assert!(matches!(
            attempt.validate(),
            Err(ValidationError::MalformedCountryCode(_))
        ));
    }

    #[test]
    fn test_short_fingerprint_rejected() {
        let mut attempt = sample_attempt();
        attempt.device.fingerprint_hash = "tooshort".to_string();
        assert_eq!(
            attempt.validate(),
            Err(ValidationError::MalformedFingerprint(8))
        );
    }
}

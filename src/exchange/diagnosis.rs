use chrono::{DateTime, Utc};
use serde::Serialize;

/// Clock skew above which a resync is recommended (milliseconds)
pub const SKEW_WARNING_MS: i64 = 5_000;

/// recvWindow values probed before the configured one
pub const PROBE_RECV_WINDOWS: [u64; 2] = [5_000, 30_000];

/// Outcome of one authenticated probe
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthProbe {
    pub recv_window_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Connectivity and credential report for one user.
///
/// Produced by `ExchangeApi::diagnose`, which reports problems in the
/// fields below instead of failing.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DiagnosisReport {
    pub user_id: Option<i64>,
    pub credential_error: Option<String>,
    pub api_key_present: bool,
    pub secret_key_present: bool,
    pub api_key_length: usize,
    pub secret_key_length: usize,
    /// First six characters only
    pub api_key_prefix: Option<String>,
    pub api_key_format_valid: bool,
    pub secret_key_format_valid: bool,
    pub testnet: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub client_error: Option<String>,
    pub server_time: Option<DateTime<Utc>>,
    pub local_time: Option<DateTime<Utc>>,
    /// local − server, milliseconds
    pub time_diff_ms: Option<i64>,
    pub server_time_error: Option<String>,
    pub network_accessible: bool,
    pub auth_probes: Vec<AuthProbe>,
    pub working_recv_window: Option<u64>,
    pub recommendations: Vec<String>,
}

/// recvWindow values to probe, in order, without duplicates.
pub fn probe_windows(configured: u64) -> Vec<u64> {
    let mut windows = PROBE_RECV_WINDOWS.to_vec();
    if !windows.contains(&configured) {
        windows.push(configured);
    }
    windows
}

impl DiagnosisReport {
    /// Fill `recommendations` from the collected findings.
    pub fn finish(mut self) -> Self {
        let mut recs = Vec::new();

        if self.credential_error.is_some() || !self.api_key_present || !self.secret_key_present {
            recs.push("Configure an API key and secret key for this user".to_string());
        } else if !self.api_key_format_valid || !self.secret_key_format_valid {
            recs.push(
                "API key or secret has an unexpected format (expected 64 alphanumeric characters)"
                    .to_string(),
            );
        }

        if !self.network_accessible {
            recs.push(format!(
                "Exchange at {} is unreachable; check network access and proxy settings",
                self.base_url
            ));
        }

        if let Some(diff) = self.time_diff_ms {
            if diff.abs() > SKEW_WARNING_MS {
                recs.push(format!(
                    "Local clock differs from exchange time by {}ms; synchronize the system clock (NTP)",
                    diff
                ));
            }
        }

        if self.network_accessible && !self.auth_probes.is_empty() {
            match self.working_recv_window {
                None => recs.push(
                    "Authenticated requests failed for every recvWindow; verify key activation, IP whitelist and permissions"
                        .to_string(),
                ),
                Some(window) if self.auth_probes.len() > 1 => recs.push(format!(
                    "Authentication only succeeded with recvWindow={}ms; consider configuring it",
                    window
                )),
                Some(_) => {}
            }
        }

        if self.testnet {
            recs.push(
                "Testnet is enabled; keys must be created on the exchange testnet".to_string(),
            );
        }

        self.recommendations = recs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_windows_are_deduplicated() {
        assert_eq!(probe_windows(60_000), vec![5_000, 30_000, 60_000]);
        assert_eq!(probe_windows(5_000), vec![5_000, 30_000]);
    }

    #[test]
    fn recommends_clock_sync_on_skew() {
        let report = DiagnosisReport {
            api_key_present: true,
            secret_key_present: true,
            api_key_format_valid: true,
            secret_key_format_valid: true,
            network_accessible: true,
            time_diff_ms: Some(-7_500),
            ..Default::default()
        }
        .finish();
        assert!(report.recommendations.iter().any(|r| r.contains("NTP")));
    }

    #[test]
    fn recommends_permissions_when_all_probes_fail() {
        let report = DiagnosisReport {
            api_key_present: true,
            secret_key_present: true,
            api_key_format_valid: true,
            secret_key_format_valid: true,
            network_accessible: true,
            testnet: true,
            auth_probes: vec![AuthProbe {
                recv_window_ms: 5_000,
                success: false,
                error: Some("invalid API key".into()),
            }],
            ..Default::default()
        }
        .finish();
        assert!(report.recommendations.iter().any(|r| r.contains("IP whitelist")));
        assert!(report.recommendations.iter().any(|r| r.contains("Testnet")));
    }

    #[test]
    fn missing_keys_are_reported() {
        let report = DiagnosisReport::default().finish();
        assert!(report.recommendations[0].contains("Configure an API key"));
    }
}

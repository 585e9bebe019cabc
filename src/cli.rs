use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::exchange::DiagnosisReport;
use crate::persistence::StrategyPage;

#[derive(Parser)]
#[command(name = "cctrade")]
#[command(version)]
#[command(about = "Multi-user strategy execution engine for spot and USDT-margined futures", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory (default.toml plus the CCTRADE_ENV file)
    #[arg(short, long, default_value = "config", global = true)]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler until Ctrl-C or SIGTERM
    Run,
    /// Connectivity and credential report for a user
    Diagnose {
        #[arg(short, long)]
        user: i64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a user's keys against the spot and futures accounts
    ValidateCredentials {
        #[arg(short, long)]
        user: i64,
    },
    /// Load and validate the configuration
    CheckConfig,
    /// Apply database migrations
    Migrate,
    /// List a user's strategies, newest first
    Strategies {
        #[arg(short, long)]
        user: i64,
        #[arg(long, default_value = "1")]
        page: i64,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

/// Render configuration problems, one per line.
pub fn format_config_report(config: &AppConfig, problems: &[String]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "exchange: {} (spot {}, futures {})\n",
        if config.exchange.testnet { "testnet" } else { "mainnet" },
        config.exchange.spot_base_url(),
        config.exchange.futures_base_url()
    ));
    out.push_str(&format!(
        "scheduler: prices {}s, orders {}s, withdrawal {}s, dual {}s, futures {}s, item timeout {}s\n",
        config.scheduler.price_interval_secs,
        config.scheduler.order_interval_secs,
        config.scheduler.withdrawal_interval_secs,
        config.scheduler.dual_investment_interval_secs,
        config.scheduler.futures_interval_secs,
        config.scheduler.item_timeout_secs
    ));
    out.push_str(&format!(
        "credentials: {}\n",
        if config.credentials.api_key.is_some() {
            "global key pair configured"
        } else {
            "none"
        }
    ));
    if problems.is_empty() {
        out.push_str("configuration OK\n");
    } else {
        for problem in problems {
            out.push_str(&format!("  ✗ {problem}\n"));
        }
    }
    out
}

pub fn format_diagnosis(report: &DiagnosisReport) -> String {
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    let mut out = String::new();

    out.push_str(&format!(
        "Diagnosis for user {}\n",
        report
            .user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    ));
    if let Some(e) = &report.credential_error {
        out.push_str(&format!("  credentials:  {e}\n"));
    }
    out.push_str(&format!(
        "  api key:      present={} length={} prefix={} format_ok={}\n",
        yes_no(report.api_key_present),
        report.api_key_length,
        report.api_key_prefix.as_deref().unwrap_or("-"),
        yes_no(report.api_key_format_valid)
    ));
    out.push_str(&format!(
        "  secret key:   present={} length={} format_ok={}\n",
        yes_no(report.secret_key_present),
        report.secret_key_length,
        yes_no(report.secret_key_format_valid)
    ));
    out.push_str(&format!(
        "  endpoint:     {} (testnet={}, timeout={}s)\n",
        report.base_url,
        yes_no(report.testnet),
        report.timeout_secs
    ));
    out.push_str(&format!(
        "  network:      {}\n",
        if report.network_accessible {
            "reachable".to_string()
        } else {
            report
                .server_time_error
                .clone()
                .unwrap_or_else(|| "unreachable".to_string())
        }
    ));
    if let Some(diff) = report.time_diff_ms {
        out.push_str(&format!("  clock skew:   {diff} ms\n"));
    }
    for probe in &report.auth_probes {
        out.push_str(&format!(
            "  recvWindow {:>6}: {}\n",
            probe.recv_window_ms,
            match (&probe.success, &probe.error) {
                (true, _) => "ok".to_string(),
                (false, Some(e)) => e.clone(),
                (false, None) => "failed".to_string(),
            }
        ));
    }
    if !report.recommendations.is_empty() {
        out.push_str("Recommendations:\n");
        for rec in &report.recommendations {
            out.push_str(&format!("  - {rec}\n"));
        }
    }
    out
}

pub fn format_strategies(page: &StrategyPage) -> String {
    let mut out = format!(
        "{:>6}  {:<12} {:<8} {:<12} {:<5} {:>14} {:>8} {:<10}\n",
        "ID", "FAMILY", "MARKET", "SYMBOL", "SIDE", "QUANTITY", "LAYER", "STATUS"
    );
    for s in &page.strategies {
        let status = if s.is_completed {
            "completed"
        } else if s.is_active {
            "active"
        } else {
            "paused"
        };
        out.push_str(&format!(
            "{:>6}  {:<12} {:<8} {:<12} {:<5} {:>14} {:>8} {:<10}\n",
            s.id,
            s.family().as_str(),
            s.market.as_str(),
            s.symbol,
            s.side.as_str(),
            s.quantity.to_string(),
            s.state.current_layer,
            status
        ));
    }
    let pages = if page.limit > 0 {
        (page.total + page.limit - 1) / page.limit
    } else {
        1
    };
    out.push_str(&format!(
        "page {}/{} ({} strategies)\n",
        page.page,
        pages.max(1),
        page.total
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["cctrade", "strategies", "--user", "7", "--page", "2"]);
        match cli.command {
            Commands::Strategies { user, page, limit } => {
                assert_eq!((user, page, limit), (7, 2, 20));
            }
            _ => panic!("expected strategies"),
        }
        assert_eq!(cli.config, "config");

        let cli = Cli::parse_from(["cctrade", "diagnose", "-u", "3", "--config", "/etc/cctrade"]);
        assert!(matches!(cli.command, Commands::Diagnose { user: 3, json: false }));
        assert_eq!(cli.config, "/etc/cctrade");
    }

    #[test]
    fn config_report_lists_problems() {
        let config = AppConfig::default();
        let ok = format_config_report(&config, &[]);
        assert!(ok.contains("configuration OK"));

        let bad = format_config_report(&config, &["gateway.rate_limit must be positive".into()]);
        assert!(bad.contains("rate_limit"));
        assert!(!bad.contains("configuration OK"));
    }

    #[test]
    fn diagnosis_never_prints_more_than_the_prefix() {
        let report = DiagnosisReport {
            user_id: Some(1),
            api_key_present: true,
            api_key_length: 64,
            api_key_prefix: Some("abcdef".into()),
            ..Default::default()
        };
        let text = format_diagnosis(&report);
        assert!(text.contains("prefix=abcdef"));
    }
}

//! Config validation CLI tool
//!
//! Validates a gotime configuration file and prints the effective settings.

use gotime_config::ConfigError;
use gotime_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        eprintln!();
        eprintln!("Usage: validate-config [config-file]");
        return ExitCode::from(2);
    }

    match gotime_config::load_config(&config_path) {
        Ok(config) => {
            let engine = &config.engine;
            println!("✓ Configuration is valid");
            println!();
            println!("Engine:");
            println!("  Poll interval:      {} (min {})",
                format_duration(engine.default_poll_interval),
                format_duration(engine.min_poll_interval));
            println!("  Max wait:           {}", format_duration(engine.default_max_wait));
            println!("  Max errors:         {}", engine.max_consecutive_errors);
            println!("  Max sessions:       {}", engine.max_concurrent_sessions);
            println!("  Worker pool:        {}", engine.worker_pool_size);
            println!("  Rate limit:         {} burst, {}/s",
                engine.rate_limit.capacity, engine.rate_limit.refill_per_second);
            println!();
            println!("Provider:");
            println!("  Base URL:           {}", config.provider.base_url);
            println!(
                "  API key:            {}",
                if config.provider.resolve_api_key().is_some() { "set" } else { "missing" }
            );

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        gotime_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

//! Identity provider connection flags.

use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_IDENTITY_URL: &str = "identity-url";
pub const ARG_IDENTITY_API_KEY: &str = "identity-api-key";
pub const ARG_IDENTITY_TIMEOUT_MS: &str = "identity-timeout-ms";

#[derive(Debug)]
pub struct Options {
    pub url: String,
    pub api_key: SecretString,
    pub timeout: Duration,
}

impl Options {
    /// # Errors
    /// Returns an error if a required flag is missing or the timeout is zero.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_required = |name: &str| -> Result<String> {
            matches
                .get_one::<String>(name)
                .cloned()
                .with_context(|| format!("missing required argument: --{name}"))
        };

        let timeout_ms = matches
            .get_one::<u64>(ARG_IDENTITY_TIMEOUT_MS)
            .copied()
            .unwrap_or(3000);
        if timeout_ms == 0 {
            return Err(anyhow!("--{ARG_IDENTITY_TIMEOUT_MS} must be greater than zero"));
        }

        Ok(Self {
            url: read_required(ARG_IDENTITY_URL)?,
            api_key: SecretString::from(read_required(ARG_IDENTITY_API_KEY)?),
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_IDENTITY_URL)
                .long(ARG_IDENTITY_URL)
                .help("Base URL of the identity service, e.g. https://project.supabase.co")
                .env("FOLIO_IDENTITY_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_IDENTITY_API_KEY)
                .long(ARG_IDENTITY_API_KEY)
                .help("Public API key sent with every identity request")
                .env("FOLIO_IDENTITY_API_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_IDENTITY_TIMEOUT_MS)
                .long(ARG_IDENTITY_TIMEOUT_MS)
                .help("Timeout for identity requests in milliseconds")
                .env("FOLIO_IDENTITY_TIMEOUT_MS")
                .default_value("3000")
                .value_parser(clap::value_parser!(u64)),
        )
}

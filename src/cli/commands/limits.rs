use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_RATE_LIMIT_MAX: &str = "rate-limit-max";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";
pub const ARG_MFA_VERIFY_MAX: &str = "mfa-verify-max";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub api_max: u32,
    pub mfa_verify_max: u32,
    pub window: Duration,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            api_max: matches
                .get_one::<u32>(ARG_RATE_LIMIT_MAX)
                .copied()
                .unwrap_or(10),
            mfa_verify_max: matches
                .get_one::<u32>(ARG_MFA_VERIFY_MAX)
                .copied()
                .unwrap_or(5),
            window: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_RATE_LIMIT_WINDOW_SECONDS)
                    .copied()
                    .unwrap_or(60),
            ),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_MAX)
                .long(ARG_RATE_LIMIT_MAX)
                .help("Requests per window allowed on /api for one client")
                .env("FOLIO_RATE_LIMIT_MAX")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Rate limit window in seconds")
                .env("FOLIO_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MFA_VERIFY_MAX)
                .long(ARG_MFA_VERIFY_MAX)
                .help("Verification code attempts per window for one user")
                .env("FOLIO_MFA_VERIFY_MAX")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}

//! Admin gate, device trust and frontend flags.

use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;

use crate::trust::token::MIN_SECRET_LEN;

pub const ARG_TRUST_SECRET: &str = "trust-secret";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_ALLOWED_ORIGINS: &str = "allowed-origins";
pub const ARG_ADMIN_PREFIX: &str = "admin-prefix";
pub const ARG_ADMIN_ROLE: &str = "admin-role";
pub const ARG_ADMIN_DIR: &str = "admin-dir";

#[derive(Debug)]
pub struct Options {
    pub trust_secret: SecretString,
    pub frontend_base_url: String,
    pub allowed_origins: Vec<String>,
    pub admin_prefix: String,
    /// `None` disables the role check.
    pub admin_role: Option<String>,
    pub admin_dir: Option<PathBuf>,
}

/// Routes served by folio itself; the gate must never sit in front of them.
const SERVICE_ROUTES: [&str; 3] = ["/api", "/health", "/gate"];

fn validate_prefix(prefix: &str) -> Result<()> {
    if !prefix.starts_with('/') {
        return Err(anyhow!("--{ARG_ADMIN_PREFIX} must start with '/'"));
    }
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Err(anyhow!(
            "--{ARG_ADMIN_PREFIX} cannot be '/', it would gate the login API"
        ));
    }
    let overlaps = |route: &str| {
        prefix == route
            || prefix
                .strip_prefix(route)
                .is_some_and(|rest| rest.starts_with('/'))
            || route
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    };
    if let Some(route) = SERVICE_ROUTES.iter().find(|route| overlaps(route)) {
        return Err(anyhow!(
            "--{ARG_ADMIN_PREFIX} '{prefix}' overlaps the service route {route}"
        ));
    }
    Ok(())
}

impl Options {
    /// # Errors
    /// Returns an error if the trust secret is too short or the prefix is not absolute.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_required = |name: &str| -> Result<String> {
            matches
                .get_one::<String>(name)
                .cloned()
                .with_context(|| format!("missing required argument: --{name}"))
        };

        let trust_secret = SecretString::from(read_required(ARG_TRUST_SECRET)?);
        if trust_secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "--{ARG_TRUST_SECRET} must be at least {MIN_SECRET_LEN} bytes"
            ));
        }

        let admin_prefix = read_required(ARG_ADMIN_PREFIX)?;
        validate_prefix(&admin_prefix)?;

        let allowed_origins = matches
            .get_many::<String>(ARG_ALLOWED_ORIGINS)
            .map(|values| {
                values
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            trust_secret,
            frontend_base_url: read_required(ARG_FRONTEND_BASE_URL)?,
            allowed_origins,
            admin_prefix,
            admin_role: matches
                .get_one::<String>(ARG_ADMIN_ROLE)
                .map(|role| role.trim().to_string())
                .filter(|role| !role.is_empty()),
            admin_dir: matches.get_one::<PathBuf>(ARG_ADMIN_DIR).cloned(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TRUST_SECRET)
                .long(ARG_TRUST_SECRET)
                .help("Secret used to sign device trust tokens (at least 32 bytes)")
                .env("FOLIO_TRUST_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Public URL of the site; HTTPS enables Secure session cookies")
                .env("FOLIO_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGINS)
                .long(ARG_ALLOWED_ORIGINS)
                .help("Comma separated CORS origins allowed to call the API")
                .env("FOLIO_ALLOWED_ORIGINS")
                .value_delimiter(',')
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_ADMIN_PREFIX)
                .long(ARG_ADMIN_PREFIX)
                .help("Path prefix of the protected admin area")
                .env("FOLIO_ADMIN_PREFIX")
                .default_value("/admin"),
        )
        .arg(
            Arg::new(ARG_ADMIN_ROLE)
                .long(ARG_ADMIN_ROLE)
                .help("Role required on admin pages; empty disables the check")
                .env("FOLIO_ADMIN_ROLE")
                .default_value("admin"),
        )
        .arg(
            Arg::new(ARG_ADMIN_DIR)
                .long(ARG_ADMIN_DIR)
                .help("Directory of static admin pages served behind the gate")
                .env("FOLIO_ADMIN_DIR")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

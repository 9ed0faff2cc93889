use crate::cli::{
    actions::{Action, server::Args},
    commands::{ARG_PORT, gate, identity, limits},
};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    Ok(Action::Server(Args {
        port,
        identity: identity::Options::parse(matches)?,
        gate: gate::Options::parse(matches)?,
        limits: limits::Options::parse(matches),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_server_action() -> Result<()> {
        let matches = commands::new().try_get_matches_from(vec![
            "folio",
            "--port",
            "9443",
            "--identity-url",
            "https://id.folio.dev",
            "--identity-api-key",
            "anon-key",
            "--trust-secret",
            "0123456789abcdef0123456789abcdef",
            "--admin-prefix",
            "/dashboard",
            "--mfa-verify-max",
            "3",
        ])?;
        let Action::Server(args) = handler(&matches)?;
        assert_eq!(args.port, 9443);
        assert_eq!(args.identity.url, "https://id.folio.dev");
        assert_eq!(args.gate.admin_prefix, "/dashboard");
        assert_eq!(args.limits.mfa_verify_max, 3);
        Ok(())
    }
}

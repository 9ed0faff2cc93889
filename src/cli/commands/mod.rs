pub mod gate;
pub mod identity;
pub mod limits;
pub mod logging;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("folio")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("FOLIO_PORT")
                .value_parser(clap::value_parser!(u16)),
        );

    let command = identity::with_args(command);
    let command = gate::with_args(command);
    let command = limits::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn required_args() -> Vec<&'static str> {
        vec![
            "folio",
            "--identity-url",
            "https://id.folio.dev",
            "--identity-api-key",
            "anon-key",
            "--trust-secret",
            SECRET,
        ]
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "folio");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        temp_env::with_vars_unset(
            [
                "FOLIO_PORT",
                "FOLIO_ADMIN_ROLE",
                "FOLIO_ADMIN_PREFIX",
                "FOLIO_ALLOWED_ORIGINS",
                "FOLIO_LOG_LEVEL",
            ],
            || {
                let matches = new().try_get_matches_from(required_args())?;
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8080));

                let gate = gate::Options::parse(&matches)?;
                assert_eq!(gate.admin_prefix, "/admin");
                assert_eq!(gate.admin_role.as_deref(), Some("admin"));
                assert_eq!(gate.allowed_origins, vec!["http://localhost:3000"]);
                assert_eq!(gate.trust_secret.expose_secret(), SECRET);
                assert!(gate.admin_dir.is_none());

                let identity = identity::Options::parse(&matches)?;
                assert_eq!(identity.timeout, std::time::Duration::from_secs(3));

                let limits = limits::Options::parse(&matches);
                assert_eq!(limits.api_max, 10);
                assert_eq!(limits.mfa_verify_max, 5);
                assert_eq!(limits.window, std::time::Duration::from_secs(60));
                Ok(())
            },
        )
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("FOLIO_PORT", Some("9000")),
                ("FOLIO_IDENTITY_URL", Some("https://id.folio.dev")),
                ("FOLIO_IDENTITY_API_KEY", Some("anon-key")),
                ("FOLIO_TRUST_SECRET", Some(SECRET)),
                (
                    "FOLIO_ALLOWED_ORIGINS",
                    Some("https://folio.dev,https://www.folio.dev"),
                ),
                ("FOLIO_ADMIN_ROLE", Some("owner")),
                ("FOLIO_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["folio"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9000));
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );

                let gate = gate::Options::parse(&matches);
                assert!(gate.is_ok());
                if let Ok(gate) = gate {
                    assert_eq!(
                        gate.allowed_origins,
                        vec!["https://folio.dev", "https://www.folio.dev"]
                    );
                    assert_eq!(gate.admin_role.as_deref(), Some("owner"));
                }
            },
        );
    }

    #[test]
    fn test_empty_admin_role_disables_check() -> anyhow::Result<()> {
        let mut args = required_args();
        args.extend(["--admin-role", ""]);
        let matches = new().try_get_matches_from(args)?;
        assert_eq!(gate::Options::parse(&matches)?.admin_role, None);
        Ok(())
    }

    #[test]
    fn test_admin_prefix_must_not_cover_service_routes() -> anyhow::Result<()> {
        for prefix in ["/", "//", "/api", "/api/admin", "/gate", "/health/"] {
            let mut args = required_args();
            args.extend(["--admin-prefix", prefix]);
            let matches = new().try_get_matches_from(args)?;
            assert!(gate::Options::parse(&matches).is_err(), "{prefix} accepted");
        }

        let mut args = required_args();
        args.extend(["--admin-prefix", "/apidocs"]);
        let matches = new().try_get_matches_from(args)?;
        assert_eq!(gate::Options::parse(&matches)?.admin_prefix, "/apidocs");
        Ok(())
    }

    #[test]
    fn test_short_trust_secret_is_rejected() -> anyhow::Result<()> {
        let matches = new().try_get_matches_from(vec![
            "folio",
            "--identity-url",
            "https://id.folio.dev",
            "--identity-api-key",
            "anon-key",
            "--trust-secret",
            "short",
        ])?;
        assert!(gate::Options::parse(&matches).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_identity_url_fails() {
        temp_env::with_vars_unset(["FOLIO_IDENTITY_URL"], || {
            let result = new().try_get_matches_from(vec![
                "folio",
                "--identity-api-key",
                "anon-key",
                "--trust-secret",
                SECRET,
            ]);
            assert_eq!(
                result.map(|_| ()).map_err(|e| e.kind()),
                Err(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5_usize {
            temp_env::with_vars([("FOLIO_LOG_LEVEL", None::<String>)], || {
                let mut args: Vec<String> =
                    required_args().into_iter().map(str::to_string).collect();
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }
                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }
}

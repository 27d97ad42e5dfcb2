use crate::cli::{
    actions::{hash_password, server, Action},
    commands::{authority, server as server_args, ARG_PASSWORD, CMD_HASH_PASSWORD},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use url::Url;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if let Some(sub) = matches.subcommand_matches(CMD_HASH_PASSWORD) {
        let password = sub
            .get_one::<String>(ARG_PASSWORD)
            .cloned()
            .context("missing required argument: <password>")?;
        return Ok(Action::HashPassword(hash_password::Args {
            password: SecretString::from(password),
        }));
    }

    let port = matches
        .get_one::<u16>(server_args::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let jwt_secret = matches
        .get_one::<String>(authority::ARG_JWT_SECRET)
        .cloned()
        .context("missing required argument: --jwt-secret")?;
    let admin_email = matches
        .get_one::<String>(authority::ARG_ADMIN_EMAIL)
        .cloned()
        .context("missing required argument: --admin-email")?;
    let admin_password = matches
        .get_one::<String>(authority::ARG_ADMIN_PASSWORD)
        .cloned()
        .context("missing required argument: --admin-password")?;
    let directory = matches.get_one::<PathBuf>(authority::ARG_DIRECTORY).cloned();
    let origins = [server_args::ARG_PATIENT_ORIGIN, server_args::ARG_CONSOLE_ORIGIN]
        .into_iter()
        .filter_map(|arg| matches.get_one::<Url>(arg).cloned())
        .collect();

    Ok(Action::Server(server::Args {
        port,
        jwt_secret: SecretString::from(jwt_secret),
        admin_email,
        admin_password: SecretString::from(admin_password),
        directory,
        origins,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    #[test]
    fn dispatch_server() -> Result<()> {
        temp_env::with_vars_unset(
            [
                "CAREPASS_PORT",
                "CAREPASS_DIRECTORY",
                "CAREPASS_PATIENT_ORIGIN",
                "CAREPASS_CONSOLE_ORIGIN",
            ],
            || {
                let matches = commands::new().try_get_matches_from([
                    "carepass",
                    "--jwt-secret",
                    "s3cret",
                    "--admin-email",
                    "ops@clinic.org",
                    "--admin-password",
                    "operator-pw",
                    "--patient-origin",
                    "http://localhost:5173",
                    "--console-origin",
                    "http://localhost:5174",
                ])?;
                let Action::Server(args) = handler(&matches)? else {
                    anyhow::bail!("expected server action");
                };
                assert_eq!(args.port, 8080);
                assert_eq!(args.jwt_secret.expose_secret(), "s3cret");
                assert_eq!(args.origins.len(), 2);
                assert!(args.directory.is_none());
                Ok(())
            },
        )
    }

    #[test]
    fn dispatch_hash_password() -> Result<()> {
        let matches = commands::new().try_get_matches_from(["carepass", "hash-password", "pw"])?;
        let Action::HashPassword(args) = handler(&matches)? else {
            anyhow::bail!("expected hash-password action");
        };
        assert_eq!(args.password.expose_secret(), "pw");
        Ok(())
    }
}

use crate::{
    api,
    authority::{InMemoryDirectory, Operator, SubjectDirectory, TokenAuthority},
    cli::telemetry,
};
use anyhow::{ensure, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{fmt::Write as _, path::PathBuf, sync::Arc};
use tracing::{info, warn};
use url::Url;

/// HS256 keys shorter than the hash output weaken the signature.
const RECOMMENDED_SECRET_LEN: usize = 32;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub jwt_secret: SecretString,
    pub admin_email: String,
    pub admin_password: SecretString,
    pub directory: Option<PathBuf>,
    pub origins: Vec<Url>,
}

/// Build the authority and serve until interrupted.
/// # Errors
/// Returns an error if the configuration is unusable, the directory seed
/// cannot be loaded or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let authority = build_authority(&args)?;
    log_startup_args(&args, authority.directory().len());

    let result = api::new(args.port, Arc::new(authority), &args.origins).await;
    telemetry::shutdown_tracer();
    result
}

fn build_authority(args: &Args) -> Result<TokenAuthority> {
    let secret = args.jwt_secret.expose_secret();
    ensure!(!secret.trim().is_empty(), "--jwt-secret must not be empty");
    if secret.len() < RECOMMENDED_SECRET_LEN {
        warn!(
            "--jwt-secret is shorter than {} bytes",
            RECOMMENDED_SECRET_LEN
        );
    }
    ensure!(
        crate::authority::valid_email(&args.admin_email),
        "--admin-email is not a valid email"
    );
    ensure!(
        !args.admin_password.expose_secret().is_empty(),
        "--admin-password must not be empty"
    );

    let directory: Arc<dyn SubjectDirectory> = match &args.directory {
        Some(path) => Arc::new(InMemoryDirectory::from_file(path)?),
        None => Arc::new(InMemoryDirectory::new()),
    };

    Ok(TokenAuthority::new(
        args.jwt_secret.clone(),
        Operator::new(&args.admin_email, args.admin_password.clone()),
        directory,
    ))
}

fn log_startup_args(args: &Args, subjects: usize) {
    let origins = if args.origins.is_empty() {
        "none".to_string()
    } else {
        args.origins
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("admin_email", args.admin_email.clone()),
        (
            "directory",
            args.directory
                .as_ref()
                .map_or_else(|| "in-memory".to_string(), |path| path.display().to_string()),
        ),
        ("subjects", subjects.to_string()),
        ("cors_origins", origins),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "carepass {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ = write!(message, "\n  {key}:{padding} {value}");
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

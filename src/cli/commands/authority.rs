use clap::{Arg, Command};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ADMIN_EMAIL: &str = "admin-email";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";
pub const ARG_DIRECTORY: &str = "directory";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Secret used to sign and verify session tokens")
                .env("CAREPASS_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ADMIN_EMAIL)
                .long(ARG_ADMIN_EMAIL)
                .help("Email of the operator allowed to hold the admin slot")
                .env("CAREPASS_ADMIN_EMAIL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Password of the admin operator")
                .env("CAREPASS_ADMIN_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_DIRECTORY)
                .long(ARG_DIRECTORY)
                .help("JSON file seeding doctor and user accounts")
                .env("CAREPASS_DIRECTORY")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
}

use clap::{Arg, Command};

pub const ARG_PORT: &str = "port";
pub const ARG_PATIENT_ORIGIN: &str = "patient-origin";
pub const ARG_CONSOLE_ORIGIN: &str = "console-origin";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("CAREPASS_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_PATIENT_ORIGIN)
                .long(ARG_PATIENT_ORIGIN)
                .help("Patient portal URL allowed by CORS")
                .env("CAREPASS_PATIENT_ORIGIN")
                .value_parser(clap::value_parser!(url::Url)),
        )
        .arg(
            Arg::new(ARG_CONSOLE_ORIGIN)
                .long(ARG_CONSOLE_ORIGIN)
                .help("Admin/doctor console URL allowed by CORS")
                .env("CAREPASS_CONSOLE_ORIGIN")
                .value_parser(clap::value_parser!(url::Url)),
        )
}

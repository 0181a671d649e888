mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "amp", version, about = "amp sync host and client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). AMP_LOG overrides with a filter directive.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pin_subcommand() {
        let cli = Cli::try_parse_from([
            "amp",
            "pin",
            "chat/lobby",
            "--user",
            "alice",
            "--secret",
            "pw",
            "--mode",
            "maintain",
            "--attr",
            "title,body",
        ])
        .expect("pin args should parse");

        let Command::Pin(args) = cli.command else {
            panic!("expected pin");
        };
        assert_eq!(args.attrs, vec!["title", "body"]);
        assert!(matches!(args.mode, cmd::ModeArg::Maintain));
    }

    #[test]
    fn rejects_conflicting_commit_args() {
        let err = Cli::try_parse_from([
            "amp",
            "commit",
            "notes",
            "--user",
            "u",
            "--secret",
            "s",
            "--delete-cell",
            "--set",
            "a=b",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_tid_inspect() {
        let cli = Cli::try_parse_from(["amp", "--format", "json", "tid", "inspect", "abc"])
            .expect("tid args should parse");
        assert!(matches!(cli.command, Command::Tid(cmd::TidCommand::Inspect(_))));
    }
}

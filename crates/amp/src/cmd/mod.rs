use std::time::Duration;

use amp_host::{ClientConfig, LoginClaim, SharedSecret};
use amp_transport::DEFAULT_PORT;
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod commit;
pub mod pin;
pub mod serve;
pub mod tid;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a host serving in-memory cells.
    Serve(ServeArgs),
    /// Pin a cell and print its state and updates.
    Pin(PinArgs),
    /// Commit attribute changes to a cell.
    Commit(CommitArgs),
    /// Create or inspect transaction ids.
    #[command(subcommand)]
    Tid(TidCommand),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Pin(args) => pin::run(args, format),
        Command::Commit(args) => commit::run(args, format),
        Command::Tid(command) => tid::run(command, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "AMP_LISTEN", default_value_t = default_addr())]
    pub listen: String,
    /// Known user as NAME=SECRET (repeatable or comma-separated).
    #[arg(long = "user", env = "AMP_USERS", value_delimiter = ',', required = true)]
    pub users: Vec<String>,
    /// Cell name to create at startup (repeatable or comma-separated).
    #[arg(long = "cell", value_delimiter = ',')]
    pub cells: Vec<String>,
    /// Outbound queue capacity per connection.
    #[arg(long, default_value = "1024")]
    pub mailbox_capacity: usize,
    /// Time allowed for each login step (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub login_timeout: String,
    /// Failed challenge responses allowed per connection.
    #[arg(long, default_value = "3")]
    pub max_attempts: u32,
}

/// Connection and login options shared by client commands.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Host address.
    #[arg(long, env = "AMP_HOST", default_value_t = default_addr())]
    pub host: String,
    /// User id to log in as.
    #[arg(long, env = "AMP_USER")]
    pub user: String,
    /// Shared secret for the challenge response.
    #[arg(long, env = "AMP_SECRET", hide_env_values = true)]
    pub secret: String,
    /// Device label reported at login.
    #[arg(long, default_value = "amp-cli")]
    pub device: String,
    /// Connect and login timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

impl ConnectArgs {
    pub fn claim(&self) -> LoginClaim {
        LoginClaim::new(&self.user)
            .with_device(format!("{}-{}", self.device, std::process::id()), &self.device)
    }

    pub fn responder(&self) -> SharedSecret {
        SharedSecret::new(&self.secret)
    }

    pub fn client_config(&self) -> CliResult<ClientConfig> {
        let timeout = parse_duration(&self.timeout)?;
        let mut config = ClientConfig {
            connect_timeout: Some(timeout),
            ..ClientConfig::default()
        };
        config.login.timeout = timeout;
        Ok(config)
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ModeArg {
    None,
    CloseOnSync,
    Maintain,
}

#[derive(Args, Debug)]
pub struct PinArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Cell name, encoded cell id, or URL with --url.
    pub target: String,
    /// Treat the target as a URL.
    #[arg(long)]
    pub url: bool,
    /// Only report these attributes (repeatable or comma-separated).
    #[arg(long = "attr", value_delimiter = ',')]
    pub attrs: Vec<String>,
    /// How long to keep the pin open.
    #[arg(long, value_enum, default_value_t = ModeArg::CloseOnSync)]
    pub mode: ModeArg,
    /// Exit after printing N state messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CommitArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Cell name to mutate.
    pub cell: String,
    /// Set an attribute as ATTR=VALUE (repeatable).
    #[arg(long = "set", value_name = "ATTR=VALUE")]
    pub set: Vec<String>,
    /// Delete an attribute (repeatable).
    #[arg(long = "delete-attr", value_name = "ATTR")]
    pub delete_attrs: Vec<String>,
    /// Delete the whole cell.
    #[arg(long, conflicts_with_all = ["set", "delete_attrs"])]
    pub delete_cell: bool,
}

#[derive(Subcommand, Debug)]
pub enum TidCommand {
    /// Create a TID for the current time.
    New(TidNewArgs),
    /// Decode a TID and print its fields.
    Inspect(TidInspectArgs),
}

#[derive(Args, Debug)]
pub struct TidNewArgs {
    /// Content hashed into the suffix. Default: random bytes.
    #[arg(long)]
    pub content: Option<String>,
}

#[derive(Args, Debug)]
pub struct TidInspectArgs {
    /// 52-character TID string.
    pub tid: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn default_addr() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Split `KEY=VALUE`.
pub fn split_pair<'a>(input: &'a str, what: &str) -> CliResult<(&'a str, &'a str)> {
    input
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| CliError::new(USAGE, format!("{what} must look like NAME=VALUE: {input}")))
}

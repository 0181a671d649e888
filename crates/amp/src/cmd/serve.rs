use std::sync::Arc;

use amp_host::{Host, HostConfig, HostListener, MemoryDirectory, ShutdownHandle, StaticCredentials};

use crate::cmd::{parse_duration, split_pair, ServeArgs};
use crate::exit::{host_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let credentials = credentials(&args.users)?;
    let directory = MemoryDirectory::new();
    for cell in &args.cells {
        let id = directory.add_cell(cell);
        tracing::debug!(%cell, %id, "cell created");
    }

    let mut config = HostConfig::default().with_mailbox_capacity(args.mailbox_capacity);
    config.login.timeout = parse_duration(&args.login_timeout)?;
    config.login.max_attempts = args.max_attempts.max(1);

    let host = Host::new(Arc::new(directory), Arc::new(credentials)).with_config(config);
    let listener = HostListener::bind(args.listen.as_str(), Arc::new(host))
        .map_err(|err| host_error("bind failed", err))?;

    install_ctrlc_handler(listener.shutdown_handle())?;
    print_listening(listener.local_addr(), format);

    listener
        .run()
        .map_err(|err| host_error("serve failed", err))?;
    Ok(SUCCESS)
}

fn credentials(users: &[String]) -> CliResult<StaticCredentials> {
    users.iter().try_fold(StaticCredentials::new(), |creds, entry| {
        let (user, secret) = split_pair(entry, "--user")?;
        Ok(creds.with_user(user, secret))
    })
}

fn install_ctrlc_handler(handle: ShutdownHandle) -> CliResult<()> {
    ctrlc::set_handler(move || handle.shutdown())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

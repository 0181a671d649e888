use amp_host::{Client, PinRequest, PinTarget, SyncMode};
use amp_tx::OpStatus;

use crate::cmd::{ModeArg, PinArgs};
use crate::exit::{code_for, host_error, CliError, CliResult, SUCCESS};
use crate::output::{print_msg, OutputFormat};

pub fn run(args: PinArgs, format: OutputFormat) -> CliResult<i32> {
    let request = request(&args);
    let config = args.connect.client_config()?;
    let mut client = Client::connect(
        args.connect.host.as_str(),
        &args.connect.claim(),
        &args.connect.responder(),
        &config,
    )
    .map_err(|err| host_error("connect failed", err))?;

    let id = client
        .open_pin(&request)
        .map_err(|err| host_error("pin failed", err))?;

    let mut printed = 0usize;
    loop {
        let msg = client
            .recv()
            .map_err(|err| host_error("receive failed", err))?;
        if msg.info.context_id != id {
            continue;
        }

        print_msg(&msg, format);
        match msg.info.status {
            OpStatus::Closed if msg.info.err_code.is_nil() => return Ok(SUCCESS),
            OpStatus::Closed => {
                return Err(CliError::new(
                    code_for(msg.info.err_code),
                    format!("pin closed: {}", msg.info.err_code),
                ))
            }
            OpStatus::Syncing => printed = printed.saturating_add(1),
            _ => {}
        }

        if args.count.is_some_and(|count| printed >= count) {
            let _ = client.close_pin(id);
            return Ok(SUCCESS);
        }
    }
}

fn request(args: &PinArgs) -> PinRequest {
    let target = if args.url {
        PinTarget::Url(args.target.clone())
    } else {
        PinTarget::Tag(args.target.clone())
    };
    let mode = match args.mode {
        ModeArg::None => SyncMode::None,
        ModeArg::CloseOnSync => SyncMode::CloseOnSync,
        ModeArg::Maintain => SyncMode::Maintain,
    };
    PinRequest {
        target,
        attrs: args.attrs.clone(),
        mode,
    }
}

use std::time::SystemTime;

use amp_tx::Tid;

use crate::cmd::TidCommand;
use crate::exit::{tx_error, CliResult, SUCCESS};
use crate::output::{print_tid, OutputFormat};

pub fn run(command: TidCommand, format: OutputFormat) -> CliResult<i32> {
    let tid = match command {
        TidCommand::New(args) => {
            let content = match args.content {
                Some(content) => content.into_bytes(),
                None => amp_host::auth::random_hex(32).into_bytes(),
            };
            Tid::from_content(SystemTime::now(), &content)
                .map_err(|err| tx_error("tid creation failed", err))?
        }
        TidCommand::Inspect(args) => {
            Tid::decode(args.tid.trim()).map_err(|err| tx_error("invalid tid", err))?
        }
    };
    print_tid(&tid, format);
    Ok(SUCCESS)
}

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("amp {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!("target: {}-{}", std::env::consts::ARCH, std::env::consts::OS);
    println!(
        "wire: marker={} version={:#04x} default_port={}",
        String::from_utf8_lossy(&amp_tx::MARKER),
        amp_tx::VERSION,
        amp_transport::DEFAULT_PORT
    );
    println!(
        "limits: max_ops={} max_data_size={}",
        amp_tx::MAX_OPS_PER_TX,
        amp_tx::DEFAULT_MAX_DATA_SIZE
    );
    println!("features: async={}, cli=true", cfg!(feature = "async"));

    Ok(SUCCESS)
}

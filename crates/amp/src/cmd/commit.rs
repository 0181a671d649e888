use amp_host::Client;
use amp_tx::{value_hash, TagId, TxKind, TxMsg, TxOp};

use crate::cmd::{split_pair, CommitArgs};
use crate::exit::{host_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_committed, OutputFormat};

pub fn run(args: CommitArgs, format: OutputFormat) -> CliResult<i32> {
    let msg = build(&args)?;
    let config = args.connect.client_config()?;
    let mut client = Client::connect(
        args.connect.host.as_str(),
        &args.connect.claim(),
        &args.connect.responder(),
        &config,
    )
    .map_err(|err| host_error("connect failed", err))?;

    let tid = client
        .commit(msg)
        .map_err(|err| host_error("commit failed", err))?;
    print_committed(&tid, format);
    let _ = client.shutdown();
    Ok(SUCCESS)
}

fn build(args: &CommitArgs) -> CliResult<TxMsg> {
    let target = TagId::from_name(&args.cell);
    let mut builder = TxMsg::builder(TxKind::Commit);

    if args.delete_cell {
        builder.push_op(TxOp::DeleteCell { target });
    }
    for entry in &args.set {
        let (attr, value) = split_pair(entry, "--set")?;
        let value_ref = builder.push_value(value.as_bytes());
        builder.push_op(TxOp::UpsertAttr {
            target,
            attr: TagId::from_name(attr),
            index: TagId::NIL,
            hash: value_hash(value.as_bytes()),
            value: value_ref,
        });
    }
    for attr in &args.delete_attrs {
        builder.push_op(TxOp::DeleteAttr {
            target,
            attr: TagId::from_name(attr),
            index: TagId::NIL,
        });
    }

    if builder.op_count() == 0 {
        return Err(CliError::new(
            USAGE,
            "nothing to commit: pass --set, --delete-attr or --delete-cell",
        ));
    }
    Ok(builder.build())
}

use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::UNIX_EPOCH;

use amp_tx::{DataRef, Tid, TxMsg, TxOp};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use data_encoding::HEXLOWER;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct OpOutput {
    op: &'static str,
    target: Option<String>,
    attr: Option<String>,
    value: Option<String>,
}

#[derive(Serialize)]
struct MsgOutput<'a> {
    kind: &'a str,
    context_id: u64,
    status: &'a str,
    err_code: &'a str,
    tid: Option<String>,
    ops: Vec<OpOutput>,
}

pub fn print_msg(msg: &TxMsg, format: OutputFormat) {
    let ops: Vec<OpOutput> = msg.ops.iter().map(|op| op_output(msg, op)).collect();
    match format {
        OutputFormat::Json => {
            let out = MsgOutput {
                kind: msg.info.kind.as_str(),
                context_id: msg.info.context_id,
                status: msg.info.status.as_str(),
                err_code: msg.info.err_code.as_str(),
                tid: msg.info.tid.map(|tid| tid.encode()),
                ops,
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PIN", "STATUS", "TID", "OP", "ATTR", "VALUE"]);
            let tid = msg.info.tid.map(|tid| tid.encode()).unwrap_or_default();
            let status = status_label(msg);
            if ops.is_empty() {
                table.add_row(vec![
                    msg.info.context_id.to_string(),
                    status.clone(),
                    tid.clone(),
                    String::new(),
                    String::new(),
                    String::new(),
                ]);
            }
            for op in ops {
                table.add_row(vec![
                    msg.info.context_id.to_string(),
                    status.clone(),
                    tid.clone(),
                    op.op.to_string(),
                    op.attr.unwrap_or_default(),
                    op.value.unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let tid = msg.info.tid.map(|tid| tid.encode());
            println!(
                "pin={} status={} tid={} ops={}",
                msg.info.context_id,
                status_label(msg),
                tid.as_deref().unwrap_or("-"),
                ops.len()
            );
            for op in ops {
                println!(
                    "  {} attr={} value={}",
                    op.op,
                    op.attr.as_deref().unwrap_or("-"),
                    op.value.as_deref().unwrap_or("-")
                );
            }
        }
        OutputFormat::Raw => {
            for value in msg.ops.iter().filter_map(TxOp::value) {
                if let Some(bytes) = msg.value(value) {
                    print_raw(&bytes);
                }
            }
        }
    }
}

#[derive(Serialize)]
struct TidOutput {
    tid: String,
    unix_secs: u64,
    fraction: u16,
    time_unix_nanos: u128,
    suffix: String,
    words: [String; 4],
}

pub fn print_tid(tid: &Tid, format: OutputFormat) {
    let nanos = tid
        .time()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let out = TidOutput {
        tid: tid.encode(),
        unix_secs: tid.unix_secs(),
        fraction: tid.fraction(),
        time_unix_nanos: nanos,
        suffix: HEXLOWER.encode(tid.suffix()),
        words: tid.to_words().map(|w| format!("{w:#018x}")),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["tid".to_string(), out.tid])
                .add_row(vec!["unix_secs".to_string(), out.unix_secs.to_string()])
                .add_row(vec!["fraction".to_string(), out.fraction.to_string()])
                .add_row(vec!["suffix".to_string(), out.suffix])
                .add_row(vec!["words".to_string(), out.words.join(" ")]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "tid={} unix_secs={} fraction={} suffix={}",
                out.tid, out.unix_secs, out.fraction, out.suffix
            );
        }
        OutputFormat::Raw => print_raw(tid.as_bytes()),
    }
}

pub fn print_committed(tid: &Tid, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "committed": tid.encode() })),
        OutputFormat::Raw => print_raw(tid.as_bytes()),
        OutputFormat::Table | OutputFormat::Pretty => println!("{tid}"),
    }
}

/// Announce the bound address. Always flushed so a parent process can read it.
pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "listening": addr.to_string() })),
        _ => println!("listening on {addr}"),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
    let _ = std::io::stdout().flush();
}

fn status_label(msg: &TxMsg) -> String {
    if msg.info.err_code.is_nil() {
        msg.info.status.to_string()
    } else {
        format!("{} ({})", msg.info.status, msg.info.err_code)
    }
}

fn op_output(msg: &TxMsg, op: &TxOp) -> OpOutput {
    OpOutput {
        op: op.opcode().as_str(),
        target: op.target().map(|t| t.encode()),
        attr: op.attr().map(|a| a.encode()),
        value: op.value().map(|v| value_preview(msg, v)),
    }
}

fn value_preview(msg: &TxMsg, value: DataRef) -> String {
    match msg.value(value) {
        Some(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(_) => format!("<binary {} bytes>", bytes.len()),
        },
        None => "<out of range>".to_string(),
    }
}

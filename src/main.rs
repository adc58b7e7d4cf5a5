//! Purpose: `kvwalk` CLI entry point.
//! Role: Binary crate root; parses args, runs one store command, emits JSON on stdout.
//! Invariants: Records are emitted one JSON object per line.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal};

use bstr::ByteSlice;
use clap::{Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use serde::Serialize;
use serde_json::Value;
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use kvwalk::api::{Error, ErrorKind, Record, to_exit_code};

const LOG_ENV: &str = "KVWALK_LOG";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(RunOutcome::ok());
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `kvwalk --help` for usage."));
            }
        },
    };

    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;
    runtime.block_on(command_dispatch::dispatch_command(cli))
}

#[derive(Parser)]
#[command(
    name = "kvwalk",
    version,
    about = "Ordered key-value store with cursor traversal",
    long_about = None,
    after_help = r#"EXAMPLES
  $ kvwalk --db casket.kvw set alpha 1
  $ kvwalk --db casket.kvw get alpha
  $ kvwalk --db casket.kvw bulk alpha beta
  $ kvwalk --db casket.kvw list --from al --limit 10
  $ kvwalk --db 'casket.kvw#capcnt=1000' --mode wcs add beta 2

NOTES
  - Read commands open the store with mode `r`, writes with `wc` (override with --mode).
  - Set KVWALK_LOG=debug for diagnostics on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, value_name = "SPEC", help = "Store location with optional #name=value tuning")]
    db: String,
    #[arg(long, value_name = "MODE", help = "Open mode characters: r w c t s l f")]
    mode: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Print the value stored under a key (null when absent)")]
    Get { key: String },
    #[command(about = "Store a value, overwriting any existing record")]
    Set { key: String, value: String },
    #[command(about = "Store a value only if the key is absent")]
    Add { key: String, value: String },
    #[command(about = "Store a value only if the key is present")]
    Replace { key: String, value: String },
    #[command(about = "Remove a key")]
    Remove { key: String },
    #[command(about = "Read several keys at once; absent keys are left out")]
    Bulk {
        #[arg(required = true)]
        keys: Vec<String>,
        #[arg(long, help = "Resolve keys independently instead of from one snapshot")]
        non_atomic: bool,
    },
    #[command(about = "List records in key order")]
    List {
        #[arg(long, value_name = "KEY", help = "Start at the first key >= KEY")]
        from: Option<String>,
        #[arg(long, value_name = "N", help = "Stop after N records")]
        limit: Option<usize>,
        #[arg(long, help = "Walk from the last key down")]
        reverse: bool,
        #[arg(long, help = "Print keys only")]
        keys_only: bool,
    },
    #[command(about = "Print the number of records")]
    Count,
}

impl Command {
    fn default_mode(&self) -> &'static str {
        match self {
            Command::Set { .. }
            | Command::Add { .. }
            | Command::Replace { .. }
            | Command::Remove { .. } => "wc",
            Command::Get { .. } | Command::Bulk { .. } | Command::List { .. } | Command::Count => {
                "r"
            }
        }
    }
}

#[derive(Serialize)]
struct RecordLine {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl RecordLine {
    fn new(record: &Record, keys_only: bool) -> Self {
        Self {
            key: lossy(&record.key),
            value: (!keys_only).then(|| lossy(&record.value)),
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    bytes.to_str_lossy().into_owned()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_json(value: Value) {
    let json = serde_json::to_string(&value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_record(record: &Record, keys_only: bool) {
    let json = serde_json::to_string(&RecordLine::new(record, keys_only))
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    let report = ErrorReport::new(err);
    if io::stderr().is_terminal() {
        eprintln!("{}", report.to_text());
        return;
    }
    let json = serde_json::to_string(&ErrorEnvelope { error: &report }).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a ErrorReport,
}

/// Flattened view of an `Error` shared by the JSON and terminal renderings.
#[derive(Serialize)]
struct ErrorReport {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl ErrorReport {
    fn new(err: &Error) -> Self {
        let causes = std::iter::successors(err.source(), |&source| source.source())
            .map(|source| source.to_string())
            .collect();
        Self {
            kind: format!("{:?}", err.kind()),
            message: err
                .message()
                .map_or_else(|| default_message(err.kind()).to_string(), str::to_string),
            hint: err.hint().map(str::to_string),
            path: err.path().map(|path| path.display().to_string()),
            key: err.key().map(lossy),
            causes,
        }
    }

    fn to_text(&self) -> String {
        let mut text = format!("error: {}", self.message);
        let fields = [
            ("hint", self.hint.as_deref()),
            ("path", self.path.as_deref()),
            ("key", self.key.as_deref()),
            ("caused by", self.causes.first().map(String::as_str)),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                text.push_str(&format!("\n{label}: {value}"));
            }
        }
        text
    }
}

fn default_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::NotFound => "not found",
        ErrorKind::AlreadyExists => "already exists",
        ErrorKind::Busy => "store is busy",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Corrupt => "corrupt store file",
        ErrorKind::Io => "i/o error",
        ErrorKind::Closed => "store is closed",
    }
}

/// First line of a clap error without its `error:` prefix.
fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

#[cfg(test)]
mod tests {
    use super::{ErrorReport, clap_error_summary};
    use clap::Parser;
    use kvwalk::api::{Error, ErrorKind};

    #[test]
    fn report_falls_back_to_kind_message_and_renders_key() {
        let err = Error::new(ErrorKind::Closed).with_key(&b"alpha"[..]);
        let report = ErrorReport::new(&err);
        assert_eq!(report.kind, "Closed");
        assert_eq!(report.message, "store is closed");
        assert_eq!(report.to_text(), "error: store is closed\nkey: alpha");

        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["key"], "alpha");
        assert!(json.get("hint").is_none());
        assert!(json.get("causes").is_none());
    }

    #[test]
    fn report_collects_source_chain() {
        let io_err = std::io::Error::other("disk full");
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to persist")
            .with_source(io_err);
        let report = ErrorReport::new(&err);
        assert_eq!(report.causes, vec!["disk full".to_string()]);
        assert!(report.to_text().ends_with("caused by: disk full"));
    }

    #[test]
    fn clap_summary_drops_error_prefix() {
        let err = super::Cli::try_parse_from(["kvwalk", "--db", "x.kvw", "frobnicate"])
            .err()
            .expect("unknown subcommand");
        let summary = clap_error_summary(&err);
        assert!(!summary.starts_with("error:"));
        assert!(summary.contains("frobnicate"));
    }
}

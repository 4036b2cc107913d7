use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use blockdb::storage::FileManager;
use blockdb::tx::recovery::{analyze, LogAnalysis};
use blockdb::wal::audit;
use blockdb::wal::LogIterator;
use blockdb::{BlockId, DbConfig, DbError, LogRecord, TxId};

const EXIT_OK: i32 = 0;
const EXIT_FATAL_ERROR: i32 = 20;

#[derive(Clone, Debug, ValueEnum)]
enum OutputFormatArg {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "blockdb-log-inspect",
    about = "Dump and audit a BlockDB write-ahead log without modifying it"
)]
struct Cli {
    /// Database directory
    dir: PathBuf,

    /// Log file name inside the directory
    #[arg(long, default_value = DbConfig::DEFAULT_LOG_FILE)]
    log_file: String,

    /// Block size the database was created with
    #[arg(long, default_value_t = DbConfig::DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Only show records written by this transaction
    #[arg(long, conflicts_with = "block")]
    txid: Option<TxId>,

    /// Only show updates of this block, as FILE:NUMBER
    #[arg(long, value_parser = parse_block)]
    block: Option<BlockId>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormatArg,
}

fn parse_block(s: &str) -> Result<BlockId, String> {
    let (file, number) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected FILE:NUMBER, got '{}'", s))?;
    if file.is_empty() {
        return Err(format!("missing file name in '{}'", s));
    }
    let number = number
        .parse::<u32>()
        .map_err(|_| format!("invalid block number '{}'", number))?;
    Ok(BlockId::new(file, number))
}

enum Report {
    Full {
        records: Vec<LogRecord>,
        analysis: LogAnalysis,
    },
    Filtered {
        filter: String,
        records: Vec<LogRecord>,
    },
}

fn inspect(cli: &Cli) -> Result<Report, DbError> {
    if !cli.dir.is_dir() {
        return Err(DbError::Config(format!(
            "{} is not a directory",
            cli.dir.display()
        )));
    }
    if !cli.dir.join(&cli.log_file).is_file() {
        return Err(DbError::Config(format!(
            "log file {} not found in {}",
            cli.log_file,
            cli.dir.display()
        )));
    }
    DbConfig::new(&cli.dir)
        .with_block_size(cli.block_size)
        .with_log_file(cli.log_file.clone())
        .validate()?;

    let fm = Arc::new(FileManager::new(&cli.dir, cli.block_size, false)?);
    let iter = LogIterator::open(fm, &cli.log_file)?;

    if let Some(txid) = cli.txid {
        return Ok(Report::Filtered {
            filter: format!("txid {}", txid),
            records: audit::activity_of_transaction(iter, txid)?,
        });
    }
    if let Some(block) = &cli.block {
        return Ok(Report::Filtered {
            filter: block.to_string(),
            records: audit::modifications_of_block(iter, block)?,
        });
    }

    let records = iter.records().collect::<Result<Vec<_>, _>>()?;
    let analysis = analyze(records.iter().cloned().map(Ok))?;
    Ok(Report::Full { records, analysis })
}

fn record_json(record: &LogRecord) -> Value {
    let mut value = json!({ "kind": record.kind() });
    if let Some(txid) = record.txid() {
        value["txid"] = json!(txid);
    }
    match record {
        LogRecord::SetInt {
            block,
            offset,
            before,
            after,
            ..
        } => {
            value["file"] = json!(block.filename());
            value["block"] = json!(block.number());
            value["offset"] = json!(offset);
            value["before"] = json!(before);
            value["after"] = json!(after);
        }
        LogRecord::SetString {
            block,
            offset,
            before,
            ..
        } => {
            value["file"] = json!(block.filename());
            value["block"] = json!(block.number());
            value["offset"] = json!(offset);
            value["before"] = json!(before);
        }
        LogRecord::RedoString {
            block,
            offset,
            after,
            ..
        } => {
            value["file"] = json!(block.filename());
            value["block"] = json!(block.number());
            value["offset"] = json!(offset);
            value["after"] = json!(after);
        }
        _ => {}
    }
    value
}

fn build_json(log_path: &Path, report: &Report) -> Value {
    match report {
        Report::Full { records, analysis } => json!({
            "schema_version": 1,
            "log_path": log_path.display().to_string(),
            "status": "ok",
            "records": records.iter().map(record_json).collect::<Vec<_>>(),
            "since_checkpoint": analysis.records.len(),
            "found_checkpoint": analysis.found_checkpoint,
            "committed_txids": analysis.committed,
            "rolled_back_txids": analysis.rolled_back,
            "incomplete_txids": analysis.incomplete,
            "max_txid": analysis.max_txid,
            "exit_code": EXIT_OK,
        }),
        Report::Filtered { filter, records } => json!({
            "schema_version": 1,
            "log_path": log_path.display().to_string(),
            "status": "ok",
            "filter": filter,
            "records": records.iter().map(record_json).collect::<Vec<_>>(),
            "exit_code": EXIT_OK,
        }),
    }
}

fn build_json_fatal(log_path: &Path, msg: &str) -> Value {
    json!({
        "schema_version": 1,
        "log_path": log_path.display().to_string(),
        "status": "fatal",
        "fatal_error": msg,
        "exit_code": EXIT_FATAL_ERROR,
    })
}

fn print_text(report: &Report) {
    match report {
        Report::Full { records, analysis } => {
            for record in records {
                println!("{}", record);
            }
            println!("Log summary:");
            println!("  records: {}", records.len());
            println!(
                "  since last checkpoint: {}{}",
                analysis.records.len(),
                if analysis.found_checkpoint {
                    ""
                } else {
                    " (no checkpoint)"
                }
            );
            println!("  committed txs: {:?}", analysis.committed);
            println!("  rolled back txs: {:?}", analysis.rolled_back);
            println!("  incomplete txs: {:?}", analysis.incomplete);
            println!("  highest txid: {}", analysis.max_txid);
        }
        Report::Filtered { filter, records } => {
            println!("Records for {} ({}):", filter, records.len());
            for record in records {
                println!("  {}", record);
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let log_path = cli.dir.join(&cli.log_file);

    match inspect(&cli) {
        Ok(report) => {
            match cli.format {
                OutputFormatArg::Text => print_text(&report),
                OutputFormatArg::Json => println!("{}", build_json(&log_path, &report)),
            }
            process::exit(EXIT_OK);
        }
        Err(e) => {
            let msg = format!("log inspection failed: {}", e);
            match cli.format {
                OutputFormatArg::Text => eprintln!("ERROR: {}", msg),
                OutputFormatArg::Json => println!("{}", build_json_fatal(&log_path, &msg)),
            }
            process::exit(EXIT_FATAL_ERROR);
        }
    }
}

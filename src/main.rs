//! `docbridge` command-line driver
//!
//! Runs write jobs and pushdown scans against the in-process store, which
//! makes batching, abort handling and filter translation observable without
//! a cluster.
//!
//! ## Usage
//!
//! ```bash
//! # Write a CSV as JSON documents, URIs from a column
//! docbridge write authors.csv -o uri-column=URI -o batch-size=50
//!
//! # Invoke a script per row; fail on one value to see the abort policy
//! docbridge write ids.csv -o eval-script-primary='var URI;' -o abort-on-failure=false --fail-on b
//!
//! # Scan a CSV registered as view Medical.Authors with a pushed filter
//! docbridge query authors.csv --schema Medical --view Authors --filter "CitationID = 1"
//!
//! # Show how a filter translates
//! docbridge translate --column CitationID:integer --column LastName:string \
//!     --filter "CitationID = 1 AND LastName startsWith 'Ab'"
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use docbridge::csv::{load_rows, CsvOptions};
use docbridge::read::{parse_filter, QueryColumns, ScanBuilder};
use docbridge::store::CodeCall;
use docbridge::telemetry::init_tracing;
use docbridge::{
    Config, DataType, DocumentWrite, Field, LocalJob, MemoryStore, OptionMap, PredicateTranslator,
    ReadOptions, Schema, Translation,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docbridge")]
#[command(about = "Batch writes and filter pushdown against a document store", long_about = None)]
struct Args {
    /// Configuration file; defaults to docbridge.toml in the working directory.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct WriteArgs {
    /// CSV input with a header row.
    input: PathBuf,
    /// Connector option as key=value; repeatable.
    #[arg(short = 'o', long = "option", value_parser = parse_option)]
    options: Vec<(String, String)>,
    #[arg(long, default_value_t = 1)]
    partitions: usize,
    /// Run as this streaming epoch instead of a batch job.
    #[arg(long)]
    epoch: Option<u64>,
    /// Make custom code fail for rows bound to this value.
    #[arg(long)]
    fail_on: Option<String>,
    /// Treat every CSV column as a string.
    #[arg(long, default_value_t = false)]
    strings_only: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Write CSV rows as documents or custom-code invocations.
    Write(WriteArgs),
    /// Scan a CSV registered as a view, pushing filters where possible.
    Query {
        input: PathBuf,
        #[arg(long)]
        schema: String,
        #[arg(long)]
        view: String,
        /// Filter expression; repeat for a conjunction.
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Evaluate every filter locally.
        #[arg(long, default_value_t = false)]
        no_pushdown: bool,
    },
    /// Translate a filter into the store's query syntax.
    Translate {
        /// Output column as name:type (string, integer, boolean, binary); repeatable.
        #[arg(long = "column", value_parser = parse_column, required = true)]
        columns: Vec<Field>,
        #[arg(long, default_value = "Medical")]
        schema: String,
        #[arg(long, default_value = "Authors")]
        view: String,
        #[arg(long)]
        filter: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(&path.to_string_lossy())
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().unwrap_or_else(|_| {
            eprintln!("Using default configuration");
            Config::default()
        }),
    };
    init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    match args.command {
        Command::Write(write) => runtime.block_on(run_write(&config, write)),
        Command::Query {
            input,
            schema,
            view,
            filters,
            no_pushdown,
        } => runtime.block_on(run_query(&config, &input, &schema, &view, &filters, no_pushdown)),
        Command::Translate {
            columns,
            schema,
            view,
            filter,
        } => run_translate(columns, &schema, &view, &filter),
    }
}

async fn run_write(config: &Config, args: WriteArgs) -> anyhow::Result<()> {
    let WriteArgs {
        input,
        options,
        partitions,
        epoch,
        fail_on,
        strings_only,
    } = args;
    let options: OptionMap = options.into_iter().collect();
    let csv_options = CsvOptions {
        infer_types: !strings_only,
        ..CsvOptions::default()
    };
    let rows = load_rows(&input, &csv_options).with_context(|| format!("reading {}", input.display()))?;

    let mut store = MemoryStore::new();
    if let Some(value) = fail_on {
        store = store.with_code_handler(move |call: &CodeCall| {
            // Per-batch calls bind the comma-joined values of the whole batch
            let hit = call.variables.values().any(|v| {
                v.as_str()
                    .is_some_and(|s| s.split(',').any(|part| part == value))
            });
            if hit {
                Err(format!("Error: cannot process {value}"))
            } else {
                Ok(Vec::new())
            }
        });
    }
    let store = Arc::new(store);

    let write = DocumentWrite::from_options(Arc::clone(&store), &options, &config.write)?;
    let job = LocalJob::new(write, partitions);
    let summary = match epoch {
        Some(epoch) => job.run_epoch(epoch, rows).await?,
        None => job.run(rows).await?,
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("documents stored: {}", store.document_count());
    Ok(())
}

async fn run_query(
    config: &Config,
    input: &Path,
    schema: &str,
    view: &str,
    filters: &[String],
    no_pushdown: bool,
) -> anyhow::Result<()> {
    let rows = load_rows(input, &CsvOptions::default())
        .with_context(|| format!("reading {}", input.display()))?;
    let Some(first) = rows.first() else {
        bail!("{} has no data rows", input.display());
    };
    let columns = QueryColumns::from_view(schema, view, None, first.schema());

    let store = MemoryStore::new();
    store.register_view(schema, view, rows);

    let mut options = OptionMap::new();
    options.insert(
        docbridge::options::OPTIC_QUERY.to_string(),
        format!("op.fromView('{schema}', '{view}')"),
    );
    if no_pushdown {
        options.insert(docbridge::options::PUSH_DOWN_FILTERS.to_string(), "false".to_string());
    }
    let read_options = ReadOptions::parse(&options, &config.read)?;

    let predicates = filters
        .iter()
        .map(String::as_str)
        .map(parse_filter)
        .collect::<Result<Vec<_>, _>>()?;
    let mut builder = ScanBuilder::new(read_options, columns);
    let pushdown = builder.push_filters(predicates);
    let scan = builder.build();

    println!("query:    {}", scan.query_text());
    for filter in &pushdown.residual {
        println!("residual: {filter}");
    }
    let rows = scan.execute(&store).await?;
    for row in &rows {
        println!("{}", serde_json::Value::Object(row.to_json_object()));
    }
    println!("rows: {}", rows.len());
    Ok(())
}

fn run_translate(columns: Vec<Field>, schema: &str, view: &str, filter: &str) -> anyhow::Result<()> {
    let fields = Schema::new(columns);
    let translator = PredicateTranslator::new(QueryColumns::from_view(schema, view, None, &fields));
    match translator.translate(&parse_filter(filter)?) {
        Translation::Translated(expr) => println!("{expr}"),
        Translation::Unsupported(reason) => println!("not pushed: {reason}"),
    }
    Ok(())
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn parse_column(raw: &str) -> Result<Field, String> {
    let (name, data_type) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected name:type, got '{raw}'"))?;
    let data_type = match data_type.trim().to_ascii_lowercase().as_str() {
        "string" => DataType::String,
        "integer" | "int" | "long" => DataType::Integer,
        "boolean" | "bool" => DataType::Boolean,
        "binary" => DataType::Binary,
        other => return Err(format!("unknown column type '{other}'")),
    };
    Ok(Field::nullable(name.trim(), data_type))
}

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, CommandFactory, Parser};
use log::{error, info, warn};

use csv2influx::store::InfluxStore;
use csv2influx::{
    read_lines, FieldSpec, ImportConfig, IngestDriver, IterationOrder, MalformedPolicy, PointStore,
    ServerAddress, StopReason, TagSet, TimestampSpec, WriteMode,
};

/// Import CSV data into an InfluxDB measurement
#[derive(Parser)]
#[command(author, version, about, long_about = None, disable_help_flag = true)]
struct Cli {
    /// CSV file to read
    #[arg(short, long, value_name = "FILENAME", required_unless_present = "timezone_help")]
    input: Option<PathBuf>,

    /// InfluxDB host, port defaults to 8086
    #[arg(short = 'h', long, value_name = "HOST[:PORT]", required_unless_present = "timezone_help")]
    host: Option<String>,

    /// Target database
    #[arg(short, long, required_unless_present = "timezone_help")]
    database: Option<String>,

    /// Database user
    #[arg(short, long, required_unless_present = "timezone_help")]
    username: Option<String>,

    /// Password of the database user
    #[arg(
        short,
        long,
        env = "INFLUXDB_PASSWORD",
        hide_env_values = true,
        required_unless_present = "timezone_help"
    )]
    password: Option<String>,

    /// Target measurement in the database
    #[arg(short, long, required_unless_present = "timezone_help")]
    measurement: Option<String>,

    /// Tags attached to every entry
    #[arg(short, long, value_name = "KEY=VALUE[,KEY=VALUE]")]
    tags: Option<String>,

    /// Field names of the columns after the timestamp
    #[arg(short, long, value_name = "FIELD[,FIELD]", required_unless_present = "timezone_help")]
    fields: Option<String>,

    /// Timestamp layout, one comma separated part per column.
    /// `%m/%d/%Y,%H:%M` reads `01/17/2020,03:03,...`
    #[arg(short = 's', long, value_name = "LAYOUT", required_unless_present = "timezone_help")]
    timestamp: Option<String>,

    /// Timezone of the CSV values
    #[arg(short = 'z', long, default_value = "UTC")]
    timezone: String,

    /// Print all known timezone names and exit
    #[arg(long)]
    timezone_help: bool,

    /// Write everything in one batch without checking for existing entries.
    /// Existing values may be overwritten!
    #[arg(short, long)]
    bulk: bool,

    /// Order in which lines are processed
    #[arg(long, value_enum, default_value_t = IterationOrder::Reverse)]
    order: IterationOrder,

    /// Skip lines with unreadable field values instead of stopping
    #[arg(long)]
    skip_malformed: bool,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// More log output, repeat for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

/// Arguments of an import run, present once `--timezone-help` is ruled out.
struct ImportArgs {
    input: PathBuf,
    server: ServerAddress,
    database: String,
    username: String,
    password: String,
    config: ImportConfig,
}

impl Cli {
    fn into_import(self) -> Result<ImportArgs> {
        let required = |value: Option<String>, name: &str| {
            value.with_context(|| format!("--{} is required", name))
        };

        let layout = required(self.timestamp, "timestamp")?;
        let timestamp = TimestampSpec::new(&layout, &self.timezone)?;
        let fields = FieldSpec::parse(&required(self.fields, "fields")?)?;
        let tags = TagSet::parse(self.tags.as_deref())?;
        let mode = if self.bulk {
            WriteMode::Bulk
        } else {
            WriteMode::Sequential
        };
        let malformed = if self.skip_malformed {
            MalformedPolicy::Skip
        } else {
            MalformedPolicy::Abort
        };
        let measurement = required(self.measurement, "measurement")?;
        let config = ImportConfig::new(&measurement, timestamp, fields, tags)?
            .with_mode(mode)
            .with_order(self.order)
            .with_malformed(malformed);

        Ok(ImportArgs {
            input: self.input.context("--input is required")?,
            server: ServerAddress::parse(&required(self.host, "host")?)?,
            database: required(self.database, "database")?,
            username: required(self.username, "username")?,
            password: required(self.password, "password")?,
            config,
        })
    }
}

fn main() -> Result<()> {
    if std::env::args_os().len() <= 1 {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    }
    let args = Cli::parse();

    setup_logging(args.verbose, args.log_file.as_ref())?;

    if args.timezone_help {
        for tz in chrono_tz::TZ_VARIANTS.iter() {
            println!("{}", tz.name());
        }
        return Ok(());
    }

    let import = args.into_import()?;

    // one thread; every store call is awaited before the next
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    runtime.block_on(run(import))
}

async fn run(args: ImportArgs) -> Result<()> {
    let mut store = InfluxStore::new(args.server.url()).with_auth(&args.username, &args.password);

    let (build, version) = store.ping().await.with_context(|| {
        format!(
            "Given host {} or port {} not reachable",
            args.server.host, args.server.port
        )
    })?;
    info!("Connected to {} ({} {})", args.server, build, version);

    let databases = store
        .list_databases()
        .await
        .context("Something went wrong listing the databases")?;
    if !databases.iter().any(|db| *db == args.database) {
        bail!("Given database {} not found or no access", args.database);
    }
    store.use_database(&args.database).await?;

    let lines = read_lines(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    info!(
        "Importing {} lines from {} into {}.{}",
        lines.len(),
        args.input.display(),
        args.database,
        args.config.measurement
    );

    let report = IngestDriver::new(&store, &args.config).run(lines.as_slice()).await?;
    match &report.stop {
        StopReason::Completed => info!(
            "{} of {} qualifying lines written",
            report.written, report.qualifying
        ),
        StopReason::Duplicate { timestamp } => warn!(
            "Stopped at existing entry {}, {} lines written",
            timestamp, report.written
        ),
        StopReason::WriteFailed { error } => error!("Stopped after write failure: {}", error),
    }
    if report.skipped_malformed > 0 {
        warn!("{} malformed lines skipped", report.skipped_malformed);
    }

    store.close().await?;
    info!("import finished");
    Ok(())
}

// Set up logging to the console and optionally a file
fn setup_logging(verbose: u8, log_file: Option<&PathBuf>) -> Result<()> {
    let console_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let console_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| console_level.to_string());

    match log_file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            let console_logger = pretty_env_logger::formatted_builder()
                .parse_filters(&console_filter)
                .build();

            let file_logger = pretty_env_logger::formatted_builder()
                .parse_filters("debug")
                .target(pretty_env_logger::env_logger::Target::Pipe(Box::new(log_file)))
                .build();

            let max_level = console_logger.filter().max(file_logger.filter());
            log::set_boxed_logger(Box::new(LogDispatcher {
                console: console_logger,
                file: file_logger,
            }))?;
            log::set_max_level(max_level);
        }
        None => {
            pretty_env_logger::formatted_builder()
                .parse_filters(&console_filter)
                .try_init()?;
        }
    }

    Ok(())
}

// Logger that dispatches to both console and file
struct LogDispatcher {
    console: pretty_env_logger::env_logger::Logger,
    file: pretty_env_logger::env_logger::Logger,
}

impl log::Log for LogDispatcher {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.console.enabled(metadata) || self.file.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        self.console.log(record);
        self.file.log(record);
    }

    fn flush(&self) {
        self.console.flush();
        self.file.flush();
    }
}

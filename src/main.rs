//! CLI entry point for `mailpipe`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;

use mailpipe::compose::template::renderer_for;
use mailpipe::compose::{ComposeOptions, Composer};
use mailpipe::config::Config;
use mailpipe::dispatch::transport::build_transport;
use mailpipe::dispatch::{Dispatcher, InvocationContext};
use mailpipe::parser::mime::{summarize, PartSummary};
use mailpipe::store::fs::FsStore;
use mailpipe::store::BlobStore;

#[derive(Parser)]
#[command(
    name = "mailpipe",
    version,
    about = "Compose JSON email requests into RFC 822 messages and dispatch them"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (overrides MAILPIPE_CONFIG and the default location)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Blob store root directory (one sub-directory per bucket)
    #[arg(long, value_name = "DIR", global = true)]
    store_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a message from a request document and store it
    Compose {
        /// Composer input JSON file, or `-` for stdin
        input: PathBuf,
    },
    /// Submit a composed message to the configured transport
    Dispatch {
        /// Dispatcher input JSON file, or `-` for stdin
        input: PathBuf,
        /// Time budget for the whole dispatch, in milliseconds
        #[arg(long, default_value_t = 30_000)]
        time_budget_ms: u64,
    },
    /// Show the headers and MIME structure of a composed message
    Inspect {
        /// Raw .eml file
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => mailpipe::config::load_config_from(path),
        None => mailpipe::config::load_config(),
    };
    if let Some(root) = cli.store_root.clone() {
        config.storage.root = root;
    }

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Compose { input } => cmd_compose(&input, &config).await,
        Commands::Dispatch {
            input,
            time_budget_ms,
        } => cmd_dispatch(&input, Duration::from_millis(time_budget_ms), &config).await,
        Commands::Inspect { path, json } => cmd_inspect(&path, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mailpipe::config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailpipe.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Read a JSON document from a file, or from stdin when `path` is `-`.
fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn open_store(config: &Config) -> Arc<dyn BlobStore> {
    Arc::new(FsStore::new(&config.storage.root))
}

async fn cmd_compose(input: &Path, config: &Config) -> anyhow::Result<()> {
    let input = read_json(input)?;
    let composer = Composer::new(
        open_store(config),
        renderer_for(config.compose.template),
        ComposeOptions::from(config),
    );
    let output = composer.compose(&input).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_dispatch(input: &Path, budget: Duration, config: &Config) -> anyhow::Result<()> {
    // The budget starts counting before the input is read, as a host's would.
    let ctx = InvocationContext::from_remaining(budget);
    let input = read_json(input)?;
    let transport = build_transport(&config.dispatch)?;
    let dispatcher = Dispatcher::new(
        open_store(config),
        Arc::from(transport),
        config.dispatch.deadline_margin(),
    );
    let receipt = dispatcher.dispatch(&input, &ctx).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

/// Print the headers and part tree of a raw message.
fn cmd_inspect(path: &Path, json: bool) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let raw = std::fs::read(path)?;
    let summary = summarize(&raw)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("  {:<12} {}", "From", summary.from.join(", "));
    println!("  {:<12} {}", "To", summary.to.join(", "));
    if !summary.cc.is_empty() {
        println!("  {:<12} {}", "Cc", summary.cc.join(", "));
    }
    if !summary.bcc.is_empty() {
        println!("  {:<12} {}", "Bcc", summary.bcc.join(", "));
    }
    if !summary.reply_to.is_empty() {
        println!("  {:<12} {}", "Reply-To", summary.reply_to.join(", "));
    }
    println!(
        "  {:<12} {}",
        "Subject",
        summary.subject.as_deref().unwrap_or("")
    );
    if let Some(id) = &summary.message_id {
        println!("  {:<12} <{id}>", "Message-ID");
    }
    println!();
    print_part(&summary.structure, 1);
    println!();
    Ok(())
}

fn print_part(part: &PartSummary, depth: usize) {
    use humansize::{format_size, BINARY};

    let indent = "  ".repeat(depth);
    if part.children.is_empty() {
        let name = part.filename.as_deref().unwrap_or("-");
        println!(
            "{indent}{:<28} {:<24} {:>10}",
            part.content_type,
            name,
            format_size(part.size, BINARY)
        );
        if let Some(cid) = &part.content_id {
            println!("{indent}  cid: {cid}");
        }
    } else {
        println!("{indent}{}", part.content_type);
        for child in &part.children {
            print_part(child, depth + 1);
        }
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailpipe", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

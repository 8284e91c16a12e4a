mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "answersheet",
    version,
    about = "Extract handwritten answers from scanned student worksheets"
)]
struct Cli {
    /// Log repair decisions and model calls (info level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract per-student answers from a worksheet PDF (URL or path)
    Extract {
        /// http(s) URL or local path of the submission PDF
        source: String,

        /// YAML settings file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output format: table (default) or json
        #[arg(short, long, default_value = "table")]
        output: String,

        /// Write the result to a JSON file
        #[arg(short = 'O', long = "out", value_name = "FILE")]
        out: Option<PathBuf>,

        /// Keep answer snippets in memory instead of uploading them to S3
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the JSON schema the extraction model answers with
    Schema,
    /// Inspect and validate prompt templates
    Prompts {
        #[command(subcommand)]
        action: PromptsAction,
    },
}

#[derive(Subcommand)]
enum PromptsAction {
    /// List prompt templates and their parameters
    List {
        /// Prompt book to inspect instead of the built-in one
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Print one prompt template
    Show {
        /// Template name (e.g., "verification_prompt")
        name: String,

        /// Prompt book to inspect instead of the built-in one
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Validate a custom prompt book
    Validate {
        /// Path to YAML prompt book
        file: PathBuf,
    },
}

/// `RUST_LOG`, when set, replaces the level chosen by `-v`.
fn env_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    let level = if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(rust_log.unwrap_or_default())
}

fn init_tracing(verbose: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Extract {
            source,
            config,
            output,
            out,
            dry_run,
        } => commands::extract::run(&source, config, &output, out, dry_run).await,
        Commands::Schema => commands::schema::run(),
        Commands::Prompts { action } => match action {
            PromptsAction::List { file } => commands::prompts::list(file.as_deref()),
            PromptsAction::Show { name, file } => commands::prompts::show(&name, file.as_deref()),
            PromptsAction::Validate { file } => commands::prompts::validate(&file),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults_to_warn() {
        assert_eq!(env_filter(false, None).to_string(), "warn");
        assert_eq!(env_filter(false, Some("")).to_string(), "warn");
    }

    #[test]
    fn test_verbose_raises_to_info() {
        assert_eq!(env_filter(true, None).to_string(), "info");
    }

    #[test]
    fn test_rust_log_overrides_cli_level() {
        assert_eq!(env_filter(false, Some("debug")).to_string(), "debug");
        assert_eq!(env_filter(true, Some("error")).to_string(), "error");
        assert_eq!(
            env_filter(false, Some("answersheet_core=trace")).to_string(),
            "answersheet_core=trace"
        );
    }
}

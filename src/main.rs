#![deny(clippy::expect_used)]
#![deny(clippy::unwrap_used)]

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use vorma::cmd;
use vorma::common::STARTING;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Vorma::parse();

    let colored = init_color(&cli);

    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(eval_logging(&cli))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(colored)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging")?;

    tracing::info!(
        "{}Starting {} {}",
        STARTING,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    Ok(match cli.run().await {
        Err(err) => {
            tracing::error!("{err}");
            for (n, cause) in err.chain().enumerate().skip(1) {
                tracing::info!("  {n}: {cause}");
            }
            ExitCode::FAILURE
        }
        Ok(()) => ExitCode::SUCCESS,
    })
}

fn init_color(cli: &Vorma) -> bool {
    if cli.no_color {
        return false;
    }

    let colored = match cli.color {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stdout().is_terminal(),
    };

    #[cfg(windows)]
    if colored {
        if let Err(err) = nu_ansi_term::enable_ansi_support() {
            eprintln!("error enabling ANSI support: {:?}", err);
        }
    }

    #[allow(clippy::let_and_return)]
    colored
}

fn eval_logging(cli: &Vorma) -> tracing_subscriber::EnvFilter {
    // allow overriding everything with RUST_LOG or --log
    if let Some(directives) = &cli.log {
        return tracing_subscriber::EnvFilter::new(directives);
    }

    // the schema sub-command exists to be piped; keep it silent by default
    let prefer_silence = matches!(cli.action, VormaSubcommands::Schema(_));

    let silent = cli.quiet || prefer_silence;

    let directives = match (cli.verbose, silent) {
        // quiet overrides verbose
        (_, true) => "error,vorma=warn",
        // increase verbosity
        (0, false) => "error,vorma=info",
        (1, false) => "error,vorma=debug",
        (_, false) => "error,vorma=trace",
    };

    tracing_subscriber::EnvFilter::new(directives)
}

/// Development server & build engine for Go-backed full-stack web applications.
#[derive(Parser)]
#[command(about, author, version)]
struct Vorma {
    #[command(subcommand)]
    action: VormaSubcommands,
    /// Path to the vorma config file
    #[arg(long, env = "VORMA_CONFIG", global(true))]
    pub config: Option<PathBuf>,
    /// Enable verbose logging.
    #[arg(short, long, global(true), action=ArgAction::Count)]
    pub verbose: u8,
    /// Be more quiet, conflicts with --verbose
    #[arg(short, long, global(true), conflicts_with("verbose"))]
    pub quiet: bool,
    /// Provide a RUST_LOG filter, conflicts with --verbose and --quiet
    #[arg(long, global(true), conflicts_with_all(["verbose", "quiet"]), env("RUST_LOG"))]
    pub log: Option<String>,

    /// Color mode
    #[arg(long, env = "VORMA_COLOR", global(true), value_enum, conflicts_with = "no_color", default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    /// Support for `NO_COLOR` environment variable
    #[arg(long, env = "NO_COLOR", global(true))]
    pub no_color: bool,
}

#[derive(Clone, Debug, Default, ValueEnum)]
#[value(rename_all = "lower")]
enum ColorMode {
    /// Enable color when running on a TTY
    #[default]
    Auto,
    /// Always enable color
    Always,
    /// Never enable color
    Never,
}

impl Vorma {
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn run(self) -> Result<()> {
        match self.action {
            VormaSubcommands::Dev(inner) => inner.run(self.config).await,
            VormaSubcommands::Build(inner) => inner.run(self.config).await,
            VormaSubcommands::Clean(inner) => inner.run(self.config).await,
            VormaSubcommands::Schema(inner) => inner.run(self.config).await,
        }
    }
}

#[derive(Subcommand)]
enum VormaSubcommands {
    /// Watch, rebuild & serve reload events for the app in development.
    Dev(cmd::dev::Dev),
    /// Produce a full production build.
    Build(cmd::build::Build),
    /// Clean output artifacts.
    Clean(cmd::clean::Clean),
    /// Print the JSON Schema of the config document.
    Schema(cmd::schema::Schema),
}

#[cfg(test)]
mod tests {
    use crate::Vorma;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Vorma::command().debug_assert();
    }
}

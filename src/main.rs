use autograder::config::{ColorChoice, ConfigLoader, env};
use autograder::core::flags::OUTPUT_SEPARATOR;
use autograder::late_days::LateDays;
use autograder::reporter::{ConsoleReporter, Reporter};
use autograder::style::{RegexStyleChecker, StyleChecker, default_rules_file};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;

const LOG_ENV: &str = "AUTOGRADER_LOG";

#[derive(Parser)]
#[command(name = "autograder")]
#[command(about = "Inspect autograder configuration, style checks, and late days")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved configuration and the environment overrides in effect.
    Check {
        /// Configuration file (defaults to autograder.toml if present).
        config: Option<PathBuf>,

        /// Profile to apply on top of the base configuration.
        #[arg(short, long)]
        profile: Option<String>,

        /// Ignore AUTOGRADER_* environment overrides.
        #[arg(long)]
        no_env: bool,
    },

    /// Run the style checker on one source file.
    Style {
        /// Source file to check.
        file: PathBuf,

        /// Rules file (defaults to stylecheck-<name>-<ext>.toml next to the source).
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Treat the style checks as part of the test results.
        #[arg(long)]
        merged: bool,
    },

    /// Show the late-day report.
    LateDays {
        /// Late-day file.
        #[arg(default_value = "late_days.txt")]
        file: PathBuf,
    },
}

fn init_logging() {
    let level = std::env::var(LOG_ENV).unwrap_or_default();
    // An empty or unparsable filter falls back to the standard level.
    let targets = if level.is_empty() {
        Targets::new().with_default(LevelFilter::WARN)
    } else {
        level.parse().unwrap_or_else(|e| {
            eprintln!("warning: ignoring invalid {LOG_ENV} value {level:?}: {e}");
            Targets::new().with_default(LevelFilter::WARN)
        })
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(targets);
    tracing_subscriber::registry().with(layer).init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> autograder::Result<ExitCode> {
    match command {
        Command::Check {
            config,
            profile,
            no_env,
        } => {
            let mut loader = ConfigLoader::new();
            if let Some(path) = config {
                loader = loader.config_file(path);
            }
            if let Some(name) = profile {
                loader = loader.profile(name);
            }
            if no_env {
                loader = loader.no_env();
            }
            let config = loader.load()?;

            let text = toml::to_string_pretty(&config)
                .map_err(|e| autograder::Error::config(format!("cannot render config: {e}")))?;
            println!("{text}");

            if !no_env {
                let overrides = env::detect_active_overrides();
                if !overrides.is_empty() {
                    println!("# active environment overrides");
                    for (key, value) in overrides {
                        println!("# {key}={value}");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Style {
            file,
            rules,
            merged,
        } => {
            let rules = rules.unwrap_or_else(|| default_rules_file(&file));
            let report = RegexStyleChecker::new().check(&file, &rules);

            let mut report_config = autograder::Config::default().report;
            report_config.color = ColorChoice::Auto;
            ConsoleReporter::new(&report_config).on_style_check(&report, merged);

            if report.error.is_some() || report.passed_count() < report.total() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }

        Command::LateDays { file } => {
            let late_days = LateDays::load(&file)?;
            print!("{}", late_days.console_text(OUTPUT_SEPARATOR));
            Ok(ExitCode::SUCCESS)
        }
    }
}

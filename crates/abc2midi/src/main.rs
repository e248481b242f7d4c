//! abc2midi binary

use abc2midi::{logging, Cli, Commands, Settings};
use abcconf::AbcConfig;
use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::io::{IsTerminal, Write};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = AbcConfig::load_with_sources_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    logging::init(&logging::filter_directive(&config.log.level, cli.verbose))?;
    debug!(files = ?sources.files, env = ?sources.env_overrides, "configuration loaded");

    let mut settings = Settings::from_config(&config);
    if cli.strict {
        settings.parse.strict = true;
    }
    if let Some(jobs) = cli.jobs {
        let mut batch = config.batch.clone();
        batch.jobs = jobs;
        settings.jobs = batch.effective_jobs().max(1);
    }

    let color = std::io::stdout().is_terminal();

    match cli.command {
        Commands::ConvertSongs {
            songs_dir,
            output_dir,
        } => {
            let report = abc2midi::convert_songs(&songs_dir, &output_dir, &settings).await?;
            print!("{}", report.render(color));
            std::io::stdout().flush()?;
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Commands::ConvertAndCombine {
            song_paths,
            output_path,
        } => {
            let combined = abc2midi::convert_and_combine(&song_paths, &output_path, &settings)?;
            info!(tracks = combined.tracks, warnings = combined.warnings, "done");
            let line = format!(
                "Combined {} songs into {} ({} tracks)",
                song_paths.len(),
                combined.output.display(),
                combined.tracks
            );
            if color {
                println!("{}", line.bright_green());
            } else {
                println!("{}", line);
            }
        }
    }

    Ok(())
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use drive_organizer::{init, output};
use indicatif::{ProgressBar, ProgressStyle};
use organizer_core::config::{self, AppConfig};
use organizer_core::{build_registry, Organizer};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Commands::Init { path } = &cli.command {
        init::write_default_config(path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Organize {
            source,
            destination,
            recognition,
            storage,
            batch_size,
            json,
        } => {
            run_organize(
                cfg,
                &source,
                &destination,
                recognition.as_deref(),
                storage.as_deref(),
                batch_size,
                json,
            )
            .await
        }
        Commands::Analyze {
            source,
            limit,
            recognition,
            storage,
        } => run_analyze(cfg, &source, limit, recognition.as_deref(), storage.as_deref()).await,
        Commands::Auth { storage } => run_auth(cfg, storage.as_deref()).await,
        Commands::Images { category, tag, json } => run_images(cfg, category, tag, json).await,
        Commands::Init { .. } => Ok(()),
    }
}

#[derive(Parser)]
#[command(name = "drive-organizer")]
#[command(about = "Sort images into Category/Year/Month folders", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every image in a folder and upload it into the category tree
    Organize {
        /// Folder to read images from
        #[arg(long)]
        source: String,
        /// Root of the category tree; empty for the storage root
        #[arg(long, default_value = "")]
        destination: String,
        /// Recognition provider (overrides recognition.provider)
        #[arg(long)]
        recognition: Option<String>,
        /// Storage provider (overrides storage.provider)
        #[arg(long)]
        storage: Option<String>,
        /// Images per recognition batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Classify images without uploading anything
    Analyze {
        #[arg(long)]
        source: String,
        /// Maximum number of images to classify
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        recognition: Option<String>,
        #[arg(long)]
        storage: Option<String>,
    },
    /// Check credentials against the storage provider
    Auth {
        #[arg(long)]
        storage: Option<String>,
    },
    /// Write a default configuration file
    Init {
        #[arg(long, default_value = "config/default.toml")]
        path: PathBuf,
    },
    /// Query the metadata index
    Images {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn progress_bar(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) Organizing images...")?,
    );
    Ok(pb)
}

async fn run_organize(
    mut cfg: AppConfig,
    source: &str,
    destination: &str,
    recognition: Option<&str>,
    storage: Option<&str>,
    batch_size: Option<usize>,
    json: bool,
) -> Result<()> {
    if let Some(n) = batch_size {
        cfg.organization.batch_size = n;
    }
    let organizer = Organizer::from_config(&cfg, recognition, storage).await?;
    let pb = progress_bar(json)?;
    let on_progress = |done: usize, total: usize| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    };
    let result = organizer
        .organize_folder(source, destination, Some(&on_progress))
        .await
        .with_context(|| format!("organize {source}"))?;
    pb.finish_and_clear();

    if json {
        let summary = output::run_summary_json(&result, source, destination);
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in output::run_summary_lines(&result) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_analyze(
    cfg: AppConfig,
    source: &str,
    limit: usize,
    recognition: Option<&str>,
    storage: Option<&str>,
) -> Result<()> {
    let organizer = Organizer::from_config(&cfg, recognition, storage).await?;
    let analyses = organizer
        .analyze_folder(source, limit)
        .await
        .with_context(|| format!("analyze {source}"))?;
    if analyses.is_empty() {
        println!("no images in {source}");
    }
    for analysis in &analyses {
        println!("{}", output::analysis_line(analysis));
    }
    Ok(())
}

async fn run_auth(cfg: AppConfig, storage: Option<&str>) -> Result<()> {
    let registry = build_registry(&cfg)?;
    let provider = registry.storage(storage)?;
    let outcome = provider.authenticate().await;
    if let Err(e) = provider.close().await {
        tracing::warn!(error = %e, "failed to close storage");
    }
    match outcome {
        Ok(true) => {
            println!("authenticated with {}", provider.name());
            Ok(())
        }
        Ok(false) => bail!("{} rejected the configured credentials", provider.name()),
        Err(e) => Err(e).with_context(|| format!("authenticate with {}", provider.name())),
    }
}

async fn run_images(cfg: AppConfig, category: Option<String>, tag: Option<String>, json: bool) -> Result<()> {
    let Some(path) = cfg.database.path.as_deref().filter(|p| !p.is_empty()) else {
        bail!("database.path is not configured; the metadata index is disabled");
    };
    let pool = storage::connect(path).await?;
    storage::migrate(&pool).await?;
    let images = match (category, tag) {
        (Some(category), None) => storage::images_by_category(&pool, &category).await?,
        (None, Some(tag)) => storage::images_by_tag(&pool, &tag).await?,
        (Some(category), Some(tag)) => storage::images_by_tag(&pool, &tag)
            .await?
            .into_iter()
            .filter(|i| i.category == category)
            .collect(),
        (None, None) => storage::all_images(&pool).await?,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&images)?);
    } else {
        for image in &images {
            println!("{}", output::image_line(image));
        }
    }
    Ok(())
}

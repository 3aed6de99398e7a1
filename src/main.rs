use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;

use pagestitch::cdp::{BrowserConfig, CdpHost};
use pagestitch::config::{ConfigStore, UploadConfig};
use pagestitch::raster::ImageRaster;
use pagestitch::service::is_internal_page;
use pagestitch::upload::{upload_jpeg, verify_connection, ClientCache};
use pagestitch::{capture_full_page, capture_visible_jpeg, CaptureOptions, JpegQuality, Viewport};

/// Capture web pages as JPEG and publish them to S3-compatible storage
#[derive(Debug, Parser)]
#[clap(author, version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Capture a page, optionally stitching the whole scrollable height.
    Capture(CaptureArgs),

    /// Check that the configured bucket is reachable.
    Verify {
        #[clap(long, value_name = "FILE", default_value = "pagestitch.json")]
        config: PathBuf,
    },

    /// Manage the settings file.
    #[clap(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, clap::Subcommand)]
enum ConfigCommand {
    /// Write a settings file with default values.
    Init {
        #[clap(long, value_name = "FILE", default_value = "pagestitch.json")]
        config: PathBuf,
    },
}

#[derive(Debug, clap::Args)]
struct CaptureArgs {
    url: String,

    /// Scroll through the page and stitch every viewport.
    #[clap(long)]
    full_page: bool,

    /// JPEG quality (1-100); defaults to the settings file value.
    #[clap(long, value_name = "N")]
    quality: Option<u8>,

    /// Capture at most N viewports.
    #[clap(long, value_name = "N")]
    max_screens: Option<usize>,

    /// Write the JPEG here.
    #[clap(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Upload to the configured bucket and print the public URL.
    #[clap(long)]
    upload: bool,

    #[clap(long, value_name = "FILE", default_value = "pagestitch.json")]
    config: PathBuf,

    #[clap(long, default_value_t = 1280)]
    width: u32,

    #[clap(long, default_value_t = 720)]
    height: u32,
}

fn require_valid(config: &UploadConfig) -> anyhow::Result<()> {
    let report = config.validate();
    if !report.is_valid() {
        bail!("Invalid configuration: {}", report);
    }
    Ok(())
}

async fn capture(args: CaptureArgs) -> anyhow::Result<()> {
    let settings = ConfigStore::new(&args.config).load()?;
    if args.upload {
        require_valid(&settings)?;
    }
    if args.full_page && is_internal_page(&args.url) {
        bail!("Full-page capture is not available on browser internal pages");
    }

    let quality = match args.quality {
        Some(q) => JpegQuality::new(q)?,
        None => settings.quality()?,
    };
    let options = CaptureOptions {
        quality,
        max_screens: args.max_screens.or(settings.max_screens),
        ..Default::default()
    };

    let host = CdpHost::launch(BrowserConfig {
        viewport: Viewport {
            width: args.width,
            height: args.height,
        },
        ..Default::default()
    })
    .await?;
    let tab = host.open_tab(&args.url).await?;

    let captured = if args.full_page {
        capture_full_page(&host, &ImageRaster, tab, &options)
            .await
            .map(|image| image.jpeg)
    } else {
        capture_visible_jpeg(&host, tab, options.quality).await
    };
    host.close().await?;
    let jpeg = captured?;

    let output = match (&args.output, args.upload) {
        (Some(path), _) => Some(path.clone()),
        (None, false) => Some(PathBuf::from("screenshot.jpg")),
        (None, true) => None,
    };
    if let Some(path) = output {
        std::fs::write(&path, &jpeg).with_context(|| format!("writing {}", path.display()))?;
        info!("wrote {} bytes to {}", jpeg.len(), path.display());
    }

    if args.upload {
        let client = ClientCache::new().client_for(&settings)?;
        let url = upload_jpeg(&*client, &settings.bucket_name, &settings.cdn_url, jpeg).await?;
        println!("{}", url);
    }
    Ok(())
}

async fn verify(config: PathBuf) -> anyhow::Result<()> {
    let settings = ConfigStore::new(config).load()?;
    require_valid(&settings)?;

    let client = ClientCache::new().client_for(&settings)?;
    let result = verify_connection(&*client, &settings.bucket_name).await;
    match result.error {
        None => {
            println!("Connected to bucket {}", settings.bucket_name);
            Ok(())
        }
        Some(e) => bail!(e),
    }
}

fn init_config(path: PathBuf) -> anyhow::Result<()> {
    let store = ConfigStore::new(path);
    if store.path().exists() {
        bail!("{} already exists", store.path().display());
    }
    store.save(&UploadConfig::default())?;
    println!("Wrote default settings to {}", store.path().display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Capture(args) => capture(args).await,
        Command::Verify { config } => verify(config).await,
        Command::Config(ConfigCommand::Init { config }) => init_config(config),
    }
}

//! Capture a page top to bottom and save the stitched JPEG
//!
//! `cargo run --example full_page -- https://www.rust-lang.org out.jpg`

use pagestitch::cdp::{BrowserConfig, CdpHost};
use pagestitch::raster::ImageRaster;
use pagestitch::{capture_full_page, CaptureOptions, CapturePipeline, JpegQuality, Viewport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "https://example.com".to_string());
    let output = args.next().unwrap_or_else(|| "full_page.jpg".to_string());

    let config = BrowserConfig {
        viewport: Viewport {
            width: 1280,
            height: 800,
        },
        ..Default::default()
    };
    println!("Launching Chrome at {}x{}", config.viewport.width, config.viewport.height);
    let host = CdpHost::launch(config).await?;

    println!("Loading {}", url);
    let tab = host.open_tab(&url).await?;

    let options = CaptureOptions {
        quality: JpegQuality::new(85)?,
        max_screens: Some(20),
        ..Default::default()
    };

    // The pipeline keeps its state history around for inspection
    let mut pipeline = CapturePipeline::new(&host, &ImageRaster, options.clone());
    let image = pipeline.run(tab).await?;
    println!("States visited: {:?}", pipeline.history());
    println!("Stitched {}x{} ({} bytes)", image.width, image.height, image.jpeg.len());
    std::fs::write(&output, &image.jpeg)?;
    println!("Saved to {}", output);

    // Same capture through the one-shot helper
    let again = capture_full_page(&host, &ImageRaster, tab, &options).await?;
    println!("Second run: {}x{}", again.width, again.height);

    host.close_tab(tab).await?;
    host.close().await?;
    Ok(())
}

//! IMG.LY Background Swap CLI Tool
//!
//! Command-line interface for isolating image subjects and compositing them
//! onto new backgrounds with the imgly-bgswap library.

#[cfg(feature = "cli")]
use imgly_bgswap::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}

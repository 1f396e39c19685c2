//! bg-refine CLI
//!
//! Replaces image backgrounds with a solid color using an external
//! segmentation program, with optional brush-stroke corrections.

#[cfg(feature = "cli")]
use bg_refine::cli;

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

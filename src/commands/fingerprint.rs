/// `margie fingerprint` command implementation
use anyhow::{Context, Result};

use crate::cache::Fingerprint;
use crate::cli::FingerprintArgs;

pub fn run(args: &FingerprintArgs) -> Result<()> {
    let fingerprint = Fingerprint::of_file(&args.file)
        .with_context(|| format!("Failed to fingerprint {}", args.file.display()))?;
    println!("{fingerprint}");
    Ok(())
}

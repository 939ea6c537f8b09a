use std::path::PathBuf;

use anyhow::Result;
use chalice_bundle_core::artifact::LocalAssetStore;
use chalice_bundle_core::contract::ArtifactStore;
use chalice_bundle_core::pipeline::PackagingPipeline;
use clap::{Parser, Subcommand};

use crate::load_config::{load_config, AssetsConfig};
use crate::upload::HttpAssetStore;

/// CLI for chalice-bundle: package a Chalice app into a SAM template referencing an uploaded archive.
#[derive(Parser)]
#[clap(
    name = "chalice-bundle",
    version,
    about = "Package a Chalice app and rewrite its SAM template to reference the uploaded code archive"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Merge the stage config, package the app and rewrite the generated template
    Package {
        /// Path to the YAML run config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Package { config } => {
            let config = load_config(config)?;
            let store: Box<dyn ArtifactStore> = match config.assets {
                AssetsConfig::Local {
                    staging_dir,
                    bucket,
                } => Box::new(LocalAssetStore::new(staging_dir, bucket)),
                AssetsConfig::Http {
                    endpoint,
                    bucket,
                    api_key,
                } => Box::new(HttpAssetStore::new(endpoint, bucket, api_key)),
            };
            let pipeline = PackagingPipeline::new(config.package.into_builder(), store);

            println!("Packaging Chalice app for {}", config.request.stage);
            match pipeline.run(&config.request).await {
                Ok(packaged) => {
                    println!("Packaging complete.");
                    println!("Build directory: {}", packaged.build.dir.display());
                    println!(
                        "Code asset: s3://{}/{}",
                        packaged.artifact.location, packaged.artifact.key
                    );
                    println!("Template: {}", packaged.template_path.display());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Packaging failed ({:?}): {}", e.kind(), e);
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}

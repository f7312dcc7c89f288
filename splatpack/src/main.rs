use clap::Parser;
use splatpack_lib::camera::load_cameras;
use splatpack_lib::format::{ClusterOptions, DEFAULT_CLUSTER_BATCH};
use splatpack_lib::ply::read_ply;
use splatpack_lib::{
    create_asset, create_asset_async, ColorFormat, CompressionSettings, OutputLocation, Quality,
    ShFormat, VectorFormat,
};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "Splat Packer",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Packs 3D Gaussian splat PLY files into quantized GPU-ready buffers"
)]
struct Cli {
    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input PLY file."
    )]
    input: PathBuf,

    #[arg(
        short = 'o',
        long = "output-dir",
        value_name = "DIR",
        required = true,
        help = "Directory the asset files are written to."
    )]
    output_dir: PathBuf,

    #[arg(
        short = 'n',
        long = "name",
        value_name = "NAME",
        help = "Base name of the asset files (defaults to the input file stem)."
    )]
    name: Option<String>,

    #[arg(
        short = 'q',
        long = "quality",
        value_name = "QUALITY",
        default_value = "medium",
        help = "Preset: very-low, low, medium, high or very-high."
    )]
    quality: Quality,

    #[arg(long = "pos-format", value_name = "FORMAT", help = "Override the position format.")]
    pos_format: Option<VectorFormat>,

    #[arg(long = "scale-format", value_name = "FORMAT", help = "Override the scale format.")]
    scale_format: Option<VectorFormat>,

    #[arg(long = "color-format", value_name = "FORMAT", help = "Override the color format.")]
    color_format: Option<ColorFormat>,

    #[arg(long = "sh-format", value_name = "FORMAT", help = "Override the SH format.")]
    sh_format: Option<ShFormat>,

    #[arg(
        short = 'c',
        long = "import-cameras",
        default_value = "false",
        help = "Import cameras.json from the input directory."
    )]
    import_cameras: bool,

    #[arg(
        long = "cluster-batch",
        value_name = "SIZE",
        help = "Mini-batch size for SH clustering."
    )]
    cluster_batch: Option<usize>,

    #[arg(
        long = "cluster-passes",
        value_name = "PASSES",
        help = "Samples drawn for SH clustering, as a fraction of the splat count."
    )]
    cluster_passes: Option<f32>,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Write the asset files asynchronously."
    )]
    async_mode: bool,
}

impl Cli {
    fn settings(&self) -> CompressionSettings {
        let mut settings = CompressionSettings::from_quality(self.quality);
        if let Some(f) = self.pos_format {
            settings.pos_format = f;
        }
        if let Some(f) = self.scale_format {
            settings.scale_format = f;
        }
        if let Some(f) = self.color_format {
            settings.color_format = f;
        }
        if let Some(f) = self.sh_format {
            settings.sh_format = f;
        }
        settings.import_cameras = self.import_cameras;
        if self.cluster_batch.is_some() || self.cluster_passes.is_some() {
            settings.clustering = Some(ClusterOptions {
                batch_size: self.cluster_batch.unwrap_or(DEFAULT_CLUSTER_BATCH),
                passes: self.cluster_passes,
                ..ClusterOptions::default()
            });
        }
        settings
    }

    fn base_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "asset".to_string())
        })
    }
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();

    let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
        error!("Error reading input file {}: {}", cli.input.display(), e);
        process::exit(1);
    });

    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    info!(
        "Mode: {} | Input: {} | Output: {} | Formats: pos {} scale {} color {} sh {}",
        mode,
        cli.input.display(),
        cli.output_dir.display(),
        settings.pos_format,
        settings.scale_format,
        settings.color_format,
        settings.sh_format
    );

    let start = Instant::now();
    let splats = read_ply(&raw_data)?;
    info!("Read {} splats in {} ms", splats.len(), start.elapsed().as_millis());

    let cameras = if cli.import_cameras {
        let dir = cli.input.parent().unwrap_or(Path::new("."));
        load_cameras(&dir.join("cameras.json"))?
    } else {
        None
    };

    let location = OutputLocation::new(&cli.output_dir, cli.base_name());
    let asset = if cli.async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(create_asset_async(splats, &settings, cameras, &location))?
    } else {
        create_asset(splats, &settings, cameras, &location)?
    };

    info!(
        "Packed {} splats in {} ms, hash {}",
        asset.splat_count,
        start.elapsed().as_millis(),
        asset.data_hash
    );
    println!("Successfully wrote '{}'.", location.metadata_path().display());

    Ok(())
}

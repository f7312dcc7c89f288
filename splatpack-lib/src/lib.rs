pub mod asset;
pub mod camera;
pub mod chunk;
pub mod cluster;
pub mod common;
pub mod encode;
pub mod error;
pub mod format;
pub mod ply;
pub mod spatial;
pub mod structures;

use std::time::Instant;

use tracing::{debug, info, warn};

pub use asset::{write_asset, OutputLocation, PackedAsset};
pub use error::PackError;
pub use format::{
    ClusterOptions, ColorFormat, CompressionSettings, Quality, ShFormat, VectorFormat,
};
pub use structures::{Asset, Camera, InputSplat};

use chunk::quantize_chunks;
use cluster::{cluster_sh, KMeans};
use encode::{
    encode_chunks, encode_colors, encode_other, encode_positions, encode_sh, encode_sh_table,
};
use spatial::{calculate_bounds, reorder_morton};

fn check_splats(splats: &[InputSplat]) -> Result<(), PackError> {
    if splats.is_empty() {
        return Err(PackError::EmptyInput);
    }
    for (i, s) in splats.iter().enumerate() {
        if let Some(field) = non_finite_field(s) {
            return Err(PackError::InvalidSplat(format!(
                "splat {} has a non-finite {}",
                i, field
            )));
        }
    }
    Ok(())
}

fn non_finite_field(s: &InputSplat) -> Option<&'static str> {
    let finite = |v: &[f32]| v.iter().all(|x| x.is_finite());
    if !finite(&s.pos) {
        Some("position")
    } else if !finite(&s.rot) {
        Some("rotation")
    } else if !finite(&s.scale) {
        Some("scale")
    } else if !finite(&s.dc0) || !s.opacity.is_finite() {
        Some("color")
    } else if !finite(s.sh.as_flattened()) {
        Some("SH coefficient")
    } else {
        None
    }
}

/// Runs the whole pipeline in memory.
///
/// `progress` receives the clustering progress in `[0, 1]` and is not called
/// when no cluster tier is selected.
pub fn pack_splats(
    splats: Vec<InputSplat>,
    settings: &CompressionSettings,
    cameras: Option<Vec<Camera>>,
    progress: &mut dyn FnMut(f32),
) -> Result<PackedAsset, PackError> {
    settings.validate()?;
    check_splats(&splats)?;
    let n = splats.len();
    let splat_count = u32::try_from(n)
        .map_err(|_| PackError::InvalidSplat(format!("too many splats: {}", n)))?;

    let start = Instant::now();
    let bounds = calculate_bounds(&splats);
    info!(count = n, min = ?bounds.min, max = ?bounds.max, "bounds");

    let mut splats = reorder_morton(splats, &bounds);
    debug!(elapsed_ms = start.elapsed().as_millis() as u64, "morton reorder done");

    // centroids live in the global SH space, so clustering precedes chunk normalization
    let mut sh_format = settings.sh_format;
    let clusters = match settings.cluster_plan() {
        Some((k, opts, passes)) if k < n => {
            let params = KMeans {
                k,
                batch_size: opts.batch_size,
                passes,
                seed: opts.seed,
            };
            let started = Instant::now();
            let clusters = cluster_sh(&splats, &params, progress)?;
            info!(
                k,
                iterations = params.iterations(n),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "sh clustering"
            );
            Some(clusters)
        }
        Some((k, _, _)) => {
            warn!(k, count = n, "fewer splats than clusters, storing SH per splat");
            sh_format = ShFormat::Float16;
            None
        }
        None => None,
    };

    let chunks = if settings.uses_chunks() {
        let chunks = quantize_chunks(&mut splats);
        debug!(chunks = chunks.len(), "chunk envelopes");
        Some(encode_chunks(&chunks))
    } else {
        None
    };

    let positions = encode_positions(&splats, settings.pos_format);
    let other = encode_other(
        &splats,
        settings.scale_format,
        clusters.as_ref().map(|c| c.indices.as_slice()),
    );
    let colors = encode_colors(&splats);
    let (sh, sh_count) = match &clusters {
        Some(c) => (encode_sh_table(&c.table), c.table.len()),
        None => (encode_sh(&splats, sh_format), n),
    };

    let packed = PackedAsset {
        splat_count,
        pos_format: settings.pos_format,
        scale_format: settings.scale_format,
        color_format: settings.color_format,
        sh_format,
        sh_count: sh_count as u32,
        bounds,
        cameras: cameras.filter(|_| settings.import_cameras),
        chunks,
        positions,
        other,
        colors,
        sh,
        data_hash: 0,
    }
    .seal();
    info!(
        hash = %packed.hash_hex(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "packed"
    );
    Ok(packed)
}

/// Packs `splats` and writes the asset files to `location`.
pub fn create_asset(
    splats: Vec<InputSplat>,
    settings: &CompressionSettings,
    cameras: Option<Vec<Camera>>,
    location: &OutputLocation,
) -> Result<Asset, PackError> {
    let packed = pack_splats(splats, settings, cameras, &mut |p| {
        debug!(progress = p, "clustering")
    })?;
    let asset = write_asset(&packed, location)?;
    info!(path = %location.metadata_path().display(), "asset written");
    Ok(asset)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    pub use asset::write_asset_async;

    pub async fn create_asset_async(
        splats: Vec<InputSplat>,
        settings: &CompressionSettings,
        cameras: Option<Vec<Camera>>,
        location: &OutputLocation,
    ) -> Result<Asset, PackError> {
        let packed = pack_splats(splats, settings, cameras, &mut |p| {
            debug!(progress = p, "clustering")
        })?;
        let asset = write_asset_async(&packed, location).await?;
        info!(path = %location.metadata_path().display(), "asset written");
        Ok(asset)
    }
}
}

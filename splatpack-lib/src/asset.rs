//! Content hashing and persistence of a packed splat asset.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use xxhash_rust::xxh3::Xxh3;

use crate::encode::EncodedBuffer;
use crate::error::PackError;
use crate::format::{ColorFormat, ShFormat, VectorFormat};
use crate::spatial::Bounds;
use crate::structures::{Asset, Camera, FORMAT_VERSION};

/// Where an asset's files go: `dir/name_*.bytes` plus `dir/name.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocation {
    pub dir: PathBuf,
    pub name: String,
}

impl OutputLocation {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    pub fn buffer_file(&self, suffix: &str) -> String {
        format!("{}_{}.bytes", self.name, suffix)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }
}

/// Everything the pipeline produced, still in memory.
#[derive(Debug, Clone)]
pub struct PackedAsset {
    pub splat_count: u32,
    pub pos_format: VectorFormat,
    pub scale_format: VectorFormat,
    pub color_format: ColorFormat,
    /// The SH layout actually written; a bypassed cluster tier reads `Float16`.
    pub sh_format: ShFormat,
    pub sh_count: u32,
    pub bounds: Bounds,
    pub cameras: Option<Vec<Camera>>,
    pub chunks: Option<EncodedBuffer>,
    pub positions: EncodedBuffer,
    pub other: EncodedBuffer,
    pub colors: EncodedBuffer,
    pub sh: EncodedBuffer,
    pub data_hash: u128,
}

/// Order-sensitive XXH3-128 over the version tag and every buffer.
pub fn content_hash<'a>(buffers: impl IntoIterator<Item = &'a EncodedBuffer>) -> u128 {
    let mut hasher = Xxh3::new();
    hasher.update(&FORMAT_VERSION.to_le_bytes());
    for buf in buffers {
        hasher.update(buf.padded());
    }
    hasher.digest128()
}

impl PackedAsset {
    /// Buffers in persistence order, tagged with their file suffix.
    pub fn buffers(&self) -> Vec<(&'static str, &EncodedBuffer)> {
        let mut out = Vec::with_capacity(5);
        if let Some(chunks) = &self.chunks {
            out.push(("chk", chunks));
        }
        out.push(("pos", &self.positions));
        out.push(("oth", &self.other));
        out.push(("col", &self.colors));
        out.push(("shs", &self.sh));
        out
    }

    pub(crate) fn seal(mut self) -> Self {
        self.data_hash = content_hash(self.buffers().into_iter().map(|(_, b)| b));
        self
    }

    pub fn hash_hex(&self) -> String {
        format!("{:032x}", self.data_hash)
    }

    /// The metadata record describing this asset at `location`.
    pub fn record(&self, location: &OutputLocation) -> Asset {
        Asset {
            format_version: FORMAT_VERSION,
            splat_count: self.splat_count,
            pos_format: self.pos_format,
            scale_format: self.scale_format,
            color_format: self.color_format,
            sh_format: self.sh_format,
            sh_count: self.sh_count,
            bounds_min: self.bounds.min,
            bounds_max: self.bounds.max,
            cameras: self.cameras.clone(),
            data_hash: self.hash_hex(),
            chunk_file: self.chunks.as_ref().map(|_| location.buffer_file("chk")),
            pos_file: location.buffer_file("pos"),
            other_file: location.buffer_file("oth"),
            color_file: location.buffer_file("col"),
            sh_file: location.buffer_file("shs"),
        }
    }
}

fn metadata_json(asset: &Asset) -> Result<String, PackError> {
    serde_json::to_string_pretty(asset).map_err(|e| PackError::Metadata(e.to_string()))
}

/// Writes every buffer and then the metadata record.
///
/// Buffers written before a failure are left on disk.
pub fn write_asset(packed: &PackedAsset, location: &OutputLocation) -> Result<Asset, PackError> {
    fs::create_dir_all(&location.dir).map_err(|e| PackError::io(&location.dir, e))?;

    for (suffix, buf) in packed.buffers() {
        let path = location.dir.join(location.buffer_file(suffix));
        fs::write(&path, buf.padded()).map_err(|e| PackError::io(&path, e))?;
        debug!(file = %path.display(), bytes = buf.padded().len(), "wrote buffer");
    }

    let asset = packed.record(location);
    let path = location.metadata_path();
    fs::write(&path, metadata_json(&asset)?).map_err(|e| PackError::io(&path, e))?;
    Ok(asset)
}

pub fn read_asset(path: &Path) -> Result<Asset, PackError> {
    let json = fs::read_to_string(path).map_err(|e| PackError::io(path, e))?;
    serde_json::from_str(&json).map_err(|e| PackError::Metadata(e.to_string()))
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    /// Async counterpart of [`write_asset`] on top of `tokio::fs`.
    pub async fn write_asset_async(
        packed: &PackedAsset,
        location: &OutputLocation,
    ) -> Result<Asset, PackError> {
        tokio::fs::create_dir_all(&location.dir)
            .await
            .map_err(|e| PackError::io(&location.dir, e))?;

        for (suffix, buf) in packed.buffers() {
            let path = location.dir.join(location.buffer_file(suffix));
            tokio::fs::write(&path, buf.padded())
                .await
                .map_err(|e| PackError::io(&path, e))?;
            debug!(file = %path.display(), bytes = buf.padded().len(), "wrote buffer");
        }

        let asset = packed.record(location);
        let path = location.metadata_path();
        tokio::fs::write(&path, metadata_json(&asset)?)
            .await
            .map_err(|e| PackError::io(&path, e))?;
        Ok(asset)
    }
}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CompressionSettings, Quality};
    use crate::structures::InputSplat;

    fn sample() -> PackedAsset {
        let splats = (0..20)
            .map(|i| InputSplat::at([i as f32, 0.5, -(i as f32)]))
            .collect();
        crate::pack_splats(splats, &CompressionSettings::default(), None, &mut |_| {})
            .expect("pack_splats failed")
    }

    #[test]
    fn file_names_follow_the_base_name() {
        let loc = OutputLocation::new("/tmp/assets", "garden");
        assert_eq!(loc.buffer_file("pos"), "garden_pos.bytes");
        assert_eq!(loc.metadata_path(), PathBuf::from("/tmp/assets/garden.json"));
    }

    #[test]
    fn hash_depends_on_buffer_order() {
        let packed = sample();
        let forward = content_hash([&packed.positions, &packed.other]);
        let backward = content_hash([&packed.other, &packed.positions]);
        assert_ne!(forward, backward);
        assert_eq!(
            packed.data_hash,
            content_hash(packed.buffers().into_iter().map(|(_, b)| b))
        );
    }

    #[test]
    fn write_then_read_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loc = OutputLocation::new(dir.path(), "scene");
        let packed = sample();
        let asset = write_asset(&packed, &loc).expect("write_asset failed");

        assert_eq!(asset.format_version, FORMAT_VERSION);
        assert_eq!(asset.data_hash, packed.hash_hex());
        let pos = fs::read(dir.path().join(&asset.pos_file)).expect("pos file");
        assert_eq!(pos, packed.positions.padded());
        assert_eq!(read_asset(&loc.metadata_path()).expect("read_asset"), asset);
    }

    #[test]
    fn full_precision_asset_has_no_chunk_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loc = OutputLocation::new(dir.path(), "hq");
        let splats = vec![InputSplat::at([1.0, 2.0, 3.0])];
        let settings = CompressionSettings::from_quality(Quality::VeryHigh);
        let packed = crate::pack_splats(splats, &settings, None, &mut |_| {})
            .expect("pack_splats failed");
        let asset = write_asset(&packed, &loc).expect("write_asset failed");

        assert!(asset.chunk_file.is_none());
        assert!(!dir.path().join("hq_chk.bytes").exists());
        let json = fs::read_to_string(loc.metadata_path()).expect("json");
        assert!(!json.contains("chunk_file"));
        assert!(json.contains("\"sh_format\": \"float32\""));
    }

    #[test]
    fn unwritable_directory_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").expect("write blocker");
        let loc = OutputLocation::new(&blocker, "scene");
        match write_asset(&sample(), &loc) {
            Err(PackError::Io { path, .. }) => assert_eq!(path, blocker),
            other => panic!("expected an I/O error, got {:?}", other.map(|a| a.pos_file)),
        }
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_writer_matches_sync_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let packed = sample();
        let sync_loc = OutputLocation::new(dir.path().join("sync"), "a");
        let async_loc = OutputLocation::new(dir.path().join("async"), "a");

        let a = write_asset(&packed, &sync_loc).expect("write_asset failed");
        let b = write_asset_async(&packed, &async_loc)
            .await
            .expect("write_asset_async failed");
        assert_eq!(a, b);
        for (suffix, _) in packed.buffers() {
            let file = sync_loc.buffer_file(suffix);
            assert_eq!(
                fs::read(sync_loc.dir.join(&file)).expect("sync file"),
                fs::read(async_loc.dir.join(&file)).expect("async file")
            );
        }
    }
}

//! Camera import from the `cameras.json` written by 3DGS training.

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

use crate::error::PackError;
use crate::structures::Camera;

#[derive(Debug, Deserialize)]
struct CameraEntry {
    position: [f32; 3],
    rotation: [[f32; 3]; 3],
    height: u32,
    fy: f32,
}

impl From<CameraEntry> for Camera {
    fn from(e: CameraEntry) -> Self {
        let column = |c: usize| [e.rotation[0][c], e.rotation[1][c], e.rotation[2][c]];
        let fov = 2.0 * (e.height as f32 / (2.0 * e.fy)).atan();
        Camera {
            pos: e.position,
            axis_x: column(0),
            axis_y: column(1),
            axis_z: column(2),
            fov: fov.to_degrees(),
        }
    }
}

pub fn parse_cameras(json: &str) -> Result<Vec<Camera>, PackError> {
    let entries: Vec<CameraEntry> =
        serde_json::from_str(json).map_err(|e| PackError::Camera(e.to_string()))?;
    Ok(entries.into_iter().map(Camera::from).collect())
}

/// Loads cameras from `path`; `Ok(None)` when the file does not exist.
pub fn load_cameras(path: &Path) -> Result<Option<Vec<Camera>>, PackError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PackError::io(path, e)),
    };
    parse_cameras(&json).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"id": 0, "img_name": "00001", "width": 800, "height": 600,
         "position": [1.0, 2.0, 3.0],
         "rotation": [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]],
         "fx": 300.0, "fy": 300.0}
    ]"#;

    #[test]
    fn axes_are_rotation_columns() {
        let cams = parse_cameras(SAMPLE).expect("parse failed");
        assert_eq!(cams.len(), 1);
        let c = cams[0];
        assert_eq!(c.pos, [1.0, 2.0, 3.0]);
        assert_eq!(c.axis_x, [1.0, 0.0, 0.0]);
        assert_eq!(c.axis_y, [0.0, 0.0, 1.0]);
        assert_eq!(c.axis_z, [0.0, -1.0, 0.0]);
        // 2 * atan(600 / 600) = 90 degrees
        assert!((c.fov - 90.0).abs() < 1e-3);
    }

    #[test]
    fn missing_file_means_no_cameras() {
        let dir = tempfile::tempdir().expect("tempdir");
        let found = load_cameras(&dir.path().join("cameras.json")).expect("load failed");
        assert!(found.is_none());
    }

    #[test]
    fn file_is_read_when_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cameras.json");
        fs::write(&path, SAMPLE).expect("write failed");
        let found = load_cameras(&path).expect("load failed");
        assert_eq!(found.map(|c| c.len()), Some(1));
    }

    #[test]
    fn malformed_json_is_a_camera_error() {
        assert!(matches!(
            parse_cameras("[{\"position\": 1}]"),
            Err(PackError::Camera(_))
        ));
    }
}

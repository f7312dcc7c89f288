//! Reader for binary little-endian 3DGS `.ply` files.

use foldhash::HashMap;
use foldhash::HashMapExt;

use crate::common::{sh0_to_color, sigmoid};
use crate::error::PackError;
use crate::structures::{InputSplat, SH_TERMS};

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    let line = match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            &buffer[start..start + pos]
        }
        None => {
            *offset = buffer.len();
            &buffer[start..]
        }
    };
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

fn scalar_size(ty: &[u8]) -> Option<usize> {
    match ty {
        b"char" | b"uchar" | b"int8" | b"uint8" => Some(1),
        b"short" | b"ushort" | b"int16" | b"uint16" => Some(2),
        b"int" | b"uint" | b"int32" | b"uint32" | b"float" | b"float32" => Some(4),
        b"double" | b"float64" => Some(8),
        _ => None,
    }
}

struct Property<'a> {
    name: &'a str,
    offset: usize,
    is_float: bool,
}

#[inline(always)]
fn idx_of(hm: &HashMap<&str, usize>, name: &str) -> Result<usize, PackError> {
    hm.get(name)
        .cloned()
        .ok_or_else(|| PackError::ParsePly(format!("Missing required field: {}", name)))
}

#[inline(always)]
fn f32_at(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Parses the vertex element of a 3DGS `.ply` file.
///
/// Scales are exponentiated, opacities pass through a sigmoid and the band-0
/// coefficients become base colors, so the result is ready for packing.
/// Missing higher SH bands are left at zero.
#[inline(never)]
pub fn read_ply(raw_data: &[u8]) -> Result<Vec<InputSplat>, PackError> {
    let mut offset = 0;

    let line1 = next_line(raw_data, &mut offset)
        .ok_or_else(|| PackError::ParsePly("No 'ply' line".to_string()))?;
    if line1 != b"ply" {
        return Err(PackError::ParsePly(
            "Not a .ply file (missing 'ply' header)".to_string(),
        ));
    }

    let mut num_points: Option<usize> = None;
    let mut in_vertex = false;
    let mut properties = Vec::new();
    let mut stride = 0;
    loop {
        let line = next_line(raw_data, &mut offset).ok_or_else(|| {
            PackError::ParsePly("No 'end_header' found before EOF".to_string())
        })?;

        if line.starts_with(b"end_header") {
            break;
        }
        if line.starts_with(b"comment") || line.starts_with(b"obj_info") {
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"format ") {
            if rest != b"binary_little_endian 1.0" {
                return Err(PackError::ParsePly(
                    "Unsupported .ply format (only binary_little_endian 1.0 is supported)"
                        .to_string(),
                ));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"element ") {
            let mut parts = rest.split(|&b| b == b' ');
            let name = parts.next().unwrap_or_default();
            if name != b"vertex" {
                if num_points.is_some() {
                    // trailing elements after the vertices are ignored
                    in_vertex = false;
                    continue;
                }
                return Err(PackError::ParsePly(format!(
                    "Unsupported element before vertices: {}",
                    String::from_utf8_lossy(name)
                )));
            }
            let count = parts.next().unwrap_or_default();
            let count = std::str::from_utf8(count)
                .map_err(|e| PackError::ParsePly(format!("UTF-8 error: {}", e)))?
                .trim()
                .parse()
                .map_err(|e| PackError::ParsePly(format!("Parse error: {}", e)))?;
            num_points = Some(count);
            in_vertex = true;
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"property ") {
            if !in_vertex {
                continue;
            }
            let mut parts = rest.split(|&b| b == b' ');
            let ty = parts.next().unwrap_or_default();
            let size = scalar_size(ty).ok_or_else(|| {
                PackError::ParsePly(format!(
                    "Unsupported property line: {}",
                    String::from_utf8_lossy(line)
                ))
            })?;
            let name = std::str::from_utf8(parts.next().unwrap_or_default())
                .map_err(|e| PackError::ParsePly(format!("UTF-8 error in field name: {}", e)))?;
            properties.push(Property {
                name,
                offset: stride,
                is_float: size == 4 && (ty == b"float" || ty == b"float32"),
            });
            stride += size;
            continue;
        }
        return Err(PackError::ParsePly(format!(
            "Unexpected header line: {}",
            String::from_utf8_lossy(line)
        )));
    }

    let num_points = num_points
        .ok_or_else(|| PackError::ParsePly("Missing 'element vertex' definition".to_string()))?;
    if num_points == 0 {
        return Ok(Vec::new());
    }

    let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(properties.len());
    for p in properties.iter().filter(|p| p.is_float) {
        field_map.insert(p.name, p.offset);
    }

    let ix = idx_of(&field_map, "x")?;
    let iy = idx_of(&field_map, "y")?;
    let iz = idx_of(&field_map, "z")?;
    let is0 = idx_of(&field_map, "scale_0")?;
    let is1 = idx_of(&field_map, "scale_1")?;
    let is2 = idx_of(&field_map, "scale_2")?;
    let ir0 = idx_of(&field_map, "rot_0")?;
    let ir1 = idx_of(&field_map, "rot_1")?;
    let ir2 = idx_of(&field_map, "rot_2")?;
    let ir3 = idx_of(&field_map, "rot_3")?;
    let iop = idx_of(&field_map, "opacity")?;
    let ic0 = idx_of(&field_map, "f_dc_0")?;
    let ic1 = idx_of(&field_map, "f_dc_1")?;
    let ic2 = idx_of(&field_map, "f_dc_2")?;

    // Optional spherical harmonics: f_rest_0 to f_rest_44, stored channel-planar
    let mut sh_idx = Vec::new();
    for i in 0..SH_TERMS * 3 {
        let nm = format!("f_rest_{}", i);
        if let Some(&found) = field_map.get(nm.as_str()) {
            sh_idx.push(found);
        } else {
            break;
        }
    }
    if sh_idx.len() % 3 != 0 {
        return Err(PackError::ParsePly(
            "Incomplete spherical harmonics fields".to_string(),
        ));
    }
    let sh_dim = sh_idx.len() / 3;

    let expected_bytes = num_points
        .checked_mul(stride)
        .ok_or_else(|| PackError::ParsePly("Overflow in byte calculation".to_string()))?;
    if raw_data.len() < offset + expected_bytes {
        return Err(PackError::ParsePly(format!(
            "Binary data is too short, need {} bytes, have {}",
            expected_bytes,
            raw_data.len() - offset
        )));
    }
    let data = &raw_data[offset..offset + expected_bytes];

    let splats = data
        .chunks_exact(stride)
        .map(|v| {
            let mut sh = [[0.0; 3]; SH_TERMS];
            for (t, term) in sh.iter_mut().enumerate().take(sh_dim) {
                for (c, value) in term.iter_mut().enumerate() {
                    *value = f32_at(v, sh_idx[c * sh_dim + t]);
                }
            }
            InputSplat {
                pos: [f32_at(v, ix), f32_at(v, iy), f32_at(v, iz)],
                rot: [f32_at(v, ir0), f32_at(v, ir1), f32_at(v, ir2), f32_at(v, ir3)],
                scale: [f32_at(v, is0), f32_at(v, is1), f32_at(v, is2)].map(f32::exp),
                dc0: [f32_at(v, ic0), f32_at(v, ic1), f32_at(v, ic2)].map(sh0_to_color),
                opacity: sigmoid(f32_at(v, iop)),
                sh,
            }
        })
        .collect();

    Ok(splats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ply_parses_to_nothing() {
        // minimal .ply, 0 vertices, no trailing newline
        let data =
            b"ply\nformat binary_little_endian 1.0\nelement vertex 0\nproperty float x\nend_header";
        let splats = read_ply(data).expect("empty .ply should parse");
        assert!(splats.is_empty());
    }

    fn create_test_ply(with_rest: bool) -> Vec<u8> {
        let mut header = String::from(
            "ply\nformat binary_little_endian 1.0\ncomment written by a test\nelement vertex 1\n\
             property float x\nproperty float y\nproperty float z\n\
             property float nx\nproperty float ny\nproperty float nz\n\
             property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n",
        );
        if with_rest {
            for i in 0..9 {
                header.push_str(&format!("property float f_rest_{}\n", i));
            }
        }
        header.push_str(
            "property float opacity\n\
             property float scale_0\nproperty float scale_1\nproperty float scale_2\n\
             property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n\
             property uchar flags\n\
             end_header\n",
        );

        let mut floats = vec![
            // x, y, z
            0.0f32, 0.1, 0.2,
            // nx, ny, nz
            0.0, 0.0, 1.0,
            // f_dc_0..2
            0.0, 1.0, -1.0,
        ];
        if with_rest {
            // 3 terms per channel, channel-planar
            floats.extend_from_slice(&[1.0, 2.0, 3.0, 10.0, 20.0, 30.0, 100.0, 200.0, 300.0]);
        }
        floats.extend_from_slice(&[
            // opacity (logit)
            0.0,
            // log scales
            0.0, 1.0, -1.0,
            // rot (w, x, y, z)
            1.0, 0.0, 0.0, 0.0,
        ]);

        let mut raw = header.into_bytes();
        for f in floats {
            raw.extend_from_slice(&f.to_le_bytes());
        }
        raw.push(7);
        raw
    }

    #[test]
    fn vertex_fields_are_activated() {
        let splats = read_ply(&create_test_ply(false)).expect("read_ply failed");
        assert_eq!(splats.len(), 1);
        let s = &splats[0];
        assert_eq!(s.pos, [0.0, 0.1, 0.2]);
        assert_eq!(s.rot, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(s.opacity, 0.5);
        assert!((s.scale[1] - std::f32::consts::E).abs() < 1e-6);
        assert_eq!(s.dc0[0], 0.5);
        assert!((s.dc0[1] - (0.5 + crate::common::SH_C0)).abs() < 1e-6);
        assert!(s.sh.iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn rest_coefficients_become_rgb_terms() {
        let splats = read_ply(&create_test_ply(true)).expect("read_ply failed");
        let s = &splats[0];
        assert_eq!(s.sh[0], [1.0, 10.0, 100.0]);
        assert_eq!(s.sh[1], [2.0, 20.0, 200.0]);
        assert_eq!(s.sh[2], [3.0, 30.0, 300.0]);
        assert_eq!(s.sh[3], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn missing_field_is_reported() {
        let data = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty float x\nend_header\n\0\0\0\0";
        match read_ply(data) {
            Err(PackError::ParsePly(msg)) => assert!(msg.contains("y")),
            other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut raw = create_test_ply(false);
        raw.truncate(raw.len() - 5);
        assert!(matches!(read_ply(&raw), Err(PackError::ParsePly(_))));
    }

    #[test]
    fn ascii_format_is_rejected() {
        let data = b"ply\nformat ascii 1.0\nelement vertex 0\nend_header\n";
        assert!(read_ply(data).is_err());
    }
}

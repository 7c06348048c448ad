//! Precompiled SPIR-V loading.

use crate::error::{GpuError, Result};
use std::io::Cursor;
use std::path::Path;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Vertex shader file name inside the shader directory.
pub const MESH_VERTEX_SHADER: &str = "mesh.vert.spv";

/// Fragment shader file name inside the shader directory.
pub const MESH_FRAGMENT_SHADER: &str = "mesh.frag.spv";

/// Decode SPIR-V bytes into words, checking alignment and the magic number.
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>> {
    let fail = |reason: String| GpuError::ShaderLoad {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.is_empty() {
        return Err(fail("file is empty".to_string()));
    }
    if bytes.len() % 4 != 0 {
        return Err(fail(format!(
            "size {} is not a multiple of 4",
            bytes.len()
        )));
    }

    // read_spv also accepts byte-swapped modules
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| fail(e.to_string()))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(fail(format!("bad magic number {other:#010x}"))),
        None => Err(fail("file is empty".to_string())),
    }
}

/// Read a SPIR-V module from disk.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| GpuError::ShaderLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let words = parse_spirv(path, &bytes)?;
    tracing::debug!(path = %path.display(), words = words.len(), "Loaded shader");
    Ok(words)
}

/// Vertex and fragment SPIR-V for the mesh pipeline.
pub struct MeshShaders {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl MeshShaders {
    /// Load `mesh.vert.spv` and `mesh.frag.spv` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            vertex: load_spirv(&dir.join(MESH_VERTEX_SHADER))?,
            fragment: load_spirv(&dir.join(MESH_FRAGMENT_SHADER))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn module(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cinder-shader-{}-{name}", std::process::id()))
    }

    #[test]
    fn accepts_valid_module() {
        let bytes = module(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(Path::new("ok.spv"), &bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_misaligned_size() {
        let mut bytes = module(&[SPIRV_MAGIC, 0]);
        bytes.push(0);
        let err = parse_spirv(Path::new("odd.spv"), &bytes).unwrap_err();
        assert!(matches!(err, GpuError::ShaderLoad { .. }));
        assert!(err.to_string().contains("odd.spv"));
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = module(&[0xDEAD_BEEF, 0]);
        assert!(matches!(
            parse_spirv(Path::new("bad.spv"), &bytes),
            Err(GpuError::ShaderLoad { .. })
        ));
    }

    #[test]
    fn rejects_empty_file() {
        assert!(parse_spirv(Path::new("empty.spv"), &[]).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = temp_path("missing.spv");
        let err = load_spirv(&path).unwrap_err();
        match err {
            GpuError::ShaderLoad { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn loads_module_from_disk() {
        let path = temp_path("roundtrip.spv");
        std::fs::write(&path, module(&[SPIRV_MAGIC, 0x0001_0300, 7, 9, 0])).unwrap();

        let words = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0300, 7, 9, 0]);
    }
}

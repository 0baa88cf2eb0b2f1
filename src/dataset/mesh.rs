use anyhow::{ensure, Context, Result};
use nalgebra::Vector3;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// オブジェクトメッシュ(点群)のローダ兼キャッシュ
///
/// `<root>/<dir_name>/points.xyz` を読み、クラスIDをキーにメモリへ保持する。
/// 同じIDの2回目以降はディスクに触らない。
#[derive(Debug)]
pub struct MeshStore {
    root: PathBuf,
    cache: HashMap<u32, Vec<Vector3<f32>>>,
}

impl MeshStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), cache: HashMap::new() }
    }

    /// クラスIDのメッシュ点群を返す。未ロードならdir_nameから読み込む
    pub fn points(&mut self, class_id: u32, dir_name: &str) -> Result<&[Vector3<f32>]> {
        match self.cache.entry(class_id) {
            Entry::Occupied(e) => Ok(e.into_mut().as_slice()),
            Entry::Vacant(e) => {
                let path = self.root.join(dir_name).join("points.xyz");
                let points = load_xyz(&path)?;
                Ok(e.insert(points).as_slice())
            }
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

/// 空白区切りのxyzテキストを読む
///
/// 4列目以降(法線や色)は無視する。不正値は行番号つきでエラーにする。
fn load_xyz(path: &Path) -> Result<Vec<Vector3<f32>>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read mesh {}", path.display()))?;
    let mut points = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        ensure!(
            fields.len() >= 3,
            "{}:{}: expected 3 coordinates, got {}",
            path.display(),
            lineno + 1,
            fields.len()
        );
        let mut xyz = [0.0f32; 3];
        for (axis, field) in fields.iter().take(3).enumerate() {
            xyz[axis] = field.parse().with_context(|| {
                format!("{}:{}: bad coordinate '{}'", path.display(), lineno + 1, field)
            })?;
        }
        points.push(Vector3::new(xyz[0], xyz[1], xyz[2]));
    }
    ensure!(!points.is_empty(), "mesh {} has no points", path.display());
    Ok(points)
}

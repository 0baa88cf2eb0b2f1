pub mod classes;
pub mod mesh;
pub mod prefetch;
pub mod sample;

pub use classes::ClassTable;
pub use mesh::MeshStore;
pub use prefetch::PrefetchSource;
pub use sample::{read_record, write_record, FrameRecord, FrameSample};

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// 評価ループへフレームを供給する側の共通インタフェース
///
/// next_frameは終端でOk(None)を返す。lenは総数が分かるソースだけ実装する。
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<FrameSample>>;

    fn len(&self) -> Option<usize> {
        None
    }
}

/// ディレクトリ内の *.frame ファイルをパス昇順で流すソース
pub struct DirFrameSource {
    paths: Vec<PathBuf>,
    pos: usize,
}

impl DirFrameSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "frame") {
                paths.push(path);
            }
        }
        // 再生順はファイル名順で固定する
        paths.sort();
        Ok(Self { paths, pos: 0 })
    }
}

impl FrameSource for DirFrameSource {
    fn next_frame(&mut self) -> Result<Option<FrameSample>> {
        let path = match self.paths.get(self.pos) {
            Some(path) => path.clone(),
            None => return Ok(None),
        };
        self.pos += 1;
        let record = read_record(&path)?;
        record.into_sample().map(Some)
    }

    fn len(&self) -> Option<usize> {
        Some(self.paths.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use opencv::core::{Mat, Scalar, CV_8UC3};

    fn record_with_label(label: i32) -> FrameRecord {
        let image =
            Mat::new_rows_cols_with_default(4, 4, CV_8UC3, Scalar::new(10.0, 20.0, 30.0, 0.0))
                .unwrap();
        let sample = FrameSample {
            image,
            cloud: Array2::zeros((1, 3)),
            cloud_features: Array2::zeros((1, 4)),
            choose: Array1::zeros(1),
            labels: Array1::from_vec(vec![label]),
        };
        FrameRecord::from_sample(&sample).unwrap()
    }

    #[test]
    fn test_frames_come_back_in_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        // わざと逆順で書く
        write_record(&tmp.path().join("000002.frame"), &record_with_label(2)).unwrap();
        write_record(&tmp.path().join("000000.frame"), &record_with_label(0)).unwrap();
        write_record(&tmp.path().join("000001.frame"), &record_with_label(1)).unwrap();
        // 拡張子違いは無視される
        fs::write(tmp.path().join("notes.txt"), "ignore me").unwrap();

        let mut source = DirFrameSource::open(tmp.path()).unwrap();
        assert_eq!(source.len(), Some(3));

        let mut seen = Vec::new();
        while let Some(sample) = source.next_frame().unwrap() {
            seen.push(sample.labels[0]);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut source = DirFrameSource::open(tmp.path()).unwrap();
        assert_eq!(source.len(), Some(0));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_directory_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(DirFrameSource::open(&tmp.path().join("nope")).is_err());
    }

    #[test]
    fn test_corrupt_record_errors() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("000000.frame"), b"\x00\x01garbage").unwrap();

        let mut source = DirFrameSource::open(tmp.path()).unwrap();
        assert!(source.next_frame().is_err());
    }
}

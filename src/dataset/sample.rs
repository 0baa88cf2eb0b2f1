use anyhow::{ensure, Context, Result};
use ndarray::{Array1, Array2};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// --- データ構造 ---

/// 評価ループに流れる1フレーム分の入力
///
/// cloud は [n, 3] のXYZ点群、cloud_features は同じ n 行の特徴行列
/// (XYZ + 法線 + 色などモデル入力次第)。choose は画像平面から点群へ
/// サンプリングした画素インデックス、labels は点ごとのGTクラスID。
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub image: Mat,
    pub cloud: Array2<f32>,
    pub cloud_features: Array2<f32>,
    pub choose: Array1<i64>,
    pub labels: Array1<i32>,
}

/// FrameSample のディスク表現
///
/// 画像はJPEGバイト列、行列はフラットなVecで持つ。bincodeで読み書きする。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub jpeg_data: Vec<u8>,
    pub cloud: Vec<f32>,
    pub cloud_features: Vec<f32>,
    pub feature_dim: usize,
    pub choose: Vec<i64>,
    pub labels: Vec<i32>,
}

// --- 変換 ---

impl FrameRecord {
    pub fn from_sample(sample: &FrameSample) -> Result<Self> {
        let mut jpeg = Vector::<u8>::new();
        let params = Vector::<i32>::new();
        let ok = imgcodecs::imencode(".jpg", &sample.image, &mut jpeg, &params)
            .context("Failed to encode frame image")?;
        ensure!(ok, "JPEG encoder returned failure");

        Ok(Self {
            jpeg_data: jpeg.to_vec(),
            cloud: sample.cloud.iter().copied().collect(),
            cloud_features: sample.cloud_features.iter().copied().collect(),
            feature_dim: sample.cloud_features.ncols(),
            choose: sample.choose.to_vec(),
            labels: sample.labels.to_vec(),
        })
    }

    pub fn into_sample(self) -> Result<FrameSample> {
        let jpeg = Vector::<u8>::from_slice(&self.jpeg_data);
        let image = imgcodecs::imdecode(&jpeg, imgcodecs::IMREAD_COLOR)
            .context("Failed to decode frame image")?;
        ensure!(
            self.cloud.len() % 3 == 0,
            "cloud length {} is not a multiple of 3",
            self.cloud.len()
        );
        let n = self.cloud.len() / 3;
        let cloud = Array2::from_shape_vec((n, 3), self.cloud)
            .context("cloud shape mismatch")?;
        ensure!(self.feature_dim > 0, "feature_dim must be positive");
        ensure!(
            self.cloud_features.len() == n * self.feature_dim,
            "cloud_features length {} does not match {} points x {} dims",
            self.cloud_features.len(),
            n,
            self.feature_dim
        );
        let cloud_features = Array2::from_shape_vec((n, self.feature_dim), self.cloud_features)
            .context("cloud_features shape mismatch")?;

        Ok(FrameSample {
            image,
            cloud,
            cloud_features,
            choose: Array1::from_vec(self.choose),
            labels: Array1::from_vec(self.labels),
        })
    }
}

// --- ファイルIO ---

pub fn write_record(path: &Path, record: &FrameRecord) -> Result<()> {
    let data = bincode::serialize(record)
        .with_context(|| format!("Failed to serialize record for {}", path.display()))?;
    fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_record(path: &Path) -> Result<FrameRecord> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    bincode::deserialize(&data)
        .with_context(|| format!("Failed to deserialize record {}", path.display()))
}

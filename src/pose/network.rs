use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Array3, Array4, ArrayViewD, Axis};
use opencv::core::{Mat, Vec3b};
use opencv::prelude::*;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::fs;
use std::path::Path;

use crate::error::CheckpointError;

// --- モデルインタフェース ---

/// 1フレーム分のネットワーク出力
#[derive(Debug, Clone)]
pub struct NetOutput {
    /// キーポイントオフセット [n_kp, n_points, 3]
    pub kp_offsets: Array3<f32>,
    /// クラスごとのセグメンテーションスコア [n_points, n_classes]
    pub seg_scores: Array2<f32>,
    /// 重心オフセット [1, n_points, 3]
    pub ctr_offsets: Array3<f32>,
}

/// 点群+画像から姿勢の手がかりを推定するモデルの共通インタフェース
///
/// データ並列化やバッチ正規化の同期はモデル実装側の話で、呼び出し側は
/// この3メソッドの形しか知らない。
pub trait PoseNetwork {
    fn infer(
        &mut self,
        cloud_features: &Array2<f32>,
        image: &Mat,
        choose: &Array1<i64>,
    ) -> Result<NetOutput>;

    /// 評価モードの切り替え
    fn set_eval(&mut self, eval: bool);

    fn is_eval(&self) -> bool;

    fn load_state(&mut self, state: &[u8]) -> Result<(), CheckpointError>;

    fn state_bytes(&self) -> Vec<u8>;
}

/// オプティマイザ状態の保存・復元のみを扱う
pub trait Optimizer {
    fn load_state(&mut self, state: &[u8]) -> Result<(), CheckpointError>;

    fn state_bytes(&self) -> Vec<u8>;
}

/// スコープの間だけモデルを評価モードにするガード
///
/// dropで元のモードへ戻すため、推論後のコードパスにモードが漏れない。
pub struct EvalModeGuard<'a> {
    net: &'a mut dyn PoseNetwork,
    prev: bool,
}

impl<'a> EvalModeGuard<'a> {
    pub fn enter(net: &'a mut dyn PoseNetwork) -> Self {
        let prev = net.is_eval();
        net.set_eval(true);
        Self { net, prev }
    }

    pub fn net(&mut self) -> &mut dyn PoseNetwork {
        self.net
    }
}

impl Drop for EvalModeGuard<'_> {
    fn drop(&mut self) {
        self.net.set_eval(self.prev);
    }
}

/// 点ごとにスコア最大のクラスを選ぶ。同点は先のインデックス優先
pub fn argmax_classes(seg_scores: &Array2<f32>) -> Array1<i32> {
    let mut labels = Array1::zeros(seg_scores.nrows());
    for (i, row) in seg_scores.outer_iter().enumerate() {
        let mut best = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (j, &score) in row.iter().enumerate() {
            if score > best_score {
                best_score = score;
                best = j;
            }
        }
        labels[i] = best as i32;
    }
    labels
}

// --- ONNX実装 ---

/// ONNXグラフとして書き出した姿勢推定ネットワーク
///
/// 入力: cloud [1, n, C] / rgb [1, 3, H, W] / choose [1, 1, n]
/// 出力: kp_of [1, n_kp, n, 3] / seg [1, n, n_classes] / ctr_of [1, 1, n, 3]
pub struct OnnxPoseNet {
    session: Session,
    model_bytes: Vec<u8>,
    eval: bool,
}

impl OnnxPoseNet {
    /// ONNXモデルを読み込んで初期化
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let bytes = fs::read(model_path.as_ref()).with_context(|| {
            format!("Failed to read ONNX model {}", model_path.as_ref().display())
        })?;
        let session = build_session(&bytes)?;
        Ok(Self { session, model_bytes: bytes, eval: false })
    }
}

fn build_session(bytes: &[u8]) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_memory(bytes)
        .context("Failed to load ONNX model")
}

/// BGRのMatを[1, 3, H, W]のRGB正規化テンソルへ変換
fn image_tensor(image: &Mat) -> Result<Array4<f32>> {
    let rows = image.rows();
    let cols = image.cols();
    let mut tensor = Array4::<f32>::zeros((1, 3, rows as usize, cols as usize));
    for y in 0..rows {
        for x in 0..cols {
            let px = image.at_2d::<Vec3b>(y, x)?;
            // OpenCVはBGR並び
            tensor[[0, 0, y as usize, x as usize]] = px[2] as f32 / 255.0;
            tensor[[0, 1, y as usize, x as usize]] = px[1] as f32 / 255.0;
            tensor[[0, 2, y as usize, x as usize]] = px[0] as f32 / 255.0;
        }
    }
    Ok(tensor)
}

impl PoseNetwork for OnnxPoseNet {
    fn infer(
        &mut self,
        cloud_features: &Array2<f32>,
        image: &Mat,
        choose: &Array1<i64>,
    ) -> Result<NetOutput> {
        let cloud = cloud_features.clone().insert_axis(Axis(0));
        let rgb = image_tensor(image)?;
        let choose = choose.clone().insert_axis(Axis(0)).insert_axis(Axis(0));

        let outputs = self
            .session
            .run(ort::inputs![
                "cloud" => Tensor::from_array(cloud)?,
                "rgb" => Tensor::from_array(rgb)?,
                "choose" => Tensor::from_array(choose)?
            ])
            .context("Inference failed")?;

        let kp_of: ArrayViewD<f32> = outputs["kp_of"]
            .try_extract_array()
            .context("Failed to extract kp_of tensor")?;
        let seg: ArrayViewD<f32> = outputs["seg"]
            .try_extract_array()
            .context("Failed to extract seg tensor")?;
        let ctr_of: ArrayViewD<f32> = outputs["ctr_of"]
            .try_extract_array()
            .context("Failed to extract ctr_of tensor")?;

        // 先頭のバッチ軸を落とす
        let kp_offsets = kp_of
            .index_axis(Axis(0), 0)
            .to_owned()
            .into_dimensionality()
            .context("kp_of has unexpected shape")?;
        let seg_scores = seg
            .index_axis(Axis(0), 0)
            .to_owned()
            .into_dimensionality()
            .context("seg has unexpected shape")?;
        let ctr_offsets = ctr_of
            .index_axis(Axis(0), 0)
            .to_owned()
            .into_dimensionality()
            .context("ctr_of has unexpected shape")?;

        Ok(NetOutput { kp_offsets, seg_scores, ctr_offsets })
    }

    fn set_eval(&mut self, eval: bool) {
        self.eval = eval;
    }

    fn is_eval(&self) -> bool {
        self.eval
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), CheckpointError> {
        // 重みの差し替え = グラフの作り直し。形が合わなければここで落ちる
        let session =
            build_session(state).map_err(|e| CheckpointError::StateMismatch(format!("{:#}", e)))?;
        self.session = session;
        self.model_bytes = state.to_vec();
        Ok(())
    }

    fn state_bytes(&self) -> Vec<u8> {
        self.model_bytes.clone()
    }
}

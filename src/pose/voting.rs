use anyhow::{ensure, Result};
use nalgebra::Vector3;
use ndarray::{Array1, Array2, Array3};

use crate::projection::PoseMatrix;

// --- 投票インタフェース ---

/// クラスタリング済みの姿勢と対応クラスIDの並行リスト
#[derive(Debug, Clone, Default)]
pub struct VotedPoses {
    pub class_ids: Vec<u32>,
    pub poses: Vec<PoseMatrix>,
}

/// 点ごとの手がかりからフレーム単位の姿勢仮説を決める投票器
pub trait PoseVoter {
    /// 複数オブジェクト変種: 検出できたクラスのIDと姿勢を返す
    fn cluster_poses(
        &self,
        cloud: &Array2<f32>,
        seg_labels: &Array1<i32>,
        ctr_offsets: &Array3<f32>,
        kp_offsets: &Array3<f32>,
        n_classes: u32,
    ) -> Result<VotedPoses>;

    /// 単一オブジェクト変種: 固定クラスのインスタンス姿勢列だけを返す
    fn cluster_poses_single(
        &self,
        cloud: &Array2<f32>,
        seg_labels: &Array1<i32>,
        ctr_offsets: &Array3<f32>,
        kp_offsets: &Array3<f32>,
        obj_id: u32,
    ) -> Result<Vec<PoseMatrix>>;
}

/// 並進のみの姿勢(回転は単位行列)
pub fn translation_pose(t: &Vector3<f32>) -> PoseMatrix {
    let mut pose = PoseMatrix::identity();
    pose[(0, 3)] = t.x;
    pose[(1, 3)] = t.y;
    pose[(2, 3)] = t.z;
    pose
}

// --- 重心投票 ---

/// 重心投票のみの簡易投票器
///
/// 各点のctrオフセットをその点へ足した先の平均をオブジェクト重心とみなし、
/// 並進だけの姿勢を組み立てる。キーポイントから回転まで復元する本来の
/// 投票器はこのtraitを差し替えて使う。
pub struct CentroidVoter;

impl CentroidVoter {
    fn check_shapes(
        cloud: &Array2<f32>,
        seg_labels: &Array1<i32>,
        ctr_offsets: &Array3<f32>,
    ) -> Result<()> {
        let n = cloud.nrows();
        ensure!(
            seg_labels.len() == n,
            "cloud has {} points but {} labels",
            n,
            seg_labels.len()
        );
        ensure!(
            ctr_offsets.shape() == &[1, n, 3],
            "ctr_offsets shape {:?} does not cover {} points",
            ctr_offsets.shape(),
            n
        );
        Ok(())
    }

    /// 条件を満たす点の (点 + ctrオフセット) の平均
    fn centroid<F>(
        cloud: &Array2<f32>,
        seg_labels: &Array1<i32>,
        ctr_offsets: &Array3<f32>,
        keep: F,
    ) -> Option<Vector3<f32>>
    where
        F: Fn(i32) -> bool,
    {
        let mut sum = Vector3::zeros();
        let mut count = 0usize;
        for (i, &label) in seg_labels.iter().enumerate() {
            if !keep(label) {
                continue;
            }
            sum += Vector3::new(
                cloud[[i, 0]] + ctr_offsets[[0, i, 0]],
                cloud[[i, 1]] + ctr_offsets[[0, i, 1]],
                cloud[[i, 2]] + ctr_offsets[[0, i, 2]],
            );
            count += 1;
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f32)
        }
    }
}

impl PoseVoter for CentroidVoter {
    fn cluster_poses(
        &self,
        cloud: &Array2<f32>,
        seg_labels: &Array1<i32>,
        ctr_offsets: &Array3<f32>,
        _kp_offsets: &Array3<f32>,
        n_classes: u32,
    ) -> Result<VotedPoses> {
        Self::check_shapes(cloud, seg_labels, ctr_offsets)?;
        let mut voted = VotedPoses::default();
        // クラス0は背景
        for class_id in 1..n_classes {
            let centroid = Self::centroid(cloud, seg_labels, ctr_offsets, |label| {
                label == class_id as i32
            });
            if let Some(c) = centroid {
                voted.class_ids.push(class_id);
                voted.poses.push(translation_pose(&c));
            }
        }
        Ok(voted)
    }

    fn cluster_poses_single(
        &self,
        cloud: &Array2<f32>,
        seg_labels: &Array1<i32>,
        ctr_offsets: &Array3<f32>,
        _kp_offsets: &Array3<f32>,
        _obj_id: u32,
    ) -> Result<Vec<PoseMatrix>> {
        Self::check_shapes(cloud, seg_labels, ctr_offsets)?;
        // 単一オブジェクトでは前景全体を1インスタンスとみなす
        let centroid = Self::centroid(cloud, seg_labels, ctr_offsets, |label| label > 0);
        Ok(centroid.map(|c| translation_pose(&c)).into_iter().collect())
    }
}

use anyhow::{bail, Context, Result};
use nalgebra::Matrix3;
use opencv::core::Mat;

use crate::config::{intrinsic_matrix, linemod_obj_id, Config, DatasetVariant};
use crate::dataset::{ClassTable, FrameSample, FrameSource, MeshStore};
use crate::pose::{
    argmax_classes, distinct_class_ids, resolve_frame, resolve_frame_single, EvalModeGuard,
    OverlayInstance, PoseNetwork, PoseVoter,
};
use crate::projection::project_points;
use crate::render::{
    draw_label, draw_points, label_anchor, label_color, FrameArchiver, PreviewWindow,
};

/// 点群は実寸(m)で届くので投影時の深度スケールは1固定
const CAM_SCALE: f32 = 1.0;

/// 単一オブジェクト変種の固定ターゲット
#[derive(Debug, Clone)]
pub struct TargetObject {
    pub obj_id: u32,
    pub name: String,
}

impl TargetObject {
    /// オブジェクト名からデータセット上のIDを引いて作る
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(Self { obj_id: linemod_obj_id(name)?, name: name.to_string() })
    }
}

/// フレーム列を端から評価して成果物を書き出すループ本体
///
/// 推論→セグ確定→投票→名前解決→描画→保存を1フレームずつ順に行う。
/// フレーム間で持ち越す状態はメッシュキャッシュだけで、台帳や
/// インスタンス番号はフレームごとに作り直す。
pub struct Evaluator {
    net: Box<dyn PoseNetwork>,
    voter: Box<dyn PoseVoter>,
    table: ClassTable,
    meshes: MeshStore,
    archiver: FrameArchiver,
    intrinsic: Matrix3<f32>,
    variant: DatasetVariant,
    n_objects: u32,
    target: Option<TargetObject>,
    viewer: Option<PreviewWindow>,
    progress_every: usize,
}

impl Evaluator {
    pub fn new(
        config: &Config,
        net: Box<dyn PoseNetwork>,
        voter: Box<dyn PoseVoter>,
        table: ClassTable,
        target: Option<TargetObject>,
    ) -> Result<Self> {
        if config.dataset.variant == DatasetVariant::Linemod && target.is_none() {
            bail!("single-object dataset requires a target object");
        }
        let intrinsic = intrinsic_matrix(config.dataset.intrinsic_name())?;
        let viewer = if config.eval.show_viewer {
            Some(PreviewWindow::new("pose-eval"))
        } else {
            None
        };
        Ok(Self {
            net,
            voter,
            table,
            meshes: MeshStore::new(&config.dataset.mesh_root),
            archiver: FrameArchiver::new(&config.eval.vis_dir),
            intrinsic,
            variant: config.dataset.variant,
            n_objects: config.dataset.n_objects,
            target,
            viewer,
            progress_every: config.eval.progress_every,
        })
    }

    /// ソースを端から評価する。処理したフレーム数を返す
    pub fn run(&mut self, source: &mut dyn FrameSource) -> Result<usize> {
        let total = source.len();
        let mut done = 0usize;
        while let Some(sample) = source.next_frame()? {
            self.eval_frame(&sample, done as i64)?;
            done += 1;
            if self.progress_every > 0 && done % self.progress_every == 0 {
                match total {
                    Some(total) => println!("val: {}/{}", done, total),
                    None => println!("val: {}", done),
                }
            }
        }
        println!("val: {} frames done", done);
        Ok(done)
    }

    fn eval_frame(&mut self, sample: &FrameSample, epoch: i64) -> Result<()> {
        // 推論は評価モードのスコープ内でだけ走らせる
        let output = {
            let mut guard = EvalModeGuard::enter(self.net.as_mut());
            guard
                .net()
                .infer(&sample.cloud_features, &sample.image, &sample.choose)?
        };
        let seg_labels = argmax_classes(&output.seg_scores);

        let (catalog, overlays) = match self.variant {
            DatasetVariant::Ycb => {
                let voted = self.voter.cluster_poses(
                    &sample.cloud,
                    &seg_labels,
                    &output.ctr_offsets,
                    &output.kp_offsets,
                    self.n_objects,
                )?;
                let gt_ids = distinct_class_ids(&sample.labels);
                resolve_frame(&gt_ids, &voted, &self.table)?
            }
            DatasetVariant::Linemod => {
                let target = self.target.as_ref().context("no target object configured")?;
                let poses = self.voter.cluster_poses_single(
                    &sample.cloud,
                    &seg_labels,
                    &output.ctr_offsets,
                    &output.kp_offsets,
                    target.obj_id,
                )?;
                resolve_frame_single(&poses, target.obj_id, &target.name)
            }
        };

        let mut annotated = sample.image.clone();
        for overlay in &overlays {
            self.draw_overlay(&mut annotated, overlay)?;
        }

        self.archiver.archive(&annotated, &sample.image, &catalog, epoch)?;
        if let Some(viewer) = &mut self.viewer {
            viewer.show(&annotated);
        }
        Ok(())
    }

    fn draw_overlay(&mut self, img: &mut Mat, overlay: &OverlayInstance) -> Result<()> {
        println!("{}", overlay.name);
        println!("pose:{}", overlay.pose);

        let dir_name = match self.variant {
            DatasetVariant::Ycb => self.table.raw_name(overlay.class_id)?.to_string(),
            DatasetVariant::Linemod => {
                self.target
                    .as_ref()
                    .context("no target object configured")?
                    .name
                    .clone()
            }
        };
        let mesh = self.meshes.points(overlay.class_id, &dir_name)?;
        let p2d = project_points(mesh, &overlay.pose, CAM_SCALE, &self.intrinsic);
        let color = label_color(overlay.class_id, self.n_objects);
        draw_points(img, &p2d, color)?;
        draw_label(img, &overlay.label, label_anchor(&p2d))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CheckpointError, ResolveError};
    use crate::pose::{translation_pose, NetOutput, VotedPoses};
    use crate::projection::PoseMatrix;
    use nalgebra::Vector3;
    use ndarray::{Array1, Array2, Array3};
    use opencv::core::{Scalar, CV_8UC3};
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct NetSpy {
        infer_calls: usize,
        saw_eval_mode: bool,
        mode_events: Vec<bool>,
    }

    struct MockNet {
        eval: bool,
        spy: Arc<Mutex<NetSpy>>,
    }

    impl MockNet {
        fn new(spy: Arc<Mutex<NetSpy>>) -> Self {
            Self { eval: false, spy }
        }
    }

    impl PoseNetwork for MockNet {
        fn infer(
            &mut self,
            cloud_features: &Array2<f32>,
            _image: &Mat,
            _choose: &Array1<i64>,
        ) -> Result<NetOutput> {
            let mut spy = self.spy.lock().unwrap();
            spy.infer_calls += 1;
            spy.saw_eval_mode = self.eval;

            let n = cloud_features.nrows();
            // 全点でクラス5が最大スコア
            let mut seg = Array2::zeros((n, 6));
            for i in 0..n {
                seg[[i, 5]] = 1.0;
            }
            Ok(NetOutput {
                kp_offsets: Array3::zeros((8, n, 3)),
                seg_scores: seg,
                ctr_offsets: Array3::zeros((1, n, 3)),
            })
        }

        fn set_eval(&mut self, eval: bool) {
            self.eval = eval;
            self.spy.lock().unwrap().mode_events.push(eval);
        }

        fn is_eval(&self) -> bool {
            self.eval
        }

        fn load_state(&mut self, _state: &[u8]) -> Result<(), CheckpointError> {
            Ok(())
        }

        fn state_bytes(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    /// 常に同じクラスID列と姿勢を返す投票器
    struct FixedVoter {
        class_ids: Vec<u32>,
    }

    impl PoseVoter for FixedVoter {
        fn cluster_poses(
            &self,
            _cloud: &Array2<f32>,
            _seg_labels: &Array1<i32>,
            _ctr_offsets: &Array3<f32>,
            _kp_offsets: &Array3<f32>,
            _n_classes: u32,
        ) -> Result<VotedPoses> {
            let poses = (0..self.class_ids.len())
                .map(|i| translation_pose(&Vector3::new(0.1 * i as f32, 0.0, 1.0)))
                .collect();
            Ok(VotedPoses { class_ids: self.class_ids.clone(), poses })
        }

        fn cluster_poses_single(
            &self,
            _cloud: &Array2<f32>,
            _seg_labels: &Array1<i32>,
            _ctr_offsets: &Array3<f32>,
            _kp_offsets: &Array3<f32>,
            _obj_id: u32,
        ) -> Result<Vec<PoseMatrix>> {
            Ok(vec![translation_pose(&Vector3::new(0.0, 0.0, 0.5))])
        }
    }

    struct VecSource {
        samples: Vec<FrameSample>,
        pos: usize,
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<FrameSample>> {
            let sample = self.samples.get(self.pos).cloned();
            self.pos += 1;
            Ok(sample)
        }

        fn len(&self) -> Option<usize> {
            Some(self.samples.len())
        }
    }

    const TABLE: &str = "\
002_master_chef_can
003_cracker_box
004_sugar_box
024_bowl
025_mug
";

    fn write_mesh(root: &Path, dir: &str) {
        let dir = root.join(dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("points.xyz"), "0.0 0.0 0.0\n0.02 0.01 0.0\n-0.02 0.01 0.0\n")
            .unwrap();
    }

    fn sample_fixture() -> FrameSample {
        let image =
            Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::new(30.0, 30.0, 30.0, 0.0))
                .unwrap();
        FrameSample {
            image,
            cloud: Array2::from_shape_vec(
                (4, 3),
                vec![0.0, 0.0, 1.0, 0.1, 0.0, 1.0, 0.0, 0.1, 1.0, 0.5, 0.5, 2.0],
            )
            .unwrap(),
            cloud_features: Array2::zeros((4, 6)),
            choose: Array1::zeros(4),
            labels: Array1::from_vec(vec![5, 5, 5, 0]),
        }
    }

    fn ycb_config(mesh_root: &Path, vis_dir: &Path) -> Config {
        let mut config = Config::default();
        config.dataset.variant = DatasetVariant::Ycb;
        config.dataset.mesh_root = mesh_root.to_string_lossy().into_owned();
        config.dataset.n_objects = 6;
        config.eval.vis_dir = vis_dir.to_string_lossy().into_owned();
        config.eval.show_viewer = false;
        config.eval.progress_every = 1;
        config
    }

    #[test]
    fn test_ycb_frame_writes_catalog_and_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let mesh_root = tmp.path().join("models");
        let vis_dir = tmp.path().join("vis");
        write_mesh(&mesh_root, "025_mug");

        let spy = Arc::new(Mutex::new(NetSpy::default()));
        let config = ycb_config(&mesh_root, &vis_dir);
        let mut evaluator = Evaluator::new(
            &config,
            Box::new(MockNet::new(spy.clone())),
            Box::new(FixedVoter { class_ids: vec![5, 5] }),
            ClassTable::from_lines(TABLE),
            None,
        )
        .unwrap();

        evaluator.eval_frame(&sample_fixture(), 0).unwrap();

        let files: Vec<_> = fs::read_dir(&vis_dir).unwrap().collect();
        assert_eq!(files.len(), 4);

        let json = fs::read_to_string(vis_dir.join("0_pose_dict.json")).unwrap();
        assert!(json.contains("mug"));
        // 2インスタンスとも台帳に載る
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mug"].as_array().map(Vec::len), Some(2));

        let spy = spy.lock().unwrap();
        assert_eq!(spy.infer_calls, 1);
        assert!(spy.saw_eval_mode);
        // 推論スコープで入り、抜けるときに元へ戻る
        assert_eq!(spy.mode_events, vec![true, false]);
    }

    #[test]
    fn test_run_numbers_frames_from_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let mesh_root = tmp.path().join("models");
        let vis_dir = tmp.path().join("vis");
        write_mesh(&mesh_root, "025_mug");

        let spy = Arc::new(Mutex::new(NetSpy::default()));
        let config = ycb_config(&mesh_root, &vis_dir);
        let mut evaluator = Evaluator::new(
            &config,
            Box::new(MockNet::new(spy.clone())),
            Box::new(FixedVoter { class_ids: vec![5] }),
            ClassTable::from_lines(TABLE),
            None,
        )
        .unwrap();

        let mut source =
            VecSource { samples: vec![sample_fixture(), sample_fixture()], pos: 0 };
        let done = evaluator.run(&mut source).unwrap();

        assert_eq!(done, 2);
        assert_eq!(spy.lock().unwrap().infer_calls, 2);
        assert!(vis_dir.join("0_pose_dict.json").is_file());
        assert!(vis_dir.join("1_pose_dict.json").is_file());
        // 0.jpgは上書きなので 4 + 3 ファイル
        assert_eq!(fs::read_dir(&vis_dir).unwrap().count(), 7);
    }

    #[test]
    fn test_linemod_without_target_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ycb_config(tmp.path(), tmp.path());
        config.dataset.variant = DatasetVariant::Linemod;

        let spy = Arc::new(Mutex::new(NetSpy::default()));
        let result = Evaluator::new(
            &config,
            Box::new(MockNet::new(spy)),
            Box::new(FixedVoter { class_ids: vec![] }),
            ClassTable::from_lines(TABLE),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_linemod_uses_target_name() {
        let tmp = tempfile::tempdir().unwrap();
        let mesh_root = tmp.path().join("models");
        let vis_dir = tmp.path().join("vis");
        write_mesh(&mesh_root, "ape");

        let mut config = ycb_config(&mesh_root, &vis_dir);
        config.dataset.variant = DatasetVariant::Linemod;
        config.dataset.intrinsic = Some("linemod".to_string());

        let spy = Arc::new(Mutex::new(NetSpy::default()));
        let mut evaluator = Evaluator::new(
            &config,
            Box::new(MockNet::new(spy)),
            Box::new(FixedVoter { class_ids: vec![] }),
            ClassTable::from_lines(TABLE),
            Some(TargetObject::from_name("ape").unwrap()),
        )
        .unwrap();

        evaluator.eval_frame(&sample_fixture(), 0).unwrap();

        let json = fs::read_to_string(vis_dir.join("0_pose_dict.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ape"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_unknown_predicted_class_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let mesh_root = tmp.path().join("models");
        let vis_dir = tmp.path().join("vis");
        write_mesh(&mesh_root, "025_mug");

        let spy = Arc::new(Mutex::new(NetSpy::default()));
        let config = ycb_config(&mesh_root, &vis_dir);
        let mut evaluator = Evaluator::new(
            &config,
            Box::new(MockNet::new(spy)),
            Box::new(FixedVoter { class_ids: vec![9] }),
            ClassTable::from_lines(TABLE),
            None,
        )
        .unwrap();

        let mut sample = sample_fixture();
        sample.labels = Array1::from_vec(vec![9, 9, 0, 0]);

        let err = evaluator.eval_frame(&sample, 0).unwrap_err();
        assert!(err.downcast_ref::<ResolveError>().is_some());
    }
}

use anyhow::{bail, Result};
use nalgebra::Matrix3;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// データセット種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetVariant {
    /// マルチインスタンス・マルチクラス (YCB-Video系)
    Ycb,
    /// 単一オブジェクト (LineMOD系)
    Linemod,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub eval: EvalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    /// データセット種別 ("ycb" / "linemod")
    #[serde(default = "default_variant")]
    pub variant: DatasetVariant,
    /// クラス一覧ファイル（1行1クラス、先頭4文字は数値プレフィクス）
    #[serde(default = "default_class_list")]
    pub class_list: String,
    /// オブジェクトモデル点群のルートディレクトリ
    #[serde(default = "default_mesh_root")]
    pub mesh_root: String,
    /// フレームレコード(.frame)のディレクトリ
    #[serde(default = "default_frame_dir")]
    pub frame_dir: String,
    /// 内部パラメータ名。未指定ならデータセット既定のKを使う
    #[serde(default)]
    pub intrinsic: Option<String>,
    /// 背景を含むオブジェクトクラス数
    #[serde(default = "default_n_objects")]
    pub n_objects: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvalConfig {
    /// 可視化成果物の出力ディレクトリ
    #[serde(default = "default_vis_dir")]
    pub vis_dir: String,
    /// チェックポイントのベースパス（拡張子なし）
    #[serde(default = "default_checkpoint")]
    pub checkpoint: String,
    /// アノテーション済みフレームをウィンドウ表示するか
    #[serde(default = "default_show_viewer")]
    pub show_viewer: bool,
    /// 先読みするフレーム数（0で無効）
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    /// 進捗表示の間隔（フレーム数）
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

fn default_variant() -> DatasetVariant { DatasetVariant::Ycb }
fn default_class_list() -> String { "datasets/ycb/classes.txt".to_string() }
fn default_mesh_root() -> String { "datasets/ycb/models".to_string() }
fn default_frame_dir() -> String { "datasets/ycb/test_frames".to_string() }
fn default_n_objects() -> u32 { 22 }
fn default_vis_dir() -> String { "eval_results/pose_vis".to_string() }
fn default_checkpoint() -> String { "checkpoints/pose_net".to_string() }
fn default_show_viewer() -> bool { true }
fn default_prefetch() -> usize { 2 }
fn default_progress_every() -> usize { 10 }

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            class_list: default_class_list(),
            mesh_root: default_mesh_root(),
            frame_dir: default_frame_dir(),
            intrinsic: None,
            n_objects: default_n_objects(),
        }
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            vis_dir: default_vis_dir(),
            checkpoint: default_checkpoint(),
            show_viewer: default_show_viewer(),
            prefetch: default_prefetch(),
            progress_every: default_progress_every(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig::default(),
            eval: EvalConfig::default(),
        }
    }
}

impl DatasetConfig {
    /// 使用する内部パラメータ名
    pub fn intrinsic_name(&self) -> &str {
        match &self.intrinsic {
            Some(name) => name,
            None => match self.variant {
                DatasetVariant::Ycb => "ycb_K1",
                DatasetVariant::Linemod => "linemod",
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 設定ファイルがなければデフォルト設定で続行する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config load failed ({}), using defaults", e);
                Self::default()
            }
        }
    }
}

// --- 内部パラメータテーブル ---

/// 名前 → カメラ内部パラメータ行列 K
pub fn intrinsic_matrix(name: &str) -> Result<Matrix3<f32>> {
    let k = match name {
        "ycb_K1" => Matrix3::new(
            1066.778, 0.0, 312.9869,
            0.0, 1067.487, 241.3109,
            0.0, 0.0, 1.0,
        ),
        "ycb_K2" => Matrix3::new(
            1077.836, 0.0, 323.7872,
            0.0, 1078.189, 279.6921,
            0.0, 0.0, 1.0,
        ),
        "linemod" => Matrix3::new(
            572.4114, 0.0, 325.2611,
            0.0, 573.57043, 242.04899,
            0.0, 0.0, 1.0,
        ),
        _ => bail!("Unknown intrinsic: {}", name),
    };
    Ok(k)
}

/// LineMODオブジェクト名 → クラスID
///
/// 3と7は欠番。
pub fn linemod_obj_id(name: &str) -> Result<u32> {
    let id = match name {
        "ape" => 1,
        "benchvise" => 2,
        "cam" => 4,
        "can" => 5,
        "cat" => 6,
        "driller" => 8,
        "duck" => 9,
        "eggbox" => 10,
        "glue" => 11,
        "holepuncher" => 12,
        "iron" => 13,
        "lamp" => 14,
        "phone" => 15,
        _ => bail!("Unknown LineMOD object: {}", name),
    };
    Ok(id)
}

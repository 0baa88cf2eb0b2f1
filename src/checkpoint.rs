use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CheckpointError;
use crate::pose::{Optimizer, PoseNetwork};

/// チェックポイントファイルの固定拡張子
pub const CHECKPOINT_SUFFIX: &str = ".ckpt";

// --- データ構造 ---

/// 学習状態のスナップショット
///
/// プライマリ形式はJSON。旧形式(bincode)のファイルは読み込みのみ対応。
/// 状態blobの中身はモデル/オプティマイザ実装が解釈する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBundle {
    pub epoch: i64,
    /// イテレーションカウンタ。古いチェックポイントには存在しないため0.0扱い
    #[serde(default)]
    pub it: f64,
    #[serde(default)]
    pub best_prec: Option<f64>,
    #[serde(default)]
    pub model_state: Option<Vec<u8>>,
    #[serde(default)]
    pub optimizer_state: Option<Vec<u8>>,
}

/// デシリアライズ結果。どちらの形式で読めたかを保持する
#[derive(Debug)]
pub enum DecodedCheckpoint {
    /// プライマリ形式 (JSON)
    Primary(CheckpointBundle),
    /// 旧形式 (bincode)
    Legacy(CheckpointBundle),
}

impl DecodedCheckpoint {
    pub fn into_bundle(self) -> CheckpointBundle {
        match self {
            DecodedCheckpoint::Primary(bundle) | DecodedCheckpoint::Legacy(bundle) => bundle,
        }
    }
}

// --- パス解決 ---

/// ベースパス + 固定拡張子
///
/// ベースに含まれる '.' はそのまま残す（置換ではなく付加）。
pub fn archive_path(base: &Path) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(CHECKPOINT_SUFFIX);
    PathBuf::from(s)
}

// --- Save / Load ---

/// プライマリ形式 → 旧形式の順に1回ずつデシリアライズを試す
pub fn try_deserialize(path: &Path, data: &[u8]) -> Result<DecodedCheckpoint, CheckpointError> {
    let primary_err = match serde_json::from_slice::<CheckpointBundle>(data) {
        Ok(bundle) => return Ok(DecodedCheckpoint::Primary(bundle)),
        Err(e) => e,
    };
    match bincode::deserialize::<CheckpointBundle>(data) {
        Ok(bundle) => Ok(DecodedCheckpoint::Legacy(bundle)),
        Err(legacy_err) => Err(CheckpointError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("primary: {}; legacy: {}", primary_err, legacy_err),
        }),
    }
}

/// ベースパスからバンドルを読み込む
///
/// ファイルが存在しない場合は致命傷ではない: メッセージを出してNoneを返し、
/// 呼び出し側は未初期化モデルのまま続行できる。
pub fn load_checkpoint(base: &Path) -> Result<Option<CheckpointBundle>> {
    let path = archive_path(base);
    if !path.is_file() {
        println!("==> Checkpoint '{}' not found", path.display());
        return Ok(None);
    }
    println!("==> Loading from checkpoint '{}'", path.display());
    let data = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let bundle = try_deserialize(&path, &data)?.into_bundle();
    println!("==> Done");
    Ok(Some(bundle))
}

/// バンドルをプライマリ形式で書き出す
pub fn save_checkpoint(bundle: &CheckpointBundle, base: &Path) -> Result<()> {
    let path = archive_path(base);
    let json = serde_json::to_string_pretty(bundle)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// --- 状態の適用と構築 ---

/// バンドルの状態をモデル/オプティマイザへ反映する
///
/// model_stateがあればモデルへの適用は必須で、失敗は致命傷。
/// optimizer_stateは参照が渡されていてバンドル側にも存在する場合のみ適用する
/// （欠落はエラーではなくno-op）。
pub fn apply_checkpoint(
    bundle: &CheckpointBundle,
    model: &mut dyn PoseNetwork,
    optimizer: Option<&mut dyn Optimizer>,
) -> Result<(), CheckpointError> {
    if let Some(state) = &bundle.model_state {
        model.load_state(state)?;
    }
    if let (Some(opt), Some(state)) = (optimizer, &bundle.optimizer_state) {
        opt.load_state(state)?;
    }
    Ok(())
}

/// 現在の学習状態からバンドルを構築する
pub fn checkpoint_state(
    model: Option<&dyn PoseNetwork>,
    optimizer: Option<&dyn Optimizer>,
    best_prec: Option<f64>,
    epoch: i64,
    it: f64,
) -> CheckpointBundle {
    CheckpointBundle {
        epoch,
        it,
        best_prec,
        model_state: model.map(|m| m.state_bytes()),
        optimizer_state: optimizer.map(|o| o.state_bytes()),
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// チェックポイントの読み込み・適用の失敗
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// プライマリ形式・旧形式の両方でデシリアライズに失敗
    #[error("corrupt checkpoint '{path}': {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// チェックポイントの状態が現在のモデル定義と不整合
    #[error("checkpoint state does not match the current model: {0}")]
    StateMismatch(String),
}

/// ポーズ解決の失敗
#[derive(Debug, Error)]
pub enum ResolveError {
    /// クラステーブルに存在しないID。設定とモデルの不一致を意味する
    #[error("class id {class_id} has no entry in the class table (len {table_len})")]
    UnknownClass { class_id: u32, table_len: usize },
}

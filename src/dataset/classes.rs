use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::ResolveError;

/// クラスID→オブジェクト名の対応表
///
/// 行番号がそのままクラスID(1始まり)になる。各行は "025_mug" 形式で、
/// 先頭4文字の数値プレフィクスを落としたものを表示名として使う。
#[derive(Debug, Clone)]
pub struct ClassTable {
    /// プレフィクスを落とした表示名
    names: Vec<String>,
    /// ファイルに書かれたままの行
    raw: Vec<String>,
}

impl ClassTable {
    pub fn from_lines(lines: &str) -> Self {
        let mut names = Vec::new();
        let mut raw = Vec::new();
        for line in lines.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let name = match line.get(4..) {
                Some(rest) if !rest.is_empty() => rest.to_string(),
                // プレフィクスが無い短い行はそのまま使う
                _ => line.to_string(),
            };
            names.push(name);
            raw.push(line.to_string());
        }
        Self { names, raw }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read class list {}", path.display()))?;
        Ok(Self::from_lines(&text))
    }

    /// 表示名を引く。IDは1始まり、0や範囲外はエラー
    pub fn name(&self, class_id: u32) -> Result<&str, ResolveError> {
        self.entry(&self.names, class_id)
    }

    /// ファイル行そのまま(メッシュのディレクトリ名に使う)
    pub fn raw_name(&self, class_id: u32) -> Result<&str, ResolveError> {
        self.entry(&self.raw, class_id)
    }

    fn entry<'a>(&self, list: &'a [String], class_id: u32) -> Result<&'a str, ResolveError> {
        // ID 0 はラップして範囲外になる
        let idx = (class_id as usize).wrapping_sub(1);
        list.get(idx).map(String::as_str).ok_or(ResolveError::UnknownClass {
            class_id,
            table_len: self.names.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

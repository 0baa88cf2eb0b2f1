use ndarray::Array1;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::dataset::ClassTable;
use crate::error::ResolveError;
use crate::projection::PoseMatrix;

use super::voting::VotedPoses;

// --- 台帳 ---

/// フレーム内で解決した姿勢の名前つき台帳
///
/// 挿入順を保持する。同名オブジェクトの複数インスタンスは同じエントリに
/// 姿勢が積まれていく。フレームごとに作り直し、グローバルには持たない。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseCatalog {
    entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub poses: Vec<PoseMatrix>,
}

impl PoseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 姿勢を積み、積んだ後のそのオブジェクトのインスタンス数(1始まり)を返す
    pub fn push(&mut self, name: &str, pose: PoseMatrix) -> usize {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.poses.push(pose);
                entry.poses.len()
            }
            None => {
                self.entries.push(CatalogEntry { name: name.to_string(), poses: vec![pose] });
                1
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&[PoseMatrix]> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.poses.as_slice())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// JSONでは名前→姿勢リストのマップとして書き出す
impl Serialize for PoseCatalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.name, &entry.poses)?;
        }
        map.end()
    }
}

/// 描画1件分: クラスID、表示名、画面ラベル、姿勢
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayInstance {
    pub class_id: u32,
    pub name: String,
    pub label: String,
    pub pose: PoseMatrix,
}

// --- 解決 ---

/// GTラベル列に現れる正のクラスIDを昇順・重複なしで返す
pub fn distinct_class_ids(labels: &Array1<i32>) -> Vec<u32> {
    let mut ids: Vec<u32> = labels.iter().filter(|&&l| l > 0).map(|&l| l as u32).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// 予測姿勢をGTクラスIDごとに名前へ対応付ける
///
/// あるGTクラスが予測に1つも現れないのは未検出であってエラーではない。
/// 対応表に無いクラスIDはモデルと設定の不整合なので致命傷にする。
pub fn resolve_frame(
    gt_class_ids: &[u32],
    voted: &VotedPoses,
    table: &ClassTable,
) -> Result<(PoseCatalog, Vec<OverlayInstance>), ResolveError> {
    let mut catalog = PoseCatalog::new();
    let mut overlays = Vec::new();
    for &cls_id in gt_class_ids {
        for (&pred_cls, pose) in voted.class_ids.iter().zip(&voted.poses) {
            if pred_cls != cls_id {
                continue;
            }
            let name = table.name(cls_id)?;
            let instance = catalog.push(name, *pose);
            overlays.push(OverlayInstance {
                class_id: cls_id,
                name: name.to_string(),
                label: format!("{}_{}", name, instance),
                pose: *pose,
            });
        }
    }
    Ok((catalog, overlays))
}

/// 単一オブジェクト変種: クラス対応表を介さず固定IDと名前で組み立てる
pub fn resolve_frame_single(
    poses: &[PoseMatrix],
    obj_id: u32,
    obj_name: &str,
) -> (PoseCatalog, Vec<OverlayInstance>) {
    let mut catalog = PoseCatalog::new();
    let mut overlays = Vec::new();
    for pose in poses {
        let instance = catalog.push(obj_name, *pose);
        overlays.push(OverlayInstance {
            class_id: obj_id,
            name: obj_name.to_string(),
            label: format!("{}_{}", obj_name, instance),
            pose: *pose,
        });
    }
    (catalog, overlays)
}

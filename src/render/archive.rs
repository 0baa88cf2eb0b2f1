use anyhow::{ensure, Context, Result};
use chrono::{Datelike, Local, Timelike};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pose::PoseCatalog;

/// 注釈つきフレームと姿勢台帳をディスクへ保存するシンク
///
/// 書き込みは単一スレッドから行う前提。0.jpg の上書きは意図した
/// last-write-winsで、排他は取らない。
pub struct FrameArchiver {
    vis_dir: PathBuf,
}

impl FrameArchiver {
    pub fn new(vis_dir: impl Into<PathBuf>) -> Self {
        Self { vis_dir: vis_dir.into() }
    }

    pub fn vis_dir(&self) -> &Path {
        &self.vis_dir
    }

    /// 1フレーム分の4成果物を書き出し、台帳ファイルのパスを返す
    ///
    /// 0.jpg は毎回上書きする「最新」画像。タイムスタンプつきの2枚は
    /// 同一ラン内の衝突を避けるため秒までの時刻をエポックに連結して使う。
    pub fn archive(
        &self,
        annotated: &Mat,
        original: &Mat,
        catalog: &PoseCatalog,
        epoch: i64,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.vis_dir).with_context(|| {
            format!("Failed to create output directory {}", self.vis_dir.display())
        })?;

        let stamp = wall_stamp();
        write_jpg(&self.vis_dir.join("0.jpg"), annotated)?;
        write_jpg(&self.vis_dir.join(format!("{}{}.jpg", epoch, stamp)), annotated)?;
        write_jpg(&self.vis_dir.join(format!("org_{}{}.jpg", epoch, stamp)), original)?;

        let dict_path = self.vis_dir.join(format!("{}_pose_dict.json", epoch));
        let json = serde_json::to_string_pretty(catalog)?;
        fs::write(&dict_path, json)
            .with_context(|| format!("Failed to write {}", dict_path.display()))?;

        println!("{:?}", catalog);
        println!("\n\nPose results saved in: {}", dict_path.display());
        if epoch == 0 {
            println!("\n\nResults saved in {}", self.vis_dir.display());
        }
        Ok(dict_path)
    }
}

/// 月日時分秒をゼロ詰めなしで連結した時刻文字列
fn wall_stamp() -> String {
    let now = Local::now();
    format!(
        "{}{}{}{}{}",
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

fn write_jpg(path: &Path, image: &Mat) -> Result<()> {
    let params = Vector::<i32>::new();
    let path_str = path.to_str().context("output path is not valid UTF-8")?;
    let ok = imgcodecs::imwrite(path_str, image, &params)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    ensure!(ok, "JPEG writer refused {}", path.display());
    Ok(())
}

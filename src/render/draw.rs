use anyhow::Result;
use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

/// クラスIDから表示色を決定的に割り当てる
///
/// 24bit色空間をn_obj等分した位置の値を3チャネルへ分解する。
/// 同じIDには常に同じ色が返る。
pub fn label_color(class_id: u32, n_obj: u32) -> Scalar {
    let mul = 255u64 * 255 * 255 / u64::from(n_obj.max(1)) * u64::from(class_id);
    let c0 = mul / 255 / 255;
    let c1 = (mul / 255) % 255;
    let c2 = mul % 255;
    Scalar::new(c0 as f64, c1 as f64, c2 as f64, 0.0)
}

/// 投影済み2D点を半径1の塗りつぶし円で描く
///
/// 画像外に出た点は縁へクランプして描く。
pub fn draw_points(img: &mut Mat, points: &[(i32, i32)], color: Scalar) -> Result<()> {
    if img.empty() {
        return Ok(());
    }
    let w = img.cols();
    let h = img.rows();
    for &(x, y) in points {
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        imgproc::circle(img, Point::new(x, y), 1, color, imgproc::FILLED, imgproc::LINE_8, 0)?;
    }
    Ok(())
}

/// ラベルの描画位置: 投影点群のバウンディングボックス左上
pub fn label_anchor(points: &[(i32, i32)]) -> (i32, i32) {
    let min_x = points.iter().map(|p| p.0).min().unwrap_or(0);
    let min_y = points.iter().map(|p| p.1).min().unwrap_or(0);
    (min_x, min_y)
}

/// インスタンスラベルを赤字で描く
pub fn draw_label(img: &mut Mat, text: &str, anchor: (i32, i32)) -> Result<()> {
    imgproc::put_text(
        img,
        text,
        Point::new(anchor.0, anchor.1),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        Scalar::new(0.0, 0.0, 255.0, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

use nalgebra::{Matrix3, Matrix3x4, Vector3};

/// 6Dポーズ [R | t] を表す3x4行列
pub type PoseMatrix = Matrix3x4<f32>;

/// 1点をポーズ変換してピンホール投影する
///
/// x' = fx*X/Z + cx, y' = fy*Y/Z + cy
pub fn project_point(
    point: &Vector3<f32>,
    pose: &PoseMatrix,
    cam_scale: f32,
    k: &Matrix3<f32>,
) -> (f32, f32) {
    // カメラ座標系へ: q = R*p + t
    let q = Vector3::new(
        pose[(0, 0)] * point[0] + pose[(0, 1)] * point[1] + pose[(0, 2)] * point[2] + pose[(0, 3)],
        pose[(1, 0)] * point[0] + pose[(1, 1)] * point[1] + pose[(1, 2)] * point[2] + pose[(1, 3)],
        pose[(2, 0)] * point[0] + pose[(2, 1)] * point[1] + pose[(2, 2)] * point[2] + pose[(2, 3)],
    ) * cam_scale;

    let x = k[(0, 0)] * q[0] / q[2] + k[(0, 2)];
    let y = k[(1, 1)] * q[1] / q[2] + k[(1, 2)];
    (x, y)
}

/// メッシュ点群をまとめて投影し、描画用のピクセル座標に丸める
pub fn project_points(
    points: &[Vector3<f32>],
    pose: &PoseMatrix,
    cam_scale: f32,
    k: &Matrix3<f32>,
) -> Vec<(i32, i32)> {
    points
        .iter()
        .map(|p| {
            let (x, y) = project_point(p, pose, cam_scale, k);
            (x.round() as i32, y.round() as i32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_pose() -> PoseMatrix {
        Matrix3x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
        )
    }

    fn test_k() -> Matrix3<f32> {
        Matrix3::new(
            500.0, 0.0, 320.0,
            0.0, 500.0, 240.0,
            0.0, 0.0, 1.0,
        )
    }

    #[test]
    fn test_identity_pose_projects_to_principal_point() {
        // 恒等ポーズで (0,0,1) は厳密に (cx, cy) へ写る
        let k = Matrix3::new(
            1066.778, 0.0, 312.9869,
            0.0, 1067.487, 241.3109,
            0.0, 0.0, 1.0,
        );
        let (x, y) = project_point(&Vector3::new(0.0, 0.0, 1.0), &identity_pose(), 1.0, &k);
        assert_eq!(x, 312.9869);
        assert_eq!(y, 241.3109);
    }

    #[test]
    fn test_offset_point() {
        let (x, y) = project_point(&Vector3::new(0.1, -0.2, 1.0), &identity_pose(), 1.0, &test_k());
        // 500 * 0.1 / 1.0 + 320 = 370
        assert!((x - 370.0).abs() < 1e-4);
        // 500 * -0.2 / 1.0 + 240 = 140
        assert!((y - 140.0).abs() < 1e-4);
    }

    #[test]
    fn test_translation_moves_origin() {
        let pose = Matrix3x4::new(
            1.0, 0.0, 0.0, 0.5,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 2.0,
        );
        let (x, y) = project_point(&Vector3::new(0.0, 0.0, 0.0), &pose, 1.0, &test_k());
        // 500 * 0.5 / 2.0 + 320 = 445
        assert!((x - 445.0).abs() < 1e-4);
        assert!((y - 240.0).abs() < 1e-4);
    }

    #[test]
    fn test_rotation_about_z() {
        // Z軸まわり90度回転: (x, y) -> (-y, x)
        let pose = Matrix3x4::new(
            0.0, -1.0, 0.0, 0.0,
            1.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
        );
        let (x, y) = project_point(&Vector3::new(0.1, 0.0, 1.0), &pose, 1.0, &test_k());
        assert!((x - 320.0).abs() < 1e-4);
        // 500 * 0.1 / 1.0 + 240 = 290
        assert!((y - 290.0).abs() < 1e-4);
    }

    #[test]
    fn test_cam_scale_cancels_in_ratio() {
        // スケールはZにも掛かるため比は不変
        let p = Vector3::new(0.2, 0.1, 2.0);
        let a = project_point(&p, &identity_pose(), 1.0, &test_k());
        let b = project_point(&p, &identity_pose(), 1000.0, &test_k());
        assert!((a.0 - b.0).abs() < 1e-3);
        assert!((a.1 - b.1).abs() < 1e-3);
    }

    #[test]
    fn test_project_points_rounds_to_pixels() {
        let pts = [Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.1, 0.0, 1.0)];
        let p2ds = project_points(&pts, &identity_pose(), 1.0, &test_k());
        assert_eq!(p2ds, vec![(320, 240), (370, 240)]);
    }
}

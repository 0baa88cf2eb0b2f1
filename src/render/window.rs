use anyhow::Result;
use minifb::{Key, Window, WindowOptions};
use opencv::core::{Mat, Vec3b};
use opencv::prelude::*;

/// minifbを使用したフレームビューア
pub struct MinifbRenderer {
    window: Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl MinifbRenderer {
    /// ウィンドウを作成
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )?;

        let buffer = vec![0u32; width * height];

        Ok(Self { window, buffer, width, height })
    }

    /// ウィンドウが開いていてEscが押されていないか
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    /// BGRのMatを転送して表示を更新
    pub fn show(&mut self, frame: &Mat) -> Result<()> {
        let frame_width = frame.cols() as usize;
        let frame_height = frame.rows() as usize;

        // サイズ違いはクロップ(余白は黒のまま)
        for y in 0..self.height.min(frame_height) {
            for x in 0..self.width.min(frame_width) {
                let pixel = frame.at_2d::<Vec3b>(y as i32, x as i32)?;
                // BGR -> RGB -> u32
                let r = pixel[2] as u32;
                let g = pixel[1] as u32;
                let b = pixel[0] as u32;
                self.buffer[y * self.width + x] = (r << 16) | (g << 8) | b;
            }
        }

        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)?;
        Ok(())
    }
}

/// 表示できない環境でも評価を止めないビューアのラッパ
///
/// ウィンドウは最初のフレームのサイズで遅延生成する。生成や更新の失敗は
/// 警告を出して飲み込み、以後の表示要求は何もしない。
pub struct PreviewWindow {
    renderer: Option<MinifbRenderer>,
    title: String,
    tried: bool,
    warned: bool,
}

impl PreviewWindow {
    pub fn new(title: &str) -> Self {
        Self { renderer: None, title: title.to_string(), tried: false, warned: false }
    }

    /// フレームを表示する。失敗しても評価は続行する
    pub fn show(&mut self, frame: &Mat) {
        if frame.empty() {
            return;
        }
        if !self.tried {
            self.tried = true;
            let width = frame.cols() as usize;
            let height = frame.rows() as usize;
            match MinifbRenderer::new(&self.title, width, height) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(e) => {
                    eprintln!("viewer disabled: {:#}", e);
                    return;
                }
            }
        }

        // 閉じられたウィンドウは作り直さない
        let open = self.renderer.as_ref().map_or(false, MinifbRenderer::is_open);
        if !open {
            self.renderer = None;
            return;
        }
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = renderer.show(frame) {
                if !self.warned {
                    eprintln!("viewer update failed: {:#}", e);
                    self.warned = true;
                }
                self.renderer = None;
            }
        }
    }
}

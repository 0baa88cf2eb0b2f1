pub mod archive;
pub mod draw;
pub mod window;

pub use archive::FrameArchiver;
pub use draw::{draw_label, draw_points, label_anchor, label_color};
pub use window::{MinifbRenderer, PreviewWindow};

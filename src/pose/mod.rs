pub mod network;
pub mod resolve;
pub mod voting;

pub use network::{argmax_classes, EvalModeGuard, NetOutput, OnnxPoseNet, Optimizer, PoseNetwork};
pub use resolve::{
    distinct_class_ids, resolve_frame, resolve_frame_single, CatalogEntry, OverlayInstance,
    PoseCatalog,
};
pub use voting::{translation_pose, CentroidVoter, PoseVoter, VotedPoses};

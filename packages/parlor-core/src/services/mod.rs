//! Routing services built on top of the device controllers.

pub mod audio_router;
pub mod volume_router;

pub use audio_router::{AudioMode, AudioRouter, SonosAction, SwitchOutcome};
pub use volume_router::VolumeRouter;

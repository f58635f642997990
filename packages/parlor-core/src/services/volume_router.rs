//! Sink-aware volume routing.
//!
//! Volume requests go to whichever device is actually producing sound:
//! the soundbar when the ARC output is active, the television otherwise.
//! Television-side changes come back through the volume subscription, so
//! only soundbar-side changes publish a snapshot directly.

use std::sync::Arc;

use crate::devices::{SoundOutput, SoundbarControl, TvControl};
use crate::error::ParlorResult;
use crate::state::StateBroadcaster;

/// Step used for soundbar up/down nudges, matching the feel of the
/// television's own volume keys.
const SOUNDBAR_VOLUME_STEP: i8 = 2;

/// Routes volume and mute operations to the active sink.
pub struct VolumeRouter {
    tv: Arc<dyn TvControl>,
    soundbar: Arc<dyn SoundbarControl>,
    state: Arc<StateBroadcaster>,
}

impl VolumeRouter {
    pub fn new(
        tv: Arc<dyn TvControl>,
        soundbar: Arc<dyn SoundbarControl>,
        state: Arc<StateBroadcaster>,
    ) -> Self {
        Self {
            tv,
            soundbar,
            state,
        }
    }

    fn soundbar_active(&self) -> bool {
        self.state.output().as_deref() == Some(SoundOutput::ExternalArc.as_str())
    }

    pub async fn volume_up(&self) -> ParlorResult<()> {
        if self.soundbar_active() {
            let volume = self
                .soundbar
                .set_relative_volume(SOUNDBAR_VOLUME_STEP)
                .await?;
            self.state.record_volume(volume);
        } else {
            self.tv.volume_up().await?;
        }
        Ok(())
    }

    pub async fn volume_down(&self) -> ParlorResult<()> {
        if self.soundbar_active() {
            let volume = self
                .soundbar
                .set_relative_volume(-SOUNDBAR_VOLUME_STEP)
                .await?;
            self.state.record_volume(volume);
        } else {
            self.tv.volume_down().await?;
        }
        Ok(())
    }

    pub async fn set_volume(&self, volume: u8) -> ParlorResult<()> {
        let volume = volume.min(100);
        if self.soundbar_active() {
            self.soundbar.set_volume(volume).await?;
            self.state.record_volume(volume);
        } else {
            self.tv.set_volume(volume).await?;
        }
        Ok(())
    }

    pub async fn set_mute(&self, mute: bool) -> ParlorResult<()> {
        if self.soundbar_active() {
            self.soundbar.set_mute(mute).await?;
            self.state.record_muted(mute);
        } else {
            self.tv.set_mute(mute).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParlorError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Sinks {
        calls: Mutex<Vec<String>>,
    }

    impl Sinks {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    #[async_trait]
    impl TvControl for Sinks {
        async fn set_sound_output(
            &self,
            _output: SoundOutput,
        ) -> ParlorResult<()> {
            Err(ParlorError::Internal("not under test".into()))
        }

        async fn sound_output(&self) -> ParlorResult<String> {
            Err(ParlorError::Internal("not under test".into()))
        }

        async fn volume_up(&self) -> ParlorResult<()> {
            self.record("tv.volume_up");
            Ok(())
        }

        async fn volume_down(&self) -> ParlorResult<()> {
            self.record("tv.volume_down");
            Ok(())
        }

        async fn set_volume(&self, volume: u8) -> ParlorResult<()> {
            self.record(format!("tv.volume {volume}"));
            Ok(())
        }

        async fn set_mute(&self, mute: bool) -> ParlorResult<()> {
            self.record(format!("tv.mute {mute}"));
            Ok(())
        }
    }

    #[async_trait]
    impl SoundbarControl for Sinks {
        async fn stop(&self) -> ParlorResult<()> {
            self.record("sb.stop");
            Ok(())
        }

        async fn play_from_tv_input(&self) -> ParlorResult<()> {
            self.record("sb.play");
            Ok(())
        }

        async fn set_mute(&self, mute: bool) -> ParlorResult<()> {
            self.record(format!("sb.mute {mute}"));
            Ok(())
        }

        async fn set_volume(&self, volume: u8) -> ParlorResult<()> {
            self.record(format!("sb.volume {volume}"));
            Ok(())
        }

        async fn set_relative_volume(&self, delta: i8) -> ParlorResult<u8> {
            self.record(format!("sb.relative {delta}"));
            Ok(40)
        }

        async fn is_reachable(&self, _timeout: Duration) -> bool {
            true
        }
    }

    fn router_with_output(output: Option<&str>) -> (VolumeRouter, Arc<Sinks>, Arc<StateBroadcaster>) {
        let sinks = Arc::new(Sinks::default());
        let state = Arc::new(StateBroadcaster::new());
        if let Some(output) = output {
            state.set_output(output);
        }
        let router = VolumeRouter::new(
            Arc::clone(&sinks) as Arc<dyn TvControl>,
            Arc::clone(&sinks) as Arc<dyn SoundbarControl>,
            Arc::clone(&state),
        );
        (router, sinks, state)
    }

    #[tokio::test]
    async fn tv_sink_routes_to_the_television() {
        let (router, sinks, _state) = router_with_output(Some("tv_speaker"));
        router.volume_up().await.unwrap();
        router.set_mute(true).await.unwrap();
        assert_eq!(*sinks.calls.lock(), vec!["tv.volume_up", "tv.mute true"]);
    }

    #[tokio::test]
    async fn unknown_sink_defaults_to_the_television() {
        let (router, sinks, _state) = router_with_output(None);
        router.volume_down().await.unwrap();
        assert_eq!(*sinks.calls.lock(), vec!["tv.volume_down"]);
    }

    #[tokio::test]
    async fn arc_sink_routes_to_the_soundbar_and_publishes() {
        let (router, sinks, state) = router_with_output(Some("external_arc"));
        router.volume_up().await.unwrap();
        assert_eq!(*sinks.calls.lock(), vec!["sb.relative 2"]);

        // The soundbar path has no subscription feeding the broadcaster,
        // so the router publishes the new volume itself.
        assert_eq!(state.snapshot().unwrap().volume, 40);
    }

    #[tokio::test]
    async fn arc_sink_mute_is_recorded() {
        let (router, sinks, state) = router_with_output(Some("external_arc"));
        router.set_volume(25).await.unwrap();
        router.set_mute(true).await.unwrap();
        assert_eq!(
            *sinks.calls.lock(),
            vec!["sb.volume 25", "sb.mute true"]
        );
        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.volume, 25);
        assert!(snapshot.muted);
    }
}

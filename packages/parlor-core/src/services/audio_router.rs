//! Audio output routing across the television, soundbar, and plug.
//!
//! [`AudioRouter::switch_mode`] maps a requested mode onto an ordered
//! sequence of device calls. Ordering is load-bearing: later steps depend on
//! earlier ones, and the failure behavior of each mode is chosen so that a
//! partial switch leaves the system in the least surprising state. Mode
//! switches are mutually exclusive - a second request while one is in
//! flight is rejected with `busy` rather than queued, so a stale tap on the
//! remote can never replay later against a changed setup.

use std::sync::Arc;

use serde::Serialize;

use crate::config::Timings;
use crate::devices::{DeviceKind, PlugControl, SoundOutput, SoundbarControl, TvControl};
use crate::error::{ParlorError, ParlorResult};
use crate::state::StateBroadcaster;

/// The three mutually exclusive audio modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// The television's own speakers (gaming: no soundbar latency).
    TvSpeaker,
    /// The soundbar over HDMI ARC (normal viewing).
    Soundbar,
    /// The optical headphone adapter (late-night viewing).
    Headphones,
}

impl AudioMode {
    /// The television output this mode drives.
    pub fn target_output(self) -> SoundOutput {
        match self {
            Self::TvSpeaker => SoundOutput::TvSpeaker,
            Self::Soundbar => SoundOutput::ExternalArc,
            Self::Headphones => SoundOutput::ExternalOptical,
        }
    }
}

/// What happened on the soundbar side of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SonosAction {
    /// The soundbar is playing from the TV input.
    Playing,
    /// The plug cut the soundbar's power.
    PoweredOff,
    /// The soundbar was soft-stopped and muted over its own transport.
    Stopped,
}

/// Result of a completed mode switch.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub success: bool,
    /// The television output identifier that is now active.
    pub output: &'static str,
    /// The action taken on the soundbar side.
    pub sonos: SonosAction,
}

impl SwitchOutcome {
    fn new(output: SoundOutput, sonos: SonosAction) -> Self {
        Self {
            success: true,
            output: output.as_str(),
            sonos,
        }
    }
}

/// The audio output router.
pub struct AudioRouter {
    tv: Arc<dyn TvControl>,
    soundbar: Arc<dyn SoundbarControl>,
    plug: Arc<dyn PlugControl>,
    state: Arc<StateBroadcaster>,
    timings: Timings,
    /// Mode switches contend for the same physical devices; this gate makes
    /// them mutually exclusive.
    switch_gate: tokio::sync::Mutex<()>,
}

impl AudioRouter {
    pub fn new(
        tv: Arc<dyn TvControl>,
        soundbar: Arc<dyn SoundbarControl>,
        plug: Arc<dyn PlugControl>,
        state: Arc<StateBroadcaster>,
        timings: Timings,
    ) -> Self {
        Self {
            tv,
            soundbar,
            plug,
            state,
            timings,
            switch_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Drives the devices into the requested mode.
    ///
    /// Only the soundbar boot wait retries, and only up to its fixed bound;
    /// every other device call runs exactly once and any failure aborts the
    /// remaining steps.
    pub async fn switch_mode(&self, mode: AudioMode) -> ParlorResult<SwitchOutcome> {
        let _guard = self
            .switch_gate
            .try_lock()
            .map_err(|_| ParlorError::Busy)?;

        log::info!("[Router] Switching audio mode: {mode:?}");
        let outcome = match mode {
            AudioMode::TvSpeaker => self.to_tv_speaker().await,
            AudioMode::Soundbar => self.to_soundbar().await,
            AudioMode::Headphones => self.to_headphones().await,
        }?;

        self.state.set_output(outcome.output);
        log::info!(
            "[Router] Mode switch complete: output={} sonos={:?}",
            outcome.output,
            outcome.sonos
        );
        Ok(outcome)
    }

    /// The television's own report of the active output. The router never
    /// treats its own bookkeeping as authoritative.
    pub async fn current_output(&self) -> ParlorResult<String> {
        self.tv.sound_output().await
    }

    // ── Mode policies ────────────────────────────────────────────────────

    /// TV speakers first; if the television itself is unreachable nothing
    /// else matters, so no soundbar or plug call is made.
    async fn to_tv_speaker(&self) -> ParlorResult<SwitchOutcome> {
        self.tv
            .set_sound_output(SoundOutput::TvSpeaker)
            .await
            .map_err(|e| e.with_note("while switching television output; nothing else changed"))?;

        let action = self.quiesce_soundbar().await?;
        Ok(SwitchOutcome::new(SoundOutput::TvSpeaker, action))
    }

    /// Power the soundbar, wait for it to boot, start TV-input playback,
    /// and only then point the television at ARC - so a failure on any
    /// earlier step leaves the television output unchanged rather than
    /// aimed at a sink with nothing playing.
    async fn to_soundbar(&self) -> ParlorResult<SwitchOutcome> {
        let plug = self.plug.status().await;
        if plug.reachable {
            if let Err(e) = self.plug.turn_on().await {
                // The soundbar may be powered independently; the boot probe
                // below gives the definitive answer.
                log::warn!("[Router] Plug power-on failed, probing anyway: {e}");
            }
        } else {
            log::info!("[Router] No reachable plug; assuming the soundbar has power");
        }

        let Some(attempt) = self.wait_for_soundbar().await else {
            return Err(ParlorError::BootTimeout {
                device: DeviceKind::Soundbar,
                waited_secs: self.timings.boot_wait_bound_secs(),
            });
        };
        log::info!(
            "[Router] Soundbar reachable (attempt {attempt}); settling {}ms before commands",
            self.timings.boot_settle_ms
        );
        // Reachable is not ready: the device accepts TCP before its
        // transport service does.
        tokio::time::sleep(self.timings.boot_settle()).await;

        self.soundbar
            .play_from_tv_input()
            .await
            .map_err(|e| e.with_note("while starting tv input playback; tv output unchanged"))?;
        self.soundbar
            .set_mute(false)
            .await
            .map_err(|e| e.with_note("while unmuting the soundbar; tv output unchanged"))?;
        self.tv
            .set_sound_output(SoundOutput::ExternalArc)
            .await
            .map_err(|e| e.with_note("soundbar already playing from tv input"))?;

        Ok(SwitchOutcome::new(SoundOutput::ExternalArc, SonosAction::Playing))
    }

    /// Optical out, settle, mute the panel speakers (they drive the optical
    /// adapter and must not also play audibly), then park the soundbar.
    async fn to_headphones(&self) -> ParlorResult<SwitchOutcome> {
        self.tv
            .set_sound_output(SoundOutput::ExternalOptical)
            .await
            .map_err(|e| e.with_note("while switching television output; nothing else changed"))?;

        tokio::time::sleep(self.timings.optical_settle()).await;

        self.tv
            .set_mute(true)
            .await
            .map_err(|e| e.with_note("television output already switched to optical"))?;

        let action = self.quiesce_soundbar().await?;
        Ok(SwitchOutcome::new(SoundOutput::ExternalOptical, action))
    }

    // ── Shared steps ─────────────────────────────────────────────────────

    /// Takes the soundbar out of the audio path: cut its power when the
    /// plug can do that, otherwise soft-stop and mute it over its own
    /// transport.
    ///
    /// Powering off is preferred - a powered soundbar that is merely
    /// stopped would later report itself as available when it is not in
    /// the audio path.
    async fn quiesce_soundbar(&self) -> ParlorResult<SonosAction> {
        let plug = self.plug.status().await;
        if plug.reachable {
            match self.plug.turn_off().await {
                Ok(()) => return Ok(SonosAction::PoweredOff),
                Err(e) => {
                    log::warn!("[Router] Plug power-off failed, soft-stopping instead: {e}");
                }
            }
        }

        self.soundbar
            .stop()
            .await
            .map_err(|e| e.with_note("television output already switched"))?;
        self.soundbar
            .set_mute(true)
            .await
            .map_err(|e| e.with_note("television output already switched"))?;
        Ok(SonosAction::Stopped)
    }

    /// Bounded fixed-interval boot wait. Waits the interval before each
    /// probe - this runs right after power-on, when an immediate probe
    /// cannot succeed. Returns the 1-based attempt that first saw the
    /// soundbar, or `None` when the bound is exhausted.
    async fn wait_for_soundbar(&self) -> Option<u32> {
        for attempt in 1..=self.timings.boot_poll_attempts {
            tokio::time::sleep(self.timings.boot_poll_interval()).await;
            if self
                .soundbar
                .is_reachable(self.timings.probe_timeout())
                .await
            {
                return Some(attempt);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::PlugStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Call-recording double for all three devices.
    #[derive(Default)]
    struct Rig {
        calls: Mutex<Vec<String>>,
        tv_output_fails: bool,
        play_fails: bool,
        plug_reachable: bool,
        plug_commands_fail: bool,
        /// Probe attempt (1-based) on which the soundbar becomes reachable;
        /// `0` means never.
        reachable_on_attempt: u32,
        probes: AtomicU32,
        /// When set, the first probe parks until notified.
        probe_gate: Option<Arc<Notify>>,
    }

    impl Rig {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn tv_err() -> ParlorError {
            ParlorError::ConnectionTimeout {
                device: DeviceKind::Tv,
                timeout_secs: 10,
            }
        }

        fn sb_err() -> ParlorError {
            ParlorError::Unreachable {
                device: DeviceKind::Soundbar,
                message: "connect refused".into(),
            }
        }

        fn plug_err() -> ParlorError {
            ParlorError::Unreachable {
                device: DeviceKind::Plug,
                message: "connect refused".into(),
            }
        }
    }

    #[async_trait]
    impl TvControl for Rig {
        async fn set_sound_output(&self, output: SoundOutput) -> ParlorResult<()> {
            self.record(format!("tv.output {output}"));
            if self.tv_output_fails {
                return Err(Self::tv_err());
            }
            Ok(())
        }

        async fn sound_output(&self) -> ParlorResult<String> {
            self.record("tv.query_output");
            Ok("tv_speaker".to_string())
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
    impl SoundbarControl for Rig {
        async fn stop(&self) -> ParlorResult<()> {
            self.record("sb.stop");
            Ok(())
        }

        async fn play_from_tv_input(&self) -> ParlorResult<()> {
            self.record("sb.play_tv_input");
            if self.play_fails {
                return Err(Self::sb_err());
            }
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

        async fn set_relative_volume(&self, _delta: i8) -> ParlorResult<u8> {
            self.record("sb.relative_volume");
            Ok(42)
        }

        async fn is_reachable(&self, _timeout: Duration) -> bool {
            let attempt = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt == 1 {
                if let Some(gate) = &self.probe_gate {
                    gate.notified().await;
                }
            }
            self.reachable_on_attempt != 0 && attempt >= self.reachable_on_attempt
        }
    }

    #[async_trait]
    impl PlugControl for Rig {
        async fn turn_on(&self) -> ParlorResult<()> {
            self.record("plug.on");
            if self.plug_commands_fail {
                return Err(Self::plug_err());
            }
            Ok(())
        }

        async fn turn_off(&self) -> ParlorResult<()> {
            self.record("plug.off");
            if self.plug_commands_fail {
                return Err(Self::plug_err());
            }
            Ok(())
        }

        async fn status(&self) -> PlugStatus {
            self.record("plug.status");
            if self.plug_reachable {
                PlugStatus {
                    reachable: true,
                    on: Some(false),
                }
            } else {
                PlugStatus::unreachable()
            }
        }
    }

    fn quick_timings() -> Timings {
        Timings {
            boot_poll_attempts: 5,
            ..Timings::default()
        }
    }

    fn router_with(rig: Arc<Rig>, timings: Timings) -> AudioRouter {
        AudioRouter::new(
            Arc::clone(&rig) as Arc<dyn TvControl>,
            Arc::clone(&rig) as Arc<dyn SoundbarControl>,
            rig as Arc<dyn PlugControl>,
            Arc::new(StateBroadcaster::new()),
            timings,
        )
    }

    #[tokio::test]
    async fn tv_speaker_powers_the_soundbar_off_through_the_plug() {
        let rig = Arc::new(Rig {
            plug_reachable: true,
            ..Rig::default()
        });
        let router = router_with(Arc::clone(&rig), quick_timings());

        let outcome = router.switch_mode(AudioMode::TvSpeaker).await.unwrap();
        assert_eq!(outcome.output, "tv_speaker");
        assert_eq!(outcome.sonos, SonosAction::PoweredOff);
        assert_eq!(
            rig.calls(),
            vec!["tv.output tv_speaker", "plug.status", "plug.off"]
        );
    }

    #[tokio::test]
    async fn tv_speaker_with_unreachable_plug_soft_stops_the_soundbar() {
        let rig = Arc::new(Rig::default());
        let router = router_with(Arc::clone(&rig), quick_timings());

        let outcome = router.switch_mode(AudioMode::TvSpeaker).await.unwrap();
        assert_eq!(outcome.sonos, SonosAction::Stopped);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"success": true, "output": "tv_speaker", "sonos": "stopped"})
        );
        assert_eq!(
            rig.calls(),
            vec!["tv.output tv_speaker", "plug.status", "sb.stop", "sb.mute true"]
        );
    }

    #[tokio::test]
    async fn tv_speaker_fails_fast_without_touching_soundbar_or_plug() {
        let rig = Arc::new(Rig {
            tv_output_fails: true,
            plug_reachable: true,
            ..Rig::default()
        });
        let router = router_with(Arc::clone(&rig), quick_timings());

        let err = router.switch_mode(AudioMode::TvSpeaker).await.unwrap_err();
        assert_eq!(err.code(), "connection_timeout");
        assert_eq!(rig.calls(), vec!["tv.output tv_speaker"]);
    }

    #[tokio::test]
    async fn plug_power_off_failure_falls_back_to_soft_stop() {
        let rig = Arc::new(Rig {
            plug_reachable: true,
            plug_commands_fail: true,
            ..Rig::default()
        });
        let router = router_with(Arc::clone(&rig), quick_timings());

        let outcome = router.switch_mode(AudioMode::TvSpeaker).await.unwrap();
        assert_eq!(outcome.sonos, SonosAction::Stopped);
        assert_eq!(
            rig.calls(),
            vec![
                "tv.output tv_speaker",
                "plug.status",
                "plug.off",
                "sb.stop",
                "sb.mute true"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn soundbar_mode_boot_timeout_issues_zero_soundbar_commands() {
        let rig = Arc::new(Rig {
            plug_reachable: true,
            reachable_on_attempt: 0,
            ..Rig::default()
        });
        let router = router_with(Arc::clone(&rig), quick_timings());

        let err = router.switch_mode(AudioMode::Soundbar).await.unwrap_err();
        assert_eq!(err.code(), "device_boot_timeout");
        assert_eq!(rig.probes.load(Ordering::SeqCst), 5);

        let calls = rig.calls();
        assert_eq!(calls, vec!["plug.status", "plug.on"]);
        assert!(!calls.iter().any(|c| c.starts_with("sb.")));
        assert!(!calls.iter().any(|c| c.starts_with("tv.")));
    }

    #[tokio::test(start_paused = true)]
    async fn soundbar_mode_settles_then_plays_then_switches_tv_last() {
        let rig = Arc::new(Rig {
            plug_reachable: true,
            reachable_on_attempt: 3,
            ..Rig::default()
        });
        let router = router_with(Arc::clone(&rig), quick_timings());

        let started = tokio::time::Instant::now();
        let outcome = router.switch_mode(AudioMode::Soundbar).await.unwrap();

        // Three 2s poll intervals, then the 3s settle delay.
        assert_eq!(started.elapsed(), Duration::from_secs(9));
        assert_eq!(
            rig.calls(),
            vec![
                "plug.status",
                "plug.on",
                "sb.play_tv_input",
                "sb.mute false",
                "tv.output external_arc"
            ]
        );
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"success": true, "output": "external_arc", "sonos": "playing"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn soundbar_mode_play_failure_leaves_tv_output_unchanged() {
        let rig = Arc::new(Rig {
            plug_reachable: true,
            reachable_on_attempt: 1,
            play_fails: true,
            ..Rig::default()
        });
        let router = router_with(Arc::clone(&rig), quick_timings());

        let err = router.switch_mode(AudioMode::Soundbar).await.unwrap_err();
        assert_eq!(err.code(), "device_unreachable");
        assert!(err.to_string().contains("tv output unchanged"));
        assert!(!rig.calls().iter().any(|c| c.starts_with("tv.output")));
    }

    #[tokio::test(start_paused = true)]
    async fn soundbar_mode_without_plug_still_probes_the_soundbar() {
        let rig = Arc::new(Rig {
            plug_reachable: false,
            reachable_on_attempt: 1,
            ..Rig::default()
        });
        let router = router_with(Arc::clone(&rig), quick_timings());

        let outcome = router.switch_mode(AudioMode::Soundbar).await.unwrap();
        assert_eq!(outcome.sonos, SonosAction::Playing);
        let calls = rig.calls();
        assert_eq!(calls[0], "plug.status");
        assert!(!calls.contains(&"plug.on".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn headphones_mode_settles_before_muting_the_panel() {
        let rig = Arc::new(Rig {
            plug_reachable: true,
            ..Rig::default()
        });
        let router = router_with(Arc::clone(&rig), quick_timings());

        let started = tokio::time::Instant::now();
        let outcome = router.switch_mode(AudioMode::Headphones).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert_eq!(outcome.output, "external_optical");
        assert_eq!(outcome.sonos, SonosAction::PoweredOff);
        assert_eq!(
            rig.calls(),
            vec![
                "tv.output external_optical",
                "tv.mute true",
                "plug.status",
                "plug.off"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_switch_is_rejected_with_busy_and_never_interleaves() {
        let gate = Arc::new(Notify::new());
        let rig = Arc::new(Rig {
            plug_reachable: false,
            reachable_on_attempt: 1,
            probe_gate: Some(Arc::clone(&gate)),
            ..Rig::default()
        });
        let router = Arc::new(router_with(Arc::clone(&rig), quick_timings()));

        let first = tokio::spawn({
            let router = Arc::clone(&router);
            async move { router.switch_mode(AudioMode::Soundbar).await }
        });
        // Let the first switch claim the gate and park in the boot probe.
        while rig.probes.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let calls_before = rig.calls().len();
        let err = router.switch_mode(AudioMode::TvSpeaker).await.unwrap_err();
        assert_eq!(err.code(), "busy");
        // The rejected switch made no device calls at all.
        assert_eq!(rig.calls().len(), calls_before);

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.sonos, SonosAction::Playing);

        // With the first switch done the gate is free again.
        let outcome = router.switch_mode(AudioMode::TvSpeaker).await.unwrap();
        assert_eq!(outcome.output, "tv_speaker");
    }

    #[tokio::test]
    async fn successful_switch_records_the_output_for_subscribers() {
        let rig = Arc::new(Rig::default());
        let state = Arc::new(StateBroadcaster::new());
        let router = AudioRouter::new(
            Arc::clone(&rig) as Arc<dyn TvControl>,
            Arc::clone(&rig) as Arc<dyn SoundbarControl>,
            rig as Arc<dyn PlugControl>,
            Arc::clone(&state),
            quick_timings(),
        );

        router.switch_mode(AudioMode::TvSpeaker).await.unwrap();
        assert_eq!(state.output().as_deref(), Some("tv_speaker"));
    }
}

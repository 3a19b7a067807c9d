//! Patient session: wires tracking, zones, registration, assets and voice
//!
//! One task owns the session and serializes everything onto a single loop:
//! landmark frames drive ticks, host and voice commands arrive on an mpsc
//! channel. Each tick runs, in order:
//!
//! 1. zone classifier
//! 2. registration engine
//! 3. asset cache load/preload/unload, only on a zone change

use anatomica_assets::ZoneAssetCache;
use anatomica_core::{BodyZone, PatientLandmarkProvider, SharedState, StructureProvider, ViewWriter};
use anatomica_tracking::{LandmarkFrame, LandmarkSource, RegistrationEngine, ZoneClassifier};
use anatomica_voice::{CommandTarget, Recognized, VoiceInterpreter};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;

/// Requests delivered to the session loop
#[derive(Debug)]
pub enum SessionCommand {
    /// Recognized speech text; the reply carries what was executed, if anything
    Voice {
        text: String,
        reply: Option<oneshot::Sender<Option<Recognized>>>,
    },
    SetZone(BodyZone),
    Recalibrate,
    Shutdown,
}

pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    patient_id: String,
    state: SharedState,
    source: LandmarkSource,
    classifier: ZoneClassifier,
    registration: RegistrationEngine,
    cache: ZoneAssetCache,
    interpreter: Arc<VoiceInterpreter>,
    view: ViewWriter,
    landmarks: Arc<dyn PatientLandmarkProvider>,
    ticks: u64,
}

/// Current instant on the tokio clock (pausable in tests)
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl Session {
    pub fn new(
        config: &Config,
        state: SharedState,
        landmarks: Arc<dyn PatientLandmarkProvider>,
        structures: Arc<dyn StructureProvider>,
    ) -> Result<Self> {
        let patient_id = config.session.patient.clone();
        let source = LandmarkSource::new(config.to_source_config()?, state.tracking_writer());
        let classifier = ZoneClassifier::new(config.to_classifier_config(), state.zone_writer());
        let registration = RegistrationEngine::new(config.to_registration_config(), state.calibration_writer());
        let cache = ZoneAssetCache::new(
            config.to_cache_config(),
            patient_id.clone(),
            structures,
            state.asset_writer(),
        );
        let interpreter = Arc::new(VoiceInterpreter::new()?);

        Ok(Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            patient_id,
            view: state.view_writer(),
            state,
            source,
            classifier,
            registration,
            cache,
            interpreter,
            landmarks,
            ticks: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Fetch patient data, start the landmark source and load the initial zone.
    ///
    /// Provider failures are logged and leave the session running with
    /// nothing loaded and no calibration.
    pub async fn start(&mut self) {
        info!(session = %self.id, patient = %self.patient_id, "Starting session");

        match self.landmarks.landmarks(&self.patient_id).await {
            Ok(landmarks) => self.registration.set_patient_landmarks(landmarks),
            Err(e) => warn!(patient = %self.patient_id, error = %e, "Patient landmarks unavailable, registration disabled"),
        }

        if let Err(e) = self.cache.initialize().await {
            warn!(patient = %self.patient_id, error = %e, "Patient structures unavailable");
        }

        self.source.start().await;
        self.enter_zone(None, self.classifier.current_zone());
    }

    /// Process one landmark frame
    pub fn tick(&mut self, frame: &LandmarkFrame, now: Instant) {
        self.ticks += 1;
        let landmarks = frame.live.then_some(&frame.landmarks);

        let previous = self.classifier.current_zone();
        let update = self.classifier.update(landmarks, now);

        self.registration.update(landmarks, now);

        if update.changed {
            self.enter_zone(Some(previous), update.zone);
        }
    }

    /// Load the new zone, warm its neighbours and release zones that are
    /// neither current nor adjacent
    fn enter_zone(&mut self, previous: Option<BodyZone>, zone: BodyZone) {
        debug!(from = ?previous, to = %zone, "Updating resident zones");
        let active_lod = self.cache.config().active_lod;
        self.cache.load_zone(zone, active_lod);
        for neighbour in zone.adjacent() {
            self.cache.preload_zone(*neighbour);
        }
        for resident in self.cache.resident_zones() {
            if resident != zone && !zone.is_adjacent_to(resident) {
                self.cache.unload_zone(resident);
            }
        }
    }

    /// Handle one command. Returns `false` when the session should stop.
    pub fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Voice { text, reply } => {
                let interpreter = self.interpreter.clone();
                let recognized = interpreter.execute_recognized(&text, self);
                if let Some(reply) = reply {
                    let _ = reply.send(recognized);
                }
            }
            SessionCommand::SetZone(zone) => self.set_zone(zone),
            SessionCommand::Recalibrate => self.recalibrate(),
            SessionCommand::Shutdown => return false,
        }
        true
    }

    /// Run until a shutdown command arrives or every command sender is gone
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Result<()> {
        let mut frames = self.source.subscribe();

        loop {
            tokio::select! {
                changed = frames.changed() => {
                    if changed.is_err() {
                        warn!("Landmark source closed");
                        break;
                    }
                    let frame = frames.borrow_and_update().clone();
                    self.tick(&frame, now());
                }
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        commands.close();
        self.stop().await;
        Ok(())
    }

    /// Stop the source, cancel timers and drop late fetch completions
    pub async fn stop(&mut self) {
        self.source.stop().await;
        self.cache.shutdown();
        let elapsed = Utc::now() - self.started_at;
        info!(
            session = %self.id,
            ticks = self.ticks,
            duration_secs = elapsed.num_seconds(),
            "Session stopped"
        );
    }
}

impl CommandTarget for Session {
    fn view(&self) -> &ViewWriter {
        &self.view
    }

    fn recalibrate(&mut self) {
        self.registration.request_recalibration(now());
    }

    fn set_zone(&mut self, zone: BodyZone) {
        let previous = self.classifier.current_zone();
        let update = self.classifier.set_manual_zone(zone, now());
        if update.changed {
            self.enter_zone(Some(previous), update.zone);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomica_core::{CalibrationStatus, LandmarkSet, PatientCatalog, ViewMode};
    use std::time::Duration;

    fn live_frame(sequence: u64) -> LandmarkFrame {
        let mut set = LandmarkSet::idle();
        for p in set.points_mut() {
            p.visibility = 0.9;
        }
        LandmarkFrame::live(set, sequence)
    }

    async fn demo_session() -> Session {
        let catalog = Arc::new(PatientCatalog::demo());
        let mut session = Session::new(&Config::default(), SharedState::new(), catalog.clone(), catalog).unwrap();
        session.start().await;
        session
    }

    fn voice(session: &mut Session, text: &str) -> bool {
        let (tx, mut rx) = oneshot::channel();
        session.handle_command(SessionCommand::Voice {
            text: text.to_string(),
            reply: Some(tx),
        });
        rx.try_recv().unwrap().is_some()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_loads_initial_zone_and_neighbours() {
        let session = demo_session().await;
        session.cache.settle().await;

        let heart = session.cache.get_organ("HEART").unwrap();
        assert_eq!(heart.lod, anatomica_core::Lod::High);
        let liver = session.cache.get_organ("LIVER").unwrap();
        assert_eq!(liver.lod, anatomica_core::Lod::Low);
        assert!(session.state().snapshot().tracking_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recalibrate_by_voice() {
        let mut session = demo_session().await;
        session.tick(&live_frame(1), now());
        assert!(session.state().snapshot().calibrated);

        assert!(voice(&mut session, "recalibrer"));
        let snap = session.state().snapshot();
        assert!(!snap.calibrated);
        assert_eq!(snap.calibration, CalibrationStatus::Calibrating);
        assert!(session.registration.pending_attempt().is_some());

        tokio::time::advance(Duration::from_millis(600)).await;
        session.tick(&live_frame(2), now());
        assert!(session.state().snapshot().calibrated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zone_change_swaps_resident_zones() {
        let mut session = demo_session().await;
        session.cache.settle().await;

        assert!(voice(&mut session, "go to the legs"));
        assert_eq!(session.state().snapshot().current_zone, BodyZone::LowerLimb);
        session.cache.settle().await;

        // Thorax is neither current nor adjacent to the lower limb
        let resident = session.cache.resident_zones();
        assert!(resident.contains(&BodyZone::LowerLimb));
        assert!(resident.contains(&BodyZone::Pelvis));
        assert!(!resident.contains(&BodyZone::Thorax));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(session.cache.get_organ("HEART").is_none());
        assert!(session.cache.get_organ("FEMUR").unwrap().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_view_commands_and_unrecognized() {
        let mut session = demo_session().await;
        session.cache.settle().await;

        assert!(voice(&mut session, "zoom sur le cœur"));
        let snap = session.state().snapshot();
        assert_eq!(snap.focused_structure.as_deref(), Some("HEART"));
        assert_eq!(snap.view_mode, ViewMode::Isolated);

        let before = session.state().snapshot();
        assert!(!voice(&mut session, "gibberish not a command"));
        assert_eq!(session.state().snapshot(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let session = demo_session().await;
        let state = session.state().clone();
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(rx));

        tx.send(SessionCommand::Recalibrate).await.unwrap();
        tx.send(SessionCommand::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();

        assert!(!state.snapshot().tracking_active);
    }

    #[tokio::test]
    async fn test_stop_releases_tracker_socket() {
        let addr = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut config = Config::default();
        config.tracking.source = "udp".to_string();
        config.tracking.udp_bind = addr.to_string();

        let catalog = Arc::new(PatientCatalog::demo());
        let mut session = Session::new(&config, SharedState::new(), catalog.clone(), catalog).unwrap();
        session.start().await;
        assert!(session.state().snapshot().tracking_active);

        session.stop().await;
        assert!(std::net::UdpSocket::bind(addr).is_ok());
    }
}

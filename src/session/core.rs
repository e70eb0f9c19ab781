use super::configuration::{CaptureMode, DevicePosition, FlashMode, SessionConfiguration, TorchMode};
use super::state::SessionState;
use crate::clip::Clip;
use crate::config::{ClipcamConfig, WriterConfig};
use crate::error::SessionError;
use crate::events::{CaptureEvent, EventBus};
use crate::router::BufferRouter;
use crate::sample::DeviceOrientation;
use crate::source::{DeviceNegotiator, SourceEvent};
use crate::storage::ClipSink;
use crate::writer::ClipWriter;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Requests handled one at a time, in arrival order, by the session task
enum Command {
    Start {
        configuration: SessionConfiguration,
        reply: Reply<SessionConfiguration>,
    },
    Reconfigure {
        configuration: SessionConfiguration,
        reply: Reply<SessionConfiguration>,
    },
    Interrupt {
        reason: String,
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<Vec<Clip>>,
    },
    StartClip {
        reply: Reply<Uuid>,
    },
    EndClip {
        reply: Reply<Clip>,
    },
    SetCaptureMode {
        mode: CaptureMode,
        reply: Reply<()>,
    },
    Source {
        event: SourceEvent,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Shutdown {
        reply: Reply<Vec<Clip>>,
    },
}

/// Point-in-time copy of the session's attributes
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub clips: Vec<Clip>,
    pub open_clip: Option<Uuid>,
    pub configuration: Option<SessionConfiguration>,
    pub capture_mode: CaptureMode,
    pub device_position: DevicePosition,
    pub orientation: DeviceOrientation,
    pub zoom_factor: f32,
    pub flash_mode: FlashMode,
    pub torch_mode: TorchMode,
}

/// The recording activity owned by the session task
struct Session {
    state: SessionState,
    clips: Vec<Clip>,
    open_clip: Option<Arc<ClipWriter>>,
    next_clip_index: usize,
    configuration: Option<SessionConfiguration>,
    capture_mode: CaptureMode,
    device_position: DevicePosition,
    orientation: DeviceOrientation,
    zoom_factor: f32,
    flash_mode: FlashMode,
    torch_mode: TorchMode,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            clips: Vec::new(),
            open_clip: None,
            next_clip_index: 0,
            configuration: None,
            capture_mode: CaptureMode::default(),
            device_position: DevicePosition::default(),
            orientation: DeviceOrientation::default(),
            zoom_factor: 1.0,
            flash_mode: FlashMode::default(),
            torch_mode: TorchMode::default(),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            clips: self.clips.clone(),
            open_clip: self.open_clip.as_ref().map(|w| w.clip_id()),
            configuration: self.configuration.clone(),
            capture_mode: self.capture_mode,
            device_position: self.device_position,
            orientation: self.orientation,
            zoom_factor: self.zoom_factor,
            flash_mode: self.flash_mode,
            torch_mode: self.torch_mode,
        }
    }
}

/// Handle to a capture session.
///
/// Lifecycle requests are serialized through a single task: a request that
/// arrives while another is being applied waits its turn and is applied in
/// arrival order. Samples bypass this queue and go straight to the
/// [`BufferRouter`] returned by [`CaptureSession::router`].
pub struct CaptureSession {
    commands: mpsc::Sender<Command>,
    router: BufferRouter,
    event_bus: Arc<EventBus>,
    task: JoinHandle<()>,
}

impl CaptureSession {
    /// Create an idle session and spawn its arbiter task
    pub fn new(
        config: &ClipcamConfig,
        negotiator: Arc<dyn DeviceNegotiator>,
        sink: Arc<dyn ClipSink>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(config.session.command_queue_capacity.max(1));
        let router = BufferRouter::new(Arc::clone(&event_bus));

        let actor = SessionActor {
            session: Session::new(),
            router: router.clone(),
            event_bus: Arc::clone(&event_bus),
            negotiator,
            sink,
            writer_config: config.writer.clone(),
        };
        let task = tokio::spawn(actor.run(receiver));

        Self {
            commands,
            router,
            event_bus,
            task,
        }
    }

    /// Router the frame source pushes samples into
    pub fn router(&self) -> BufferRouter {
        self.router.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Current state as seen by the sample path
    pub fn state(&self) -> SessionState {
        self.router.state()
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Negotiate the device and start running; valid from idle or stopped
    pub async fn start(
        &self,
        configuration: SessionConfiguration,
    ) -> Result<SessionConfiguration, SessionError> {
        self.request(|reply| Command::Start {
            configuration,
            reply,
        })
        .await
    }

    /// Re-negotiate the device while running or interrupted, keeping the open clip
    pub async fn reconfigure(
        &self,
        configuration: SessionConfiguration,
    ) -> Result<SessionConfiguration, SessionError> {
        self.request(|reply| Command::Reconfigure {
            configuration,
            reply,
        })
        .await
    }

    /// Pause sample acceptance without closing the open clip
    pub async fn interrupt(&self, reason: impl Into<String>) -> Result<(), SessionError> {
        let reason = reason.into();
        self.request(|reply| Command::Interrupt { reason, reply }).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Finalize any open clip and stop; returns every clip the session holds
    pub async fn stop(&self) -> Result<Vec<Clip>, SessionError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn start_clip(&self) -> Result<Uuid, SessionError> {
        self.request(|reply| Command::StartClip { reply }).await
    }

    pub async fn end_clip(&self) -> Result<Clip, SessionError> {
        self.request(|reply| Command::EndClip { reply }).await
    }

    pub async fn set_capture_mode(&self, mode: CaptureMode) -> Result<(), SessionError> {
        self.request(|reply| Command::SetCaptureMode { mode, reply })
            .await
    }

    /// Apply a device notification from the frame source
    pub async fn handle_source_event(&self, event: SourceEvent) -> Result<(), SessionError> {
        self.request(|reply| Command::Source { event, reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Tear the session down, stopping it first if needed, and hand back its clips
    pub async fn shutdown(self) -> Result<Vec<Clip>, SessionError> {
        let clips = self.request(|reply| Command::Shutdown { reply }).await?;
        if let Err(e) = self.task.await {
            error!("Session task ended abnormally: {}", e);
        }
        Ok(clips)
    }
}

struct SessionActor {
    session: Session,
    router: BufferRouter,
    event_bus: Arc<EventBus>,
    negotiator: Arc<dyn DeviceNegotiator>,
    sink: Arc<dyn ClipSink>,
    writer_config: WriterConfig,
}

impl SessionActor {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        debug!("Session task started");

        while let Some(command) = receiver.recv().await {
            match command {
                Command::Start {
                    configuration,
                    reply,
                } => {
                    let _ = reply.send(self.start(configuration).await);
                }
                Command::Reconfigure {
                    configuration,
                    reply,
                } => {
                    let _ = reply.send(self.reconfigure(configuration).await);
                }
                Command::Interrupt { reason, reply } => {
                    let _ = reply.send(self.interrupt(reason));
                }
                Command::Resume { reply } => {
                    let _ = reply.send(self.resume());
                }
                Command::Stop { reply } => {
                    let _ = reply.send(self.stop().await);
                }
                Command::StartClip { reply } => {
                    let _ = reply.send(self.start_clip().await);
                }
                Command::EndClip { reply } => {
                    let _ = reply.send(self.end_clip().await);
                }
                Command::SetCaptureMode { mode, reply } => {
                    self.set_capture_mode(mode);
                    let _ = reply.send(Ok(()));
                }
                Command::Source { event, reply } => {
                    let _ = reply.send(self.handle_source_event(event));
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(Ok(self.session.snapshot()));
                }
                Command::Shutdown { reply } => {
                    self.teardown().await;
                    let _ = reply.send(Ok(std::mem::take(&mut self.session.clips)));
                    info!("Session shut down");
                    return;
                }
            }
        }

        // Every handle is gone; never leave a clip open behind us
        self.teardown().await;
        debug!("Session task finished");
    }

    async fn teardown(&mut self) {
        if self.session.state.can_stop() {
            if let Err(e) = self.stop().await {
                warn!("Stopping session during teardown failed: {}", e);
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        let from = self.session.state;
        debug_assert!(
            from.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            from,
            next
        );
        self.session.state = next;
        self.router.set_state(next);
        self.event_bus
            .emit(CaptureEvent::SessionStateChanged { from, to: next });
    }

    fn reject<T>(&self, operation: &'static str, error: SessionError) -> Result<T, SessionError> {
        self.event_bus.emit(CaptureEvent::SessionRequestRejected {
            operation,
            error: error.to_string(),
        });
        Err(error)
    }

    fn invalid<T>(&self, operation: &'static str) -> Result<T, SessionError> {
        self.reject(
            operation,
            SessionError::InvalidTransition {
                from: self.session.state,
                operation,
            },
        )
    }

    fn publish_configuration(&self, configuration: &SessionConfiguration) {
        self.event_bus.emit(CaptureEvent::VideoConfigurationUpdated {
            configuration: configuration.video.clone(),
        });
        if let Some(audio) = &configuration.audio {
            self.event_bus.emit(CaptureEvent::AudioConfigurationUpdated {
                configuration: audio.clone(),
            });
        }
    }

    fn adopt_configuration(&mut self, configuration: &SessionConfiguration) {
        self.session.capture_mode = configuration.capture_mode;
        self.session.device_position = configuration.device_position;
        self.session.flash_mode = configuration.flash_mode;
        self.session.torch_mode = configuration.torch_mode;
        self.session.configuration = Some(configuration.clone());
    }

    async fn start(
        &mut self,
        configuration: SessionConfiguration,
    ) -> Result<SessionConfiguration, SessionError> {
        if !self.session.state.can_start() {
            return self.invalid("start");
        }

        info!("Starting capture session");
        self.event_bus.emit(CaptureEvent::SessionWillStart);
        self.transition(SessionState::Configuring);

        match self.negotiator.negotiate(&configuration).await {
            Ok(negotiated) => {
                self.adopt_configuration(&negotiated);
                self.publish_configuration(&negotiated);
                self.transition(SessionState::Running);
                self.event_bus.emit(CaptureEvent::SessionDidStart);
                Ok(negotiated)
            }
            Err(details) => {
                self.transition(SessionState::Idle);
                self.event_bus.emit(CaptureEvent::ConfigurationFailed {
                    details: details.clone(),
                });
                Err(SessionError::Configuration { details })
            }
        }
    }

    async fn reconfigure(
        &mut self,
        configuration: SessionConfiguration,
    ) -> Result<SessionConfiguration, SessionError> {
        if !self.session.state.is_active() {
            return self.invalid("reconfigure");
        }

        let previous_mode = self.session.capture_mode;
        let previous_position = self.session.device_position;
        let mode_change = configuration.capture_mode != previous_mode;
        let position_change = configuration.device_position != previous_position;

        if mode_change {
            self.event_bus.emit(CaptureEvent::CaptureModeWillChange {
                from: previous_mode,
                to: configuration.capture_mode,
            });
        }
        if position_change {
            self.event_bus.emit(CaptureEvent::DevicePositionWillChange {
                position: configuration.device_position,
            });
        }

        match self.negotiator.negotiate(&configuration).await {
            Ok(negotiated) => {
                self.adopt_configuration(&negotiated);
                self.publish_configuration(&negotiated);
                if position_change {
                    self.event_bus.emit(CaptureEvent::DevicePositionDidChange {
                        position: negotiated.device_position,
                    });
                }
                if mode_change {
                    self.event_bus.emit(CaptureEvent::CaptureModeDidChange {
                        mode: negotiated.capture_mode,
                    });
                }
                info!("Session reconfigured");
                Ok(negotiated)
            }
            Err(details) => {
                warn!("Reconfiguration rejected, keeping current configuration");
                self.event_bus.emit(CaptureEvent::ConfigurationFailed {
                    details: details.clone(),
                });
                Err(SessionError::Configuration { details })
            }
        }
    }

    fn interrupt(&mut self, reason: String) -> Result<(), SessionError> {
        match self.session.state {
            SessionState::Running => {
                info!("Session interrupted: {}", reason);
                self.transition(SessionState::Interrupted);
                self.event_bus
                    .emit(CaptureEvent::SessionInterrupted { reason });
                Ok(())
            }
            SessionState::Interrupted => Ok(()),
            _ => self.invalid("interrupt"),
        }
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        if self.session.state != SessionState::Interrupted {
            return self.invalid("resume");
        }
        info!("Session interruption ended");
        self.transition(SessionState::Running);
        self.event_bus.emit(CaptureEvent::SessionInterruptionEnded);
        Ok(())
    }

    async fn stop(&mut self) -> Result<Vec<Clip>, SessionError> {
        if !self.session.state.can_stop() {
            return self.invalid("stop");
        }

        info!("Stopping capture session");
        let from = self.session.state;
        // State change and clip detachment happen under one router lock, so no
        // sample can slip into the clip after this point
        let writer = self.router.set_state_and_take_writer(SessionState::Stopping);
        self.session.state = SessionState::Stopping;
        self.session.open_clip = None;
        self.event_bus.emit(CaptureEvent::SessionStateChanged {
            from,
            to: SessionState::Stopping,
        });

        let finalized = match writer {
            Some(writer) => self.finalize_clip(&writer).await.map(|_| ()),
            None => Ok(()),
        };

        self.transition(SessionState::Stopped);
        self.event_bus.emit(CaptureEvent::SessionDidStop);
        self.event_bus.emit(CaptureEvent::SessionCompleted {
            clips: self.session.clips.clone(),
        });

        info!(
            "Capture session stopped with {} clip(s)",
            self.session.clips.len()
        );
        finalized?;
        Ok(self.session.clips.clone())
    }

    async fn start_clip(&mut self) -> Result<Uuid, SessionError> {
        if self.session.state != SessionState::Running {
            return self.invalid("start clip");
        }
        if self.session.open_clip.is_some() {
            return self.reject("start clip", SessionError::ClipAlreadyOpen);
        }

        let index = self.session.next_clip_index;
        let writer = match ClipWriter::open(
            index,
            self.sink.as_ref(),
            &self.writer_config,
            Arc::clone(&self.event_bus),
        )
        .await
        {
            Ok(writer) => Arc::new(writer),
            Err(e) => {
                return self.reject(
                    "start clip",
                    SessionError::Storage {
                        details: e.to_string(),
                    },
                )
            }
        };

        let clip_id = writer.clip_id();
        self.session.next_clip_index += 1;
        self.session.open_clip = Some(Arc::clone(&writer));
        self.router.install_writer(writer);
        self.event_bus
            .emit(CaptureEvent::ClipStarted { clip_id, index });
        Ok(clip_id)
    }

    async fn end_clip(&mut self) -> Result<Clip, SessionError> {
        if self.session.state != SessionState::Running {
            return self.invalid("end clip");
        }
        if self.session.open_clip.is_none() {
            return self.reject("end clip", SessionError::NoOpenClip);
        }

        self.session.open_clip = None;
        match self.router.take_writer() {
            Some(writer) => self.finalize_clip(&writer).await,
            None => self.reject("end clip", SessionError::NoOpenClip),
        }
    }

    /// Drain and seal a detached clip, recording it on success
    async fn finalize_clip(&mut self, writer: &ClipWriter) -> Result<Clip, SessionError> {
        match writer.finalize().await {
            Ok(clip) => {
                info!(
                    "Clip {} completed: {} appended, {} skipped",
                    clip.index,
                    clip.counts.total_appended(),
                    clip.counts.total_skipped()
                );
                self.session.clips.push(clip.clone());
                self.event_bus
                    .emit(CaptureEvent::ClipCompleted { clip: clip.clone() });
                Ok(clip)
            }
            Err(e) => {
                error!("Failed to finalize clip {}: {}", writer.clip_id(), e);
                self.reject(
                    "finalize clip",
                    SessionError::Storage {
                        details: e.to_string(),
                    },
                )
            }
        }
    }

    fn set_capture_mode(&mut self, mode: CaptureMode) {
        let from = self.session.capture_mode;
        if from == mode {
            return;
        }
        self.event_bus
            .emit(CaptureEvent::CaptureModeWillChange { from, to: mode });
        self.session.capture_mode = mode;
        if let Some(configuration) = self.session.configuration.as_mut() {
            configuration.capture_mode = mode;
        }
        self.event_bus.emit(CaptureEvent::CaptureModeDidChange { mode });
    }

    fn handle_source_event(&mut self, event: SourceEvent) -> Result<(), SessionError> {
        let bus = Arc::clone(&self.event_bus);
        match event {
            SourceEvent::InterruptionBegan { reason } => return self.interrupt(reason),
            SourceEvent::InterruptionEnded => return self.resume(),
            SourceEvent::AuthorizationChanged { media, status } => {
                bus.emit(CaptureEvent::AuthorizationChanged { media, status });
            }
            SourceEvent::DevicePositionChanged { position } => {
                if position != self.session.device_position {
                    bus.emit(CaptureEvent::DevicePositionWillChange { position });
                    self.session.device_position = position;
                    if let Some(configuration) = self.session.configuration.as_mut() {
                        configuration.device_position = position;
                    }
                    bus.emit(CaptureEvent::DevicePositionDidChange { position });
                }
            }
            SourceEvent::OrientationChanged { orientation } => {
                self.session.orientation = orientation;
                bus.emit(CaptureEvent::DeviceOrientationChanged { orientation });
            }
            SourceEvent::FormatChanged { format } => {
                bus.emit(CaptureEvent::DeviceFormatChanged { format });
            }
            SourceEvent::CleanApertureChanged {
                x,
                y,
                width,
                height,
            } => {
                bus.emit(CaptureEvent::CleanApertureChanged {
                    x,
                    y,
                    width,
                    height,
                });
            }
            SourceEvent::LensPositionChanged { position } => {
                bus.emit(CaptureEvent::LensPositionChanged { position });
            }
            SourceEvent::AdjustmentChanged { adjustment, active } => {
                bus.emit(CaptureEvent::DeviceAdjustmentChanged { adjustment, active });
            }
            SourceEvent::ZoomChanged { factor } => {
                self.session.zoom_factor = factor;
                bus.emit(CaptureEvent::VideoZoomUpdated { factor });
            }
            SourceEvent::FlashModeChanged { mode } => {
                self.session.flash_mode = mode;
                bus.emit(CaptureEvent::FlashModeChanged { mode });
            }
            SourceEvent::TorchModeChanged { mode } => {
                self.session.torch_mode = mode;
                bus.emit(CaptureEvent::TorchModeChanged { mode });
            }
            SourceEvent::FlashActiveChanged { active } => {
                bus.emit(CaptureEvent::FlashActiveChanged { active });
            }
            SourceEvent::TorchActiveChanged { active } => {
                bus.emit(CaptureEvent::TorchActiveChanged { active });
            }
            SourceEvent::FlashTorchAvailabilityChanged {
                flash_available,
                torch_available,
            } => {
                bus.emit(CaptureEvent::FlashTorchAvailabilityChanged {
                    flash_available,
                    torch_available,
                });
            }
        }
        Ok(())
    }
}

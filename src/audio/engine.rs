use std::io::Cursor;
use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tokio::sync::oneshot;

use super::PlaybackError;

/// Output side of playback. Implementations hold at most one sink and replace
/// it on every `play`.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Decodes `audio` and starts it, replacing whatever was playing.
    async fn play(&self, audio: Vec<u8>) -> Result<(), PlaybackError>;
    /// Stops and drops the current sink. No-op when idle.
    fn stop(&self);
    fn set_volume(&self, volume: f32);
}

enum AudioCommand {
    Play {
        audio: Vec<u8>,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    Stop,
    SetVolume(f32),
}

/// rodio output on a dedicated thread; `OutputStream` is not `Send`.
pub struct RodioEngine {
    tx: Arc<Mutex<Option<Sender<AudioCommand>>>>,
    initial_volume: f32,
}

impl RodioEngine {
    pub fn new(volume: f32) -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
            initial_volume: volume.clamp(0.0, 1.0),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, PlaybackError> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|e| PlaybackError::Device(e.to_string()))?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();
        let mut volume = self.initial_volume;

        thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || {
                let mut stream: Option<(OutputStream, OutputStreamHandle)> = None;
                let mut sink: Option<Sink> = None;

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Play { audio, reply } => {
                            if let Some(s_old) = sink.take() {
                                s_old.stop();
                            }
                            let result = start_sink(&mut stream, audio, volume).map(|s_new| {
                                sink = Some(s_new);
                            });
                            let _ = reply.send(result);
                        }
                        AudioCommand::Stop => {
                            if let Some(s_old) = sink.take() {
                                s_old.stop();
                            }
                            stream = None;
                        }
                        AudioCommand::SetVolume(v) => {
                            volume = v.clamp(0.0, 1.0);
                            if let Some(ref s) = sink {
                                s.set_volume(volume);
                            }
                        }
                    }
                }
                log::debug!("audio engine thread exiting");
            })
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        *guard = Some(tx.clone());
        Ok(tx)
    }
}

fn start_sink(
    stream: &mut Option<(OutputStream, OutputStreamHandle)>,
    audio: Vec<u8>,
    volume: f32,
) -> Result<Sink, PlaybackError> {
    if stream.is_none() {
        let opened = OutputStream::try_default()
            .map_err(|e| PlaybackError::Device(format!("failed to open audio output: {e}")))?;
        *stream = Some(opened);
    }
    let Some((_, handle)) = stream.as_ref() else {
        return Err(PlaybackError::Device("audio output unavailable".into()));
    };

    let source = Decoder::new(Cursor::new(audio)).map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let sink = Sink::try_new(handle)
        .map_err(|e| PlaybackError::Device(format!("failed to create audio sink: {e}")))?;
    sink.set_volume(volume);
    sink.append(source);
    Ok(sink)
}

#[async_trait]
impl AudioEngine for RodioEngine {
    async fn play(&self, audio: Vec<u8>) -> Result<(), PlaybackError> {
        let tx = self.ensure_thread()?;
        let (reply, rx) = oneshot::channel();
        tx.send(AudioCommand::Play { audio, reply })
            .map_err(|_| PlaybackError::EngineUnavailable)?;
        rx.await.map_err(|_| PlaybackError::EngineUnavailable)?
    }

    fn stop(&self) {
        if let Ok(Some(tx)) = self.tx.lock().map(|g| g.clone()) {
            let _ = tx.send(AudioCommand::Stop);
        }
    }

    fn set_volume(&self, volume: f32) {
        match self.ensure_thread() {
            Ok(tx) => {
                let _ = tx.send(AudioCommand::SetVolume(volume));
            }
            Err(err) => log::warn!("cannot set volume: {err}"),
        }
    }
}

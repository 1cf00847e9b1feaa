//! Audio sinks fed by the streaming session.
//!
//! Playback goes through rodio on a dedicated thread, since the output
//! stream cannot leave the thread that opened it. Buffered samples are handed
//! to the device once per flush interval, which smooths network jitter
//! without adding noticeable latency.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hound::{WavSpec, WavWriter};
use paroli_protocol::AudioFormat;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

use crate::ClientError;

/// Consumer of ordered PCM chunks.
///
/// `feed` must return immediately. Dropping a sink discards whatever it
/// still holds.
pub trait AudioSink: Send {
    fn feed(&mut self, pcm: Vec<u8>);

    /// Flush and wait until buffered audio has played out
    fn finish(&mut self) {}
}

/// Builds one fresh sink per connection
pub trait SinkFactory {
    type Sink: AudioSink;

    fn create(&mut self, format: AudioFormat) -> Result<Self::Sink, ClientError>;
}

/// Reassembles little-endian i16 samples split across chunk boundaries
#[derive(Debug, Default)]
pub struct PcmAssembler {
    carry: Option<u8>,
}

impl PcmAssembler {
    pub fn push(&mut self, bytes: &[u8], out: &mut Vec<i16>) {
        let mut bytes = bytes;
        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((high, rest)) => {
                    out.push(i16::from_le_bytes([low, *high]));
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return;
                }
            }
        }

        let mut pairs = bytes.chunks_exact(2);
        out.extend(pairs.by_ref().map(|p| i16::from_le_bytes([p[0], p[1]])));
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }
    }
}

enum Playback {
    Chunk(Vec<u8>),
    Finish,
}

/// Plays PCM on the default output device
pub struct SpeakerSinkFactory {
    flush_interval: Duration,
}

impl SpeakerSinkFactory {
    pub fn new(flush_interval: Duration) -> Self {
        Self { flush_interval }
    }
}

impl SinkFactory for SpeakerSinkFactory {
    type Sink = SpeakerSink;

    fn create(&mut self, format: AudioFormat) -> Result<SpeakerSink, ClientError> {
        let (commands, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let flush_interval = self.flush_interval;

        // The device opens on the playback thread; failures show up on feed
        let thread = std::thread::Builder::new()
            .name("paroli-playback".to_string())
            .spawn(move || playback_loop(format, flush_interval, rx, ready_tx))
            .map_err(|e| ClientError::Audio(format!("failed to start playback thread: {}", e)))?;

        Ok(SpeakerSink {
            commands: Some(commands),
            ready: Some(ready_rx),
            thread: Some(thread),
        })
    }
}

pub struct SpeakerSink {
    commands: Option<mpsc::Sender<Playback>>,
    /// Device open result, until it has been seen
    ready: Option<mpsc::Receiver<Result<(), String>>>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerSink {
    /// Stop feeding once the device failed to open
    fn check_device(&mut self) {
        let Some(ready) = &self.ready else {
            return;
        };
        match ready.try_recv() {
            Ok(Ok(())) => self.ready = None,
            Ok(Err(message)) => {
                error!("{}", ClientError::Audio(message));
                self.ready = None;
                self.commands = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.ready = None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.commands.is_some()
    }
}

impl AudioSink for SpeakerSink {
    fn feed(&mut self, pcm: Vec<u8>) {
        self.check_device();
        if let Some(commands) = &self.commands {
            if commands.send(Playback::Chunk(pcm)).is_err() {
                warn!("Playback thread is gone, dropping audio");
            }
        }
    }

    fn finish(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Playback::Finish);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Playback thread panicked");
            }
        }
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        // Closing the channel makes the thread stop the device and exit
        self.commands.take();
    }
}

fn playback_loop(
    format: AudioFormat,
    flush_interval: Duration,
    commands: mpsc::Receiver<Playback>,
    ready: mpsc::SyncSender<Result<(), String>>,
) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(e) => {
            let _ = ready.send(Err(format!("no output device: {}", e)));
            return;
        }
    };
    let sink = match Sink::try_new(&stream_handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to create sink: {}", e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut assembler = PcmAssembler::default();
    let mut pending: Vec<i16> = Vec::with_capacity(format.samples_for(flush_interval));
    let mut deadline = Instant::now() + flush_interval;

    loop {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match commands.recv_timeout(timeout) {
            Ok(Playback::Chunk(bytes)) => assembler.push(&bytes, &mut pending),
            Ok(Playback::Finish) => {
                flush(&sink, format, &mut pending);
                sink.sleep_until_end();
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                flush(&sink, format, &mut pending);
                deadline = Instant::now() + flush_interval;
            }
            Err(RecvTimeoutError::Disconnected) => {
                sink.stop();
                return;
            }
        }
    }
}

fn flush(sink: &Sink, format: AudioFormat, pending: &mut Vec<i16>) {
    if pending.is_empty() {
        return;
    }
    let samples = std::mem::take(pending);
    debug!(samples = samples.len(), "Scheduling audio");
    sink.append(SamplesBuffer::new(format.channels, format.sample_rate, samples));
}

/// Records each connection's audio to a WAV file.
///
/// The first connection writes to the given path; later ones get a numeric
/// suffix (`speech.wav`, `speech-1.wav`, ...).
pub struct WavSinkFactory {
    path: PathBuf,
    created: usize,
}

impl WavSinkFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            created: 0,
        }
    }

    fn next_path(&mut self) -> PathBuf {
        let n = self.created;
        self.created += 1;
        if n == 0 {
            return self.path.clone();
        }
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "speech".to_string());
        let name = match self.path.extension() {
            Some(ext) => format!("{}-{}.{}", stem, n, ext.to_string_lossy()),
            None => format!("{}-{}", stem, n),
        };
        self.path.with_file_name(name)
    }
}

impl SinkFactory for WavSinkFactory {
    type Sink = WavSink;

    fn create(&mut self, format: AudioFormat) -> Result<WavSink, ClientError> {
        let path = self.next_path();
        WavSink::create(&path, format)
    }
}

pub struct WavSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    assembler: PcmAssembler,
    scratch: Vec<i16>,
}

impl WavSink {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, ClientError> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .map_err(|e| ClientError::Audio(format!("cannot create {}: {}", path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            assembler: PcmAssembler::default(),
            scratch: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn finalize(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                error!("Failed to finalize {}: {}", self.path.display(), e);
            }
        }
    }
}

impl AudioSink for WavSink {
    fn feed(&mut self, pcm: Vec<u8>) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        self.assembler.push(&pcm, &mut self.scratch);
        for sample in self.scratch.drain(..) {
            if let Err(e) = writer.write_sample(sample) {
                error!("Failed to write {}: {}", self.path.display(), e);
                self.writer = None;
                return;
            }
        }
    }

    fn finish(&mut self) {
        self.finalize();
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Audio handed to a [`ChannelSinkFactory`] receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkChunk {
    /// Which sink (0 for the first connection, then 1, ...)
    pub sink: usize,
    pub pcm: Vec<u8>,
}

/// Forwards audio to a channel, for embedding the client in another player
pub struct ChannelSinkFactory {
    tx: UnboundedSender<SinkChunk>,
    created: usize,
}

impl ChannelSinkFactory {
    pub fn channel() -> (Self, UnboundedReceiver<SinkChunk>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx, created: 0 }, rx)
    }
}

impl SinkFactory for ChannelSinkFactory {
    type Sink = ChannelSink;

    fn create(&mut self, _format: AudioFormat) -> Result<ChannelSink, ClientError> {
        let sink = ChannelSink {
            index: self.created,
            tx: self.tx.clone(),
        };
        self.created += 1;
        Ok(sink)
    }
}

pub struct ChannelSink {
    index: usize,
    tx: UnboundedSender<SinkChunk>,
}

impl AudioSink for ChannelSink {
    fn feed(&mut self, pcm: Vec<u8>) {
        let _ = self.tx.send(SinkChunk {
            sink: self.index,
            pcm,
        });
    }
}

use anyhow::Result;
use futures_util::stream::StreamExt;
use log::{debug, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actions::SessionEvent;
use crate::engine::{validate_url, EngineState, LoadId, PlaybackEngine, Reporter, StreamError};
use crate::utils::parsing;

const CONNECT_TIMEOUT_SECS: u64 = 15;
const PREBUFFER_BYTES: usize = 64 * 1024; // Wait for 64KB before probing
const BACKPRESSURE_THRESHOLD: usize = 6 * 1024 * 1024;
const CLEANUP_THRESHOLD: usize = 2 * 1024 * 1024; // Compact after 2MB read
const UNDERRUN_CHECK_MS: u64 = 250;

#[derive(Default)]
struct FeedBuffer {
    bytes: Vec<u8>,
    pos: usize,
    finished: bool,
}

/// Network bytes shared between the fetch task and the blocking decoder
#[derive(Clone, Default)]
struct StreamFeed {
    inner: Arc<(Mutex<FeedBuffer>, Condvar)>,
}

impl StreamFeed {
    fn push(&self, chunk: &[u8]) {
        let (lock, ready) = &*self.inner;
        let mut buf = lock.lock().unwrap_or_else(|e| e.into_inner());
        if buf.pos > CLEANUP_THRESHOLD {
            let consumed = buf.pos;
            buf.bytes.drain(..consumed);
            buf.pos = 0;
            debug!("Cleaned up {}KB of read data", consumed / 1024);
        }
        buf.bytes.extend_from_slice(chunk);
        ready.notify_all();
    }

    fn finish(&self) {
        let (lock, ready) = &*self.inner;
        lock.lock().unwrap_or_else(|e| e.into_inner()).finished = true;
        ready.notify_all();
    }

    fn pending(&self) -> usize {
        let buf = self.inner.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.bytes.len() - buf.pos
    }

    fn is_finished(&self) -> bool {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner()).finished
    }
}

/// A wrapper so we can feed network chunks into Symphonia. Reads block until
/// bytes arrive or the network side finishes.
struct StreamingSource {
    feed: StreamFeed,
}

impl Read for StreamingSource {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let (lock, ready) = &*self.feed.inner;
        let mut buf = lock
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "stream buffer poisoned"))?;

        loop {
            if buf.pos < buf.bytes.len() {
                let n = std::cmp::min(out.len(), buf.bytes.len() - buf.pos);
                out[..n].copy_from_slice(&buf.bytes[buf.pos..buf.pos + n]);
                buf.pos += n;
                return Ok(n);
            }
            if buf.finished {
                return Ok(0);
            }
            buf = ready
                .wait_timeout(buf, Duration::from_millis(100))
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "stream buffer poisoned"))?
                .0;
        }
    }
}

impl Seek for StreamingSource {
    fn seek(&mut self, _: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "seek not supported"))
    }
}

impl MediaSource for StreamingSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Keeps the rodio output stream alive on its own thread; the stream itself
/// cannot leave the thread that opened it.
struct AudioOutput {
    handle: OutputStreamHandle,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioOutput {
    fn open() -> Result<Self, StreamError> {
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<OutputStreamHandle, String>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = init_tx.send(Ok(handle));
                    // Park until the engine drops the sender
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Audio output closed");
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| StreamError::Output(format!("failed to spawn audio thread: {}", e)))?;

        let handle = init_rx
            .recv()
            .map_err(|_| StreamError::Output("audio thread exited during init".to_string()))?
            .map_err(StreamError::Output)?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("audio output thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct ActiveStream {
    sink: Arc<Sink>,
    cancel: CancellationToken,
}

impl ActiveStream {
    fn stop(self) {
        self.cancel.cancel();
        self.sink.stop();
    }
}

/// Network radio engine: reqwest for the bytes, Symphonia for decoding and a
/// rodio sink for output.
pub struct StreamEngine {
    output: AudioOutput,
    events: mpsc::Sender<SessionEvent>,
    client: reqwest::Client,
    next_load: LoadId,
    current: Option<ActiveStream>,
    state: Arc<Mutex<EngineState>>,
}

impl StreamEngine {
    pub fn new(events: mpsc::Sender<SessionEvent>) -> Result<Self, StreamError> {
        let output = AudioOutput::open()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("miradio/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            output,
            events,
            client,
            next_load: 0,
            current: None,
            state: Arc::new(Mutex::new(EngineState::Idle)),
        })
    }

    fn stop_current(&mut self) {
        if let Some(active) = self.current.take() {
            active.stop();
            debug!("Stopped load {}", self.next_load);
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = EngineState::Idle;
    }
}

impl PlaybackEngine for StreamEngine {
    fn load(&mut self, url: &str) -> Result<LoadId, StreamError> {
        validate_url(url)?;
        self.stop_current();

        let sink = Sink::try_new(&self.output.handle).map_err(|e| StreamError::Output(e.to_string()))?;
        sink.pause();
        let sink = Arc::new(sink);

        self.next_load += 1;
        let load = self.next_load;
        let cancel = CancellationToken::new();
        let reporter = Reporter::new(self.events.clone(), load, self.state.clone(), cancel.clone());
        debug!("Loading {} (load {})", url, load);

        let client = self.client.clone();
        let url = url.to_string();
        let task_sink = sink.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            reporter.state(EngineState::Buffering).await;
            match stream_into_sink(client, url, task_sink, &reporter, task_cancel).await {
                Ok(()) => reporter.state(EngineState::Ended).await,
                Err(e) => {
                    warn!("Stream failed: {}", e);
                    reporter.failed(e.to_string()).await;
                }
            }
        });

        self.current = Some(ActiveStream { sink, cancel });
        Ok(load)
    }

    fn play(&mut self) {
        if let Some(active) = &self.current {
            active.sink.play();
            debug!("Audio resumed");
        }
    }

    fn pause(&mut self) {
        if let Some(active) = &self.current {
            active.sink.pause();
            debug!("Audio paused");
        }
    }

    fn current_state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&mut self) -> Result<()> {
        debug!("Releasing stream engine");
        self.stop_current();
        self.output.close()
    }
}

/// Fetch, decode and play one stream until it ends or is cancelled.
async fn stream_into_sink(
    client: reqwest::Client,
    url: String,
    sink: Arc<Sink>,
    reporter: &Reporter,
    cancel: CancellationToken,
) -> Result<(), StreamError> {
    let actual_url = match parsing::resolve_stream_url(&client, &url).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("Failed to resolve stream URL: {}. Using original URL.", e);
            url
        }
    };

    debug!("Fetching stream from URL (symphonia): {}", actual_url);
    let response = client.get(&actual_url).send().await?;
    if !response.status().is_success() {
        return Err(StreamError::Status(response.status()));
    }

    let feed = StreamFeed::default();
    let network = tokio::spawn(pump_network(response, feed.clone(), cancel.clone()));

    while feed.pending() < PREBUFFER_BYTES && !feed.is_finished() {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(50)) => {},
            _ = cancel.cancelled() => {
                network.abort();
                return Ok(());
            }
        }
    }

    let (audio_tx, mut audio_rx) = mpsc::channel::<SamplesBuffer<f32>>(16);
    let decode_task = {
        let feed = feed.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || decode_blocking_task(feed, audio_tx, cancel))
    };

    let mut underrun_check = tokio::time::interval(Duration::from_millis(UNDERRUN_CHECK_MS));
    let mut started = false;
    loop {
        tokio::select! {
            buffer = audio_rx.recv() => match buffer {
                Some(source) => {
                    sink.append(source);
                    started = true;
                    reporter.state(EngineState::Ready).await;
                }
                None => {
                    debug!("Decode task ended");
                    break;
                }
            },
            _ = underrun_check.tick() => {
                if started && sink.empty() && !sink.is_paused() {
                    reporter.state(EngineState::Buffering).await;
                }
            }
            _ = cancel.cancelled() => {
                debug!("Stream playback cancelled");
                break;
            }
        }
    }

    network.abort();
    let decoded = decode_task.await?;
    if cancel.is_cancelled() {
        return Ok(());
    }
    decoded?;

    // Let whatever is queued finish before reporting the end of the stream
    while !sink.empty() {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(UNDERRUN_CHECK_MS)) => {},
            _ = cancel.cancelled() => break,
        }
    }
    Ok(())
}

async fn pump_network(response: reqwest::Response, feed: StreamFeed, cancel: CancellationToken) {
    let mut stream = response.bytes_stream();
    let mut total_bytes = 0usize;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Network fetch cancelled");
                break;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                while feed.pending() > BACKPRESSURE_THRESHOLD {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(10)) => {},
                        _ = cancel.cancelled() => {
                            feed.finish();
                            return;
                        }
                    }
                }
                total_bytes += chunk.len();
                feed.push(&chunk);
            }
            Some(Err(e)) => {
                warn!("Network stream error: {}", e);
                break;
            }
            None => break,
        }
    }

    debug!("Network stream ended, total bytes: {}KB", total_bytes / 1024);
    feed.finish();
}

/// CPU-heavy blocking task for Symphonia probing and decoding
fn decode_blocking_task(
    feed: StreamFeed,
    audio_tx: mpsc::Sender<SamplesBuffer<f32>>,
    cancel: CancellationToken,
) -> Result<(), StreamError> {
    let source = StreamingSource { feed: feed.clone() };
    let mss = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());
    let probed = get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format.default_track().ok_or(StreamError::NoAudioTrack)?;
    let track_id = track.id;
    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    debug!(
        "Found audio track: codec={:?}, sample_rate={:?}, channels={:?}",
        track.codec_params.codec, track.codec_params.sample_rate, track.codec_params.channels
    );

    while !cancel.is_cancelled() {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Stream drained");
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                warn!("Decoder reset required (unsupported)");
                break;
            }
            // A truncated final packet after the connection dropped is just the end
            Err(e) if feed.is_finished() => {
                debug!("Format error after network end: {}", e);
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(audio_buf) => {
                if audio_tx.blocking_send(interleave(audio_buf)).is_err() {
                    break;
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Non-fatal, skip bad frame
                debug!("Skipping undecodable frame: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    debug!("Decode blocking task ended");
    Ok(())
}

fn interleave(audio_buf: AudioBufferRef<'_>) -> SamplesBuffer<f32> {
    let spec = *audio_buf.spec();
    let mut samples = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
    samples.copy_interleaved_ref(audio_buf);
    SamplesBuffer::new(spec.channels.count() as u16, spec.rate, samples.samples().to_vec())
}

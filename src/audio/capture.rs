//! Microphone capture via `cpal`.
//!
//! cpal delivers audio by callback on its own audio thread; the meter wants
//! blocking reads.  [`CpalSource`] bridges the two with a [`SampleQueue`]: the
//! callback downmixes each frame to mono `i16` and pushes it into a ring
//! buffer, and [`AudioSource::read`] waits on a condition variable until a
//! full block is available.  If the reader falls behind, the oldest samples
//! are overwritten.
//!
//! The callback never blocks on the reader beyond the short queue lock.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, SupportedBufferSize};
use parking_lot::{Condvar, Mutex};

use super::buffer::RingBuffer;
use super::source::{AudioFormat, AudioSource, OpenError, ReadError, SourceOpener};

/// Minimum-buffer recommendation used when the host reports no range.
const FALLBACK_MIN_BUFFER_MS: u32 = 40;

/// Lower bound on the minimum-buffer recommendation.
const MIN_BUFFER_FLOOR_MS: u32 = 10;

/// The sample queue always holds at least this much audio.
const QUEUE_SECS: usize = 1;

// ---------------------------------------------------------------------------
// SampleQueue
// ---------------------------------------------------------------------------

struct QueueState {
    samples: RingBuffer<i16>,
    closed: bool,
    error: Option<String>,
    overwritten: u64,
}

/// Hand-off between the cpal callback and the blocking reader.
pub struct SampleQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                samples: RingBuffer::new(capacity),
                closed: false,
                error: None,
                overwritten: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Downmix interleaved `data` to mono and append it.
    ///
    /// A trailing partial frame is ignored.
    pub fn push_interleaved<T>(&self, data: &[T], channels: usize)
    where
        T: Sample,
        i16: FromSample<T>,
    {
        let channels = channels.max(1);
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let mut overwritten = 0;
        for frame in data.chunks_exact(channels) {
            let sum: i32 = frame
                .iter()
                .map(|&s| i32::from(i16::from_sample(s)))
                .sum();
            let mono = (sum / channels as i32) as i16;
            if state.samples.push(mono).is_some() {
                overwritten += 1;
            }
        }
        state.overwritten += overwritten;
        drop(state);
        self.ready.notify_all();
    }

    /// Record a stream failure.  Buffered samples stay readable; the next
    /// read on an empty queue returns the error.
    pub fn fail(&self, message: String) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            state.error = Some(message);
        }
        state.closed = true;
        drop(state);
        self.ready.notify_all();
    }

    /// Stop accepting samples and wake any blocked reader.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Block until `buffer` can be filled (or the queue can hold no more),
    /// then move the oldest samples into it.
    pub fn read(&self, buffer: &mut [i16]) -> Result<usize, ReadError> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        let wanted = buffer.len().min(state.samples.capacity());
        while state.samples.len() < wanted && !state.closed {
            self.ready.wait(&mut state);
        }

        if state.overwritten > 0 {
            log::warn!(
                "capture: reader fell behind, {} samples overwritten",
                state.overwritten
            );
            state.overwritten = 0;
        }

        if state.samples.is_empty() {
            return Err(match &state.error {
                Some(message) => ReadError::Stream(message.clone()),
                None => ReadError::StreamClosed,
            });
        }
        Ok(state.samples.read_into(buffer))
    }
}

// ---------------------------------------------------------------------------
// CpalOpener
// ---------------------------------------------------------------------------

/// Opens cpal input devices.
#[derive(Debug, Clone, Default)]
pub struct CpalOpener {
    /// Input device name; `None` selects the host default.
    pub device_name: Option<String>,
}

impl CpalOpener {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    fn find_device(&self, host: &cpal::Host) -> Result<cpal::Device, OpenError> {
        match &self.device_name {
            None => host.default_input_device().ok_or_else(|| {
                OpenError::DeviceUnavailable("no default input device".into())
            }),
            Some(wanted) => host
                .input_devices()
                .map_err(|e| OpenError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
                .ok_or_else(|| OpenError::DeviceUnavailable(format!("no input device named {wanted:?}"))),
        }
    }
}

impl SourceOpener for CpalOpener {
    type Source = CpalSource;

    fn open(&self, format: &AudioFormat) -> Result<CpalSource, OpenError> {
        format.validate()?;

        let host = cpal::default_host();
        let device = self.find_device(&host)?;
        let device_name = device.name().unwrap_or_else(|_| "<unnamed>".into());
        let rate = cpal::SampleRate(format.sample_rate_hz);

        // Prefer native mono, then native i16; anything else is downmixed
        // or converted in the callback.
        let range = device
            .supported_input_configs()
            .map_err(|e| OpenError::DeviceUnavailable(e.to_string()))?
            .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
            .filter(|r| matches!(r.sample_format(), SampleFormat::I16 | SampleFormat::F32))
            .min_by_key(|r| (r.channels() != 1, r.sample_format() != SampleFormat::I16, r.channels()))
            .ok_or_else(|| {
                OpenError::InvalidConfig(format!(
                    "{device_name} has no i16/f32 input config at {} Hz",
                    format.sample_rate_hz
                ))
            })?;

        let supported = range.with_sample_rate(rate);
        let channels = supported.channels();
        let min_buffer_len = recommended_min_buffer(supported.buffer_size(), format.sample_rate_hz);
        let capacity = (format.sample_rate_hz as usize * QUEUE_SECS).max(min_buffer_len * 8);
        let queue = Arc::new(SampleQueue::new(capacity));

        let config = cpal::StreamConfig {
            channels,
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&queue))?,
            SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&queue))?,
            other => {
                return Err(OpenError::InvalidConfig(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|e| OpenError::DeviceUnavailable(e.to_string()))?;

        log::info!(
            "capture: opened {device_name} ({} Hz, {} ch {:?}, min buffer {} samples)",
            format.sample_rate_hz,
            channels,
            supported.sample_format(),
            min_buffer_len
        );

        Ok(CpalSource {
            stream: Some(stream),
            queue,
            format: *format,
            min_buffer_len,
            device_name,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<SampleQueue>,
) -> Result<cpal::Stream, OpenError>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    let error_queue = Arc::clone(&queue);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                queue.push_interleaved(data, channels);
            },
            move |err: cpal::StreamError| on_stream_error(&error_queue, err),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::StreamConfigNotSupported => {
                OpenError::InvalidConfig(e.to_string())
            }
            other => OpenError::DeviceUnavailable(other.to_string()),
        })
}

/// Only a vanished device ends the session; backends also report xruns and
/// poll failures here and keep streaming.
fn on_stream_error(queue: &SampleQueue, err: cpal::StreamError) {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            log::error!("cpal stream error: {err}");
            queue.fail(err.to_string());
        }
        other => log::warn!("cpal stream error (continuing): {other}"),
    }
}

/// Device minimum-buffer recommendation, in samples.
fn recommended_min_buffer(buffer_size: &SupportedBufferSize, sample_rate_hz: u32) -> usize {
    let floor = (sample_rate_hz * MIN_BUFFER_FLOOR_MS / 1000).max(1) as usize;
    match buffer_size {
        SupportedBufferSize::Range { min, .. } => (*min as usize).max(floor),
        SupportedBufferSize::Unknown => {
            ((sample_rate_hz * FALLBACK_MIN_BUFFER_MS / 1000) as usize).max(floor)
        }
    }
}

// ---------------------------------------------------------------------------
// CpalSource
// ---------------------------------------------------------------------------

/// An open cpal input stream.  Dropping it closes the stream.
///
/// `cpal::Stream` is not `Send` on every platform, so a `CpalSource` stays on
/// the thread that opened it.
pub struct CpalSource {
    stream: Option<cpal::Stream>,
    queue: Arc<SampleQueue>,
    format: AudioFormat,
    min_buffer_len: usize,
    device_name: String,
}

impl AudioSource for CpalSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn min_buffer_len(&self) -> usize {
        self.min_buffer_len
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<usize, ReadError> {
        self.queue.read(buffer)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("capture: pause before close failed: {e}");
            }
            drop(stream);
            self.queue.close();
            log::info!("capture: closed {}", self.device_name);
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

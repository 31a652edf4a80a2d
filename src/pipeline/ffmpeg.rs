//! FFmpeg-backed decode pipeline
//!
//! `play` validates and probes the media on the calling thread, then hands
//! the path to a worker thread that owns the demuxer, the decoders, the
//! colorspace scaler, and the audio output stream. Decoded video lands in the
//! shared [`FrameSlot`] as I420; end-of-stream and decode failures travel on
//! the event bus and never touch pipeline state from the worker.

use super::{
    BufferLayout, DecodedFrame, FrameSlot, PipelineEvent, PipelineState, VideoPipeline, SKIP_STEP,
    SKIP_STEP_FINE,
};
use crate::error::VideoError;
use anyhow::{anyhow, Context as _};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{unbounded, Receiver, Sender};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{input, Pixel, Sample};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::resampling::Context as ResampleContext;
use ffmpeg_next::software::scaling::{context::Context as ScaleContext, flag::Flags};
use ffmpeg_next::util::frame::audio::Audio as AudioFrame;
use ffmpeg_next::util::frame::video::Video as FfmpegFrame;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum WorkerCommand {
    /// Absolute seek target in media time
    Seek(Duration),
    Stop,
}

/// State shared between the pipeline facade and its worker
#[derive(Default)]
struct Shared {
    position_us: AtomicU64,
    duration_us: AtomicU64,
    width: AtomicU32,
    height: AtomicU32,
    paused: AtomicBool,
    alive: AtomicBool,
}

/// Lock-free-enough ring between the audio decoder and the cpal callback
struct AudioRing {
    buffer: Vec<f32>,
    capacity: usize,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl AudioRing {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            capacity,
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    /// Write as many samples as fit; excess is dropped
    fn write(&mut self, samples: &[f32]) -> usize {
        let to_write = samples.len().min(self.capacity - self.len);
        if to_write == 0 {
            return 0;
        }
        let first = (self.capacity - self.write_pos).min(to_write);
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        if first < to_write {
            self.buffer[..to_write - first].copy_from_slice(&samples[first..to_write]);
        }
        self.write_pos = (self.write_pos + to_write) % self.capacity;
        self.len += to_write;
        to_write
    }

    /// Fill the output, zero-padding on underrun
    fn read(&mut self, output: &mut [f32]) -> usize {
        let available = self.len.min(output.len());
        if available == 0 {
            output.fill(0.0);
            return 0;
        }
        let first = (self.capacity - self.read_pos).min(available);
        output[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        if first < available {
            output[first..available].copy_from_slice(&self.buffer[..available - first]);
        }
        self.read_pos = (self.read_pos + available) % self.capacity;
        self.len -= available;
        if available < output.len() {
            output[available..].fill(0.0);
        }
        available
    }

    fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.len = 0;
    }
}

/// Production decode pipeline
pub struct FfmpegPipeline {
    monitor: usize,
    state: PipelineState,
    slot: Arc<FrameSlot>,
    shared: Arc<Shared>,
    volume: Arc<Mutex<f32>>,
    event_tx: Sender<PipelineEvent>,
    event_rx: Receiver<PipelineEvent>,
    command_tx: Option<Sender<WorkerCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegPipeline {
    pub fn new(monitor: usize) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            monitor,
            state: PipelineState::Uninitialized,
            slot: FrameSlot::new(),
            shared: Arc::new(Shared::default()),
            volume: Arc::new(Mutex::new(0.0)),
            event_tx,
            event_rx,
            command_tx: None,
            worker: None,
        }
    }

    fn send_seek(&self, target: Duration) {
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(WorkerCommand::Seek(target));
        }
    }

    fn seek_relative(&self, step: Duration, forward: bool) {
        if self.command_tx.is_none() {
            return;
        }
        let current = self.current();
        let duration = self.duration();
        let target = if forward {
            let target = current + step;
            if duration > Duration::ZERO {
                target.min(duration)
            } else {
                target
            }
        } else {
            current.saturating_sub(step)
        };
        self.send_seek(target);
    }

    fn teardown_worker(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(WorkerCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("decode worker panicked during teardown");
            }
        }
        self.slot.clear();
    }
}

impl Drop for FfmpegPipeline {
    fn drop(&mut self) {
        self.teardown_worker();
    }
}

impl VideoPipeline for FfmpegPipeline {
    fn initialize(&mut self) -> Result<(), VideoError> {
        ffmpeg::init().map_err(|e| VideoError::Init(e.to_string()))?;
        if self.state == PipelineState::Uninitialized {
            self.state = PipelineState::Ready;
        }
        Ok(())
    }

    fn play(&mut self, path: &Path) -> bool {
        if self.state == PipelineState::Uninitialized {
            log::error!("play called before initialize");
            return false;
        }
        self.teardown_worker();
        // Events queued by a previous stream must not surface against the
        // new one.
        while self.event_rx.try_recv().is_ok() {}

        // Probe on the calling thread so unsupported media is rejected
        // synchronously; the worker reopens its own context.
        let probe = match input(&path.to_path_buf()) {
            Ok(ictx) => ictx,
            Err(e) => {
                log::warn!("cannot open {}: {e}", path.display());
                return false;
            }
        };
        let has_video = probe.streams().best(Type::Video).is_some();
        let has_audio = probe.streams().best(Type::Audio).is_some();
        if !has_video && !has_audio {
            log::warn!("{} has no playable streams", path.display());
            return false;
        }
        let duration_us = if probe.duration() > 0 {
            probe.duration() as u64
        } else {
            0
        };
        drop(probe);

        self.shared.duration_us.store(duration_us, Ordering::Release);
        self.shared.position_us.store(0, Ordering::Release);
        self.shared.width.store(0, Ordering::Release);
        self.shared.height.store(0, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        self.shared.alive.store(true, Ordering::Release);

        let (command_tx, command_rx) = unbounded();
        let worker = Worker {
            path: path.to_path_buf(),
            slot: Arc::clone(&self.slot),
            shared: Arc::clone(&self.shared),
            volume: Arc::clone(&self.volume),
            event_tx: self.event_tx.clone(),
            command_rx,
        };
        log::info!(
            "playing {} on monitor {} (video: {has_video}, audio: {has_audio})",
            path.display(),
            self.monitor
        );
        self.worker = Some(std::thread::spawn(move || worker.run()));
        self.command_tx = Some(command_tx);
        self.state = PipelineState::Playing;
        true
    }

    fn stop(&mut self) {
        self.teardown_worker();
        self.state = PipelineState::Stopped;
    }

    fn pause(&mut self) {
        match self.state {
            PipelineState::Playing => {
                self.shared.paused.store(true, Ordering::Release);
                self.state = PipelineState::Paused;
            }
            PipelineState::Paused => {
                self.shared.paused.store(false, Ordering::Release);
                self.state = PipelineState::Playing;
            }
            _ => {}
        }
    }

    fn restart(&mut self) {
        if !matches!(
            self.state,
            PipelineState::Playing | PipelineState::Paused | PipelineState::EndOfStream
        ) {
            return;
        }
        self.shared.paused.store(false, Ordering::Release);
        self.send_seek(Duration::ZERO);
        self.state = PipelineState::Playing;
    }

    fn skip_forward(&mut self) {
        self.seek_relative(SKIP_STEP, true);
    }

    fn skip_backward(&mut self) {
        self.seek_relative(SKIP_STEP, false);
    }

    fn skip_forward_fine(&mut self) {
        self.seek_relative(SKIP_STEP_FINE, true);
    }

    fn skip_backward_fine(&mut self) {
        self.seek_relative(SKIP_STEP_FINE, false);
    }

    fn set_volume(&mut self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    fn current(&self) -> Duration {
        Duration::from_micros(self.shared.position_us.load(Ordering::Acquire))
    }

    fn duration(&self) -> Duration {
        Duration::from_micros(self.shared.duration_us.load(Ordering::Acquire))
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn poll_event(&mut self) -> Option<PipelineEvent> {
        let event = self.event_rx.try_recv().ok()?;
        match &event {
            PipelineEvent::EndOfStream => {
                if self.state == PipelineState::Playing {
                    self.state = PipelineState::EndOfStream;
                }
            }
            PipelineEvent::Error(_) => {
                if !self.state.is_terminal() {
                    self.state = PipelineState::Error;
                }
            }
        }
        Some(event)
    }

    fn frame_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    fn size(&self) -> (u32, u32) {
        (
            self.shared.width.load(Ordering::Acquire),
            self.shared.height.load(Ordering::Acquire),
        )
    }
}

/// Everything the decode thread owns
struct Worker {
    path: PathBuf,
    slot: Arc<FrameSlot>,
    shared: Arc<Shared>,
    volume: Arc<Mutex<f32>>,
    event_tx: Sender<PipelineEvent>,
    command_rx: Receiver<WorkerCommand>,
}

enum Decoded {
    Video(DecodedFrame, Duration),
    Audio,
    Eos,
}

impl Worker {
    fn run(self) {
        if let Err(e) = self.decode_loop() {
            log::error!("decode worker failed: {e:#}");
            let _ = self.event_tx.send(PipelineEvent::Error(format!("{e:#}")));
        }
    }

    fn decode_loop(&self) -> anyhow::Result<()> {
        let mut ictx = input(&self.path).context("reopening media")?;

        let video_stream_index = ictx.streams().best(Type::Video).map(|s| s.index());
        let audio_stream_index = ictx.streams().best(Type::Audio).map(|s| s.index());

        let mut video = match video_stream_index {
            Some(index) => {
                let stream = ictx
                    .stream(index)
                    .ok_or_else(|| anyhow!("video stream vanished"))?;
                let time_base = stream.time_base();
                let mut decoder = ffmpeg::codec::context::Context::from_parameters(
                    stream.parameters(),
                )
                .context("video codec parameters")?
                .decoder()
                .video()
                .context("opening video decoder")?;
                decoder.set_threading(ffmpeg::threading::Config {
                    kind: ffmpeg::threading::Type::Frame,
                    count: 0,
                });
                let scaler = ScaleContext::get(
                    decoder.format(),
                    decoder.width(),
                    decoder.height(),
                    Pixel::YUV420P,
                    decoder.width(),
                    decoder.height(),
                    Flags::BILINEAR,
                )
                .context("creating scaler")?;
                self.shared.width.store(decoder.width(), Ordering::Release);
                self.shared
                    .height
                    .store(decoder.height(), Ordering::Release);
                Some(VideoLane {
                    index,
                    time_base,
                    decoder,
                    scaler,
                    layout: None,
                })
            }
            None => None,
        };

        // The audio output stream lives on this thread: cpal streams are not
        // Send, and the facade only needs the shared volume cell.
        let mut audio = match audio_stream_index {
            Some(index) => {
                let stream = ictx
                    .stream(index)
                    .ok_or_else(|| anyhow!("audio stream vanished"))?;
                let decoder =
                    ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                        .context("audio codec parameters")?
                        .decoder()
                        .audio()
                        .context("opening audio decoder")?;
                match AudioLane::open(index, decoder, &self.volume, &self.shared) {
                    Ok(lane) => Some(lane),
                    Err(e) => {
                        log::warn!("audio output unavailable: {e:#}");
                        None
                    }
                }
            }
            None => None,
        };

        let mut media_clock = Duration::ZERO;
        let mut last_tick = Instant::now();
        let mut pending: Option<(DecodedFrame, Duration)> = None;
        let mut eos_sent = false;

        while self.shared.alive.load(Ordering::Acquire) {
            while let Ok(command) = self.command_rx.try_recv() {
                match command {
                    WorkerCommand::Seek(target) => {
                        let ts = target.as_micros() as i64;
                        if let Err(e) = ictx.seek(ts, ..ts) {
                            log::warn!("seek to {target:?} failed: {e}");
                            continue;
                        }
                        if let Some(lane) = video.as_mut() {
                            lane.decoder.flush();
                        }
                        if let Some(lane) = audio.as_mut() {
                            lane.decoder.flush();
                            lane.ring.lock().clear();
                        }
                        pending = None;
                        media_clock = target;
                        eos_sent = false;
                    }
                    WorkerCommand::Stop => return Ok(()),
                }
            }

            if self.shared.paused.load(Ordering::Acquire) {
                last_tick = Instant::now();
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }

            // Past end-of-stream the clock freezes until a seek rewinds it;
            // wall time must not push the reported position past the end.
            if eos_sent {
                last_tick = Instant::now();
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }

            let now = Instant::now();
            media_clock += now - last_tick;
            last_tick = now;
            self.shared
                .position_us
                .store(media_clock.as_micros() as u64, Ordering::Release);

            if let Some((frame, ts)) = pending.take() {
                if ts <= media_clock {
                    self.slot.publish(frame);
                } else {
                    let wait = (ts - media_clock).min(Duration::from_millis(5));
                    pending = Some((frame, ts));
                    std::thread::sleep(wait);
                    continue;
                }
            }

            match Self::decode_next(&mut ictx, video.as_mut(), audio.as_mut())? {
                Decoded::Video(frame, ts) => pending = Some((frame, ts)),
                Decoded::Audio => {}
                Decoded::Eos => {
                    log::debug!("end of stream for {}", self.path.display());
                    let _ = self.event_tx.send(PipelineEvent::EndOfStream);
                    eos_sent = true;
                }
            }
        }
        Ok(())
    }

    fn decode_next(
        ictx: &mut ffmpeg::format::context::Input,
        mut video: Option<&mut VideoLane>,
        mut audio: Option<&mut AudioLane>,
    ) -> anyhow::Result<Decoded> {
        let (stream, packet) = match ictx.packets().next() {
            Some(pair) => pair,
            None => {
                // Drain both decoders before reporting the end.
                if let Some(lane) = video.as_mut() {
                    let _ = lane.decoder.send_eof();
                    if let Some(decoded) = lane.receive_frame()? {
                        return Ok(Decoded::Video(decoded.0, decoded.1));
                    }
                }
                if let Some(lane) = audio.as_mut() {
                    let _ = lane.decoder.send_eof();
                    lane.drain()?;
                }
                return Ok(Decoded::Eos);
            }
        };
        let index = stream.index();

        if let Some(lane) = video.as_mut() {
            if index == lane.index {
                if let Err(e) = lane.decoder.send_packet(&packet) {
                    log::warn!("video packet rejected: {e}");
                    return Ok(Decoded::Audio);
                }
                if let Some((frame, ts)) = lane.receive_frame()? {
                    return Ok(Decoded::Video(frame, ts));
                }
            }
        }
        if let Some(lane) = audio.as_mut() {
            if index == lane.index {
                if let Err(e) = lane.decoder.send_packet(&packet) {
                    log::warn!("audio packet rejected: {e}");
                    return Ok(Decoded::Audio);
                }
                lane.drain()?;
            }
        }
        Ok(Decoded::Audio)
    }
}

struct VideoLane {
    index: usize,
    time_base: ffmpeg::Rational,
    decoder: ffmpeg::decoder::Video,
    scaler: ScaleContext,
    /// Classified from the first converted frame and reused for the stream
    layout: Option<BufferLayout>,
}

impl VideoLane {
    fn receive_frame(&mut self) -> anyhow::Result<Option<(DecodedFrame, Duration)>> {
        let mut decoded = FfmpegFrame::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut converted = FfmpegFrame::empty();
        self.scaler
            .run(&decoded, &mut converted)
            .context("colorspace conversion")?;

        let width = converted.width();
        let height = converted.height();
        let y_stride = converted.stride(0);
        let uv_stride = converted.stride(1);

        let layout = *self.layout.get_or_insert_with(|| {
            let layout = if y_stride == width as usize
                && uv_stride == (width as usize).div_ceil(2)
            {
                BufferLayout::Contiguous
            } else {
                BufferLayout::NonContiguous { y_stride, uv_stride }
            };
            log::debug!("frame layout for {width}x{height}: {layout:?}");
            layout
        });

        let chroma_rows = (height as usize).div_ceil(2);
        let mut data = Vec::with_capacity(match layout {
            BufferLayout::Contiguous => DecodedFrame::packed_len(width, height),
            BufferLayout::NonContiguous { y_stride, uv_stride } => {
                y_stride * height as usize + 2 * uv_stride * chroma_rows
            }
        });
        data.extend_from_slice(&converted.data(0)[..y_stride * height as usize]);
        data.extend_from_slice(&converted.data(1)[..uv_stride * chroma_rows]);
        data.extend_from_slice(&converted.data(2)[..uv_stride * chroma_rows]);

        let pts = decoded.pts().unwrap_or(0).max(0);
        let seconds = pts as f64 * self.time_base.numerator() as f64
            / self.time_base.denominator() as f64;
        let timestamp = Duration::from_secs_f64(seconds.max(0.0));

        Ok(Some((
            DecodedFrame {
                data,
                width,
                height,
                layout,
            },
            timestamp,
        )))
    }
}

struct AudioLane {
    index: usize,
    decoder: ffmpeg::decoder::Audio,
    resampler: ResampleContext,
    ring: Arc<Mutex<AudioRing>>,
    _stream: cpal::Stream,
}

impl AudioLane {
    fn open(
        index: usize,
        decoder: ffmpeg::decoder::Audio,
        volume: &Arc<Mutex<f32>>,
        shared: &Arc<Shared>,
    ) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no audio output device"))?;
        let supported = device
            .default_output_config()
            .context("querying audio output config")?;
        let sample_rate = supported.sample_rate();
        // The resampler emits packed stereo, so the sink must be opened as
        // stereo; inheriting the device default channel count would garble
        // the interleaving. A device that cannot open a 2-channel stream
        // leaves the video silent.
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let resampler = ResampleContext::get(
            decoder.format(),
            decoder.channel_layout(),
            decoder.rate(),
            Sample::F32(ffmpeg::format::sample::Type::Packed),
            ffmpeg::ChannelLayout::STEREO,
            sample_rate.0,
        )
        .context("creating resampler")?;

        // Two seconds of stereo headroom between decode and playback.
        let ring = Arc::new(Mutex::new(AudioRing::new(sample_rate.0 as usize * 2 * 2)));
        let ring_for_output = Arc::clone(&ring);
        let volume = Arc::clone(volume);
        let paused = Arc::clone(shared);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if paused.paused.load(Ordering::Acquire) {
                        data.fill(0.0);
                        return;
                    }
                    ring_for_output.lock().read(data);
                    let gain = *volume.lock();
                    if gain <= 0.0 {
                        data.fill(0.0);
                    } else if (gain - 1.0).abs() > f32::EPSILON {
                        for sample in data.iter_mut() {
                            *sample = (*sample * gain).clamp(-1.0, 1.0);
                        }
                    }
                },
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .context("building audio output stream")?;
        stream.play().context("starting audio output stream")?;

        log::info!("audio sink at {} Hz", sample_rate.0);
        Ok(Self {
            index,
            decoder,
            resampler,
            ring,
            _stream: stream,
        })
    }

    /// Pull every decoded audio frame, resample, and feed the ring
    fn drain(&mut self) -> anyhow::Result<()> {
        let mut decoded = AudioFrame::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut resampled = AudioFrame::empty();
            self.resampler
                .run(&decoded, &mut resampled)
                .context("resampling audio")?;

            let plane = resampled.data(0);
            let sample_count = resampled.samples() * 2;
            let mut samples = Vec::with_capacity(sample_count);
            for chunk in plane.chunks_exact(4).take(sample_count) {
                samples.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
            self.ring.lock().write(&samples);
        }
        Ok(())
    }
}

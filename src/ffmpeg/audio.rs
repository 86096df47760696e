//! Audio decoding to interleaved 16-bit PCM and AAC-LC encoding.

use std::collections::VecDeque;
use std::time::Duration;

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::format::Sample;
use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::frame::Audio as AudioFrame;
use ffmpeg_next::software::resampling::Context as ResamplingContext;
use ffmpeg_next::{ChannelLayout, Packet, Rational};

use super::{read_extradata, write_extradata};
use crate::codec::{AudioEncoderConfig, Codec, CodecConfig, InputSlot, OutputEvent};
use crate::error::ReelError;
use crate::sample::{
    AAC_PROFILE_LC, MIME_AUDIO_AAC, MIME_AUDIO_RAW, MediaTrack, SampleBuffer, SampleFlags,
    TrackParameters,
};
use crate::schedule::MICROS_PER_SECOND;

const PCM_FORMAT: Sample = Sample::I16(SampleType::Packed);
const PCM_SAMPLE_BYTES: usize = 2;

/// Bytes of one interleaved PCM frame (one sample per channel).
fn pcm_frame_bytes(channels: u16) -> usize {
    usize::from(channels.max(1)) * PCM_SAMPLE_BYTES
}

/// Output queue shared by the audio codecs.
#[derive(Default)]
struct OutputQueue {
    format: Option<MediaTrack>,
    events: VecDeque<OutputEvent>,
    next_index: usize,
}

impl OutputQueue {
    fn push_sample(&mut self, sample: SampleBuffer) {
        if let Some(track) = self.format.take() {
            self.events.push_back(OutputEvent::FormatChanged(track));
        }
        self.events.push_back(OutputEvent::Sample {
            index: self.next_index,
            sample,
        });
        self.next_index += 1;
    }

    fn pop(&mut self) -> OutputEvent {
        self.events.pop_front().unwrap_or(OutputEvent::TryAgainLater)
    }

    fn release(&self, index: usize) -> Result<(), ReelError> {
        if index >= self.next_index {
            return Err(ReelError::TranscodeError(format!(
                "output {index} was never handed out"
            )));
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.format = None;
        self.events.clear();
    }
}

struct OpenDecoder {
    decoder: ffmpeg_next::decoder::Audio,
    resampler: Option<ResamplingContext>,
    channels: u16,
    sample_rate: u32,
}

/// A [`Codec`] decoding any FFmpeg-supported audio track into interleaved
/// signed 16-bit PCM at the source rate and channel count.
pub struct FfmpegAudioDecoder {
    id: Id,
    open: Option<OpenDecoder>,
    input_closed: bool,
    first_pts: Option<i64>,
    samples_out: i64,
    outputs: OutputQueue,
}

impl FfmpegAudioDecoder {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            open: None,
            input_closed: false,
            first_pts: None,
            samples_out: 0,
            outputs: OutputQueue::default(),
        }
    }

    fn decoder(&mut self) -> Result<&mut OpenDecoder, ReelError> {
        self.open
            .as_mut()
            .ok_or_else(|| ReelError::TranscodeError("decoder is not configured".to_string()))
    }

    fn drain(&mut self) -> Result<(), ReelError> {
        let start_us = self.first_pts.unwrap_or(0);
        let Some(open) = self.open.as_mut() else {
            return Ok(());
        };

        let mut decoded = AudioFrame::empty();
        while open.decoder.receive_frame(&mut decoded).is_ok() {
            if decoded.samples() == 0 {
                continue;
            }
            if open.resampler.is_none() {
                let layout = decoded.channel_layout();
                open.resampler = Some(ResamplingContext::get(
                    decoded.format(),
                    layout,
                    decoded.rate(),
                    PCM_FORMAT,
                    layout,
                    decoded.rate(),
                )?);
                open.sample_rate = decoded.rate();
                open.channels = decoded.channels();
                self.outputs.format = Some(MediaTrack::audio(
                    MIME_AUDIO_RAW,
                    open.sample_rate,
                    open.channels,
                ));
                log::debug!(
                    "Decoder output: {} Hz, {} channels, {:?}",
                    open.sample_rate,
                    open.channels,
                    decoded.format()
                );
            }
            let Some(resampler) = open.resampler.as_mut() else {
                continue;
            };

            let mut converted = AudioFrame::empty();
            resampler.run(&decoded, &mut converted)?;
            let byte_len = converted.samples() * pcm_frame_bytes(open.channels);
            let pcm = converted.data(0)[..byte_len].to_vec();

            let presentation_time_us =
                start_us + self.samples_out * MICROS_PER_SECOND / i64::from(open.sample_rate.max(1));
            self.samples_out += converted.samples() as i64;
            self.outputs
                .push_sample(SampleBuffer::new(pcm, presentation_time_us, SampleFlags::empty()));
        }
        Ok(())
    }
}

impl Codec for FfmpegAudioDecoder {
    fn configure(&mut self, config: &CodecConfig) -> Result<(), ReelError> {
        let CodecConfig::AudioDecoder(track) = config else {
            return Err(ReelError::TranscodeError(
                "audio decoder needs a track description".to_string(),
            ));
        };
        let (sample_rate, channels) = track
            .audio_format()
            .ok_or_else(|| ReelError::TranscodeError(format!("{} is not audio", track.mime)))?;
        let codec = ffmpeg_next::decoder::find(self.id)
            .ok_or_else(|| ReelError::TranscodeError(format!("no {} decoder", self.id.name())))?;

        let mut context = CodecContext::new_with_codec(codec);
        // SAFETY: the context is allocated and not yet opened.
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).sample_rate = sample_rate as i32;
            ffmpeg_sys_next::av_channel_layout_default(&mut (*raw).ch_layout, i32::from(channels));
            (*raw).pkt_timebase = Rational::new(1, MICROS_PER_SECOND as i32).into();
            if let Some(payload) = track.codec_config.first() {
                write_extradata(&mut (*raw).extradata, &mut (*raw).extradata_size, payload)?;
            }
        }
        let decoder = context.decoder().audio()?;
        log::info!("Configured {} decoder ({sample_rate} Hz, {channels} ch)", codec.name());

        self.open = Some(OpenDecoder {
            decoder,
            resampler: None,
            channels,
            sample_rate,
        });
        Ok(())
    }

    fn acquire_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>, ReelError> {
        self.decoder()?;
        if self.input_closed {
            return Ok(None);
        }
        Ok(Some(InputSlot {
            index: 0,
            capacity: usize::MAX,
        }))
    }

    fn submit(
        &mut self,
        _slot: InputSlot,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), ReelError> {
        if self.input_closed {
            return Err(ReelError::TranscodeError("input already ended".to_string()));
        }
        if !data.is_empty() {
            self.first_pts.get_or_insert(presentation_time_us);
            let mut packet = Packet::copy(data);
            packet.set_pts(Some(presentation_time_us));
            packet.set_dts(Some(presentation_time_us));
            self.decoder()?.decoder.send_packet(&packet)?;
            self.drain()?;
        }
        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.input_closed = true;
            self.decoder()?.decoder.send_eof()?;
            self.drain()?;
            let end_us = self.first_pts.unwrap_or(presentation_time_us).max(presentation_time_us);
            self.outputs.push_sample(SampleBuffer::end_of_stream(end_us));
        }
        Ok(())
    }

    fn acquire_output(&mut self, _timeout: Duration) -> Result<OutputEvent, ReelError> {
        Ok(self.outputs.pop())
    }

    fn release(&mut self, index: usize) -> Result<(), ReelError> {
        self.outputs.release(index)
    }

    fn stop(&mut self) {
        if self.open.take().is_some() {
            log::debug!("Audio decoder stopped");
        }
        self.outputs.clear();
    }
}

struct OpenEncoder {
    encoder: ffmpeg_next::encoder::audio::Encoder,
    resampler: ResamplingContext,
    layout: ChannelLayout,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    max_input_size: usize,
}

/// A [`Codec`] encoding interleaved signed 16-bit PCM into AAC-LC.
///
/// PCM is buffered until a full encoder frame is available; the timestamp of
/// the first submission anchors every output timestamp.
#[derive(Default)]
pub struct FfmpegAudioEncoder {
    open: Option<OpenEncoder>,
    pending: Vec<u8>,
    input_closed: bool,
    first_pts: Option<i64>,
    samples_in: i64,
    outputs: OutputQueue,
}

impl FfmpegAudioEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(config: &AudioEncoderConfig) -> Result<(OpenEncoder, MediaTrack), ReelError> {
        let codec = ffmpeg_next::encoder::find(Id::AAC)
            .ok_or_else(|| ReelError::TranscodeError("no AAC encoder available".to_string()))?;
        let format = codec
            .audio()
            .ok()
            .and_then(|audio| audio.formats())
            .and_then(|mut formats| formats.next())
            .unwrap_or(Sample::F32(SampleType::Planar));
        let layout = ChannelLayout::default(i32::from(config.channels));

        let mut encoder = CodecContext::new_with_codec(codec).encoder().audio()?;
        encoder.set_rate(config.sample_rate as i32);
        encoder.set_channel_layout(layout);
        encoder.set_format(format);
        encoder.set_time_base(Rational(1, config.sample_rate as i32));
        encoder.set_bit_rate(config.bit_rate as usize);
        // SAFETY: the context is allocated and not yet opened.
        unsafe {
            let raw = encoder.as_mut_ptr();
            (*raw).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            (*raw).profile = config.aac_profile as i32 - 1;
        }
        let encoder = encoder.open_as(codec)?;
        let frame_size = (encoder.frame_size() as usize).max(1);

        let resampler = ResamplingContext::get(
            PCM_FORMAT,
            layout,
            config.sample_rate,
            format,
            layout,
            config.sample_rate,
        )?;

        let mut track = MediaTrack::audio(MIME_AUDIO_AAC, config.sample_rate, config.channels)
            .with_bit_rate(config.bit_rate);
        track.parameters = TrackParameters::Audio {
            sample_rate: config.sample_rate,
            channels: config.channels,
            aac_profile: Some(AAC_PROFILE_LC),
            max_input_size: Some(config.max_input_size),
        };
        // SAFETY: the opened context owns its extradata buffer.
        let extradata = unsafe {
            let raw = encoder.as_ptr();
            read_extradata((*raw).extradata, (*raw).extradata_size)
        };
        if let Some(payload) = extradata {
            track = track.with_codec_config(payload);
        }

        let open = OpenEncoder {
            encoder,
            resampler,
            layout,
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size,
            max_input_size: config.max_input_size,
        };
        Ok((open, track))
    }

    fn encoder(&mut self) -> Result<&mut OpenEncoder, ReelError> {
        self.open
            .as_mut()
            .ok_or_else(|| ReelError::TranscodeError("encoder is not configured".to_string()))
    }

    /// Encode whole frames from the pending buffer; with `flush`, the
    /// remainder too.
    fn encode_pending(&mut self, flush: bool) -> Result<(), ReelError> {
        let Some(open) = self.open.as_mut() else {
            return Err(ReelError::TranscodeError("encoder is not configured".to_string()));
        };
        let frame_bytes = pcm_frame_bytes(open.channels);
        let full_frame = open.frame_size * frame_bytes;

        while self.pending.len() >= full_frame || (flush && !self.pending.is_empty()) {
            let take = self.pending.len().min(full_frame);
            let samples = take / frame_bytes;
            let chunk: Vec<u8> = self.pending.drain(..take).collect();
            if samples == 0 {
                continue;
            }

            let mut input = AudioFrame::new(PCM_FORMAT, samples, open.layout);
            input.set_rate(open.sample_rate);
            input.data_mut(0)[..samples * frame_bytes].copy_from_slice(&chunk[..samples * frame_bytes]);

            let mut converted = AudioFrame::empty();
            open.resampler.run(&input, &mut converted)?;
            converted.set_pts(Some(self.samples_in));
            self.samples_in += samples as i64;
            open.encoder.send_frame(&converted)?;
            Self::receive_packets(open, &mut self.outputs, self.first_pts.unwrap_or(0));
        }
        Ok(())
    }

    fn receive_packets(open: &mut OpenEncoder, outputs: &mut OutputQueue, start_us: i64) {
        let sample_rate = i64::from(open.sample_rate.max(1));
        let mut packet = Packet::empty();
        while open.encoder.receive_packet(&mut packet).is_ok() {
            let Some(data) = packet.data() else {
                continue;
            };
            let presentation_time_us =
                start_us + packet.pts().unwrap_or(0) * MICROS_PER_SECOND / sample_rate;
            outputs.push_sample(SampleBuffer::new(
                data.to_vec(),
                presentation_time_us,
                SampleFlags::KEYFRAME,
            ));
        }
    }
}

impl Codec for FfmpegAudioEncoder {
    fn configure(&mut self, config: &CodecConfig) -> Result<(), ReelError> {
        let CodecConfig::AudioEncoder(config) = config else {
            return Err(ReelError::TranscodeError(
                "AAC encoder needs an audio encoder profile".to_string(),
            ));
        };
        if self.open.is_some() {
            return Err(ReelError::TranscodeError("encoder already configured".to_string()));
        }
        let (open, track) = Self::open(config)?;
        log::info!(
            "Configured AAC encoder: {} Hz, {} ch, {} bit/s, {} samples per frame",
            config.sample_rate,
            config.channels,
            config.bit_rate,
            open.frame_size
        );
        self.open = Some(open);
        self.outputs.format = Some(track);
        Ok(())
    }

    fn acquire_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>, ReelError> {
        let capacity = self.encoder()?.max_input_size;
        if self.input_closed {
            return Ok(None);
        }
        Ok(Some(InputSlot { index: 0, capacity }))
    }

    fn submit(
        &mut self,
        slot: InputSlot,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), ReelError> {
        let frame_bytes = pcm_frame_bytes(self.encoder()?.channels);
        if self.input_closed {
            return Err(ReelError::TranscodeError("input already ended".to_string()));
        }
        if data.len() > slot.capacity {
            return Err(ReelError::TranscodeError(format!(
                "{} bytes submitted to a {} byte slot",
                data.len(),
                slot.capacity
            )));
        }
        if data.len() % frame_bytes != 0 {
            return Err(ReelError::TranscodeError(format!(
                "{} PCM bytes is not a whole number of {frame_bytes} byte frames",
                data.len()
            )));
        }

        if !data.is_empty() {
            self.first_pts.get_or_insert(presentation_time_us);
            self.pending.extend_from_slice(data);
            self.encode_pending(false)?;
        }

        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.input_closed = true;
            self.encode_pending(true)?;
            let start_us = self.first_pts.unwrap_or(0);
            let Some(open) = self.open.as_mut() else {
                return Err(ReelError::TranscodeError("encoder is not configured".to_string()));
            };
            open.encoder.send_eof()?;
            Self::receive_packets(open, &mut self.outputs, start_us);
            self.outputs
                .push_sample(SampleBuffer::end_of_stream(presentation_time_us.max(start_us)));
        }
        Ok(())
    }

    fn acquire_output(&mut self, _timeout: Duration) -> Result<OutputEvent, ReelError> {
        Ok(self.outputs.pop())
    }

    fn release(&mut self, index: usize) -> Result<(), ReelError> {
        self.outputs.release(index)
    }

    fn stop(&mut self) {
        if self.open.take().is_some() {
            log::debug!("AAC encoder stopped");
        }
        self.pending.clear();
        self.outputs.clear();
    }
}

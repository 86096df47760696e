//! H.264 encoding through libavcodec.

use std::collections::VecDeque;
use std::time::Duration;

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::{Packet, Rational};

use super::read_extradata;
use crate::codec::{Codec, CodecConfig, InputSlot, OutputEvent, VideoEncoderConfig};
use crate::error::ReelError;
use crate::sample::{MediaTrack, SampleBuffer, SampleFlags, TrackParameters};
use crate::schedule::MICROS_PER_SECOND;

/// Encoders tried in order; the first one FFmpeg was built with wins.
const H264_ENCODERS: &[&str] = &["libx264", "h264_videotoolbox", "h264_nvenc", "h264_vaapi"];

struct OpenEncoder {
    encoder: ffmpeg_next::encoder::video::Encoder,
    width: u32,
    height: u32,
    frame_rate: u32,
    frame_len: usize,
}

/// A [`Codec`] encoding planar 4:2:0 frames into H.264.
///
/// Every input slot holds at most one frame; partial submissions are staged
/// until the frame is complete. Output is queued as FFmpeg produces it.
#[derive(Default)]
pub struct FfmpegVideoEncoder {
    open: Option<OpenEncoder>,
    staged: Vec<u8>,
    staged_pts: i64,
    input_closed: bool,
    format: Option<MediaTrack>,
    outputs: VecDeque<OutputEvent>,
    next_index: usize,
}

impl FfmpegVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(config: &VideoEncoderConfig) -> Result<(OpenEncoder, MediaTrack), ReelError> {
        let codec = H264_ENCODERS
            .iter()
            .find_map(|name| ffmpeg_next::encoder::find_by_name(name))
            .or_else(|| ffmpeg_next::encoder::find(Id::H264))
            .ok_or_else(|| ReelError::VideoEncodeError("no H.264 encoder available".to_string()))?;
        log::debug!("Using video encoder {}", codec.name());

        let frame_rate = config.frame_rate as i32;
        let mut encoder = CodecContext::new_with_codec(codec).encoder().video()?;
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(Rational::new(1, frame_rate));
        encoder.set_frame_rate(Some(Rational::new(frame_rate, 1)));
        encoder.set_bit_rate(config.bit_rate as usize);
        encoder.set_gop(config.frame_rate * config.i_frame_interval.max(1));
        encoder.set_max_b_frames(0);
        // SAFETY: the context is allocated and not yet opened.
        unsafe {
            (*encoder.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
        let encoder = encoder.open_as(codec)?;

        let mut track = MediaTrack::video(config.mime.clone(), config.width, config.height)
            .with_bit_rate(config.bit_rate);
        track.parameters = TrackParameters::Video {
            width: config.width,
            height: config.height,
            frame_rate: Some(config.frame_rate),
            i_frame_interval: Some(config.i_frame_interval),
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
            width: config.width,
            height: config.height,
            frame_rate: config.frame_rate,
            frame_len: config.width as usize * config.height as usize * 3 / 2,
        };
        Ok((open, track))
    }

    fn encoder(&mut self) -> Result<&mut OpenEncoder, ReelError> {
        self.open
            .as_mut()
            .ok_or_else(|| ReelError::VideoEncodeError("encoder is not configured".to_string()))
    }

    fn encode_staged(&mut self) -> Result<(), ReelError> {
        let staged = std::mem::take(&mut self.staged);
        let presentation_time_us = self.staged_pts;
        let open = self.encoder()?;

        let mut frame = VideoFrame::new(Pixel::YUV420P, open.width, open.height);
        let luma_len = open.width as usize * open.height as usize;
        let chroma_len = luma_len / 4;
        let planes = [
            (&staged[..luma_len], open.width as usize, open.height as usize),
            (
                &staged[luma_len..luma_len + chroma_len],
                open.width as usize / 2,
                open.height as usize / 2,
            ),
            (
                &staged[luma_len + chroma_len..],
                open.width as usize / 2,
                open.height as usize / 2,
            ),
        ];
        for (plane, (source, row_len, rows)) in planes.into_iter().enumerate() {
            let stride = frame.stride(plane);
            let destination = frame.data_mut(plane);
            for row in 0..rows {
                destination[row * stride..row * stride + row_len]
                    .copy_from_slice(&source[row * row_len..(row + 1) * row_len]);
            }
        }

        let frame_rate = i64::from(open.frame_rate);
        let frame_index =
            (presentation_time_us * frame_rate + MICROS_PER_SECOND / 2) / MICROS_PER_SECOND;
        frame.set_pts(Some(frame_index));
        open.encoder.send_frame(&frame)?;
        self.drain();
        Ok(())
    }

    fn drain(&mut self) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        let frame_rate = i64::from(open.frame_rate);
        let mut packet = Packet::empty();
        while open.encoder.receive_packet(&mut packet).is_ok() {
            let Some(data) = packet.data() else {
                continue;
            };
            if let Some(track) = self.format.take() {
                self.outputs.push_back(OutputEvent::FormatChanged(track));
            }
            let presentation_time_us =
                packet.pts().unwrap_or(0) * MICROS_PER_SECOND / frame_rate;
            let flags = if packet.is_key() {
                SampleFlags::KEYFRAME
            } else {
                SampleFlags::empty()
            };
            self.outputs.push_back(OutputEvent::Sample {
                index: self.next_index,
                sample: SampleBuffer::new(data.to_vec(), presentation_time_us, flags),
            });
            self.next_index += 1;
        }
    }
}

impl Codec for FfmpegVideoEncoder {
    fn configure(&mut self, config: &CodecConfig) -> Result<(), ReelError> {
        let CodecConfig::VideoEncoder(config) = config else {
            return Err(ReelError::VideoEncodeError(
                "video encoder needs a video encoder profile".to_string(),
            ));
        };
        if self.open.is_some() {
            return Err(ReelError::VideoEncodeError("encoder already configured".to_string()));
        }
        let (open, track) = Self::open(config)?;
        log::info!(
            "Configured H.264 encoder: {}x{} @ {} fps, {} bit/s",
            config.width,
            config.height,
            config.frame_rate,
            config.bit_rate
        );
        self.open = Some(open);
        self.format = Some(track);
        Ok(())
    }

    fn acquire_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>, ReelError> {
        let frame_len = self.encoder()?.frame_len;
        if self.input_closed {
            return Ok(None);
        }
        Ok(Some(InputSlot {
            index: 0,
            capacity: frame_len - self.staged.len(),
        }))
    }

    fn submit(
        &mut self,
        slot: InputSlot,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), ReelError> {
        let frame_len = self.encoder()?.frame_len;
        if self.input_closed {
            return Err(ReelError::VideoEncodeError("input already ended".to_string()));
        }
        if data.len() > slot.capacity {
            return Err(ReelError::VideoEncodeError(format!(
                "{} bytes submitted to a {} byte slot",
                data.len(),
                slot.capacity
            )));
        }

        if !data.is_empty() {
            if self.staged.is_empty() {
                self.staged_pts = presentation_time_us;
            }
            self.staged.extend_from_slice(data);
            if self.staged.len() == frame_len {
                self.encode_staged()?;
            }
        }

        if flags.contains(SampleFlags::END_OF_STREAM) {
            if !self.staged.is_empty() {
                return Err(ReelError::VideoEncodeError(format!(
                    "stream ended inside a frame ({} of {frame_len} bytes)",
                    self.staged.len()
                )));
            }
            self.input_closed = true;
            self.encoder()?.encoder.send_eof()?;
            self.drain();
            self.outputs.push_back(OutputEvent::Sample {
                index: self.next_index,
                sample: SampleBuffer::end_of_stream(presentation_time_us),
            });
            self.next_index += 1;
        }
        Ok(())
    }

    fn acquire_output(&mut self, _timeout: Duration) -> Result<OutputEvent, ReelError> {
        Ok(self.outputs.pop_front().unwrap_or(OutputEvent::TryAgainLater))
    }

    fn release(&mut self, index: usize) -> Result<(), ReelError> {
        if index >= self.next_index {
            return Err(ReelError::VideoEncodeError(format!(
                "output {index} was never handed out"
            )));
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.open.take().is_some() {
            log::debug!("Video encoder stopped");
        }
        self.staged.clear();
        self.outputs.clear();
        self.format = None;
    }
}

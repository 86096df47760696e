//! Demuxing readers and MP4 writers.

use std::path::{Path, PathBuf};

use ffmpeg_next::codec::Id;
use ffmpeg_next::format::context::{Input, Output};
use ffmpeg_next::media::Type;
use ffmpeg_next::{Packet, Rational, Stream};

use super::{
    MICROSECOND_TIME_BASE, codec_id_for_mime, from_micros, mime_for_codec_id, read_extradata,
    to_micros, write_extradata,
};
use crate::codec::{ContainerWriter, TrackReader};
use crate::error::ReelError;
use crate::sample::{MediaTrack, SampleBuffer, SampleFlags, TrackParameters};

/// A [`TrackReader`] over any container FFmpeg can demux.
///
/// Rewinding reopens the input, which is exact for every demuxer.
pub struct FfmpegReader {
    path: PathBuf,
    input: Input,
    tracks: Vec<MediaTrack>,
    stream_indices: Vec<usize>,
    time_bases: Vec<Rational>,
    selected: Option<usize>,
}

impl FfmpegReader {
    /// Open `path` and probe its audio and video streams.
    ///
    /// # Errors
    ///
    /// Returns [`ReelError::DecodeError`] if FFmpeg cannot open the file.
    pub fn open(path: &Path) -> Result<Self, ReelError> {
        let input = open_input(path)?;
        let container_duration_us = input.duration();

        let mut tracks = Vec::new();
        let mut stream_indices = Vec::new();
        let mut time_bases = Vec::new();
        for stream in input.streams() {
            if let Some(track) = probe_stream(&stream, container_duration_us) {
                log::debug!(
                    "Stream {} of {}: {} {:?}",
                    stream.index(),
                    path.display(),
                    track.mime,
                    track.parameters
                );
                tracks.push(track);
                stream_indices.push(stream.index());
                time_bases.push(stream.time_base());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            input,
            tracks,
            stream_indices,
            time_bases,
            selected: None,
        })
    }
}

impl TrackReader for FfmpegReader {
    fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<(), ReelError> {
        if index >= self.tracks.len() {
            return Err(ReelError::InvalidInput(format!(
                "track {index} out of range ({} tracks)",
                self.tracks.len()
            )));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn seek_to_start(&mut self) -> Result<(), ReelError> {
        self.input = open_input(&self.path)?;
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<SampleBuffer>, ReelError> {
        let selected = self
            .selected
            .ok_or_else(|| ReelError::InvalidInput("no track selected".to_string()))?;
        let stream_index = self.stream_indices[selected];
        let time_base = self.time_bases[selected];

        let mut packet = Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(error) => return Err(error.into()),
            }
            if packet.stream() != stream_index {
                continue;
            }
            let Some(data) = packet.data() else {
                continue;
            };
            let timestamp = packet.pts().or(packet.dts()).unwrap_or(0);
            let flags = if packet.is_key() {
                SampleFlags::KEYFRAME
            } else {
                SampleFlags::empty()
            };
            return Ok(Some(SampleBuffer::new(
                data.to_vec(),
                to_micros(timestamp, time_base),
                flags,
            )));
        }
    }
}

fn open_input(path: &Path) -> Result<Input, ReelError> {
    ffmpeg_next::format::input(&path).map_err(|error| {
        ReelError::DecodeError(format!("cannot open {}: {error}", path.display()))
    })
}

/// Describe one stream, or `None` for streams that are neither audio nor video.
fn probe_stream(stream: &Stream, container_duration_us: i64) -> Option<MediaTrack> {
    let parameters = stream.parameters();
    let medium = parameters.medium();
    let mime = mime_for_codec_id(parameters.id());
    let raw = parameters.as_ptr();

    // SAFETY: `raw` points at the stream's codec parameters, alive for the
    // duration of this borrow.
    let mut track = unsafe {
        match medium {
            Type::Video => {
                let mut track =
                    MediaTrack::video(mime, (*raw).width.max(0) as u32, (*raw).height.max(0) as u32);
                let rate = stream.avg_frame_rate();
                if rate.numerator() > 0 && rate.denominator() > 0 {
                    let frame_rate = (f64::from(rate.numerator()) / f64::from(rate.denominator()))
                        .round() as u32;
                    if let TrackParameters::Video { frame_rate: slot, .. } = &mut track.parameters {
                        *slot = Some(frame_rate);
                    }
                }
                track
            }
            Type::Audio => MediaTrack::audio(
                mime,
                (*raw).sample_rate.max(0) as u32,
                (*raw).ch_layout.nb_channels.max(0) as u16,
            ),
            _ => return None,
        }
    };

    // SAFETY: as above.
    let (bit_rate, extradata) =
        unsafe { ((*raw).bit_rate, read_extradata((*raw).extradata, (*raw).extradata_size)) };
    if bit_rate > 0 {
        track = track.with_bit_rate(bit_rate as u64);
    }
    if let Some(payload) = extradata {
        track = track.with_codec_config(payload);
    }

    let duration_us = match stream.duration() {
        duration if duration > 0 => to_micros(duration, stream.time_base()),
        _ => container_duration_us,
    };
    if duration_us > 0 {
        track = track.with_duration_us(duration_us);
    }
    track
        .extra
        .insert("time-base".to_string(), stream.time_base().to_string());
    Some(track)
}

/// A [`ContainerWriter`] producing MP4 files.
pub struct FfmpegWriter {
    path: PathBuf,
    output: Option<Output>,
    time_bases: Vec<Rational>,
    track_count: usize,
    started: bool,
}

impl FfmpegWriter {
    /// Create (or truncate) the MP4 file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ReelError::ResourceError`] if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, ReelError> {
        let output = ffmpeg_next::format::output_as(&path, "mp4").map_err(|error| {
            ReelError::ResourceError {
                path: path.to_path_buf(),
                reason: format!("cannot create MP4 writer: {error}"),
            }
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            output: Some(output),
            time_bases: Vec::new(),
            track_count: 0,
            started: false,
        })
    }

    fn output(&mut self) -> Result<&mut Output, ReelError> {
        self.output.as_mut().ok_or_else(|| ReelError::ResourceError {
            path: self.path.clone(),
            reason: "writer already finished".to_string(),
        })
    }
}

impl ContainerWriter for FfmpegWriter {
    fn add_track(&mut self, track: &MediaTrack) -> Result<usize, ReelError> {
        if self.started {
            return Err(ReelError::MergeError(
                "tracks must be added before the writer starts".to_string(),
            ));
        }
        let id = codec_id_for_mime(&track.mime)
            .ok_or_else(|| ReelError::MergeError(format!("unsupported track format {}", track.mime)))?;
        if !matches!(id, Id::H264 | Id::HEVC | Id::AAC | Id::MP3) {
            return Err(ReelError::MergeError(format!(
                "MP4 writer cannot carry {}",
                track.mime
            )));
        }

        let output = self.output()?;
        let mut stream = output.add_stream(ffmpeg_next::encoder::find(Id::None))?;
        stream.set_time_base(MICROSECOND_TIME_BASE);
        let raw = stream.parameters().as_mut_ptr();

        // SAFETY: `raw` is the new stream's codec parameters, owned by the
        // output context held in `self.output`.
        unsafe {
            (*raw).codec_id = id.into();
            (*raw).codec_tag = 0;
            match track.parameters {
                TrackParameters::Video { width, height, .. } => {
                    (*raw).codec_type = ffmpeg_sys_next::AVMediaType::AVMEDIA_TYPE_VIDEO;
                    (*raw).width = width as i32;
                    (*raw).height = height as i32;
                    (*raw).format = ffmpeg_sys_next::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
                }
                TrackParameters::Audio {
                    sample_rate,
                    channels,
                    aac_profile,
                    ..
                } => {
                    (*raw).codec_type = ffmpeg_sys_next::AVMediaType::AVMEDIA_TYPE_AUDIO;
                    (*raw).sample_rate = sample_rate as i32;
                    ffmpeg_sys_next::av_channel_layout_default(
                        &mut (*raw).ch_layout,
                        i32::from(channels),
                    );
                    if let Some(profile) = aac_profile {
                        // AVCodecParameters profiles are object type minus one.
                        (*raw).profile = profile as i32 - 1;
                    }
                }
            }
            if let Some(bit_rate) = track.bit_rate {
                (*raw).bit_rate = bit_rate as i64;
            }
            if let Some(payload) = track.codec_config.first() {
                write_extradata(&mut (*raw).extradata, &mut (*raw).extradata_size, payload)?;
            }
        }

        let index = self.track_count;
        self.track_count += 1;
        log::debug!("Registered track {index} ({}) for {}", track.mime, self.path.display());
        Ok(index)
    }

    fn start(&mut self) -> Result<(), ReelError> {
        if self.started {
            return Err(ReelError::MergeError("writer already started".to_string()));
        }
        if self.track_count == 0 {
            return Err(ReelError::MergeError("writer has no tracks".to_string()));
        }
        let output = self.output()?;
        output.write_header()?;
        let time_bases = output.streams().map(|stream| stream.time_base()).collect();
        self.time_bases = time_bases;
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, sample: &SampleBuffer) -> Result<(), ReelError> {
        if !self.started {
            return Err(ReelError::MergeError("writer not started".to_string()));
        }
        let time_base = *self.time_bases.get(track_index).ok_or_else(|| {
            ReelError::MergeError(format!("track {track_index} was never registered"))
        })?;

        let timestamp = from_micros(sample.presentation_time_us, time_base);
        let mut packet = Packet::copy(&sample.data);
        packet.set_stream(track_index);
        packet.set_pts(Some(timestamp));
        packet.set_dts(Some(timestamp));
        packet.set_position(-1);
        if sample.is_keyframe() {
            packet.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        packet.write_interleaved(self.output()?)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ReelError> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        if self.started {
            output.write_trailer()?;
            log::debug!("Finished {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Err(error) = self.finish() {
            log::warn!("Failed to finish {}: {error}", self.path.display());
        }
    }
}

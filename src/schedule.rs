//! Frame budget distribution across source images.
//!
//! A job's frame budget is fixed once, from the frame rate and the target
//! duration, and then split across the source images so that the slot
//! counts sum to the budget exactly. Presentation timestamps are derived from
//! the frame index with fixed-point arithmetic; they are never accumulated.

use crate::error::ReelError;

/// Microseconds per second.
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Total number of frames for a job.
///
/// `max(frame_rate, frame_rate × duration_seconds)`: a zero duration still
/// yields one second of video.
pub fn total_frames(frame_rate: u32, duration_seconds: u32) -> u64 {
    let frame_rate = frame_rate as u64;
    frame_rate.max(frame_rate * duration_seconds as u64)
}

/// Presentation timestamp of `frame_index`, in microseconds.
///
/// Computed as `frame_index × 1_000_000 / frame_rate` with integer division,
/// so the timestamp of every frame is exact regardless of how many frames
/// precede it.
pub fn presentation_time_us(frame_index: u64, frame_rate: u32) -> i64 {
    (frame_index as i64 * MICROS_PER_SECOND) / frame_rate as i64
}

/// One image's share of the frame budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSlot {
    /// Index of the source image, in input order.
    pub source_index: usize,
    /// Number of consecutive frames showing that image.
    pub frame_count: u64,
}

/// Per-image frame counts for one job.
///
/// Invariants: one slot per source image, in input order, and the slot
/// counts sum to [`total_frames`](FrameSchedule::total_frames).
///
/// # Example
///
/// ```
/// use reelmaker::FrameSchedule;
///
/// let schedule = FrameSchedule::build(4, 33, 10)?;
/// assert_eq!(schedule.frame_counts(), vec![83, 83, 82, 82]);
/// # Ok::<(), reelmaker::ReelError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchedule {
    slots: Vec<ScheduleSlot>,
    total_frames: u64,
    frame_rate: u32,
}

impl FrameSchedule {
    /// Distribute the job's frame budget over `image_count` images.
    ///
    /// Each slot gets `total / image_count` frames; the first
    /// `total % image_count` slots get one extra frame.
    ///
    /// # Errors
    ///
    /// [`ReelError::InvalidInput`] if `image_count` or `frame_rate` is zero.
    pub fn build(
        image_count: usize,
        frame_rate: u32,
        duration_seconds: u32,
    ) -> Result<Self, ReelError> {
        if image_count == 0 {
            return Err(ReelError::InvalidInput("no images provided".to_string()));
        }
        if frame_rate == 0 {
            return Err(ReelError::InvalidInput(
                "frame rate must be greater than zero".to_string(),
            ));
        }

        let total = total_frames(frame_rate, duration_seconds);
        let base = total / image_count as u64;
        let remainder = (total % image_count as u64) as usize;

        let slots = (0..image_count)
            .map(|source_index| ScheduleSlot {
                source_index,
                frame_count: base + u64::from(source_index < remainder),
            })
            .collect();

        log::debug!(
            "Frame schedule: {total} frames over {image_count} images (base={base}, remainder={remainder})"
        );

        Ok(Self {
            slots,
            total_frames: total,
            frame_rate,
        })
    }

    pub fn slots(&self) -> &[ScheduleSlot] {
        &self.slots
    }

    /// Frame count of every slot, in image order.
    pub fn frame_counts(&self) -> Vec<u64> {
        self.slots.iter().map(|slot| slot.frame_count).collect()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Number of source images.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The source image shown at `frame_index`, or `None` past the end.
    pub fn source_for_frame(&self, frame_index: u64) -> Option<usize> {
        let mut remaining = frame_index;
        for slot in &self.slots {
            if remaining < slot.frame_count {
                return Some(slot.source_index);
            }
            remaining -= slot.frame_count;
        }
        None
    }

    /// Presentation timestamp of `frame_index` at this schedule's frame rate.
    pub fn presentation_time_us(&self, frame_index: u64) -> i64 {
        presentation_time_us(frame_index, self.frame_rate)
    }

    /// Timestamp of the last frame, where the end-of-stream marker is placed.
    pub fn last_presentation_time_us(&self) -> i64 {
        self.presentation_time_us(self.total_frames.saturating_sub(1))
    }

    /// Nominal video duration: `total_frames / frame_rate`, in microseconds.
    pub fn duration_us(&self) -> i64 {
        presentation_time_us(self.total_frames, self.frame_rate)
    }
}

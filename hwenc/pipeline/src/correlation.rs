/*!
    Pairing of submitted frames with device output.

    The devices this pipeline targets emit compressed frames in submission
    order, so the oldest pending descriptor always belongs to the next frame
    the device produces.
*/

use std::collections::VecDeque;

use bytes::Bytes;

use hwenc_types::{EncodedImage, FrameType, Rotation};

/**
    Metadata of a submitted frame awaiting its compressed output.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingOutput {
    pub capture_time_ms: i64,
    pub rotation: Rotation,
    pub encoded_width: u32,
    pub encoded_height: u32,
    pub complete_frame: bool,
}

impl PendingOutput {
    /**
        Combine the descriptor with the device payload.
    */
    pub fn into_encoded_image(self, buffer: Bytes, frame_type: FrameType) -> EncodedImage {
        EncodedImage {
            buffer,
            encoded_width: self.encoded_width,
            encoded_height: self.encoded_height,
            capture_time_ms: self.capture_time_ms,
            frame_type,
            rotation: self.rotation,
            complete_frame: self.complete_frame,
        }
    }
}

/**
    FIFO of pending output descriptors.
*/
#[derive(Debug, Default)]
pub struct CorrelationQueue {
    pending: VecDeque<PendingOutput>,
}

impl CorrelationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Queue the descriptor of a newly submitted frame.
    */
    pub fn push(&mut self, output: PendingOutput) {
        self.pending.push_back(output);
    }

    /**
        Take the descriptor of the oldest in-flight frame.
    */
    pub fn pop_front(&mut self) -> Option<PendingOutput> {
        self.pending.pop_front()
    }

    /**
        Remove the most recently queued descriptor.

        Used when a frame fails after its descriptor was queued, so the
        queue stays aligned with what the device actually received.
    */
    pub fn pop_last(&mut self) -> Option<PendingOutput> {
        self.pending.pop_back()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /**
        Drop every pending descriptor.
    */
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

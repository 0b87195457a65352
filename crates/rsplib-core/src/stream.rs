//! Sample stream block type.
//!
//! A [`StreamBlock`] borrows the producer's I/Q buffers. It is only valid
//! for the duration of the callback that receives it; consumers must copy
//! anything they want to keep.

/// One block of interleaved-by-channel I/Q samples.
#[derive(Debug, Clone, Copy)]
pub struct StreamBlock<'a> {
    /// Sequence number of the first sample in this block.
    pub first_sample_num: u32,
    /// Gain changed since the previous block.
    pub gr_changed: bool,
    /// RF frequency changed since the previous block.
    pub rf_changed: bool,
    /// Sample rate changed since the previous block.
    pub fs_changed: bool,
    /// Sample numbering restarted; the block is not contiguous with the
    /// previous one.
    pub reset: bool,
    /// In-phase samples.
    pub xi: &'a [i16],
    /// Quadrature samples.
    pub xq: &'a [i16],
}

impl<'a> StreamBlock<'a> {
    /// A block with no change flags set.
    pub fn new(first_sample_num: u32, xi: &'a [i16], xq: &'a [i16]) -> Self {
        StreamBlock {
            first_sample_num,
            gr_changed: false,
            rf_changed: false,
            fs_changed: false,
            reset: false,
            xi,
            xq,
        }
    }

    /// Number of complex samples in the block.
    pub fn num_samples(&self) -> usize {
        self.xi.len().min(self.xq.len())
    }

    /// Sequence number the next block should start at if contiguous.
    pub fn next_sample_num(&self) -> u32 {
        self.first_sample_num
            .wrapping_add(self.num_samples() as u32)
    }
}

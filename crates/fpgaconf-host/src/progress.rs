//! Progress reporting hooks for long transfers

/// Callback for progress reporting during a configuration upload
pub trait UploadProgress {
    /// Called when attempt `attempt` (zero-based) starts; `fast` if the bulk
    /// endpoint is used
    fn attempt(&mut self, attempt: usize, fast: bool);

    /// Called after each transfer with the bytes sent so far in this attempt
    fn transferred(&mut self, done: usize, total: usize);

    /// Called once the outcome is known
    fn finished(&mut self, configured: bool);
}

/// Callback for progress reporting during flash reads and writes
pub trait FlashProgress {
    /// Called when starting, with the number of bytes to transfer
    fn start(&mut self, total_bytes: usize);

    /// Called when work on a sector begins
    fn sector(&mut self, sector: u32);

    /// Called after each transfer with the bytes just moved
    fn advance(&mut self, bytes: usize);

    /// Called when the operation is complete
    fn complete(&mut self);
}

/// A no-op progress reporter
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl UploadProgress for NoProgress {
    fn attempt(&mut self, _attempt: usize, _fast: bool) {}
    fn transferred(&mut self, _done: usize, _total: usize) {}
    fn finished(&mut self, _configured: bool) {}
}

impl FlashProgress for NoProgress {
    fn start(&mut self, _total_bytes: usize) {}
    fn sector(&mut self, _sector: u32) {}
    fn advance(&mut self, _bytes: usize) {}
    fn complete(&mut self) {}
}

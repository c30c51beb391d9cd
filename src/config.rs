//! Compile-time configuration for the signal chain.

/// Output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48_000;

/// Stereo frames per half of the output double buffer.
pub const AUDIO_BUFFER_FRAMES: usize = 256;

pub const AUDIO_CHANNELS: usize = 2;

/// Width of one channel slot on the I2S bus. Samples sit in the top 16 bits.
pub const SLOT_BITS: u32 = 32;

/// 32-bit words in one half buffer.
pub const STEREO_BUFFER_SIZE: usize = AUDIO_BUFFER_FRAMES * AUDIO_CHANNELS;

/// Ring size of the note command queue. One slot is always kept free, so it
/// holds `COMMAND_QUEUE_SIZE - 1` commands.
pub const COMMAND_QUEUE_SIZE: usize = 11;

/// Lines the log channel buffers before `emit` starts dropping.
pub const LOG_QUEUE_DEPTH: usize = 16;

/// Longest log line kept; longer text is truncated.
pub const LOG_LINE_LEN: usize = 64;

pub const MIDI_BAUD_RATE: u32 = 31_250;

pub const HEARTBEAT_PERIOD_MS: u64 = 500;

/// Time the hardware takes to play one half buffer, which is the render
/// deadline.
pub const fn half_buffer_period_us() -> u32 {
    (AUDIO_BUFFER_FRAMES as u32 * 1_000_000) / SAMPLE_RATE
}

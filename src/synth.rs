use fixed::types::U32F32;

use crate::config::SAMPLE_RATE;
use crate::wavetable::{SINE_TABLE, TABLE_SIZE};

/// One stereo frame as it goes out on the I2S bus: `[left, right]`.
pub type Frame = [i32; 2];

const DEFAULT_FREQUENCY: f32 = 440.0;

/// Highest frequency `set_frequency` accepts. Keeps the per-sample increment
/// at most half the table.
pub const MAX_FREQUENCY: f32 = SAMPLE_RATE as f32 / 2.0;

// Fixed attenuation so a full-scale table sample leaves headroom
const ATTENUATION: i16 = 8;

const TABLE_LEN: U32F32 = U32F32::from_bits((TABLE_SIZE as u64) << 32);

/// Widen a 16-bit sample into a 32-bit channel slot: sample in the high half,
/// low half zero. This is the layout the I2S hardware expects.
#[inline]
pub const fn to_slot(sample: i16) -> i32 {
    (sample as i32) << 16
}

#[inline]
fn phase_increment(frequency: f32) -> U32F32 {
    U32F32::saturating_from_num(frequency * TABLE_SIZE as f32 / SAMPLE_RATE as f32)
}

/// Phase accumulator state. `phase` always stays in `[0, TABLE_SIZE)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OscillatorState {
    phase: U32F32,
    phase_increment: U32F32,
    note_on: bool,
}

impl OscillatorState {
    const fn new() -> Self {
        Self {
            phase: U32F32::ZERO,
            phase_increment: U32F32::ZERO,
            note_on: false,
        }
    }
}

/// Monophonic wavetable oscillator. Owned by the audio task; the MIDI side only
/// reaches it through note commands.
#[derive(Clone, Debug)]
pub struct SynthEngine {
    osc: OscillatorState,
    frequency: f32,
}

impl Default for SynthEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthEngine {
    pub const fn new() -> Self {
        Self {
            osc: OscillatorState::new(),
            frequency: DEFAULT_FREQUENCY,
        }
    }

    /// Back to 440 Hz, gate off, phase zero.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Takes effect on the next `render`. Negative or non-finite values are
    /// treated as 0 Hz, anything above Nyquist as [`MAX_FREQUENCY`].
    pub fn set_frequency(&mut self, hz: f32) {
        self.frequency = if hz.is_finite() && hz > 0.0 {
            hz.min(MAX_FREQUENCY)
        } else {
            0.0
        };
    }

    pub fn set_gate(&mut self, on: bool) {
        self.osc.note_on = on;
    }

    pub fn note_on(&mut self) {
        self.set_gate(true);
    }

    pub fn note_off(&mut self) {
        self.set_gate(false);
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn gate(&self) -> bool {
        self.osc.note_on
    }

    pub fn phase(&self) -> f32 {
        self.osc.phase.to_num()
    }

    pub fn oscillator(&self) -> &OscillatorState {
        &self.osc
    }

    /// Fill `out` with the next `out.len()` frames. No allocation, no blocking.
    pub fn render(&mut self, out: &mut [Frame]) {
        // Recomputed on every call so a frequency change lands within one buffer
        self.osc.phase_increment = phase_increment(self.frequency);
        let increment = self.osc.phase_increment;

        for frame in out.iter_mut() {
            let index = self.osc.phase.to_num::<usize>();
            let sample = if self.osc.note_on {
                SINE_TABLE[index] / ATTENUATION
            } else {
                0
            };

            let slot = to_slot(sample);
            *frame = [slot, slot];

            self.osc.phase = self.osc.phase.saturating_add(increment);
            // The increment is below TABLE_LEN, so one wrap is enough
            if self.osc.phase >= TABLE_LEN {
                self.osc.phase -= TABLE_LEN;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rendered(engine: &mut SynthEngine, frames: usize) -> Vec<Frame> {
        let mut out = vec![[0x5555_5555, 0x5555_5555]; frames];
        engine.render(&mut out);
        out
    }

    #[test]
    fn starts_silent_at_a440() {
        let mut engine = SynthEngine::new();
        assert_eq!(engine.frequency(), 440.0);
        assert!(!engine.gate());
        assert_eq!(engine.phase(), 0.0);
        assert!(rendered(&mut engine, 64).iter().all(|f| *f == [0, 0]));
    }

    #[test]
    fn first_frames_follow_the_table() {
        let mut engine = SynthEngine::new();
        engine.note_on();
        let out = rendered(&mut engine, 3);

        assert_eq!(out[0], [to_slot(SINE_TABLE[0] / 8); 2]);
        // 440 * 1024 / 48000 = 9.38..
        assert_eq!(out[1], [to_slot(SINE_TABLE[9] / 8); 2]);
        assert_eq!(out[2], [to_slot(SINE_TABLE[18] / 8); 2]);
    }

    #[test]
    fn low_half_of_every_slot_is_zero() {
        let mut engine = SynthEngine::new();
        engine.note_on();
        engine.set_frequency(1234.5);
        for frame in rendered(&mut engine, 1024) {
            assert_eq!(frame[0], frame[1]);
            assert_eq!(frame[0] & 0xFFFF, 0);
        }
    }

    #[test]
    fn samples_are_attenuated() {
        let mut engine = SynthEngine::new();
        engine.note_on();
        engine.set_frequency(10.0);
        let peak = rendered(&mut engine, 4800)
            .iter()
            .map(|f| (f[0] >> 16).abs())
            .max()
            .unwrap();
        assert_eq!(peak, i32::from(i16::MAX / 8));
    }

    #[test]
    fn frequency_change_applies_on_next_render() {
        let mut engine = SynthEngine::new();
        engine.note_on();
        engine.render(&mut [[0; 2]; 1]);
        assert!((engine.phase() - 9.386_666).abs() < 1e-3);

        engine.set_frequency(880.0);
        engine.render(&mut [[0; 2]; 1]);
        assert!((engine.phase() - 3.0 * 9.386_666).abs() < 1e-3);
    }

    #[test]
    fn phase_keeps_running_while_muted() {
        let mut engine = SynthEngine::new();
        engine.render(&mut [[0; 2]; 10]);
        assert!(engine.phase() > 90.0);
    }

    #[test]
    fn frequencies_above_nyquist_are_clamped() {
        let mut engine = SynthEngine::new();
        engine.note_on();
        for hz in [150_000.0, 5.0e8, f32::MAX] {
            engine.set_frequency(hz);
            assert_eq!(engine.frequency(), MAX_FREQUENCY);
            for _ in 0..50 {
                engine.render(&mut [[0; 2]; 256]);
                assert!(engine.phase() >= 0.0 && engine.phase() < TABLE_SIZE as f32);
            }
        }
    }

    #[test]
    fn nyquist_alternates_between_two_table_points() {
        let mut engine = SynthEngine::new();
        engine.note_on();
        engine.set_frequency(MAX_FREQUENCY);
        engine.render(&mut [[0; 2]; 3]);
        // 24 kHz steps half the table per sample
        assert_eq!(engine.phase(), (TABLE_SIZE / 2) as f32);
    }

    #[test]
    fn bad_frequencies_are_clamped_to_silence() {
        let mut engine = SynthEngine::new();
        engine.note_on();
        for hz in [f32::NAN, f32::INFINITY, -440.0] {
            engine.set_frequency(hz);
            assert_eq!(engine.frequency(), 0.0);
            engine.render(&mut [[0; 2]; 8]);
            assert_eq!(engine.phase(), 0.0);
        }
    }

    #[test]
    fn reset_restores_defaults() {
        let mut engine = SynthEngine::new();
        engine.note_on();
        engine.set_frequency(100.0);
        engine.render(&mut [[0; 2]; 100]);
        engine.reset();
        assert_eq!(engine.oscillator(), SynthEngine::new().oscillator());
        assert_eq!(engine.frequency(), 440.0);
    }

    proptest! {
        #[test]
        fn phase_stays_inside_the_table(hz in 0.0f32..1.0e7, buffers in 1usize..40) {
            let mut engine = SynthEngine::new();
            engine.note_on();
            engine.set_frequency(hz);
            for _ in 0..buffers {
                engine.render(&mut [[0; 2]; 256]);
                prop_assert!(engine.phase() >= 0.0);
                prop_assert!(engine.phase() < TABLE_SIZE as f32);
            }
        }

        #[test]
        fn muted_output_is_exactly_zero(hz in 0.0f32..24_000.0) {
            let mut engine = SynthEngine::new();
            engine.set_frequency(hz);
            engine.set_gate(false);
            let mut out = [[1i32; 2]; 256];
            engine.render(&mut out);
            prop_assert!(out.iter().all(|f| *f == [0, 0]));
        }
    }
}

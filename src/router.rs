//! Turns parsed note events into queued oscillator commands.

use crate::command_queue::{CommandSender, NoteCommand};
use crate::log_sink::{LogSink, emit_fmt};
use crate::midi_parser::NoteHandler;

/// Standard MIDI note to frequency: A4 = 69 -> 440 Hz, equal temperament.
#[inline]
pub fn note_to_frequency(note: u8) -> f32 {
    440.0 * libm::powf(2.0, (note as f32 - 69.0) / 12.0)
}

/// Sits between the parser and the command queue. Holds no note state of its
/// own; every note on retunes and opens the gate, every note off closes it.
pub struct NoteRouter<'a, const N: usize, L: ?Sized> {
    commands: CommandSender<'a, N>,
    log: &'a L,
}

impl<'a, const N: usize, L: LogSink + ?Sized> NoteRouter<'a, N, L> {
    pub fn new(commands: CommandSender<'a, N>, log: &'a L) -> Self {
        Self { commands, log }
    }

    fn send(&mut self, command: NoteCommand) {
        if let Err(dropped) = self.commands.try_push(command) {
            warn!("command queue full, dropping {:?}", dropped);
        }
    }
}

impl<const N: usize, L: LogSink + ?Sized> NoteHandler for NoteRouter<'_, N, L> {
    fn note_on(&mut self, note: u8, velocity: u8) {
        let frequency = note_to_frequency(note);
        debug!("note on {} vel {} -> {} Hz", note, velocity, frequency);
        self.send(NoteCommand::note_on(frequency));
        emit_fmt(self.log, format_args!("Note On: {}", note));
    }

    fn note_off(&mut self, note: u8) {
        debug!("note off {}", note);
        self.send(NoteCommand::note_off());
        emit_fmt(self.log, format_args!("Note Off: {}", note));
    }
}

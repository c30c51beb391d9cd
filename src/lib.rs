//! Signal chain of a MIDI-controlled monophonic wavetable synth.
//!
//! Serial bytes go through [`midi_parser::MidiParser`] into a
//! [`router::NoteRouter`], which queues [`command_queue::NoteCommand`]s for the
//! audio side. The audio task applies them to the [`synth::SynthEngine`] and
//! renders into whichever half of the [`audio::DoubleBuffer`] the output
//! hardware is not reading. Both tasks sleep in [`demux::select`].
//!
//! Everything here is hardware independent; the firmware binary supplies the
//! UART, the I2S stream and the interrupt handlers.
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod audio;
pub mod command_queue;
pub mod config;
pub mod demux;
pub mod log_sink;
pub mod midi_in;
pub mod midi_parser;
pub mod router;
pub mod synth;
pub mod wavetable;

pub use audio::{AudioCoordinator, AudioTask, AudioWake, BufferWriter, DoubleBuffer, Half, NoProbe, OutputStream};
pub use command_queue::{CommandQueue, CommandReceiver, CommandSender, NoteCommand};
pub use demux::{EventSource, IrqEvent, select, select_timeout};
pub use log_sink::{LogChannel, LogSink, NullLog, emit_fmt};
pub use midi_in::{ByteSource, MidiTask, MidiWake};
pub use midi_parser::{MidiParser, NoteHandler};
pub use router::{NoteRouter, note_to_frequency};
pub use synth::{Frame, SynthEngine};

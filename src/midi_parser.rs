//! Byte-at-a-time MIDI stream decoder.
//!
//! Understands running status, real-time bytes interleaved anywhere, and the
//! data length of every channel and system common message so framing survives
//! traffic it does not care about. Only note on/off reach the handler.

use heapless::Vec;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const PROGRAM_CHANGE: u8 = 0xC0;
const CHANNEL_PRESSURE: u8 = 0xD0;
const SYSTEM: u8 = 0xF0;
const MTC_QUARTER_FRAME: u8 = 0xF1;
const SONG_POSITION: u8 = 0xF2;
const SONG_SELECT: u8 = 0xF3;
const REALTIME_START: u8 = 0xF8;

/// Receives decoded note events.
pub trait NoteHandler {
    fn note_on(&mut self, note: u8, velocity: u8);
    fn note_off(&mut self, note: u8);
}

impl<T: NoteHandler + ?Sized> NoteHandler for &mut T {
    fn note_on(&mut self, note: u8, velocity: u8) {
        (**self).note_on(note, velocity)
    }

    fn note_off(&mut self, note: u8) {
        (**self).note_off(note)
    }
}

/// Number of data bytes following `status`.
fn expected_data_bytes(status: u8) -> usize {
    match status & 0xF0 {
        PROGRAM_CHANGE | CHANNEL_PRESSURE => 1,
        SYSTEM => match status {
            MTC_QUARTER_FRAME | SONG_SELECT => 1,
            SONG_POSITION => 2,
            // SysEx, tune request and the undefined ones carry nothing we frame
            _ => 0,
        },
        // note off/on, poly pressure, control change, pitch bend
        _ => 2,
    }
}

#[derive(Debug)]
pub struct MidiParser<H> {
    // 0 = no running status yet
    running_status: u8,
    data: Vec<u8, 2>,
    expected_data_bytes: usize,
    handler: H,
}

impl<H: NoteHandler> MidiParser<H> {
    pub fn new(handler: H) -> Self {
        Self {
            running_status: 0,
            data: Vec::new(),
            expected_data_bytes: 0,
            handler,
        }
    }

    /// Consume one byte from the wire. Malformed input is dropped silently and
    /// the parser picks up again at the next status byte.
    pub fn process_byte(&mut self, byte: u8) {
        if byte >= REALTIME_START {
            // Real-time bytes may sit inside another message; leave its state alone
            return;
        }

        if byte & 0x80 != 0 {
            self.running_status = byte;
            self.data.clear();
            self.expected_data_bytes = expected_data_bytes(byte);
            return;
        }

        if self.running_status == 0 || self.expected_data_bytes == 0 {
            return;
        }

        // Never full: cleared as soon as it reaches expected_data_bytes (<= 2)
        let _ = self.data.push(byte);

        if self.data.len() == self.expected_data_bytes {
            self.dispatch();
            // Keep running_status so the next data bytes start a new message
            self.data.clear();
        }
    }

    fn dispatch(&mut self) {
        let data1 = self.data[0];
        let data2 = self.data.get(1).copied().unwrap_or(0);

        match self.running_status & 0xF0 {
            NOTE_ON if data2 > 0 => {
                trace!("MIDI: note on {} vel {}", data1, data2);
                self.handler.note_on(data1, data2);
            }
            // Note on with velocity 0 is a note off
            NOTE_ON | NOTE_OFF => {
                trace!("MIDI: note off {}", data1);
                self.handler.note_off(data1);
            }
            _ => {}
        }
    }

    /// Current running status, if a status byte has been seen.
    pub fn running_status(&self) -> Option<u8> {
        (self.running_status != 0).then_some(self.running_status)
    }

    /// Data bytes collected for the message in progress.
    pub fn pending_data(&self) -> &[u8] {
        &self.data
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

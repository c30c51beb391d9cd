//! MIDI input task body: sleep until the receive interrupt fires, then feed
//! every byte already waiting into the parser and re-arm the interrupt.

use crate::demux::{EventSource, IrqEvent, select};
use crate::log_sink::LogSink;
use crate::midi_parser::{MidiParser, NoteHandler};

/// Serial receive side of the MIDI port.
pub trait ByteSource {
    /// Next received byte, or `None` if the receiver is empty. Never blocks.
    fn read_byte(&mut self) -> Option<u8>;

    /// Re-enable the receive interrupt. The interrupt handler disables it
    /// before signalling so it cannot refire while bytes are still queued.
    fn rearm(&mut self);

    /// Throw away anything received so far. Returns how many bytes went.
    fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while self.read_byte().is_some() {
            discarded += 1;
        }
        discarded
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MidiWake {
    RxReady,
}

pub struct MidiTask<'a, S, H, L: ?Sized> {
    source: S,
    parser: MidiParser<H>,
    rx_ready: &'a IrqEvent,
    log: &'a L,
}

impl<'a, S, H, L> MidiTask<'a, S, H, L>
where
    S: ByteSource,
    H: NoteHandler,
    L: LogSink + Sync + ?Sized,
{
    pub fn new(source: S, handler: H, rx_ready: &'a IrqEvent, log: &'a L) -> Self {
        Self {
            source,
            parser: MidiParser::new(handler),
            rx_ready,
            log,
        }
    }

    /// Drop stale input and enable the receive interrupt.
    pub fn start(&mut self) {
        let stale = self.source.discard_pending();
        if stale > 0 {
            debug!("discarded {} stale MIDI bytes", stale);
        }
        self.source.rearm();
        self.log.emit("MIDI Task Initialized");
    }

    /// Parse everything the source holds right now. Returns the byte count.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Some(byte) = self.source.read_byte() {
            self.parser.process_byte(byte);
            count += 1;
        }
        count
    }

    /// One wait-drain-rearm cycle.
    pub async fn step(&mut self) -> usize {
        let sources: [(MidiWake, &dyn EventSource); 1] = [(MidiWake::RxReady, self.rx_ready)];
        let MidiWake::RxReady = select(&sources).await;
        self.rx_ready.take();

        let count = self.drain();
        trace!("MIDI: {} bytes", count);
        self.source.rearm();
        count
    }

    pub async fn run(mut self) -> ! {
        self.start();
        loop {
            self.step().await;
        }
    }

    pub fn parser(&self) -> &MidiParser<H> {
        &self.parser
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

//! MIDI IN on UART1, read straight from the receive FIFO.
//!
//! The driver only configures the pins and baud rate. After that the receive
//! interrupt masks itself and wakes the MIDI task, which empties the FIFO and
//! unmasks it again through [`ByteSource::rearm`].

use defmt::warn;
use embassy_rp::pac;
use embassy_rp::uart::{Blocking, UartRx};
use monosynth::{ByteSource, IrqEvent};

/// Set by the UART1 interrupt, consumed by the MIDI task.
pub static MIDI_READY: IrqEvent = IrqEvent::new();

pub struct MidiUart {
    // Held so the pin stays configured for UART1
    _rx: UartRx<'static, Blocking>,
}

impl MidiUart {
    pub fn new(rx: UartRx<'static, Blocking>) -> Self {
        Self { _rx: rx }
    }
}

fn regs() -> pac::uart::Uart {
    pac::UART1
}

fn set_rx_interrupts(enabled: bool) {
    regs().uartimsc().modify(|w| {
        w.set_rxim(enabled);
        w.set_rtim(enabled);
    });
}

impl ByteSource for MidiUart {
    fn read_byte(&mut self) -> Option<u8> {
        let r = regs();
        if r.uartfr().read().rxfe() {
            return None;
        }
        let dr = r.uartdr().read();
        if dr.oe() {
            warn!("MIDI receive overrun");
        }
        Some(dr.data())
    }

    fn rearm(&mut self) {
        set_rx_interrupts(true);
    }
}

/// Body of the UART1 interrupt handler.
pub fn on_rx_interrupt() {
    set_rx_interrupts(false);
    MIDI_READY.signal();
}

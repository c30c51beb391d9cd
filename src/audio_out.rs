//! I2S output on PIO0, fed from the shared double buffer by two DMA channels
//! chained to each other.
//!
//! Channel 0 streams half A and triggers channel 1, which streams half B and
//! triggers channel 0 again. Each channel raises `DMA_IRQ_1` when its half is
//! done; the handler rewinds that channel's read pointer for its next turn and
//! sets [`BUFFER_READY`]. Every channel occupies a 32-bit slot with the sample
//! in the top 16 bits, so one buffer word is one slot.

use core::sync::atomic::{Ordering, compiler_fence};

use defmt::{debug, info, warn};
use embassy_rp::Peri;
use embassy_rp::clocks::clk_sys_freq;
use embassy_rp::pac;
use embassy_rp::pac::dma::vals::{DataSize, TreqSel};
use embassy_rp::peripherals::{DMA_CH0, DMA_CH1, PIN_6, PIN_8, PIN_9, PIO0};
use embassy_rp::pio::{
    Common, Config, Direction, FifoJoin, LoadedProgram, ShiftConfig, ShiftDirection, StateMachine,
};
use fixed::traits::ToFixed;
use monosynth::config::{AUDIO_CHANNELS, SAMPLE_RATE, SLOT_BITS, STEREO_BUFFER_SIZE};
use monosynth::{DoubleBuffer, Half, IrqEvent, OutputStream};

/// Set from the DMA interrupt each time a half has been sent.
pub static BUFFER_READY: IrqEvent = IrqEvent::new();

/// DMA channel streaming each half. Must match the `DMA_CH*` tokens
/// `RpI2sOutput` holds.
const CHANNELS: [(usize, Half); 2] = [(0, Half::A), (1, Half::B)];
const CHANNEL_MASK: u32 = 0b11;

/// DREQ for PIO0 state machine 0 TX.
const DREQ_PIO0_TX0: u8 = 0;

/// Standard I2S with 32-bit slots. Side-set pins are bit clock then word clock.
pub struct I2sProgram<'d> {
    prg: LoadedProgram<'d, PIO0>,
}

impl<'d> I2sProgram<'d> {
    pub fn new(common: &mut Common<'d, PIO0>) -> Self {
        let prg = pio::pio_asm!(
            ".side_set 2",
            "    set x, 30          side 0b01",
            "left_data:",
            "    out pins, 1        side 0b00",
            "    jmp x-- left_data  side 0b01",
            "    out pins 1         side 0b10",
            "    set x, 30          side 0b11",
            "right_data:",
            "    out pins 1         side 0b10",
            "    jmp x-- right_data side 0b11",
            "    out pins 1         side 0b00",
        );

        Self {
            prg: common.load_program(&prg.program),
        }
    }
}

/// The audio task's handle on the PIO state machine and both DMA channels.
pub struct RpI2sOutput {
    sm: StateMachine<'static, PIO0, 0>,
    _dma_a: Peri<'static, DMA_CH0>,
    _dma_b: Peri<'static, DMA_CH1>,
    buffer: &'static DoubleBuffer,
}

impl RpI2sOutput {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        common: &mut Common<'static, PIO0>,
        mut sm: StateMachine<'static, PIO0, 0>,
        dma_a: Peri<'static, DMA_CH0>,
        dma_b: Peri<'static, DMA_CH1>,
        data_pin: Peri<'static, PIN_6>,
        bit_clock_pin: Peri<'static, PIN_8>,
        lr_clock_pin: Peri<'static, PIN_9>,
        program: &I2sProgram<'static>,
        buffer: &'static DoubleBuffer,
    ) -> Self {
        let data_pin = common.make_pio_pin(data_pin);
        let bit_clock_pin = common.make_pio_pin(bit_clock_pin);
        let lr_clock_pin = common.make_pio_pin(lr_clock_pin);

        let mut cfg = Config::default();
        cfg.use_program(&program.prg, &[&bit_clock_pin, &lr_clock_pin]);
        cfg.set_out_pins(&[&data_pin]);
        // Two instructions per bit clock period
        let bit_clock = SAMPLE_RATE * SLOT_BITS * AUDIO_CHANNELS as u32;
        cfg.clock_divider = (clk_sys_freq() as f64 / bit_clock as f64 / 2.).to_fixed();
        cfg.shift_out = ShiftConfig {
            threshold: 32,
            direction: ShiftDirection::Left,
            auto_fill: true,
        };
        cfg.fifo_join = FifoJoin::TxOnly;

        sm.set_config(&cfg);
        sm.set_pin_dirs(Direction::Out, &[&data_pin, &lr_clock_pin, &bit_clock_pin]);

        Self {
            sm,
            _dma_a: dma_a,
            _dma_b: dma_b,
            buffer,
        }
    }

    fn configure_channels(&self) {
        let fifo = pac::PIO0.txf(0).as_ptr() as u32;

        for (i, &(channel, half)) in CHANNELS.iter().enumerate() {
            let (next, _) = CHANNELS[(i + 1) % CHANNELS.len()];
            let regs = pac::DMA.ch(channel);

            regs.read_addr().write_value(self.buffer.half_address(half) as u32);
            regs.write_addr().write_value(fifo);
            regs.trans_count().write_value(STEREO_BUFFER_SIZE as u32);

            let mut ctrl = pac::dma::regs::CtrlTrig(0);
            ctrl.set_treq_sel(TreqSel::from(DREQ_PIO0_TX0));
            ctrl.set_data_size(DataSize::SIZE_WORD);
            ctrl.set_incr_read(true);
            ctrl.set_incr_write(false);
            ctrl.set_chain_to(next as u8);
            ctrl.set_high_priority(true);
            ctrl.set_en(true);
            // Non-triggering alias: armed, but idle until chained or triggered
            regs.al1_ctrl().write_value(ctrl.0);
        }
    }
}

impl OutputStream for RpI2sOutput {
    /// Start of the half the busy channel is fetching from, or 0 when neither
    /// channel is running.
    fn read_address(&self) -> usize {
        for (channel, half) in CHANNELS {
            let regs = pac::DMA.ch(channel);
            if regs.ctrl_trig().read().busy() {
                let pointer = regs.read_addr().read() as usize;
                // Only B can point past the buffer, once its last word is fetched
                let current = self.buffer.half_at(pointer).unwrap_or(half);
                return self.buffer.half_address(current);
            }
        }
        0
    }

    fn start(&mut self) {
        // The buffer must be in memory before the DMA reads it
        compiler_fence(Ordering::SeqCst);

        self.configure_channels();
        let dma = pac::DMA;
        dma.ints1().write_value(CHANNEL_MASK);
        dma.inte1().write_value(dma.inte1().read() | CHANNEL_MASK);

        self.sm.set_enable(true);
        // Trigger alias: rewrites the same start address and kicks channel A
        let (first, half) = CHANNELS[0];
        dma.ch(first)
            .al3_read_addr_trig()
            .write_value(self.buffer.half_address(half) as u32);
        info!("I2S stream running");
    }

    fn stop(&mut self) {
        let dma = pac::DMA;
        dma.inte1().write_value(dma.inte1().read() & !CHANNEL_MASK);
        dma.chan_abort().write(|w| w.set_chan_abort(CHANNEL_MASK as u16));
        while dma.chan_abort().read().chan_abort() & CHANNEL_MASK as u16 != 0 {}
        self.sm.set_enable(false);
        debug!("I2S stream stopped");
    }
}

/// Body of the `DMA_IRQ_1` handler.
pub fn on_dma_interrupt(buffer: &DoubleBuffer) {
    let dma = pac::DMA;
    let status = dma.ints1().read() & CHANNEL_MASK;
    dma.ints1().write_value(status);

    for (channel, half) in CHANNELS {
        if status & (1 << channel) == 0 {
            continue;
        }
        let regs = pac::DMA.ch(channel);
        if regs.ctrl_trig().read().ahb_error() {
            warn!("I2S DMA bus error on channel {}", channel);
        }
        // Idle until the other channel chains back to it
        regs.read_addr().write_value(buffer.half_address(half) as u32);
    }

    if status != 0 {
        BUFFER_READY.signal();
    }
}

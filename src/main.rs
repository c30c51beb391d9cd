//! Firmware for a Raspberry Pi Pico: MIDI IN on UART1 (GPIO 5), I2S DAC on
//! PIO0.
//!
//! Connect the DAC as follows:
//!   din  : GPIO 6
//!   bclk : GPIO 8
//!   lrc  : GPIO 9
//! GPIO 2 is high while a half buffer renders. The on-board LED blinks while
//! the scheduler is alive.

#![no_std]
#![no_main]

mod audio_out;
mod midi_uart;

use audio_out::{BUFFER_READY, I2sProgram, RpI2sOutput};
use defmt::*;
use embassy_executor::{Executor, InterruptExecutor};
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::peripherals::PIO0;
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::uart::{self, UartRx};
use embassy_time::Timer;
use midi_uart::{MIDI_READY, MidiUart};
use monosynth::config::{COMMAND_QUEUE_SIZE, HEARTBEAT_PERIOD_MS, MIDI_BAUD_RATE};
use monosynth::{
    AudioCoordinator, AudioTask, CommandQueue, DoubleBuffer, LogChannel, MidiTask, NoteRouter,
};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

type Log = LogChannel;
type Audio = AudioTask<'static, RpI2sOutput, Log, Output<'static>, COMMAND_QUEUE_SIZE>;
type Midi = MidiTask<'static, MidiUart, NoteRouter<'static, COMMAND_QUEUE_SIZE, Log>, Log>;

static DOUBLE_BUFFER: DoubleBuffer = DoubleBuffer::new();
static LOG: Log = LogChannel::new();
static COMMANDS: StaticCell<CommandQueue<COMMAND_QUEUE_SIZE>> = StaticCell::new();

static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();
static EXECUTOR_LOW: StaticCell<Executor> = StaticCell::new();

#[interrupt]
unsafe fn SWI_IRQ_1() {
    unsafe { EXECUTOR_HIGH.on_interrupt() }
}

#[interrupt]
fn DMA_IRQ_1() {
    audio_out::on_dma_interrupt(&DOUBLE_BUFFER);
}

#[interrupt]
fn UART1_IRQ() {
    midi_uart::on_rx_interrupt();
}

#[embassy_executor::task]
async fn audio_task(task: Audio) -> ! {
    task.run().await
}

#[embassy_executor::task]
async fn midi_task(task: Midi) -> ! {
    task.run().await
}

/// Moves lines queued by the other tasks out over RTT.
#[embassy_executor::task]
async fn log_task(log: &'static Log) -> ! {
    loop {
        let line = log.next_line().await;
        info!("{}", line.as_str());
    }
}

#[embassy_executor::task]
async fn heartbeat_task(mut led: Output<'static>) -> ! {
    loop {
        led.toggle();
        Timer::after_millis(HEARTBEAT_PERIOD_MS).await;
    }
}

#[cortex_m_rt::entry]
fn main() -> ! {
    let p = embassy_rp::init(Default::default());
    info!("pico-monosynth starting");

    let led = Output::new(p.PIN_25, Level::Low);
    let probe = Output::new(p.PIN_2, Level::Low);

    let mut uart_config = uart::Config::default();
    uart_config.baudrate = MIDI_BAUD_RATE;
    let midi_rx = UartRx::new_blocking(p.UART1, p.PIN_5, uart_config);

    let Pio {
        mut common, sm0, ..
    } = Pio::new(p.PIO0, Irqs);
    let program = I2sProgram::new(&mut common);
    let output = RpI2sOutput::new(
        &mut common,
        sm0,
        p.DMA_CH0,
        p.DMA_CH1,
        p.PIN_6,
        p.PIN_8,
        p.PIN_9,
        &program,
        &DOUBLE_BUFFER,
    );

    let commands = COMMANDS.init(CommandQueue::new());
    let (tx, rx) = commands.split();

    let coordinator = AudioCoordinator::with_probe(unwrap!(DOUBLE_BUFFER.take_writer()), probe);
    let audio = AudioTask::new(coordinator, output, &BUFFER_READY, rx, &LOG);
    let midi = MidiTask::new(MidiUart::new(midi_rx), NoteRouter::new(tx, &LOG), &MIDI_READY, &LOG);

    // Half-done interrupt first, then audio, then MIDI input
    interrupt::DMA_IRQ_1.set_priority(Priority::P0);
    // SAFETY: the handler only touches our two DMA channels and an atomic event
    unsafe { interrupt::DMA_IRQ_1.enable() };

    interrupt::SWI_IRQ_1.set_priority(Priority::P1);
    let spawner = EXECUTOR_HIGH.start(interrupt::SWI_IRQ_1);
    spawner.spawn(unwrap!(audio_task(audio)));

    interrupt::UART1_IRQ.set_priority(Priority::P2);
    // SAFETY: the handler only touches the UART mask and an atomic event
    unsafe { interrupt::UART1_IRQ.enable() };

    let executor = EXECUTOR_LOW.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(unwrap!(midi_task(midi)));
        spawner.spawn(unwrap!(log_task(&LOG)));
        spawner.spawn(unwrap!(heartbeat_task(led)));
    })
}

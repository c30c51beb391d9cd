//! Double-buffered audio output.
//!
//! The hardware streams one half of [`DoubleBuffer`] while the audio task
//! renders the other. Which half to render is decided from the hardware's own
//! read address every time, never from a software toggle, so a missed or
//! coalesced interrupt costs at most one stale half and never a collision.

use core::cell::UnsafeCell;
use core::convert::Infallible;

use embedded_hal_1::digital::{ErrorType, OutputPin};
use portable_atomic::{AtomicBool, Ordering};

use crate::command_queue::{CommandReceiver, NoteCommand};
use crate::config::AUDIO_BUFFER_FRAMES;
use crate::demux::{EventSource, IrqEvent, select};
use crate::log_sink::{LogSink, emit_fmt};
use crate::synth::{Frame, SynthEngine};

pub type HalfBuffer = [Frame; AUDIO_BUFFER_FRAMES];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    A,
    B,
}

impl Half {
    pub const fn other(self) -> Self {
        match self {
            Half::A => Half::B,
            Half::B => Half::A,
        }
    }

    const fn index(self) -> usize {
        match self {
            Half::A => 0,
            Half::B => 1,
        }
    }
}

/// The two halves, contiguous and aligned for DMA. Lives for the whole
/// program, usually in a `static`.
#[repr(C, align(8))]
pub struct DoubleBuffer {
    halves: UnsafeCell<[HalfBuffer; 2]>,
    writer_taken: AtomicBool,
}

// SAFETY: writes go through the single `BufferWriter`, which only touches the
// half the output is not reading. The DMA side reads by raw address.
unsafe impl Sync for DoubleBuffer {}

impl Default for DoubleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DoubleBuffer {
    pub const fn new() -> Self {
        Self {
            halves: UnsafeCell::new([[[0; 2]; AUDIO_BUFFER_FRAMES]; 2]),
            writer_taken: AtomicBool::new(false),
        }
    }

    pub fn half_ptr(&self, half: Half) -> *const i32 {
        self.halves
            .get()
            .cast::<HalfBuffer>()
            .wrapping_add(half.index())
            .cast::<i32>()
    }

    /// Address the hardware reports while it is reading `half`.
    pub fn half_address(&self, half: Half) -> usize {
        self.half_ptr(half) as usize
    }

    /// The one and only writer. `None` once it has been handed out.
    pub fn take_writer(&self) -> Option<BufferWriter<'_>> {
        if self.writer_taken.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(BufferWriter { buffer: self })
        }
    }

    /// The half whose storage contains `address`, e.g. a DMA read pointer
    /// partway through a transfer. `None` outside the buffer.
    pub fn half_at(&self, address: usize) -> Option<Half> {
        [Half::A, Half::B].into_iter().find(|&half| {
            let start = self.half_address(half);
            (start..start + size_of::<HalfBuffer>()).contains(&address)
        })
    }

    pub fn half(&mut self, half: Half) -> &HalfBuffer {
        &self.halves.get_mut()[half.index()]
    }
}

/// Exclusive write access to a [`DoubleBuffer`].
pub struct BufferWriter<'a> {
    buffer: &'a DoubleBuffer,
}

impl<'a> BufferWriter<'a> {
    pub fn buffer(&self) -> &'a DoubleBuffer {
        self.buffer
    }

    pub fn half_mut(&mut self, half: Half) -> &mut HalfBuffer {
        // SAFETY: this is the only writer, and `&mut self` keeps its borrows
        // from overlapping
        unsafe {
            &mut *self
                .buffer
                .halves
                .get()
                .cast::<HalfBuffer>()
                .add(half.index())
        }
    }
}

/// The output hardware as the coordinator sees it.
pub trait OutputStream {
    /// Start address of the half the hardware is reading right now.
    fn read_address(&self) -> usize;

    /// Begin streaming the double buffer, half A first.
    fn start(&mut self);

    fn stop(&mut self);
}

/// Stand-in timing pin that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProbe;

impl ErrorType for NoProbe {
    type Error = Infallible;
}

impl OutputPin for NoProbe {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Renders into whichever half the hardware is not reading and applies note
/// commands to the engine. Holds no state besides the engine itself.
pub struct AudioCoordinator<'a, P = NoProbe> {
    engine: SynthEngine,
    writer: BufferWriter<'a>,
    // High for the duration of each render, for a scope or logic analyser
    probe: P,
}

impl<'a> AudioCoordinator<'a, NoProbe> {
    pub fn new(writer: BufferWriter<'a>) -> Self {
        Self::with_probe(writer, NoProbe)
    }
}

impl<'a, P: OutputPin> AudioCoordinator<'a, P> {
    pub fn with_probe(writer: BufferWriter<'a>, probe: P) -> Self {
        Self {
            engine: SynthEngine::new(),
            writer,
            probe,
        }
    }

    /// The half the coordinator may write when the hardware reports
    /// `read_address`. Anything that is not half A's address counts as "not
    /// reading A".
    pub fn writable_half(&self, read_address: usize) -> Half {
        if read_address == self.writer.buffer().half_address(Half::A) {
            Half::B
        } else {
            Half::A
        }
    }

    /// Handle a "half consumed" wake: look up where the hardware is now and
    /// render a full half into the other one. Returns the half written.
    pub fn on_buffer_ready<O: OutputStream + ?Sized>(&mut self, output: &O) -> Half {
        let target = self.writable_half(output.read_address());

        let _ = self.probe.set_high();
        self.engine.render(self.writer.half_mut(target));
        let _ = self.probe.set_low();

        target
    }

    pub fn apply(&mut self, command: NoteCommand) {
        self.engine.set_frequency(command.frequency);
        self.engine.set_gate(command.gate);
    }

    pub fn engine(&self) -> &SynthEngine {
        &self.engine
    }
}

/// Which source woke the audio task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioWake {
    BufferReady,
    Command,
}

/// Body of the audio task: wait for a half-consumed interrupt or a note
/// command, handle it, repeat.
pub struct AudioTask<'a, O, L: ?Sized, P, const N: usize> {
    coordinator: AudioCoordinator<'a, P>,
    output: O,
    buffer_ready: &'a IrqEvent,
    commands: CommandReceiver<'a, N>,
    log: &'a L,
}

impl<'a, O, L, P, const N: usize> AudioTask<'a, O, L, P, N>
where
    O: OutputStream,
    L: LogSink + Sync + ?Sized,
    P: OutputPin,
{
    pub fn new(
        coordinator: AudioCoordinator<'a, P>,
        output: O,
        buffer_ready: &'a IrqEvent,
        commands: CommandReceiver<'a, N>,
        log: &'a L,
    ) -> Self {
        Self {
            coordinator,
            output,
            buffer_ready,
            commands,
            log,
        }
    }

    /// Start the hardware. The buffer starts out zeroed, so the first halves
    /// it plays are silence.
    pub fn start(&mut self) {
        self.log.emit("Audio Task Initialized");
        self.output.start();
        info!("audio output started");
    }

    /// One wait-and-handle cycle.
    pub async fn step(&mut self) -> AudioWake {
        // Buffer deadline first
        let sources: [(AudioWake, &dyn EventSource); 2] = [
            (AudioWake::BufferReady, self.buffer_ready),
            (AudioWake::Command, self.commands.available()),
        ];
        let wake = select(&sources).await;

        match wake {
            AudioWake::BufferReady => {
                self.buffer_ready.take();
                let half = self.coordinator.on_buffer_ready(&self.output);
                trace!("rendered half {:?}", half);
            }
            AudioWake::Command => {
                self.commands.available().take();
                // Only the latest state matters, so take everything queued
                while let Some(command) = self.commands.try_pop() {
                    emit_fmt(
                        self.log,
                        format_args!(
                            "Note on: {}, Freq: {:.2} Hz",
                            u8::from(command.gate),
                            command.frequency
                        ),
                    );
                    self.coordinator.apply(command);
                }
            }
        }

        wake
    }

    pub async fn run(mut self) -> ! {
        self.start();
        loop {
            self.step().await;
        }
    }

    pub fn coordinator(&self) -> &AudioCoordinator<'a, P> {
        &self.coordinator
    }

    pub fn output(&self) -> &O {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_queue::CommandQueue;
    use crate::log_sink::{LogChannel, NullLog};
    use crate::synth::to_slot;
    use crate::wavetable::SINE_TABLE;
    use core::cell::Cell;
    use embassy_futures::block_on;

    /// Hardware double that reads whatever half it is told to.
    struct FakeOutput {
        reading: Cell<usize>,
        running: bool,
    }

    impl FakeOutput {
        fn new() -> Self {
            Self {
                reading: Cell::new(0),
                running: false,
            }
        }

        fn point_at(&self, address: usize) {
            self.reading.set(address);
        }
    }

    impl OutputStream for FakeOutput {
        fn read_address(&self) -> usize {
            self.reading.get()
        }

        fn start(&mut self) {
            self.running = true;
        }

        fn stop(&mut self) {
            self.running = false;
        }
    }

    #[derive(Default)]
    struct CountingPin {
        high: bool,
        rises: usize,
    }

    impl ErrorType for CountingPin {
        type Error = Infallible;
    }

    impl OutputPin for CountingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            self.rises += 1;
            Ok(())
        }
    }

    #[test]
    fn halves_are_adjacent_and_aligned() {
        let buffer = DoubleBuffer::new();
        let a = buffer.half_address(Half::A);
        let b = buffer.half_address(Half::B);
        assert_eq!(b - a, AUDIO_BUFFER_FRAMES * 2 * 4);
        assert_eq!(a % 8, 0);
        assert_eq!(Half::A.other(), Half::B);
        assert_eq!(Half::B.other(), Half::A);
    }

    #[test]
    fn only_one_writer() {
        let buffer = DoubleBuffer::new();
        let writer = buffer.take_writer();
        assert!(writer.is_some());
        assert!(buffer.take_writer().is_none());
    }

    #[test]
    fn never_writes_the_half_being_read() {
        let buffer = DoubleBuffer::new();
        let output = FakeOutput::new();
        let mut coordinator = AudioCoordinator::new(buffer.take_writer().unwrap());

        let addresses = [buffer.half_address(Half::A), buffer.half_address(Half::B)];
        for round in 0..64 {
            // Alternate, with the odd repeat as if an interrupt was missed
            let reading = if round % 5 == 4 {
                addresses[(round + 1) % 2]
            } else {
                addresses[round % 2]
            };
            output.point_at(reading);

            let written = coordinator.on_buffer_ready(&output);
            assert_ne!(buffer.half_address(written), reading);
        }
    }

    #[test]
    fn unknown_read_address_renders_half_a() {
        let buffer = DoubleBuffer::new();
        let coordinator = AudioCoordinator::new(buffer.take_writer().unwrap());
        assert_eq!(coordinator.writable_half(0), Half::A);
        assert_eq!(coordinator.writable_half(buffer.half_address(Half::B)), Half::A);
        assert_eq!(coordinator.writable_half(buffer.half_address(Half::A)), Half::B);
    }

    #[test]
    fn renders_a_full_half_and_leaves_the_other_alone() {
        let mut buffer = DoubleBuffer::new();
        {
            let output = FakeOutput::new();
            let mut coordinator = AudioCoordinator::new(buffer.take_writer().unwrap());
            coordinator.apply(NoteCommand::note_on(440.0));
            output.point_at(buffer.half_address(Half::A));
            assert_eq!(coordinator.on_buffer_ready(&output), Half::B);
        }

        let b = *buffer.half(Half::B);
        assert_eq!(b[0], [to_slot(SINE_TABLE[0] / 8); 2]);
        assert!(b.iter().filter(|f| f[0] != 0).count() > AUDIO_BUFFER_FRAMES / 2);
        assert!(buffer.half(Half::A).iter().all(|f| *f == [0, 0]));
    }

    #[test]
    fn probe_brackets_each_render() {
        let buffer = DoubleBuffer::new();
        let output = FakeOutput::new();
        let mut coordinator =
            AudioCoordinator::with_probe(buffer.take_writer().unwrap(), CountingPin::default());

        coordinator.on_buffer_ready(&output);
        coordinator.on_buffer_ready(&output);
        assert_eq!(coordinator.probe.rises, 2);
        assert!(!coordinator.probe.high);
    }

    #[test]
    fn commands_retune_and_gate() {
        let buffer = DoubleBuffer::new();
        let mut coordinator = AudioCoordinator::new(buffer.take_writer().unwrap());

        coordinator.apply(NoteCommand::note_on(261.5));
        assert!(coordinator.engine().gate());
        assert_eq!(coordinator.engine().frequency(), 261.5);

        coordinator.apply(NoteCommand::note_off());
        assert!(!coordinator.engine().gate());
        assert_eq!(coordinator.engine().frequency(), 0.0);
    }

    #[test]
    fn task_start_starts_output_without_rendering() {
        let buffer = DoubleBuffer::new();
        let event = IrqEvent::new();
        let mut queue: CommandQueue<4> = CommandQueue::new();
        let (_tx, rx) = queue.split();
        let log: LogChannel<4> = LogChannel::new();

        let mut task = AudioTask::new(
            AudioCoordinator::new(buffer.take_writer().unwrap()),
            FakeOutput::new(),
            &event,
            rx,
            &log,
        );
        task.start();

        assert!(task.output().running);
        assert_eq!(log.try_next_line().as_deref(), Some("Audio Task Initialized"));
        assert_eq!(task.coordinator().engine().phase(), 0.0);
    }

    #[test]
    fn buffer_ready_takes_priority_over_commands() {
        let buffer = DoubleBuffer::new();
        let event = IrqEvent::new();
        let mut queue: CommandQueue<4> = CommandQueue::new();
        let (mut tx, rx) = queue.split();

        let mut task = AudioTask::new(
            AudioCoordinator::new(buffer.take_writer().unwrap()),
            FakeOutput::new(),
            &event,
            rx,
            &NullLog,
        );

        tx.try_push(NoteCommand::note_on(440.0)).unwrap();
        tx.try_push(NoteCommand::note_on(880.0)).unwrap();
        event.signal();

        assert_eq!(block_on(task.step()), AudioWake::BufferReady);
        assert!(!event.is_pending());
        assert!(!task.coordinator().engine().gate());

        assert_eq!(block_on(task.step()), AudioWake::Command);
        assert!(task.coordinator().engine().gate());
        assert_eq!(task.coordinator().engine().frequency(), 880.0);
    }

    #[test]
    fn applied_commands_are_logged() {
        let buffer = DoubleBuffer::new();
        let event = IrqEvent::new();
        let mut queue: CommandQueue<4> = CommandQueue::new();
        let (mut tx, rx) = queue.split();
        let log: LogChannel<4> = LogChannel::new();

        let mut task = AudioTask::new(
            AudioCoordinator::new(buffer.take_writer().unwrap()),
            FakeOutput::new(),
            &event,
            rx,
            &log,
        );

        tx.try_push(NoteCommand::note_on(440.0)).unwrap();
        tx.try_push(NoteCommand::note_off()).unwrap();
        assert_eq!(block_on(task.step()), AudioWake::Command);

        assert_eq!(log.try_next_line().as_deref(), Some("Note on: 1, Freq: 440.00 Hz"));
        assert_eq!(log.try_next_line().as_deref(), Some("Note on: 0, Freq: 0.00 Hz"));
    }

    #[test]
    fn drained_commands_leave_nothing_to_wake_for() {
        let buffer = DoubleBuffer::new();
        let event = IrqEvent::new();
        let mut queue: CommandQueue<4> = CommandQueue::new();
        let (mut tx, rx) = queue.split();
        let available = rx.available();

        let mut task = AudioTask::new(
            AudioCoordinator::new(buffer.take_writer().unwrap()),
            FakeOutput::new(),
            &event,
            rx,
            &NullLog,
        );

        tx.try_push(NoteCommand::note_on(220.0)).unwrap();
        tx.try_push(NoteCommand::note_on(330.0)).unwrap();
        assert_eq!(block_on(task.step()), AudioWake::Command);
        assert_eq!(task.coordinator().engine().frequency(), 330.0);
        assert!(!available.is_pending());

        tx.try_push(NoteCommand::note_off()).unwrap();
        assert!(available.is_pending());
        assert_eq!(block_on(task.step()), AudioWake::Command);
        assert!(!task.coordinator().engine().gate());
    }

    #[test]
    fn read_pointer_maps_to_the_half_it_is_in() {
        let buffer = DoubleBuffer::new();
        let a = buffer.half_address(Half::A);
        let b = buffer.half_address(Half::B);
        let half_bytes = size_of::<HalfBuffer>();

        assert_eq!(b, a + half_bytes);
        assert_eq!(buffer.half_at(a), Some(Half::A));
        assert_eq!(buffer.half_at(a + 4 * 100), Some(Half::A));
        assert_eq!(buffer.half_at(b - 4), Some(Half::A));
        assert_eq!(buffer.half_at(b), Some(Half::B));
        assert_eq!(buffer.half_at(b + half_bytes - 4), Some(Half::B));
        assert_eq!(buffer.half_at(b + half_bytes), None);
        assert_eq!(buffer.half_at(a - 4), None);
        assert_eq!(buffer.half_at(0), None);
    }

    #[test]
    fn mid_transfer_pointer_steers_the_render() {
        let buffer = DoubleBuffer::new();
        let coordinator = AudioCoordinator::new(buffer.take_writer().unwrap());
        let a = buffer.half_address(Half::A);
        let b = buffer.half_address(Half::B);

        // What the output reports for a pointer partway through each half
        let reported = |pointer: usize| buffer.half_at(pointer).map_or(0, |h| buffer.half_address(h));
        assert_eq!(coordinator.writable_half(reported(a + 512)), Half::B);
        assert_eq!(coordinator.writable_half(reported(b + 512)), Half::A);
    }
}

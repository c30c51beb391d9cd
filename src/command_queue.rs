//! Note commands from the MIDI side to the audio side.
//!
//! A `heapless::spsc` ring split into a sender and a receiver. Neither end ever
//! blocks: a full ring drops the new command, an empty one yields `None`.
//!
//! Every successful push also signals an [`IrqEvent`], which is what the audio
//! task sleeps on. The consumer takes the event before draining, so a push that
//! races with the drain leaves the event set and at worst costs one empty wake.

use heapless::spsc::{Consumer, Producer, Queue};

use crate::demux::IrqEvent;

/// Target oscillator state. Copied through the queue, consumed once.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NoteCommand {
    pub gate: bool,
    pub frequency: f32,
}

impl NoteCommand {
    pub const fn note_on(frequency: f32) -> Self {
        Self {
            gate: true,
            frequency,
        }
    }

    pub const fn note_off() -> Self {
        Self {
            gate: false,
            frequency: 0.0,
        }
    }
}

/// Backing storage; `N - 1` commands fit.
pub struct CommandQueue<const N: usize> {
    queue: Queue<NoteCommand, N>,
    available: IrqEvent,
}

impl<const N: usize> Default for CommandQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CommandQueue<N> {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            available: IrqEvent::new(),
        }
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn split(&mut self) -> (CommandSender<'_, N>, CommandReceiver<'_, N>) {
        let (producer, consumer) = self.queue.split();
        let available = &self.available;
        (
            CommandSender {
                producer,
                available,
            },
            CommandReceiver {
                consumer,
                available,
            },
        )
    }
}

pub struct CommandSender<'a, const N: usize> {
    producer: Producer<'a, NoteCommand, N>,
    available: &'a IrqEvent,
}

impl<const N: usize> CommandSender<'_, N> {
    /// Queue `command`, or hand it back if the ring is full.
    pub fn try_push(&mut self, command: NoteCommand) -> Result<(), NoteCommand> {
        self.producer.enqueue(command)?;
        self.available.signal();
        Ok(())
    }
}

pub struct CommandReceiver<'a, const N: usize> {
    consumer: Consumer<'a, NoteCommand, N>,
    available: &'a IrqEvent,
}

impl<'a, const N: usize> CommandReceiver<'a, N> {
    /// Set by every push. Take it, then drain with [`try_pop`](Self::try_pop).
    pub fn available(&self) -> &'a IrqEvent {
        self.available
    }

    pub fn try_pop(&mut self) -> Option<NoteCommand> {
        self.consumer.dequeue()
    }

    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.consumer.ready()
    }
}

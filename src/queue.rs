//! Commands for the MPSSE are collected in a fixed size buffer and sent to the chip in one USB
//! transfer.  If the commands capture data, the transfer is followed by a blocking read of the
//! expected number of bytes.
use crate::transport::Transport;
use crate::{Error, Result};

/// The largest single MPSSE data block is 65536 bytes; leave room for the opcodes around it.
pub const DEFAULT_CAPACITY: usize = 70000;

pub struct CommandQueue<T> {
    channel: T,
    buffer: Box<[u8]>,
    cursor: usize,
}

impl<T: Transport> CommandQueue<T> {
    pub fn new(channel: T, capacity: usize) -> Self {
        Self {
            channel,
            buffer: vec![0; capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Bytes queued since the last flush.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[..self.cursor]
    }

    pub fn enqueue_byte(&mut self, byte: u8) -> Result<()> {
        self.enqueue_bytes(&[byte])
    }

    /// Append `data` to the queue.  Either all of it fits or nothing is queued.
    pub fn enqueue_bytes(&mut self, data: &[u8]) -> Result<()> {
        let available = self.remaining();
        if data.len() > available {
            return Err(Error::QueueOverflow {
                requested: data.len(),
                available,
            });
        }

        self.buffer[self.cursor..self.cursor + data.len()].copy_from_slice(data);
        self.cursor += data.len();
        Ok(())
    }

    /// Send everything queued so far to the chip.  The queue is empty afterwards, even if the
    /// write failed: a failed transaction is abandoned as a whole.
    pub fn flush(&mut self) -> Result<()> {
        if self.cursor == 0 {
            return Ok(());
        }

        log::trace!("flushing {} command bytes", self.cursor);
        let result = self.channel.write(&self.buffer[..self.cursor]);
        self.cursor = 0;
        result
    }

    /// Drop queued commands without sending them.
    pub fn clear(&mut self) {
        self.cursor = 0;
    }

    /// Read exactly `count` bytes.  A read that comes back short means the transport's read
    /// timeout elapsed.
    pub fn read_exact(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; count];
        let mut received = 0;

        while received < count {
            let n = self.channel.read(&mut buf[received..])?;
            if n == 0 {
                return Err(Error::Timeout {
                    expected: count,
                    received,
                });
            }
            received += n;
        }
        Ok(buf)
    }

    pub fn queued_input_count(&mut self) -> Result<usize> {
        self.channel.queued_byte_count()
    }

    pub fn channel(&self) -> &T {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut T {
        &mut self.channel
    }

    pub fn into_channel(self) -> T {
        self.channel
    }
}

//! In-memory device for testing without hardware.
//!
//! Buffers live in heap regions owned by the mock. Queued buffers are filled in FIFO order on
//! dequeue, every byte set to `sequence + 1`. Faults are injected through the setters below, and
//! [`Stats`] counts what the code under test did.

use std::{
    cell::RefCell,
    collections::VecDeque,
    io,
    ptr::NonNull,
    rc::Rc,
    thread,
    time::Duration,
};

use crate::buffer::{BufferInfo, Dequeued, Enqueue, Flags, Metadata};
use crate::capability::Flags as CapFlags;
use crate::device::{Device, Readiness};
use crate::memory::Memory;
use crate::{Capabilities, Format, FourCC, Timestamp};

/// What the code under test asked the device to do
#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub mapped: usize,
    pub unmapped: usize,
    /// Every buffer request, by count
    pub requests: Vec<u32>,
    pub stream_on: usize,
    pub stream_off: usize,
    pub crop_resets: usize,
    pub formats_set: usize,
}

#[derive(Debug)]
struct Slot {
    region: Box<[u8]>,
    userptr: Option<(*mut u8, usize)>,
}

#[derive(Debug)]
struct State {
    caps: Capabilities,
    caps_errno: Option<i32>,
    format: Format,
    substitute: Option<FourCC>,
    set_format_errno: Option<i32>,
    stream_on_errno: Option<i32>,
    stream_off_errno: Option<i32>,
    queue_errno: Option<i32>,

    slots: Vec<Slot>,
    memory: Option<Memory>,
    queue: VecDeque<u32>,
    streaming: bool,
    sequence: u32,

    grant: Option<u32>,
    fail_map_at: Option<usize>,
    map_calls: usize,
    dequeue_errors: VecDeque<i32>,
    interrupted_waits: usize,
    time_out: bool,
    short_fill: Option<u32>,
    flag_error: bool,
    eof: bool,
    foreign_pointer: bool,
    report_index: Option<u32>,

    stats: Stats,
}

/// Fake capture device, cheap to clone, all clones share one state
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Rc<RefCell<State>>,
}

const MIN_WIDTH: u32 = 16;
const MIN_HEIGHT: u32 = 12;
const MAX_WIDTH: u32 = 1920;
const MAX_HEIGHT: u32 = 1080;

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl MockDevice {
    /// A streaming and read capable camera delivering 32x48 YUYV frames
    pub fn new() -> Self {
        let caps = (CapFlags::VIDEO_CAPTURE | CapFlags::STREAMING | CapFlags::READ_WRITE).bits();
        MockDevice {
            state: Rc::new(RefCell::new(State {
                caps: Capabilities::new(b"mock", b"Mock Camera", b"mock:0", 0x0006_0000, caps, 0),
                caps_errno: None,
                format: Format {
                    stride: 64,
                    size: 64 * 48,
                    ..Format::new(32, 48, FourCC::YUYV)
                },
                substitute: None,
                set_format_errno: None,
                stream_on_errno: None,
                stream_off_errno: None,
                queue_errno: None,
                slots: Vec::new(),
                memory: None,
                queue: VecDeque::new(),
                streaming: false,
                sequence: 0,
                grant: None,
                fail_map_at: None,
                map_calls: 0,
                dequeue_errors: VecDeque::new(),
                interrupted_waits: 0,
                time_out: false,
                short_fill: None,
                flag_error: false,
                eof: false,
                foreign_pointer: false,
                report_index: None,
                stats: Stats::default(),
            })),
        }
    }

    pub fn stats(&self) -> Stats {
        self.state.borrow().stats.clone()
    }

    /// Replaces the capability flags reported by the device
    pub fn set_caps(&self, flags: CapFlags) {
        let mut state = self.state.borrow_mut();
        state.caps = Capabilities::new(b"mock", b"Mock Camera", b"mock:0", 0, flags.bits(), 0);
    }

    /// Makes the capability query fail, like on a node that is not a V4L2 device
    pub fn fail_caps(&self, code: i32) {
        self.state.borrow_mut().caps_errno = Some(code);
    }

    /// Forces every format request to `fourcc`
    pub fn substitute_encoding(&self, fourcc: FourCC) {
        self.state.borrow_mut().substitute = Some(fourcc);
    }

    pub fn fail_set_format(&self, code: i32) {
        self.state.borrow_mut().set_format_errno = Some(code);
    }

    pub fn fail_stream_on(&self, code: i32) {
        self.state.borrow_mut().stream_on_errno = Some(code);
    }

    pub fn fail_stream_off(&self, code: i32) {
        self.state.borrow_mut().stream_off_errno = Some(code);
    }

    /// The next queue call fails with `code`
    pub fn fail_next_queue(&self, code: i32) {
        self.state.borrow_mut().queue_errno = Some(code);
    }

    /// Grants at most `count` buffers per request
    pub fn grant_buffers(&self, count: u32) {
        self.state.borrow_mut().grant = Some(count);
    }

    /// Fails the map call with the given zero based number
    pub fn fail_map_at(&self, call: usize) {
        self.state.borrow_mut().fail_map_at = Some(call);
    }

    /// The next `times` dequeue (or read) calls fail with `code`
    pub fn inject_dequeue_error(&self, code: i32, times: usize) {
        let mut state = self.state.borrow_mut();
        state.dequeue_errors.extend(std::iter::repeat(code).take(times));
    }

    /// The next `times` readiness waits are interrupted by a signal
    pub fn interrupt_waits(&self, times: usize) {
        self.state.borrow_mut().interrupted_waits = times;
    }

    /// Readiness waits sleep for the whole timeout and report it expired
    pub fn always_time_out(&self, on: bool) {
        self.state.borrow_mut().time_out = on;
    }

    /// The next fill only carries `bytes` bytes
    pub fn short_fill(&self, bytes: u32) {
        self.state.borrow_mut().short_fill = Some(bytes);
    }

    /// The next filled buffer carries the error flag
    pub fn flag_next_error(&self) {
        self.state.borrow_mut().flag_error = true;
    }

    /// The next user pointer dequeue reports a pointer the buffer was not queued with
    pub fn return_foreign_pointer(&self) {
        self.state.borrow_mut().foreign_pointer = true;
    }

    /// The next dequeue reports buffer `index`, whatever was filled
    pub fn report_index(&self, index: u32) {
        self.state.borrow_mut().report_index = Some(index);
    }

    /// Reads return zero bytes from now on
    pub fn end_of_stream(&self) {
        self.state.borrow_mut().eof = true;
    }

    fn next_error(state: &mut State) -> io::Result<()> {
        match state.dequeue_errors.pop_front() {
            Some(code) => Err(errno(code)),
            None => Ok(()),
        }
    }

    /// Bytes used and flags for the next fill of a buffer with `capacity` bytes
    fn fill(state: &mut State, capacity: usize) -> (usize, Flags) {
        let used = match state.short_fill.take() {
            Some(n) => n as usize,
            None => (state.format.size as usize).min(capacity),
        };
        let mut flags = Flags::DONE;
        if std::mem::take(&mut state.flag_error) {
            flags |= Flags::ERROR;
        }
        (used.min(capacity), flags)
    }
}

impl Device for MockDevice {
    fn query_caps(&self) -> io::Result<Capabilities> {
        let state = self.state.borrow();
        match state.caps_errno {
            Some(code) => Err(errno(code)),
            None => Ok(state.caps.clone()),
        }
    }

    fn format(&self) -> io::Result<Format> {
        Ok(self.state.borrow().format)
    }

    fn set_format(&self, fmt: &Format) -> io::Result<Format> {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.set_format_errno {
            return Err(errno(code));
        }
        if !state.slots.is_empty() {
            return Err(errno(libc::EBUSY));
        }

        let fourcc = match state.substitute {
            Some(fourcc) => fourcc,
            None if [FourCC::YUYV, FourCC::MJPG, FourCC::GREY].contains(&fmt.fourcc) => fmt.fourcc,
            None => FourCC::YUYV,
        };
        let width = fmt.width.clamp(MIN_WIDTH, MAX_WIDTH);
        let height = fmt.height.clamp(MIN_HEIGHT, MAX_HEIGHT);
        let stride = if fourcc == FourCC::GREY { width } else { width * 2 };

        state.format = Format {
            width,
            height,
            fourcc,
            stride,
            size: stride * height,
        };
        state.stats.formats_set += 1;
        Ok(state.format)
    }

    fn reset_crop(&self) -> io::Result<()> {
        self.state.borrow_mut().stats.crop_resets += 1;
        // like most webcams: cropping is not supported
        Err(errno(libc::EINVAL))
    }

    fn request_buffers(&self, memory: Memory, count: u32) -> io::Result<u32> {
        let mut state = self.state.borrow_mut();
        state.stats.requests.push(count);
        if state.streaming {
            return Err(errno(libc::EBUSY));
        }

        state.queue.clear();
        state.slots.clear();
        state.memory = None;
        if count == 0 {
            return Ok(0);
        }

        let granted = state.grant.map_or(count, |max| count.min(max));
        let size = state.format.size as usize;
        state.slots = (0..granted)
            .map(|_| Slot {
                region: vec![0u8; size].into_boxed_slice(),
                userptr: None,
            })
            .collect();
        state.memory = Some(memory);
        Ok(granted)
    }

    fn query_buffer(&self, memory: Memory, index: u32) -> io::Result<BufferInfo> {
        let state = self.state.borrow();
        if state.memory != Some(memory) {
            return Err(errno(libc::EINVAL));
        }
        let slot = state
            .slots
            .get(index as usize)
            .ok_or_else(|| errno(libc::EINVAL))?;
        Ok(BufferInfo {
            index,
            length: slot.region.len() as u32,
            offset: index * 0x1000,
        })
    }

    fn queue(&self, memory: Memory, buf: &Enqueue) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.queue_errno.take() {
            return Err(errno(code));
        }
        if state.memory != Some(memory) || state.queue.contains(&buf.index) {
            return Err(errno(libc::EINVAL));
        }
        let slot = state
            .slots
            .get_mut(buf.index as usize)
            .ok_or_else(|| errno(libc::EINVAL))?;
        if memory == Memory::UserPtr {
            slot.userptr = Some(buf.userptr.ok_or_else(|| errno(libc::EINVAL))?);
        }
        state.queue.push_back(buf.index);
        Ok(())
    }

    fn dequeue(&self, memory: Memory) -> io::Result<Dequeued> {
        let mut state = self.state.borrow_mut();
        Self::next_error(&mut state)?;
        if !state.streaming || state.memory != Some(memory) {
            return Err(errno(libc::EINVAL));
        }
        let index = state.queue.pop_front().ok_or_else(|| errno(libc::EAGAIN))?;

        let sequence = state.sequence;
        state.sequence += 1;

        let (ptr, capacity) = {
            let slot = &mut state.slots[index as usize];
            match slot.userptr {
                Some((ptr, len)) => (ptr, len),
                None => (slot.region.as_mut_ptr(), slot.region.len()),
            }
        };
        let (used, flags) = Self::fill(&mut state, capacity);
        // SAFETY: `ptr` is either a live region owned by the mock or a userptr buffer the code
        // under test keeps allocated while it is queued.
        unsafe { std::ptr::write_bytes(ptr, (sequence as u8).wrapping_add(1), used) };

        let mut userptr = state.slots[index as usize].userptr.map(|(p, _)| p);
        if std::mem::take(&mut state.foreign_pointer) {
            userptr = userptr.map(|p| p.wrapping_add(1));
        }
        Ok(Dequeued {
            index: state.report_index.take().unwrap_or(index),
            userptr,
            meta: Metadata {
                bytesused: used as u32,
                flags,
                sequence,
                timestamp: Timestamp::new(sequence as i64, 0),
            },
        })
    }

    fn stream_on(&self) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.stream_on_errno {
            return Err(errno(code));
        }
        state.streaming = true;
        state.stats.stream_on += 1;
        Ok(())
    }

    fn stream_off(&self) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.stats.stream_off += 1;
        if let Some(code) = state.stream_off_errno {
            return Err(errno(code));
        }
        state.streaming = false;
        state.queue.clear();
        Ok(())
    }

    fn map(&self, offset: u32, length: usize) -> io::Result<NonNull<u8>> {
        let mut state = self.state.borrow_mut();
        let call = state.map_calls;
        state.map_calls += 1;
        if state.fail_map_at == Some(call) {
            return Err(errno(libc::ENOMEM));
        }

        let slot = state
            .slots
            .get_mut((offset / 0x1000) as usize)
            .filter(|slot| slot.region.len() == length)
            .ok_or_else(|| errno(libc::EINVAL))?;
        let ptr = NonNull::new(slot.region.as_mut_ptr()).ok_or_else(|| errno(libc::EINVAL))?;
        state.stats.mapped += 1;
        Ok(ptr)
    }

    unsafe fn unmap(&self, _ptr: NonNull<u8>, _length: usize) -> io::Result<()> {
        self.state.borrow_mut().stats.unmapped += 1;
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        Self::next_error(&mut state)?;
        if state.eof {
            return Ok(0);
        }

        let sequence = state.sequence;
        state.sequence += 1;
        let (used, _) = Self::fill(&mut state, buf.len());
        buf[..used].fill((sequence as u8).wrapping_add(1));
        Ok(used)
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<Readiness> {
        let mut state = self.state.borrow_mut();
        if state.interrupted_waits > 0 {
            state.interrupted_waits -= 1;
            return Ok(Readiness::Interrupted);
        }
        if state.time_out {
            drop(state);
            if let Some(timeout) = timeout {
                thread::sleep(timeout);
            }
            return Ok(Readiness::TimedOut);
        }
        Ok(Readiness::Ready)
    }
}

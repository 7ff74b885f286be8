//! Simulated RS485 segment for exercising the Modbus transport and the
//! sampling station off target.
//!
//! A [`SimBus`] is a shared handle to one bus: the serial port, both
//! direction lines and the delay source handed to the transport all
//! point at it. Time is virtual and only moves when the code under test
//! sleeps, so timeouts cost nothing to run. Slaves answer complete,
//! CRC-valid request frames after their configured latency.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};

use sqmp_sensor::analog::AnalogInput;
use sqmp_sensor::modbus::{append_crc, check_crc, FUNCTION_READ_HOLDING, REQUEST_LEN};
use sqmp_sensor::ModbusTransport;

pub type SimTransport = ModbusTransport<SimSerial, SimPin, SimPin, SimDelay>;

const NS_PER_MS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Well formed reply carrying this register value
    Register(i16),
    /// Only the first `n` bytes of a well formed reply
    Truncated(i16, usize),
    /// Well formed apart from the CRC
    BadCrc(i16),
    Raw(Vec<u8>),
    Silent,
}

fn register_reply(address: u8, value: i16) -> Vec<u8> {
    let [hi, lo] = value.to_be_bytes();
    let mut bytes = vec![address, FUNCTION_READ_HOLDING, 0x02, hi, lo, 0x00, 0x00];
    append_crc(&mut bytes);
    bytes
}

impl Reply {
    fn bytes(&self, address: u8) -> Vec<u8> {
        match self {
            Reply::Register(value) => register_reply(address, *value),
            Reply::Truncated(value, n) => {
                let mut bytes = register_reply(address, *value);
                bytes.truncate(*n);
                bytes
            }
            Reply::BadCrc(value) => {
                let mut bytes = register_reply(address, *value);
                bytes[5] ^= 0xFF;
                bytes
            }
            Reply::Raw(bytes) => bytes.clone(),
            Reply::Silent => Vec::new(),
        }
    }
}

/// A device on the segment. Replies are used in order; the last one
/// repeats forever.
#[derive(Debug, Clone)]
pub struct SimSlave {
    address: u8,
    replies: VecDeque<Reply>,
    latency_ms: u32,
}

impl SimSlave {
    pub fn new(address: u8, reply: Reply) -> Self {
        Self {
            address,
            replies: VecDeque::from([reply]),
            latency_ms: 20,
        }
    }

    /// Slave answering with `replies` in order
    pub fn scripted(address: u8, replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            address,
            replies: replies.into_iter().collect(),
            latency_ms: 20,
        }
    }

    pub fn then(mut self, reply: Reply) -> Self {
        self.replies.push_back(reply);
        self
    }

    pub fn with_latency(mut self, latency_ms: u32) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    fn next_reply(&mut self) -> Vec<u8> {
        let reply = if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        };
        reply.map(|r| r.bytes(self.address)).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    De,
    Re,
}

/// Something observable on the wire or the direction lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    De(bool),
    Re(bool),
    Byte(u8),
    Flush,
}

#[derive(Default)]
struct BusState {
    now_ns: u64,
    de_high: bool,
    re_high: bool,
    tx: Vec<u8>,
    rx: VecDeque<(u64, u8)>,
    slaves: Vec<SimSlave>,
    requests: Vec<Vec<u8>>,
    unguarded_writes: usize,
    direction_log: Vec<(bool, bool)>,
    timeline: Vec<(u64, BusEvent)>,
}

impl BusState {
    fn set_line(&mut self, line: Line, high: bool) {
        let event = match line {
            Line::De => {
                self.de_high = high;
                BusEvent::De(high)
            }
            Line::Re => {
                self.re_high = high;
                BusEvent::Re(high)
            }
        };
        self.direction_log.push((self.de_high, self.re_high));
        self.timeline.push((self.now_ns, event));
    }

    fn rx_ready(&self) -> bool {
        !self.re_high && self.rx.front().is_some_and(|(at, _)| *at <= self.now_ns)
    }

    fn end_of_frame(&mut self) {
        let frame = std::mem::take(&mut self.tx);
        if frame.is_empty() {
            return;
        }
        let addressed = if frame.len() == REQUEST_LEN && check_crc(&frame) {
            Some(frame[0])
        } else {
            None
        };
        self.requests.push(frame);

        let Some(address) = addressed else {
            return;
        };
        if let Some(slave) = self.slaves.iter_mut().find(|s| s.address == address) {
            let ready_at = self.now_ns + slave.latency_ms as u64 * NS_PER_MS;
            for byte in slave.next_reply() {
                self.rx.push_back((ready_at, byte));
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct SimBus {
    state: Rc<RefCell<BusState>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slave(self, slave: SimSlave) -> Self {
        self.add_slave(slave);
        self
    }

    pub fn add_slave(&self, slave: SimSlave) {
        self.state.borrow_mut().slaves.push(slave);
    }

    /// Bytes already waiting in the receiver before anything is sent
    pub fn inject(&self, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        let now = state.now_ns;
        state.rx.extend(bytes.iter().map(|&b| (now, b)));
    }

    pub fn serial(&self) -> SimSerial {
        SimSerial { bus: self.clone() }
    }

    pub fn pin(&self, line: Line) -> SimPin {
        SimPin {
            bus: self.clone(),
            line,
        }
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay { bus: self.clone() }
    }

    pub fn transport(&self) -> SimTransport {
        ModbusTransport::new(
            self.serial(),
            self.pin(Line::De),
            self.pin(Line::Re),
            self.delay(),
        )
        .expect("simulated direction lines cannot fail")
    }

    /// Every frame put on the wire, in order
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state.borrow().requests.clone()
    }

    /// Slave address of every request frame, in order
    pub fn probed(&self) -> Vec<u8> {
        self.requests()
            .iter()
            .filter_map(|f| f.first().copied())
            .collect()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.state.borrow().now_ns / NS_PER_MS
    }

    /// Either direction line still asserted for transmit
    pub fn is_transmitting(&self) -> bool {
        let state = self.state.borrow();
        state.de_high || state.re_high
    }

    /// Bytes written while the driver was not enabled
    pub fn unguarded_writes(&self) -> usize {
        self.state.borrow().unguarded_writes
    }

    /// (DE, RE) levels after every line change
    pub fn direction_log(&self) -> Vec<(bool, bool)> {
        self.state.borrow().direction_log.clone()
    }

    /// Every line change, byte written and flush with its time in ns
    pub fn timeline(&self) -> Vec<(u64, BusEvent)> {
        self.state.borrow().timeline.clone()
    }

    /// Bytes queued in the receiver, arrived or not
    pub fn pending_rx(&self) -> usize {
        self.state.borrow().rx.len()
    }
}

pub struct SimSerial {
    bus: SimBus,
}

impl embedded_io::ErrorType for SimSerial {
    type Error = Infallible;
}

impl embedded_io::Read for SimSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.bus.state.borrow_mut();
        let mut n = 0;
        while n < buf.len() && state.rx_ready() {
            if let Some((_, byte)) = state.rx.pop_front() {
                buf[n] = byte;
                n += 1;
            }
        }
        Ok(n)
    }
}

impl embedded_io::ReadReady for SimSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.bus.state.borrow().rx_ready())
    }
}

impl embedded_io::Write for SimSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.bus.state.borrow_mut();
        if !state.de_high {
            state.unguarded_writes += buf.len();
        }
        let now = state.now_ns;
        for &byte in buf {
            state.timeline.push((now, BusEvent::Byte(byte)));
        }
        state.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        let mut state = self.bus.state.borrow_mut();
        let now = state.now_ns;
        state.timeline.push((now, BusEvent::Flush));
        state.end_of_frame();
        Ok(())
    }
}

pub struct SimPin {
    bus: SimBus,
    line: Line,
}

impl PinErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.bus.state.borrow_mut().set_line(self.line, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.bus.state.borrow_mut().set_line(self.line, true);
        Ok(())
    }
}

#[derive(Clone)]
pub struct SimDelay {
    bus: SimBus,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.bus.state.borrow_mut().now_ns += ns as u64;
    }
}

/// Analog channel stuck at one value
pub struct ConstantAdc(pub u16);

impl AnalogInput for ConstantAdc {
    type Error = Infallible;

    fn read_counts(&mut self) -> Result<u16, Self::Error> {
        Ok(self.0)
    }
}

/// Route `log` output to the test harness, honouring `RUST_LOG`
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

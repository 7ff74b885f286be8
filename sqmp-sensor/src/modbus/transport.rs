use embedded_hal::{delay::DelayNs, digital::OutputPin};
use embedded_io::{Read, ReadReady, Write};

use super::frame::{DeviceAddress, HexBytes, ModbusFrame, RegisterReply, REPLY_LEN};
use super::rs485::Rs485Direction;
use crate::{config, ModbusError};

const RX_CAPACITY: usize = 16;

/// Bytes collected while waiting on a reply
pub type RxBuffer = heapless::Vec<u8, RX_CAPACITY>;

/// Bus timings, all blocking waits on the caller's delay source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Hold time after switching to transmit and after the final flush
    pub settle_ms: u32,
    pub inter_byte_gap_us: u32,
    pub poll_interval_ms: u32,
    pub probe_timeout_ms: u32,
    pub read_timeout_ms: u32,
    /// Pause after each silent discovery candidate
    pub discovery_backoff_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        config::modbus_timing()
    }
}

/// Default acceptance test for a read: the combo sensor reports 0 when
/// it has nothing, so only strictly positive values end the retry loop.
pub fn positive(value: f32) -> bool {
    value > 0.0
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u8,
    pub backoff_ms: u32,
    pub accept: fn(f32) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        config::retry_policy()
    }
}

impl RetryPolicy {
    pub fn with_predicate(mut self, accept: fn(f32) -> bool) -> Self {
        self.accept = accept;
        self
    }

    pub fn accepts(&self, value: f32) -> bool {
        (self.accept)(value)
    }
}

/// What the sampling station needs from the Modbus side
pub trait RegisterSource {
    fn address(&self) -> DeviceAddress;

    fn discover(&mut self) -> Result<DeviceAddress, ModbusError>;

    fn read_with_retry(&mut self, policy: &RetryPolicy) -> Result<f32, ModbusError>;
}

/// Half duplex Modbus RTU master. Owns the serial port, both direction
/// lines and the delay source; the lines are always back in receive
/// mode when any method returns.
pub struct ModbusTransport<S, DE, RE, D> {
    serial: S,
    direction: Rs485Direction<DE, RE>,
    delay: D,
    address: DeviceAddress,
    confirmed: bool,
    timing: Timing,
    verify_reply_crc: bool,
}

impl<S, DE, RE, D> ModbusTransport<S, DE, RE, D>
where
    S: Read + Write + ReadReady,
    DE: OutputPin,
    RE: OutputPin,
    D: DelayNs,
{
    pub fn new(serial: S, de: DE, re: RE, delay: D) -> Result<Self, ModbusError> {
        Ok(Self {
            serial,
            direction: Rs485Direction::new(de, re)?,
            delay,
            address: DeviceAddress::DEFAULT,
            confirmed: false,
            timing: Timing::default(),
            verify_reply_crc: config::verify_reply_crc(),
        })
    }

    /// Start from a known (unconfirmed) address instead of the default
    pub fn with_address(mut self, address: DeviceAddress) -> Self {
        self.address = address;
        self
    }

    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn set_verify_reply_crc(&mut self, verify: bool) {
        self.verify_reply_crc = verify;
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn is_transmitting(&self) -> bool {
        self.direction.is_transmitting()
    }

    pub fn release(self) -> (S, DE, RE, D) {
        let (de, re) = self.direction.release();
        (self.serial, de, re, self.delay)
    }

    /// Throw away whatever is sitting in the receive buffer
    pub fn drain_input(&mut self) -> Result<usize, ModbusError> {
        let mut scratch = [0u8; RX_CAPACITY];
        let mut dropped = 0;
        while self.serial.read_ready().map_err(ModbusError::serial)? {
            let n = self
                .serial
                .read(&mut scratch)
                .map_err(ModbusError::serial)?;
            if n == 0 {
                break;
            }
            dropped += n;
        }
        Ok(dropped)
    }

    /// Put one frame on the wire. Receive mode is restored even if the
    /// write fails part way through.
    pub fn send(&mut self, frame: &ModbusFrame) -> Result<(), ModbusError> {
        if let Err(e) = self.direction.transmit() {
            let _ = self.direction.receive();
            return Err(e);
        }
        self.delay.delay_ms(self.timing.settle_ms);

        let written = self.write_frame(frame.as_bytes());
        if written.is_ok() {
            self.delay.delay_ms(self.timing.settle_ms);
        }

        self.direction.receive()?;
        written
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), ModbusError> {
        for byte in bytes {
            self.serial
                .write_all(core::slice::from_ref(byte))
                .map_err(ModbusError::serial)?;
            if self.timing.inter_byte_gap_us > 0 {
                self.delay.delay_us(self.timing.inter_byte_gap_us);
            }
        }
        self.serial.flush().map_err(ModbusError::serial)
    }

    fn collect(&mut self, rx: &mut RxBuffer) -> Result<(), ModbusError> {
        let mut chunk = [0u8; RX_CAPACITY];
        while self.serial.read_ready().map_err(ModbusError::serial)? {
            let n = self.serial.read(&mut chunk).map_err(ModbusError::serial)?;
            if n == 0 {
                break;
            }
            for &b in &chunk[..n] {
                // anything past one reply is noise
                let _ = rx.push(b);
            }
        }
        Ok(())
    }

    /// Block until `needed` bytes are in `rx` or `timeout_ms` has passed.
    /// Returns whether enough bytes arrived.
    pub fn poll_until(
        &mut self,
        needed: usize,
        timeout_ms: u32,
        rx: &mut RxBuffer,
    ) -> Result<bool, ModbusError> {
        let mut waited = 0;
        loop {
            self.collect(rx)?;
            if rx.len() >= needed {
                return Ok(true);
            }
            if waited >= timeout_ms {
                return Ok(false);
            }
            let step = self.timing.poll_interval_ms.max(1).min(timeout_ms - waited);
            self.delay.delay_ms(step);
            waited += step;
        }
    }

    /// Send a probe to `candidate` and report how many bytes came back.
    /// Any reply at all counts, it is not validated.
    pub fn probe(&mut self, candidate: DeviceAddress) -> Result<usize, ModbusError> {
        self.drain_input()?;
        let frame = ModbusFrame::read_holding(candidate);
        self.send(&frame)?;

        let mut rx = RxBuffer::new();
        if self.poll_until(1, self.timing.probe_timeout_ms, &mut rx)? {
            Ok(rx.len())
        } else {
            Err(ModbusError::Timeout)
        }
    }

    pub fn discover(&mut self) -> Result<DeviceAddress, ModbusError> {
        self.discover_from(&DeviceAddress::CANDIDATES)
    }

    /// Probe `candidates` in order and adopt the first one that answers.
    /// On failure the current address stays in place.
    pub fn discover_from(
        &mut self,
        candidates: &[DeviceAddress],
    ) -> Result<DeviceAddress, ModbusError> {
        log::info!("=== Probing {} slave ids ===", candidates.len());
        for &candidate in candidates {
            log::info!("Testing slave ID: {candidate}");
            match self.probe(candidate) {
                Ok(count) => {
                    log::info!("Response detected from {candidate}, {count} bytes");
                    self.address = candidate;
                    self.confirmed = true;
                    return Ok(candidate);
                }
                Err(ModbusError::Timeout) => {}
                Err(e) => {
                    log::error!("Bus error while probing {candidate}: {e}");
                    return Err(e);
                }
            }
            self.delay.delay_ms(self.timing.discovery_backoff_ms);
        }
        log::warn!(
            "No slave response found, keeping address {}. Check wiring and power.",
            self.address
        );
        Err(ModbusError::DiscoveryFailed)
    }

    /// One request/reply exchange with the current address
    pub fn read_register(&mut self) -> Result<RegisterReply, ModbusError> {
        self.drain_input()?;
        let frame = ModbusFrame::read_holding(self.address);
        log::info!("Sending request: {}", HexBytes(frame.as_bytes()));
        self.send(&frame)?;

        let mut rx = RxBuffer::new();
        if !self.poll_until(REPLY_LEN, self.timing.read_timeout_ms, &mut rx)? {
            let stray = rx.len() + self.drain_input()?;
            log::warn!(
                "Reading {} failed - timeout, discarded {stray} bytes",
                self.address
            );
            return Err(ModbusError::Timeout);
        }

        let bytes = &rx[..REPLY_LEN];
        log::info!("Response ({REPLY_LEN} bytes): {}", HexBytes(bytes));

        let reply = RegisterReply::parse(bytes, self.address, self.verify_reply_crc)
            .inspect_err(|e| log::warn!("Invalid response: {e}"))?;
        if !reply.crc_ok {
            log::debug!("Reply CRC does not check, value kept");
        }
        log::info!("Register value from {}: {:.2}", self.address, reply.value());
        Ok(reply)
    }

    pub fn read_value(&mut self) -> Result<f32, ModbusError> {
        self.read_register().map(|reply| reply.value())
    }

    /// Read up to `policy.attempts` times, stopping at the first value
    /// the policy accepts. When every attempt fails the predicate, the
    /// last decoded value is still handed back; only when nothing decoded
    /// at all is the last error returned.
    pub fn read_with_retry(&mut self, policy: &RetryPolicy) -> Result<f32, ModbusError> {
        let mut last_err = ModbusError::Timeout;
        let mut decoded = None;

        for attempt in 0..policy.attempts.max(1) {
            if attempt > 0 {
                self.delay.delay_ms(policy.backoff_ms);
            }
            match self.read_value() {
                Ok(value) if policy.accepts(value) => return Ok(value),
                Ok(value) => {
                    log::debug!("Attempt {} read {value:.2}, retrying", attempt + 1);
                    decoded = Some(value);
                }
                Err(e) => {
                    log::debug!("Attempt {} failed: {e}", attempt + 1);
                    last_err = e;
                }
            }
        }

        decoded.ok_or(last_err)
    }
}

impl<S, DE, RE, D> RegisterSource for ModbusTransport<S, DE, RE, D>
where
    S: Read + Write + ReadReady,
    DE: OutputPin,
    RE: OutputPin,
    D: DelayNs,
{
    fn address(&self) -> DeviceAddress {
        self.address
    }

    fn discover(&mut self) -> Result<DeviceAddress, ModbusError> {
        ModbusTransport::discover(self)
    }

    fn read_with_retry(&mut self, policy: &RetryPolicy) -> Result<f32, ModbusError> {
        ModbusTransport::read_with_retry(self, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_sentinel_boundary() {
        assert!(positive(0.01));
        assert!(!positive(0.0));
        assert!(!positive(-0.01));
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.backoff_ms, 1000);
        assert!(!policy.accepts(0.0));

        let any = policy.with_predicate(|_| true);
        assert!(any.accepts(0.0));
        assert!(any.accepts(-3.5));
    }

    #[test]
    fn default_timing() {
        let timing = Timing::default();
        assert!(timing.settle_ms >= 10);
        assert_eq!(timing.probe_timeout_ms, 500);
        assert_eq!(timing.read_timeout_ms, 1000);
        assert_eq!(timing.discovery_backoff_ms, 500);
    }
}

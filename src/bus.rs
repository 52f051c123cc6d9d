//! The bus handle and the transaction driver built on top of it.
//!
//! [`Bus`] owns the serial transport exclusively and exposes one method per
//! supported function code. Every method follows the same template: validate
//! arguments, build the request, send it, read and CRC-check the reply, and
//! decode the payload into the caller's buffer — touching nothing on any
//! non-OK outcome.

use std::io::Write;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, trace, warn};

use crate::codec::{self, SlaveId};
use crate::config::BusConfig;
use crate::crc::crc16;
use crate::errors::ModbusError;
use crate::frame::{FrameBuffer, FunctionCode, MAX_COILS_PER_REQUEST, MAX_REGS_PER_REQUEST};

/// Device names are stored truncated to this many characters, matching the
/// reference bus's fixed `char device_name[64]` field (one short for the
/// terminator).
pub const MAX_DEVICE_NAME_LEN: usize = 63;

/// A single RS-485 bus, owning one serial port.
///
/// Single-threaded and blocking: every method here takes `&mut self`, so the
/// borrow checker rules out two transactions racing on the same handle. Open
/// a second [`Bus`] for a second serial port instead of sharing one.
pub struct Bus {
    port: Box<dyn SerialPort>,
    baud_rate: u32,
    timeout: Duration,
    debug: bool,
    last_result: Result<(), ModbusError>,
    device_name: String,
    slave_id_quirk: bool,
    scratch: FrameBuffer,
}

impl Bus {
    /// Opens the serial port described by `config` and returns a ready-to-use
    /// bus handle, or [`ModbusError::SerialInitFailed`] if the port could not
    /// be opened.
    pub fn open(config: &BusConfig) -> Result<Self, ModbusError> {
        let port = serialport::new(config.device.as_str(), config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(config.timeout())
            .open()
            .map_err(|e| ModbusError::SerialInitFailed {
                device: config.device.clone(),
                reason: e.to_string(),
            })?;

        let mut device_name = config.device.clone();
        device_name.truncate(MAX_DEVICE_NAME_LEN);

        Ok(Self {
            port,
            baud_rate: config.baud_rate,
            timeout: config.timeout(),
            debug: config.debug,
            last_result: Ok(()),
            device_name,
            slave_id_quirk: config.slave_id_quirk,
            scratch: FrameBuffer::new(),
        })
    }

    /// Releases the serial descriptor. The handle remains readable afterwards
    /// (`last_error`, `device_name`, …) but any further transaction will fail
    /// at the I/O layer.
    pub fn close(self) {
        drop(self);
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Some slaves fold the `slave_id` byte itself into function 0x11's
    /// byte-count field; enable this to compensate. Default off.
    pub fn set_slave_id_quirk(&mut self, enabled: bool) {
        self.slave_id_quirk = enabled;
    }

    pub fn slave_id_quirk(&self) -> bool {
        self.slave_id_quirk
    }

    /// The outcome of the most recently completed transaction.
    pub fn last_error(&self) -> Option<&ModbusError> {
        self.last_result.as_ref().err()
    }

    /// The numeric outcome code of the most recently completed transaction
    /// (`0` for success), for callers that want the wire-compatible table
    /// from the protocol's error taxonomy instead of a typed error.
    pub fn last_error_code(&self) -> i32 {
        match &self.last_result {
            Ok(()) => 0,
            Err(e) => e.outcome_code(),
        }
    }

    // ---- public operations, one per function code ----

    /// Reads `count` coils starting at `start`. `out` receives one byte per
    /// coil (0xFF set, 0x00 clear) and must be at least `count` long.
    pub fn read_coils(
        &mut self,
        addr: u8,
        start: u16,
        count: u16,
        out: &mut [u8],
    ) -> Result<(), ModbusError> {
        self.read_bits(addr, FunctionCode::ReadCoils, start, count, out, MAX_COILS_PER_REQUEST)
    }

    /// Reads `count` discrete inputs starting at `start`.
    pub fn read_discretes(
        &mut self,
        addr: u8,
        start: u16,
        count: u16,
        out: &mut [u8],
    ) -> Result<(), ModbusError> {
        self.read_bits(addr, FunctionCode::ReadDiscretes, start, count, out, MAX_COILS_PER_REQUEST)
    }

    fn read_bits(
        &mut self,
        addr: u8,
        fncode: FunctionCode,
        start: u16,
        count: u16,
        out: &mut [u8],
        max: u16,
    ) -> Result<(), ModbusError> {
        self.run(addr, fncode, || validate_count(count, max), |buf| {
            codec::build_read_request(buf, fncode, start, count)
        }, |payload| codec::decode_bits(payload, count, out))
    }

    /// Reads `count` holding registers starting at `start` into `out` (host
    /// byte order).
    pub fn read_holding_registers(
        &mut self,
        addr: u8,
        start: u16,
        count: u16,
        out: &mut [u16],
    ) -> Result<(), ModbusError> {
        self.read_registers(addr, FunctionCode::ReadHoldingRegisters, start, count, out)
    }

    /// Reads `count` input registers starting at `start` into `out`.
    pub fn read_input_registers(
        &mut self,
        addr: u8,
        start: u16,
        count: u16,
        out: &mut [u16],
    ) -> Result<(), ModbusError> {
        self.read_registers(addr, FunctionCode::ReadInputRegisters, start, count, out)
    }

    fn read_registers(
        &mut self,
        addr: u8,
        fncode: FunctionCode,
        start: u16,
        count: u16,
        out: &mut [u16],
    ) -> Result<(), ModbusError> {
        self.run(
            addr,
            fncode,
            || validate_count(count, MAX_REGS_PER_REQUEST),
            |buf| codec::build_read_request(buf, fncode, start, count),
            |payload| codec::decode_registers(payload, count, out),
        )
    }

    /// Sets a single coil on or off.
    pub fn write_single_coil(&mut self, addr: u8, coil_addr: u16, on: bool) -> Result<(), ModbusError> {
        self.run(
            addr,
            FunctionCode::WriteSingleCoil,
            || Ok(()),
            |buf| codec::build_write_single_coil(buf, coil_addr, on),
            codec::decode_write_echo,
        )
    }

    /// Writes a single holding register.
    pub fn write_single_register(
        &mut self,
        addr: u8,
        reg_addr: u16,
        value: u16,
    ) -> Result<(), ModbusError> {
        self.run(
            addr,
            FunctionCode::WriteSingleRegister,
            || Ok(()),
            |buf| codec::build_write_single_register(buf, reg_addr, value),
            codec::decode_write_echo,
        )
    }

    /// Reads the slave's exception status byte (function 0x07).
    pub fn read_exception_status(&mut self, addr: u8) -> Result<u8, ModbusError> {
        let mut status = 0u8;
        self.run(
            addr,
            FunctionCode::ReadExceptionStatus,
            || Ok(()),
            codec::build_read_exception_status,
            |payload| {
                status = codec::decode_exception_status(payload)?;
                Ok(())
            },
        )?;
        Ok(status)
    }

    /// Writes `states` (zero = off, nonzero = on) to `states.len()` coils
    /// starting at `start`.
    pub fn write_multiple_coils(
        &mut self,
        addr: u8,
        start: u16,
        states: &[u8],
    ) -> Result<(), ModbusError> {
        let len = states.len();
        self.run(
            addr,
            FunctionCode::WriteMultipleCoils,
            || validate_len(len, MAX_COILS_PER_REQUEST),
            |buf| codec::build_write_multiple_coils(buf, start, states),
            codec::decode_write_echo,
        )
    }

    /// Writes `regs` to `regs.len()` holding registers starting at `start`.
    pub fn write_multiple_registers(
        &mut self,
        addr: u8,
        start: u16,
        regs: &[u16],
    ) -> Result<(), ModbusError> {
        let len = regs.len();
        self.run(
            addr,
            FunctionCode::WriteMultipleRegisters,
            || validate_len(len, MAX_REGS_PER_REQUEST),
            |buf| codec::build_write_multiple_registers(buf, start, regs),
            codec::decode_write_echo,
        )
    }

    /// Reports the slave's vendor id, run status, and any additional data
    /// (function 0x11).
    pub fn report_slave_id(&mut self, addr: u8) -> Result<SlaveId, ModbusError> {
        let mut result = None;
        self.run(
            addr,
            FunctionCode::ReportSlaveId,
            || Ok(()),
            codec::build_report_slave_id,
            |payload| {
                result = Some(codec::decode_report_slave_id(payload)?);
                Ok(())
            },
        )?;
        Ok(result.expect("decode callback ran on the Ok path"))
    }

    /// The template every public operation follows: validate, build, send,
    /// receive, decode. `validate` runs before anything touches the wire;
    /// `decode` runs only once the reply's CRC and shape have already been
    /// confirmed, so it is the only place caller output buffers are written.
    fn run(
        &mut self,
        addr: u8,
        fncode: FunctionCode,
        validate: impl FnOnce() -> Result<(), ModbusError>,
        build: impl FnOnce(&mut FrameBuffer) -> Result<(), ModbusError>,
        decode: impl FnOnce(&[u8]) -> Result<(), ModbusError>,
    ) -> Result<(), ModbusError> {
        let outcome = self.transact(addr, fncode, validate, build, decode);
        self.last_result = outcome.clone();
        outcome
    }

    fn transact(
        &mut self,
        addr: u8,
        fncode: FunctionCode,
        validate: impl FnOnce() -> Result<(), ModbusError>,
        build: impl FnOnce(&mut FrameBuffer) -> Result<(), ModbusError>,
        decode: impl FnOnce(&[u8]) -> Result<(), ModbusError>,
    ) -> Result<(), ModbusError> {
        validate()?;

        self.scratch.clear();
        self.scratch
            .push(addr)
            .map_err(|_| ModbusError::InvalidByteCount)?;
        build(&mut self.scratch)?;
        let crc = crc16(self.scratch.as_slice());
        self.scratch
            .push_u16_be(crc)
            .map_err(|_| ModbusError::InvalidByteCount)?;

        if self.debug {
            eprintln!(
                "send: {}",
                self.scratch
                    .as_slice()
                    .iter()
                    .map(|b| format!("[{:02X}]", b))
                    .collect::<String>()
            );
        }
        trace!(bytes = ?self.scratch.as_slice(), "sent");
        self.port.write_all(self.scratch.as_slice())?;
        self.port.flush()?;

        let mut reply = FrameBuffer::new();
        let result = crate::receive::read_adu(
            self.port.as_mut(),
            &mut reply,
            self.timeout,
            self.slave_id_quirk,
        );
        if self.debug {
            match &result {
                Ok(()) => eprintln!(
                    "recv: {}",
                    reply.as_slice().iter().map(|b| format!("<{:02X}>", b)).collect::<String>()
                ),
                Err(e) => eprintln!("recv: error {e}"),
            }
        }
        result?;

        let reply_addr = reply.as_slice()[0];
        if reply_addr != addr {
            warn!(requested = addr, got = reply_addr, "reply address mismatch, accepting anyway");
        }

        let reply_fncode = reply.as_slice()[1];
        if reply_fncode != fncode.code() {
            return Err(ModbusError::InvalidByteCount);
        }

        let payload = &reply.as_slice()[2..reply.len() - 2];
        decode(payload)?;

        debug!(addr, fncode = fncode.code(), "transaction ok");
        Ok(())
    }
}

fn validate_count(count: u16, max: u16) -> Result<(), ModbusError> {
    if count == 0 || count > max {
        return Err(ModbusError::InvalidCount { count, max });
    }
    Ok(())
}

/// Same check as [`validate_count`], but taking the caller buffer's true
/// `usize` length so an oversized slice can't wrap around through a `u16`
/// cast and slip past the limit.
fn validate_len(len: usize, max: u16) -> Result<(), ModbusError> {
    if len == 0 || len > max as usize {
        return Err(ModbusError::InvalidCount {
            count: len.min(u16::MAX as usize) as u16,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExceptionCode;
    use std::collections::VecDeque;
    use std::io;

    struct MockPort {
        inbound: VecDeque<u8>,
        chunk_size: usize,
    }

    impl MockPort {
        fn new(reply: &[u8]) -> Self {
            Self {
                inbound: reply.iter().copied().collect(),
                chunk_size: 64,
            }
        }
    }

    impl io::Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = self.chunk_size.min(buf.len()).min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl io::Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl serialport::SerialPort for MockPort {
        fn name(&self) -> Option<String> {
            None
        }
        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(9600)
        }
        fn data_bits(&self) -> serialport::Result<serialport::DataBits> {
            Ok(serialport::DataBits::Eight)
        }
        fn flow_control(&self) -> serialport::Result<serialport::FlowControl> {
            Ok(serialport::FlowControl::None)
        }
        fn parity(&self) -> serialport::Result<serialport::Parity> {
            Ok(serialport::Parity::None)
        }
        fn stop_bits(&self) -> serialport::Result<serialport::StopBits> {
            Ok(serialport::StopBits::One)
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(1000)
        }
        fn set_baud_rate(&mut self, _: u32) -> serialport::Result<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _: serialport::DataBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _: serialport::FlowControl) -> serialport::Result<()> {
            Ok(())
        }
        fn set_parity(&mut self, _: serialport::Parity) -> serialport::Result<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _: serialport::StopBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_timeout(&mut self, _: Duration) -> serialport::Result<()> {
            Ok(())
        }
        fn write_request_to_send(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(self.inbound.len() as u32)
        }
        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn clear(&mut self, buffer_to_clear: serialport::ClearBuffer) -> serialport::Result<()> {
            if matches!(
                buffer_to_clear,
                serialport::ClearBuffer::Input | serialport::ClearBuffer::All
            ) {
                self.inbound.clear();
            }
            Ok(())
        }
        fn try_clone(&self) -> serialport::Result<Box<dyn serialport::SerialPort>> {
            Err(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "mock port cannot be cloned",
            ))
        }
        fn set_break(&mut self) -> serialport::Result<()> {
            Ok(())
        }
        fn clear_break(&mut self) -> serialport::Result<()> {
            Ok(())
        }
    }

    fn test_bus(reply: &[u8]) -> Bus {
        Bus {
            port: Box::new(MockPort::new(reply)),
            baud_rate: 9600,
            timeout: Duration::from_millis(100),
            debug: false,
            last_result: Ok(()),
            device_name: "/dev/mock".to_string(),
            slave_id_quirk: false,
            scratch: FrameBuffer::new(),
        }
    }

    #[test]
    fn reads_one_holding_register() {
        let reply = [0x0A, 0x03, 0x02, 0x01, 0xF4, 0x38, 0xB8];
        let crc = crc16(&reply[..reply.len() - 2]);
        let mut frame = reply[..5].to_vec();
        frame.push((crc >> 8) as u8);
        frame.push((crc & 0xFF) as u8);

        let mut bus = test_bus(&frame);
        let mut regs = [0u16; 1];
        bus.read_holding_registers(0x0A, 0x0064, 1, &mut regs).unwrap();
        assert_eq!(regs, [500]);
        assert_eq!(bus.last_error(), None);
        assert_eq!(bus.last_error_code(), 0);
    }

    #[test]
    fn reads_three_coils() {
        let mut payload = vec![0x0A, 0x01, 0x01, 0x05];
        let crc = crc16(&payload);
        payload.push((crc >> 8) as u8);
        payload.push((crc & 0xFF) as u8);

        let mut bus = test_bus(&payload);
        let mut coils = [0u8; 3];
        bus.read_coils(0x0A, 0x0013, 3, &mut coils).unwrap();
        assert_eq!(coils, [0xFF, 0x00, 0xFF]);
    }

    #[test]
    fn exception_reply_leaves_output_untouched() {
        let mut payload = vec![0x0A, 0x83, 0x02];
        let crc = crc16(&payload);
        payload.push((crc >> 8) as u8);
        payload.push((crc & 0xFF) as u8);

        let mut bus = test_bus(&payload);
        let mut regs = [0xABCDu16; 1];
        let err = bus.read_holding_registers(0x0A, 0x0064, 1, &mut regs).unwrap_err();
        assert_eq!(err, ModbusError::Exception(ExceptionCode::IllegalDataAddress));
        assert_eq!(regs, [0xABCD]);
        assert_eq!(bus.last_error_code(), -2);
    }

    #[test]
    fn write_single_coil_encodes_on_and_off() {
        let mut ack = vec![0x0A, 0x05, 0x00, 0x13, 0xFF, 0x00];
        let crc = crc16(&ack);
        ack.push((crc >> 8) as u8);
        ack.push((crc & 0xFF) as u8);

        let mut bus = test_bus(&ack);
        bus.write_single_coil(0x0A, 0x0013, true).unwrap();
    }

    #[test]
    fn zero_count_is_rejected_before_touching_the_wire() {
        let mut bus = test_bus(&[]);
        let mut regs = [0u16; 1];
        let err = bus.read_holding_registers(0x0A, 0, 0, &mut regs).unwrap_err();
        assert_eq!(err, ModbusError::InvalidCount { count: 0, max: MAX_REGS_PER_REQUEST });
    }

    #[test]
    fn oversized_count_is_rejected_before_touching_the_wire() {
        let mut bus = test_bus(&[]);
        let mut regs = vec![0u16; 200];
        let err = bus.read_holding_registers(0x0A, 0, 200, &mut regs).unwrap_err();
        assert_eq!(
            err,
            ModbusError::InvalidCount { count: 200, max: MAX_REGS_PER_REQUEST }
        );
    }

    #[test]
    fn write_multiple_coils_rejects_an_empty_slice() {
        let mut bus = test_bus(&[]);
        let err = bus.write_multiple_coils(0x0A, 0, &[]).unwrap_err();
        assert_eq!(err, ModbusError::InvalidCount { count: 0, max: MAX_COILS_PER_REQUEST });
    }

    #[test]
    fn write_multiple_coils_rejects_more_than_the_protocol_max() {
        let mut bus = test_bus(&[]);
        let states = vec![1u8; MAX_COILS_PER_REQUEST as usize + 1];
        let err = bus.write_multiple_coils(0x0A, 0, &states).unwrap_err();
        assert_eq!(
            err,
            ModbusError::InvalidCount {
                count: MAX_COILS_PER_REQUEST + 1,
                max: MAX_COILS_PER_REQUEST
            }
        );
    }

    #[test]
    fn report_slave_id_splits_id_status_and_extra() {
        let mut payload = vec![0x0A, 0x11, 0x04, 0x42, 0x01, 0x07, 0x08];
        let crc = crc16(&payload);
        payload.push((crc >> 8) as u8);
        payload.push((crc & 0xFF) as u8);

        let mut bus = test_bus(&payload);
        let id = bus.report_slave_id(0x0A).unwrap();
        assert_eq!(id.id, 0x42);
        assert_eq!(id.run_status, 0x01);
        assert_eq!(id.extra, vec![0x07, 0x08]);
    }
}

//! The variable-length reply parser.
//!
//! Bytes are pulled from the serial adapter in chunks sized by the current
//! state; the state is driven by the function code and, where the reply is
//! variable-length, by an embedded byte-count field. There is no length
//! delimiter beyond what the protocol implies.

use std::io::Read;
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::trace;

use crate::crc::crc16;
use crate::errors::{ExceptionCode, ModbusError};
use crate::frame::{FrameBuffer, MAX_PDU_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Addr,
    Func,
    GetByteCount,
    ReadException,
    Data,
    Crc,
    Done,
}

/// Reads one complete, CRC-validated ADU from `port` into `rx`.
///
/// `timeout` bounds the *entire* read from the first byte of the address to
/// the last byte of the CRC — unlike the reference implementation, a signal
/// interruption or a run of short reads eats into this single deadline
/// rather than resetting it, so a transaction can never be stalled past its
/// configured timeout.
pub fn read_adu(
    port: &mut dyn SerialPort,
    rx: &mut FrameBuffer,
    timeout: Duration,
    slave_id_quirk: bool,
) -> Result<(), ModbusError> {
    rx.clear();
    let deadline = Instant::now() + timeout;
    let mut state = State::Addr;
    let mut bytes_to_read: usize = 1;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            flush(port);
            return Err(ModbusError::Timeout);
        }
        port.set_timeout(remaining)?;

        let start = rx
            .reserve(bytes_to_read)
            .map_err(|_| ModbusError::InvalidByteCount)?;
        let read_result = port.read(&mut rx.raw_mut()[start..start + bytes_to_read]);
        let n = match read_result {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => {
                rx.truncate(start);
                return Err(e.into());
            }
        };
        rx.truncate(start + n);
        if n > 0 {
            trace!(bytes = ?&rx.as_slice()[start..start + n], "received");
        }

        if n == 0 {
            flush(port);
            return Err(ModbusError::Timeout);
        }

        bytes_to_read -= n;
        if bytes_to_read != 0 {
            continue;
        }

        match state {
            State::Addr => {
                bytes_to_read = 1;
                state = State::Func;
            }
            State::Func => {
                let fncode = *rx.as_slice().last().expect("just read the fncode byte");
                if fncode & 0x80 == 0 {
                    match fncode {
                        0x01 | 0x02 | 0x03 | 0x04 | 0x11 => {
                            bytes_to_read = 1;
                            state = State::GetByteCount;
                        }
                        0x05 | 0x06 | 0x0F | 0x10 => {
                            bytes_to_read = 4;
                            state = State::Data;
                        }
                        0x07 => {
                            bytes_to_read = 1;
                            state = State::Data;
                        }
                        _ => {
                            flush(port);
                            return Err(ModbusError::Exception(ExceptionCode::IllegalFunction));
                        }
                    }
                } else {
                    bytes_to_read = 1;
                    state = State::ReadException;
                }
            }
            State::GetByteCount => {
                let byte_count = *rx.as_slice().last().expect("just read the byte-count byte");
                let fncode = rx.as_slice()[1];
                let mut scheduled = byte_count as usize;
                if fncode == 0x11 && slave_id_quirk {
                    scheduled = scheduled.saturating_sub(1);
                }
                if scheduled > MAX_PDU_LEN {
                    flush(port);
                    return Err(ModbusError::InvalidByteCount);
                }
                bytes_to_read = scheduled;
                state = State::Data;
            }
            State::ReadException => {
                let code = *rx.as_slice().last().expect("just read the exception byte");
                flush(port);
                return Err(ModbusError::Exception(ExceptionCode::from_code(code)));
            }
            State::Data => {
                bytes_to_read = 2;
                state = State::Crc;
            }
            State::Crc => {
                state = State::Done;
            }
            State::Done => unreachable!("loop exits as soon as Done is reached"),
        }

        if state == State::Done {
            break;
        }
    }

    if crc16(rx.as_slice()) != 0 {
        let frame_hex = hex::encode(rx.as_slice());
        flush(port);
        return Err(ModbusError::CrcError { frame_hex });
    }
    Ok(())
}

fn flush(port: &mut dyn SerialPort) {
    let _ = port.clear(ClearBuffer::Input);
}

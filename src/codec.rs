//! Per-function request encoding and reply decoding.
//!
//! Builders write the function-specific payload — the generic send routine
//! in [`crate::bus`] is responsible for the address prefix and the CRC
//! suffix. Decoders are handed the reply's payload (the bytes between the
//! echoed function code and the trailing CRC) and never see the address or
//! CRC themselves.

use crate::errors::ModbusError;
use crate::frame::{self, FrameBuffer, FunctionCode};

fn overflow(_: ()) -> ModbusError {
    ModbusError::InvalidByteCount
}

/// Shared shape for 0x01/0x02/0x03/0x04: `fncode, start:2, count:2`.
pub fn build_read_request(
    buf: &mut FrameBuffer,
    fncode: FunctionCode,
    start: u16,
    count: u16,
) -> Result<(), ModbusError> {
    buf.push(fncode.code()).map_err(overflow)?;
    buf.push_u16_be(start).map_err(overflow)?;
    buf.push_u16_be(count).map_err(overflow)
}

pub fn build_write_single_coil(
    buf: &mut FrameBuffer,
    coil_addr: u16,
    on: bool,
) -> Result<(), ModbusError> {
    buf.push(FunctionCode::WriteSingleCoil.code()).map_err(overflow)?;
    buf.push_u16_be(coil_addr).map_err(overflow)?;
    buf.push_u16_be(if on { 0xFF00 } else { 0x0000 }).map_err(overflow)
}

pub fn build_write_single_register(
    buf: &mut FrameBuffer,
    reg_addr: u16,
    value: u16,
) -> Result<(), ModbusError> {
    buf.push(FunctionCode::WriteSingleRegister.code()).map_err(overflow)?;
    buf.push_u16_be(reg_addr).map_err(overflow)?;
    buf.push_u16_be(value).map_err(overflow)
}

pub fn build_read_exception_status(buf: &mut FrameBuffer) -> Result<(), ModbusError> {
    buf.push(FunctionCode::ReadExceptionStatus.code()).map_err(overflow)
}

pub fn build_report_slave_id(buf: &mut FrameBuffer) -> Result<(), ModbusError> {
    buf.push(FunctionCode::ReportSlaveId.code()).map_err(overflow)
}

pub fn build_write_multiple_coils(
    buf: &mut FrameBuffer,
    start: u16,
    states: &[u8],
) -> Result<(), ModbusError> {
    let count = states.len() as u16;
    let packed = frame::pack_coils(states);
    buf.push(FunctionCode::WriteMultipleCoils.code()).map_err(overflow)?;
    buf.push_u16_be(start).map_err(overflow)?;
    buf.push_u16_be(count).map_err(overflow)?;
    buf.push(packed.len() as u8).map_err(overflow)?;
    buf.push_bytes(&packed).map_err(overflow)
}

pub fn build_write_multiple_registers(
    buf: &mut FrameBuffer,
    start: u16,
    regs: &[u16],
) -> Result<(), ModbusError> {
    buf.push(FunctionCode::WriteMultipleRegisters.code()).map_err(overflow)?;
    buf.push_u16_be(start).map_err(overflow)?;
    buf.push_u16_be(regs.len() as u16).map_err(overflow)?;
    buf.push((regs.len() * 2) as u8).map_err(overflow)?;
    for &reg in regs {
        buf.push_u16_be(reg).map_err(overflow)?;
    }
    Ok(())
}

/// Decodes a read-coils/read-discretes reply payload (`bytecount, bits...`)
/// into one byte per coil (0xFF set, 0x00 clear).
pub fn decode_bits(payload: &[u8], expected_count: u16, out: &mut [u8]) -> Result<(), ModbusError> {
    let bytecount = *payload.first().ok_or(ModbusError::InvalidByteCount)? as usize;
    let expected_bytecount = frame::packed_len(expected_count);
    if bytecount != expected_bytecount || payload.len() < 1 + bytecount {
        return Err(ModbusError::InvalidByteCount);
    }
    frame::unpack_coils(&payload[1..1 + bytecount], expected_count, out);
    Ok(())
}

/// Decodes a read-holding/read-input reply payload (`bytecount, regs...`)
/// into host-order 16-bit values.
pub fn decode_registers(
    payload: &[u8],
    expected_count: u16,
    out: &mut [u16],
) -> Result<(), ModbusError> {
    let bytecount = *payload.first().ok_or(ModbusError::InvalidByteCount)? as usize;
    if bytecount & 0x01 != 0 {
        return Err(ModbusError::InvalidByteCount);
    }
    let n = bytecount / 2;
    if n != expected_count as usize || payload.len() < 1 + bytecount {
        return Err(ModbusError::InvalidByteCount);
    }
    for i in 0..n {
        out[i] = u16::from_be_bytes([payload[1 + 2 * i], payload[2 + 2 * i]]);
    }
    Ok(())
}

/// Validates the 4-byte start/count or address/value echo that the
/// single-item and multiple-item write replies carry.
pub fn decode_write_echo(payload: &[u8]) -> Result<(), ModbusError> {
    if payload.len() != 4 {
        return Err(ModbusError::InvalidByteCount);
    }
    Ok(())
}

pub fn decode_exception_status(payload: &[u8]) -> Result<u8, ModbusError> {
    payload.first().copied().ok_or(ModbusError::InvalidByteCount)
}

/// Decoded 0x11 reply: vendor/model id, run status, and any trailing
/// vendor-specific bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveId {
    pub id: u8,
    pub run_status: u8,
    pub extra: Vec<u8>,
}

/// Decodes `bytecount, slave_id, run_status, extra...`.
///
/// `extra`'s length is derived from how many bytes actually followed
/// `slave_id`/`run_status` in the buffer, not from the `bytecount` field
/// itself — the slave-id quirk (see [`crate::bus::Bus::set_slave_id_quirk`])
/// means `bytecount` and the true remaining length can disagree by one.
pub fn decode_report_slave_id(payload: &[u8]) -> Result<SlaveId, ModbusError> {
    if payload.len() < 3 {
        return Err(ModbusError::InvalidByteCount);
    }
    Ok(SlaveId {
        id: payload[1],
        run_status: payload[2],
        extra: payload[3..].to_vec(),
    })
}

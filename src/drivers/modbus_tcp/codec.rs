//! Modbus TCP ADU encoding and decoding: MBAP header plus a small PDU
//! vocabulary (bit/register reads, single and multiple writes).

use thiserror::Error;

use super::address::RegisterKind;

pub const FN_READ_COILS: u8 = 0x01;
pub const FN_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FN_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FN_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FN_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FN_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Protocol limits for one read transaction.
pub const MAX_REGS_PER_READ: u16 = 125;
pub const MAX_BITS_PER_READ: u16 = 2000;

const MBAP_HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("response frame too short ({0} bytes)")]
    FrameTooShort(usize),
    #[error("invalid protocol id {0:#06x}")]
    InvalidProtocolId(u16),
    #[error("transaction id mismatch: sent {sent}, received {received}")]
    TransactionIdMismatch { sent: u16, received: u16 },
    #[error("unit id mismatch: sent {sent}, received {received}")]
    UnitIdMismatch { sent: u8, received: u8 },
    #[error("function mismatch: sent {sent:#04x}, received {received:#04x}")]
    FunctionMismatch { sent: u8, received: u8 },
    #[error("device exception {0:#04x}")]
    Exception(u8),
    #[error("unexpected payload length: expected {expected} bytes, received {received}")]
    PayloadLength { expected: usize, received: usize },
}

pub fn read_function(kind: RegisterKind) -> u8 {
    match kind {
        RegisterKind::Coil => FN_READ_COILS,
        RegisterKind::DiscreteInput => FN_READ_DISCRETE_INPUTS,
        RegisterKind::InputRegister => FN_READ_INPUT_REGISTERS,
        RegisterKind::HoldingRegister => FN_READ_HOLDING_REGISTERS,
    }
}

fn adu(txn: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&txn.to_be_bytes());
    frame.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    frame.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
    frame.push(unit);
    frame.extend_from_slice(pdu);
    frame
}

pub fn encode_read(txn: u16, unit: u8, function: u8, start: u16, count: u16) -> Vec<u8> {
    let mut pdu = [0u8; 5];
    pdu[0] = function;
    pdu[1..3].copy_from_slice(&start.to_be_bytes());
    pdu[3..5].copy_from_slice(&count.to_be_bytes());
    adu(txn, unit, &pdu)
}

pub fn encode_write_single(txn: u16, unit: u8, function: u8, addr: u16, value: u16) -> Vec<u8> {
    let mut pdu = [0u8; 5];
    pdu[0] = function;
    pdu[1..3].copy_from_slice(&addr.to_be_bytes());
    pdu[3..5].copy_from_slice(&value.to_be_bytes());
    adu(txn, unit, &pdu)
}

pub fn encode_write_registers(txn: u16, unit: u8, addr: u16, values: &[u16]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(6 + values.len() * 2);
    pdu.push(FN_WRITE_MULTIPLE_REGISTERS);
    pdu.extend_from_slice(&addr.to_be_bytes());
    pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    pdu.push((values.len() * 2) as u8);
    for v in values {
        pdu.extend_from_slice(&v.to_be_bytes());
    }
    adu(txn, unit, &pdu)
}

/// Validate the MBAP header and function byte, returning the PDU payload
/// that follows the function code.
fn check_response<'a>(
    frame: &'a [u8],
    txn: u16,
    unit: u8,
    function: u8,
) -> Result<&'a [u8], CodecError> {
    if frame.len() < MBAP_HEADER_LEN + 2 {
        return Err(CodecError::FrameTooShort(frame.len()));
    }
    let proto = u16::from_be_bytes([frame[2], frame[3]]);
    if proto != PROTOCOL_ID {
        return Err(CodecError::InvalidProtocolId(proto));
    }
    let rx_txn = u16::from_be_bytes([frame[0], frame[1]]);
    if rx_txn != txn {
        return Err(CodecError::TransactionIdMismatch {
            sent: txn,
            received: rx_txn,
        });
    }
    if frame[6] != unit {
        return Err(CodecError::UnitIdMismatch {
            sent: unit,
            received: frame[6],
        });
    }
    let rx_fn = frame[7];
    if rx_fn == function | 0x80 {
        return Err(CodecError::Exception(frame[8]));
    }
    if rx_fn != function {
        return Err(CodecError::FunctionMismatch {
            sent: function,
            received: rx_fn,
        });
    }
    Ok(&frame[8..])
}

pub fn decode_read_registers(
    frame: &[u8],
    txn: u16,
    unit: u8,
    function: u8,
    count: u16,
) -> Result<Vec<u16>, CodecError> {
    let payload = check_response(frame, txn, unit, function)?;
    let expected = count as usize * 2;
    if payload.is_empty() || payload[0] as usize != expected || payload.len() - 1 < expected {
        return Err(CodecError::PayloadLength {
            expected,
            received: payload.len().saturating_sub(1),
        });
    }
    Ok(payload[1..=expected]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

pub fn decode_read_bits(
    frame: &[u8],
    txn: u16,
    unit: u8,
    function: u8,
    count: u16,
) -> Result<Vec<bool>, CodecError> {
    let payload = check_response(frame, txn, unit, function)?;
    let expected = (count as usize + 7) / 8;
    if payload.is_empty() || payload[0] as usize != expected || payload.len() - 1 < expected {
        return Err(CodecError::PayloadLength {
            expected,
            received: payload.len().saturating_sub(1),
        });
    }
    // Bits are packed LSB-first: bit 0 of the first byte is the first point.
    Ok((0..count as usize)
        .map(|i| payload[1 + i / 8] & (1 << (i % 8)) != 0)
        .collect())
}

pub fn decode_write_ack(frame: &[u8], txn: u16, unit: u8, function: u8) -> Result<(), CodecError> {
    let payload = check_response(frame, txn, unit, function)?;
    // Write responses echo address and value/quantity.
    if payload.len() < 4 {
        return Err(CodecError::PayloadLength {
            expected: 4,
            received: payload.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_read_holding_request() {
        let frame = encode_read(0x0102, 1, FN_READ_HOLDING_REGISTERS, 0x0010, 3);
        assert_eq!(
            frame,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x10, 0x00, 0x03]
        );
    }

    #[test]
    fn decodes_register_response() {
        // txn 7, unit 1, fn 3, 2 registers: 0x1234 0x5678
        let frame = [
            0x00, 0x07, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78,
        ];
        let words = decode_read_registers(&frame, 7, 1, FN_READ_HOLDING_REGISTERS, 2).unwrap();
        assert_eq!(words, vec![0x1234, 0x5678]);
    }

    #[test]
    fn decodes_bit_response_lsb_first() {
        // 10 coils in two bytes: 0b0000_0101, 0b0000_0010
        let frame = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x01, 0x02, 0x05, 0x02,
        ];
        let bits = decode_read_bits(&frame, 1, 1, FN_READ_COILS, 10).unwrap();
        assert_eq!(
            bits,
            vec![true, false, true, false, false, false, false, false, false, true]
        );
    }

    #[test]
    fn surfaces_device_exception() {
        // fn | 0x80 with exception code 0x02 (illegal data address)
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        assert_eq!(
            decode_read_registers(&frame, 1, 1, FN_READ_HOLDING_REGISTERS, 1),
            Err(CodecError::Exception(0x02))
        );
    }

    #[test]
    fn rejects_mismatched_transaction() {
        let frame = [
            0x00, 0x09, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x42,
        ];
        assert_eq!(
            decode_read_registers(&frame, 8, 1, FN_READ_HOLDING_REGISTERS, 1),
            Err(CodecError::TransactionIdMismatch {
                sent: 8,
                received: 9
            })
        );
    }

    #[test]
    fn write_single_coil_uses_ff00() {
        let frame = encode_write_single(1, 1, FN_WRITE_SINGLE_COIL, 0x0003, 0xFF00);
        assert_eq!(&frame[7..], &[0x05, 0x00, 0x03, 0xFF, 0x00]);
    }

    #[test]
    fn write_multiple_registers_layout() {
        let frame = encode_write_registers(1, 2, 0x0100, &[0xDEAD, 0xBEEF]);
        assert_eq!(
            &frame[7..],
            &[0x10, 0x01, 0x00, 0x00, 0x02, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]
        );
        // MBAP length covers unit + PDU
        assert_eq!(u16::from_be_bytes([frame[4], frame[5]]), 11);
    }
}

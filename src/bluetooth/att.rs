// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Minimal ATT PDU decoding for the session.

use super::ble_constants::att_op;

/// A decoded server-initiated or response PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttPdu<'a> {
    Notification { handle: u16, value: &'a [u8] },
    Indication { handle: u16, value: &'a [u8] },
    WriteResponse,
    ReadResponse { value: &'a [u8] },
    Error { opcode: u8, handle: u16, status: u8 },
    Unknown(u8),
    Malformed,
}

/// Decode one PDU. Handle-value PDUs carry the value from byte 3 on.
pub fn decode(pdu: &[u8]) -> AttPdu<'_> {
    let Some((&opcode, rest)) = pdu.split_first() else {
        return AttPdu::Malformed;
    };

    match opcode {
        att_op::HANDLE_NOTIFY | att_op::HANDLE_IND => {
            if rest.len() < 2 {
                return AttPdu::Malformed;
            }
            let handle = u16::from_le_bytes([rest[0], rest[1]]);
            let value = &rest[2..];
            if opcode == att_op::HANDLE_NOTIFY {
                AttPdu::Notification { handle, value }
            } else {
                AttPdu::Indication { handle, value }
            }
        }
        att_op::WRITE_RESP | att_op::EXEC_WRITE_RESP => {
            if rest.is_empty() {
                AttPdu::WriteResponse
            } else {
                AttPdu::Malformed
            }
        }
        att_op::READ_RESP => AttPdu::ReadResponse { value: rest },
        att_op::ERROR => {
            if rest.len() < 4 {
                return AttPdu::Malformed;
            }
            AttPdu::Error {
                opcode: rest[0],
                handle: u16::from_le_bytes([rest[1], rest[2]]),
                status: rest[3],
            }
        }
        other => AttPdu::Unknown(other),
    }
}

/// True for a well-formed write or execute-write response.
pub fn is_write_response(pdu: &[u8]) -> bool {
    matches!(decode(pdu), AttPdu::WriteResponse)
}

/// Handle value notification carrying `value`.
pub fn encode_notification(handle: u16, value: &[u8]) -> Vec<u8> {
    encode_handle_value(att_op::HANDLE_NOTIFY, handle, value)
}

/// Handle value indication carrying `value`.
pub fn encode_indication(handle: u16, value: &[u8]) -> Vec<u8> {
    encode_handle_value(att_op::HANDLE_IND, handle, value)
}

fn encode_handle_value(opcode: u8, handle: u16, value: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(value.len() + 3);
    pdu.push(opcode);
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.extend_from_slice(value);
    pdu
}

/// Read response carrying `value`.
pub fn encode_read_response(value: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(value.len() + 1);
    pdu.push(att_op::READ_RESP);
    pdu.extend_from_slice(value);
    pdu
}

/// Confirmation sent back for every indication.
pub fn confirmation() -> [u8; 1] {
    [att_op::HANDLE_CNF]
}

//! APCI framing: I/S/U frame encode/decode and the stream reader
//!
//! Every frame starts with 0x68 and a length byte (total length minus 2),
//! followed by four control octets and, for I-frames, an ASDU. The three
//! APCI formats are distinguished by the low two bits of the first control
//! octet.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::asdu::Asdu;
use crate::error::{CollSrvError, Result};

/// Frame start byte
pub const START_BYTE: u8 = 0x68;
/// Four control octets
pub const APCI_LEN: usize = 4;
/// Length byte covers control octets + ASDU, capped at one octet
pub const MAX_FRAME_BODY: usize = 253;

/// U-frame function codes (first control octet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UFrameKind {
    /// Start data transfer activation
    StartDtAct = 0x07,
    /// Start data transfer confirmation
    StartDtCon = 0x0B,
    /// Stop data transfer activation
    StopDtAct = 0x13,
    /// Stop data transfer confirmation
    StopDtCon = 0x23,
    /// Test frame activation
    TestFrAct = 0x43,
    /// Test frame confirmation
    TestFrCon = 0x83,
}

impl UFrameKind {
    pub fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            0x07 => UFrameKind::StartDtAct,
            0x0B => UFrameKind::StartDtCon,
            0x13 => UFrameKind::StopDtAct,
            0x23 => UFrameKind::StopDtCon,
            0x43 => UFrameKind::TestFrAct,
            0x83 => UFrameKind::TestFrCon,
            _ => return None,
        })
    }

    /// True for the two activation kinds that expect a confirmation
    pub fn is_act(self) -> bool {
        matches!(self, UFrameKind::StartDtAct | UFrameKind::TestFrAct)
    }

    pub fn is_con(self) -> bool {
        matches!(
            self,
            UFrameKind::StartDtCon | UFrameKind::StopDtCon | UFrameKind::TestFrCon
        )
    }
}

/// APCI control information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// Information transfer: 15-bit send and receive sequence numbers
    I { send: u16, recv: u16 },
    /// Supervisory acknowledgement
    S { recv: u16 },
    /// Unnumbered control
    U(UFrameKind),
}

/// One IEC-104 frame; only I-frames carry an ASDU
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub apci: Apci,
    pub asdu: Option<Asdu>,
}

impl Frame {
    pub fn i(send: u16, recv: u16, asdu: Asdu) -> Self {
        Self {
            apci: Apci::I { send, recv },
            asdu: Some(asdu),
        }
    }

    pub fn s(recv: u16) -> Self {
        Self {
            apci: Apci::S { recv },
            asdu: None,
        }
    }

    pub fn u(kind: UFrameKind) -> Self {
        Self {
            apci: Apci::U(kind),
            asdu: None,
        }
    }

    /// ASDU payload of a command frame; `None` for S/U frames
    pub fn asdu(&self) -> Option<&Asdu> {
        self.asdu.as_ref()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(16);
        buffer.push(START_BYTE);
        buffer.push(0); // patched with the body length below

        match self.apci {
            Apci::I { send, recv } => {
                buffer.push((send << 1) as u8);
                buffer.push((send >> 7) as u8);
                buffer.push((recv << 1) as u8);
                buffer.push((recv >> 7) as u8);
                let asdu = self
                    .asdu
                    .as_ref()
                    .ok_or_else(|| CollSrvError::bad_value("I-frame without ASDU"))?;
                asdu.encode(&mut buffer)?;
            },
            Apci::S { recv } => {
                buffer.push(0x01);
                buffer.push(0x00);
                buffer.push((recv << 1) as u8);
                buffer.push((recv >> 7) as u8);
            },
            Apci::U(kind) => {
                buffer.push(kind as u8);
                buffer.push(0x00);
                buffer.push(0x00);
                buffer.push(0x00);
            },
        }

        let body = buffer.len() - 2;
        if body > MAX_FRAME_BODY {
            return Err(CollSrvError::bad_value(format!(
                "frame body {body} exceeds {MAX_FRAME_BODY} bytes"
            )));
        }
        buffer[1] = body as u8;
        Ok(buffer)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 + APCI_LEN {
            return Err(CollSrvError::bad_format(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        if data[0] != START_BYTE {
            return Err(CollSrvError::bad_format(format!(
                "invalid start byte {:#04x}",
                data[0]
            )));
        }
        let length = data[1] as usize;
        if data.len() != length + 2 {
            return Err(CollSrvError::bad_format(format!(
                "length mismatch: header says {}, got {} bytes",
                length + 2,
                data.len()
            )));
        }

        let control1 = data[2];
        if control1 & 0x01 == 0 {
            // I-format
            let send = ((u16::from(data[3]) << 7) | (u16::from(control1) >> 1)) & 0x7FFF;
            let recv = ((u16::from(data[5]) << 7) | (u16::from(data[4]) >> 1)) & 0x7FFF;
            let asdu = Asdu::decode(&data[6..])?;
            Ok(Frame::i(send, recv, asdu))
        } else if control1 & 0x03 == 0x01 {
            // S-format
            let recv = ((u16::from(data[5]) << 7) | (u16::from(data[4]) >> 1)) & 0x7FFF;
            Ok(Frame::s(recv))
        } else {
            // U-format
            let kind = UFrameKind::from_byte(control1).ok_or_else(|| {
                CollSrvError::bad_format(format!("invalid U-frame control {control1:#04x}"))
            })?;
            Ok(Frame::u(kind))
        }
    }
}

/// Read one complete frame from the stream, returning its raw bytes
///
/// The raw bytes feed both the decoder and the frame log. EOF and transport
/// errors surface as `Link`; an impossible header surfaces as `BadFormat`
/// (the byte stream is beyond resynchronization at that point).
pub async fn read_raw_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;
    if head[0] != START_BYTE {
        return Err(CollSrvError::bad_format(format!(
            "invalid start byte {:#04x}",
            head[0]
        )));
    }
    let length = head[1] as usize;
    if length < APCI_LEN {
        return Err(CollSrvError::bad_format(format!(
            "frame body {length} shorter than APCI"
        )));
    }
    let mut data = vec![0u8; 2 + length];
    data[..2].copy_from_slice(&head);
    reader.read_exact(&mut data[2..]).await?;
    Ok(data)
}

// Feetech STS serial bus, position mode
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Angles 0-180° are mapped onto the central half of the 4096-step turn so
// that 90° sits at the servo's mechanical midpoint (2048).

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 50;

const HEADER: [u8; 2] = [0xFF, 0xFF];
const BROADCAST_ID: u8 = 0xFE;

/// Steps per full revolution
const STEPS_PER_REVOLUTION: u32 = 4096;
/// Step value for 0° in the 0-180° command range
const ANGLE_ZERO_STEPS: u32 = STEPS_PER_REVOLUTION / 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    OperatingMode = 33,   // 1 byte: 0=position
    TorqueEnable = 40,    // 1 byte
    GoalPosition = 42,    // 2 bytes
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes, read-only
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
}

#[derive(Debug, thiserror::Error)]
pub enum ServoError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    StatusError { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, ServoError>;

/// Convert a 0-180° command angle to a goal position in steps
pub fn angle_to_steps(angle: u8) -> u16 {
    let angle = angle.min(180) as u32;
    (ANGLE_ZERO_STEPS + angle * (STEPS_PER_REVOLUTION / 2) / 180) as u16
}

/// Convert a present position back to the 0-180° command range
pub fn steps_to_angle(steps: u16) -> u8 {
    let steps = (steps as u32).clamp(ANGLE_ZERO_STEPS, ANGLE_ZERO_STEPS + STEPS_PER_REVOLUTION / 2);
    ((steps - ANGLE_ZERO_STEPS) * 180 / (STEPS_PER_REVOLUTION / 2)) as u8
}

fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    !(sum as u8)
}

fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + params.len());
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push((params.len() + 2) as u8); // instruction + params + checksum
    packet.push(instruction as u8);
    packet.extend_from_slice(params);
    let sum = checksum(&packet[2..]);
    packet.push(sum);
    packet
}

/// Serial connection to a chain of bus servos
pub struct FeetechBus {
    port: Box<dyn SerialPort>,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port })
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read a status packet and return its parameters
    fn read_status(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.port.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                ServoError::Timeout { id: expected_id }
            } else {
                ServoError::Io(e)
            }
        })?;

        if head[..2] != HEADER {
            return Err(ServoError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", &head[..2]),
            });
        }
        let (id, length) = (head[2], head[3] as usize);
        if id != expected_id {
            return Err(ServoError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: got {}", id),
            });
        }
        if length < 2 {
            return Err(ServoError::InvalidResponse {
                id,
                reason: format!("Length too short: {}", length),
            });
        }

        // error byte + params + checksum
        let mut body = vec![0u8; length];
        self.port.read_exact(&mut body)?;

        let mut summed = vec![id, length as u8];
        summed.extend_from_slice(&body[..length - 1]);
        if checksum(&summed) != body[length - 1] {
            return Err(ServoError::ChecksumMismatch { id });
        }
        if body[0] != 0 {
            return Err(ServoError::StatusError { id, status: body[0] });
        }
        Ok(body[1..length - 1].to_vec())
    }

    pub fn ping(&mut self, id: u8) -> Result<bool> {
        self.send(&build_packet(id, Instruction::Ping, &[]))?;
        match self.read_status(id) {
            Ok(_) => Ok(true),
            Err(ServoError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Write u8 to servo {}: reg={:?}, value={}", id, register, value);
        self.send(&build_packet(id, Instruction::Write, &[register as u8, value]))?;
        self.read_status(id).map(|_| ())
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        self.send(&build_packet(id, Instruction::Read, &[register as u8, 2]))?;
        let params = self.read_status(id)?;
        match params.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(ServoError::InvalidResponse {
                id,
                reason: format!("Expected 2 bytes, got {}", params.len()),
            }),
        }
    }

    /// Write one 16-bit register on several servos in a single broadcast packet
    pub fn sync_write_u16(&mut self, register: Register, data: &[(u8, u16)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut params = Vec::with_capacity(2 + data.len() * 3);
        params.push(register as u8);
        params.push(2);
        for &(id, value) in data {
            params.push(id);
            params.extend_from_slice(&value.to_le_bytes());
        }
        debug!("Sync write to {} servos: reg={:?}", data.len(), register);
        // Broadcast packets get no status reply
        self.send(&build_packet(BROADCAST_ID, Instruction::SyncWrite, &params))
    }

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Switch to position mode (torque must be off)
    pub fn set_position_mode(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, OperatingMode::Position as u8)
    }

    /// Move several servos to 0-180° angles together
    pub fn sync_write_angles(&mut self, targets: &[(u8, u8)]) -> Result<()> {
        let steps: Vec<(u8, u16)> = targets
            .iter()
            .map(|&(id, angle)| (id, angle_to_steps(angle)))
            .collect();
        self.sync_write_u16(Register::GoalPosition, &steps)
    }

    pub fn read_angle(&mut self, id: u8) -> Result<u8> {
        self.read_u16(id, Register::PresentPosition).map(steps_to_angle)
    }
}

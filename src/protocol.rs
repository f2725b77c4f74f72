use arrayvec::ArrayString;
use core::fmt::Write as _;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::arbiter::{MotorCommand, DRIVER_LIMIT};
use crate::led::{LedCommand, Rgb};
use crate::mode::{ActionReply, ActionRequest, ModeRequest};

pub const SEPARATOR: char = '#';
pub const TERMINATOR: char = '\n';

pub const MAX_LINE_SIZE: usize = 128;
pub const MAX_PARAMS: usize = 5;

pub const CMD_MOTOR: &str = "CMD_MOTOR";
pub const CMD_SERVO: &str = "CMD_SERVO";
pub const CMD_LED: &str = "CMD_LED";
pub const CMD_MODE: &str = "CMD_MODE";
pub const CMD_ACTION: &str = "CMD_ACTION";
pub const CMD_SONIC: &str = "CMD_SONIC";

pub const SERVO_CHANNELS: u8 = 2;
pub const SERVO_MAX_ANGLE: i32 = 180;

pub type LineBuffer = ArrayString<MAX_LINE_SIZE>;
type Params = Vec<i32, MAX_PARAMS>;

/// A decoded inbound command line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Motor(MotorCommand),
    Servo { channel: u8, angle: i32 },
    Led(LedCommand),
    Mode(ModeRequest),
    Action(ActionRequest),
    SonicRequest,
}

/// An outbound line sent back to command-channel clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Sonic { distance_cm: f32 },
    Action(ActionReply),
}

/// Raw text frame awaiting parse, tagged with the client it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub peer: SocketAddr,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
    #[error("line exceeds {} bytes", MAX_LINE_SIZE)]
    MessageTooLarge,
    #[error("unknown command keyword `{0}`")]
    UnknownCommand(String),
    #[error("{command} expects {expected} parameter(s), got {actual}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("parameter `{0}` is not an integer")]
    InvalidNumber(String),
    #[error("{command} parameter out of range: {value}")]
    OutOfRange { command: &'static str, value: i32 },
    #[error("reply line received on the command channel")]
    UnexpectedReply,
    #[error("buffer overflow")]
    BufferOverflow,
}

/// Parse one command line. Trailing separators and surrounding whitespace are ignored;
/// an empty field anywhere else rejects the line.
pub fn parse_line(line: &str) -> Result<Command, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if line.len() > MAX_LINE_SIZE {
        return Err(ProtocolError::MessageTooLarge);
    }

    let mut fields = line.split(SEPARATOR);
    let keyword = fields.next().unwrap_or_default().trim();
    let mut raw: std::vec::Vec<&str> = fields.map(str::trim).collect();
    while raw.last().map_or(false, |f| f.is_empty()) {
        raw.pop();
    }

    match keyword {
        CMD_MOTOR => {
            let p = params(CMD_MOTOR, &raw, 2)?;
            let left = in_range(CMD_MOTOR, p[0], -DRIVER_LIMIT, DRIVER_LIMIT)?;
            let right = in_range(CMD_MOTOR, p[1], -DRIVER_LIMIT, DRIVER_LIMIT)?;
            Ok(Command::Motor(MotorCommand::new(left, right)))
        }
        CMD_SERVO => {
            let p = params(CMD_SERVO, &raw, 2)?;
            let channel = in_range(CMD_SERVO, p[0], 0, i32::from(SERVO_CHANNELS) - 1)?;
            let angle = in_range(CMD_SERVO, p[1], 0, SERVO_MAX_ANGLE)?;
            Ok(Command::Servo {
                channel: channel as u8,
                angle,
            })
        }
        CMD_LED => {
            let p = params(CMD_LED, &raw, 5)?;
            let r = in_range(CMD_LED, p[1], 0, 255)? as u8;
            let g = in_range(CMD_LED, p[2], 0, 255)? as u8;
            let b = in_range(CMD_LED, p[3], 0, 255)? as u8;
            let mask = in_range(CMD_LED, p[4], 0, 255)? as u8;
            Ok(Command::Led(LedCommand::new(p[0], Rgb::new(r, g, b), mask)))
        }
        CMD_MODE => {
            let p = params(CMD_MODE, &raw, 1)?;
            ModeRequest::from_wire(p[0])
                .map(Command::Mode)
                .ok_or(ProtocolError::OutOfRange {
                    command: CMD_MODE,
                    value: p[0],
                })
        }
        CMD_ACTION => {
            let p = params(CMD_ACTION, &raw, 1)?;
            ActionRequest::from_wire(p[0])
                .map(Command::Action)
                .ok_or(ProtocolError::OutOfRange {
                    command: CMD_ACTION,
                    value: p[0],
                })
        }
        CMD_SONIC => {
            if raw.is_empty() {
                Ok(Command::SonicRequest)
            } else {
                Err(ProtocolError::UnexpectedReply)
            }
        }
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

/// Encode a command as a wire line without the terminator.
pub fn encode(command: &Command) -> Result<LineBuffer, ProtocolError> {
    let mut line = LineBuffer::new();
    let result = match command {
        Command::Motor(cmd) => write!(line, "{CMD_MOTOR}#{}#{}", cmd.left, cmd.right),
        Command::Servo { channel, angle } => write!(line, "{CMD_SERVO}#{channel}#{angle}"),
        Command::Led(led) => write!(
            line,
            "{CMD_LED}#{}#{}#{}#{}#{}",
            led.mode, led.color.r, led.color.g, led.color.b, led.mask
        ),
        Command::Mode(mode) => write!(line, "{CMD_MODE}#{}", mode.wire()),
        Command::Action(action) => write!(line, "{CMD_ACTION}#{}", action.wire()),
        Command::SonicRequest => write!(line, "{CMD_SONIC}#"),
    };
    result.map_err(|_| ProtocolError::BufferOverflow)?;
    Ok(line)
}

/// Encode a reply as a wire line without the terminator.
pub fn encode_reply(reply: &Reply) -> Result<LineBuffer, ProtocolError> {
    let mut line = LineBuffer::new();
    let result = match reply {
        Reply::Sonic { distance_cm } => write!(line, "{CMD_SONIC}#{distance_cm:.2}"),
        Reply::Action(action) => write!(line, "{CMD_ACTION}#{}", action.wire()),
    };
    result.map_err(|_| ProtocolError::BufferOverflow)?;
    Ok(line)
}

/// Parse a line sent by the daemon to its clients.
pub fn parse_reply(line: &str) -> Result<Reply, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let mut fields = line.split(SEPARATOR);
    let keyword = fields.next().unwrap_or_default().trim();
    let value = fields.next().map(str::trim).unwrap_or_default();

    match keyword {
        CMD_SONIC => value
            .parse::<f32>()
            .map(|distance_cm| Reply::Sonic { distance_cm })
            .map_err(|_| ProtocolError::InvalidNumber(value.to_string())),
        CMD_ACTION => {
            let code = parse_int(value)?;
            ActionReply::from_wire(code)
                .map(Reply::Action)
                .ok_or(ProtocolError::OutOfRange {
                    command: CMD_ACTION,
                    value: code,
                })
        }
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

/// Split a received chunk into its non-empty lines, preserving order.
pub fn split_frame(chunk: &str) -> impl Iterator<Item = &str> {
    chunk
        .split(TERMINATOR)
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

fn params(command: &'static str, raw: &[&str], expected: usize) -> Result<Params, ProtocolError> {
    // An empty field mid-line would shift every later parameter
    if raw.iter().any(|f| f.is_empty()) {
        return Err(ProtocolError::InvalidNumber(String::new()));
    }
    if raw.len() != expected {
        return Err(ProtocolError::WrongArity {
            command,
            expected,
            actual: raw.len(),
        });
    }

    let mut out = Params::new();
    for field in raw {
        out.push(parse_int(field)?)
            .map_err(|_| ProtocolError::BufferOverflow)?;
    }
    Ok(out)
}

fn parse_int(field: &str) -> Result<i32, ProtocolError> {
    field
        .parse::<i32>()
        .map_err(|_| ProtocolError::InvalidNumber(field.to_string()))
}

fn in_range(command: &'static str, value: i32, min: i32, max: i32) -> Result<i32, ProtocolError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ProtocolError::OutOfRange { command, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_rejects_extra_fields() {
        let err = params(CMD_MODE, &["1", "2"], 1).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::WrongArity {
                command: CMD_MODE,
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_sonic_reply_has_two_decimals() {
        let line = encode_reply(&Reply::Sonic { distance_cm: 23.456 }).unwrap();
        assert_eq!(line.as_str(), "CMD_SONIC#23.46");
    }
}

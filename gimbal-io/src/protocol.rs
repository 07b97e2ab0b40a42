//! Text-line protocol spoken over the gimbal link
//!
//! Commands (client to device), one per newline-terminated line:
//! - `"<pan_deg> <tilt_deg>"` - relative move, signed degrees
//! - `"HOME"` - run the tilt homing sequence
//! - `"OFFSET <degrees>"` - signed homing offset for subsequent runs
//! - `"STOP"` - emergency stop, releases holding torque
//! - `"RESET"` - clear the emergency stop, state returns to unhomed
//!
//! Responses (device to client):
//! - `"MOVING"` then periodic `"MOVING: PAN=<n> TILT=<n>"` progress
//!   (n = remaining steps per axis), then `"GOAL_REACHED"`
//! - `"HOMING: BACKOFF"` / `"HOMING: SEARCH"` then `"HOMING_COMPLETE"`
//! - `"STOPPED"` when an emergency stop lands
//! - `"OK"` acknowledging OFFSET and RESET
//! - `"ERROR: <code>"` for rejected or failed commands

use crate::error::{GimbalError, Result};

/// Command parsed from a client line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Relative move by signed degree deltas
    Move { pan_deg: f64, tilt_deg: f64 },
    /// Run the homing sequence on the tilt axis
    Home,
    /// Set the signed homing offset in degrees for subsequent runs
    Offset(f64),
    /// Engage the emergency stop
    Stop,
    /// Clear the emergency stop
    Reset,
}

impl Command {
    /// Parse a command line (without the trailing newline)
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("HOME") => Command::unary(Command::Home, tokens, line),
            Some("STOP") => Command::unary(Command::Stop, tokens, line),
            Some("RESET") => Command::unary(Command::Reset, tokens, line),
            Some("OFFSET") => {
                let value = parse_finite(tokens.next(), line)?;
                Command::unary(Command::Offset(value), tokens, line)
            }
            Some(first) => {
                let pan_deg = parse_finite(Some(first), line)?;
                let tilt_deg = parse_finite(tokens.next(), line)?;
                Command::unary(Command::Move { pan_deg, tilt_deg }, tokens, line)
            }
            None => Err(GimbalError::InvalidLine(String::from("empty command"))),
        }
    }

    /// Accept `cmd` only if no tokens remain
    fn unary<'a>(
        cmd: Command,
        mut rest: impl Iterator<Item = &'a str>,
        line: &str,
    ) -> Result<Self> {
        if rest.next().is_some() {
            return Err(GimbalError::InvalidLine(line.to_string()));
        }
        Ok(cmd)
    }

    /// Format as a wire line (no trailing newline)
    pub fn encode(&self) -> String {
        match self {
            Command::Move { pan_deg, tilt_deg } => format!("{} {}", pan_deg, tilt_deg),
            Command::Home => String::from("HOME"),
            Command::Offset(value) => format!("OFFSET {}", value),
            Command::Stop => String::from("STOP"),
            Command::Reset => String::from("RESET"),
        }
    }
}

fn parse_finite(token: Option<&str>, line: &str) -> Result<f64> {
    let value: f64 = token
        .ok_or_else(|| GimbalError::InvalidLine(line.to_string()))?
        .parse()
        .map_err(|_| GimbalError::InvalidLine(line.to_string()))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(GimbalError::InvalidLine(line.to_string()))
    }
}

/// Response parsed from a device line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Move accepted, stepping has begun
    Moving,
    /// Periodic progress, remaining steps per axis
    Progress {
        pan_remaining: u32,
        tilt_remaining: u32,
    },
    /// Both axes reached zero remaining steps (may repeat)
    GoalReached,
    /// Homing is backing off a pre-triggered switch
    HomingBackoff,
    /// Homing is searching for the switch
    HomingSearch,
    /// Homing finished, tilt reference zeroed
    HomingComplete,
    /// Emergency stop landed, torque released
    Stopped,
    /// Command acknowledged
    Ok,
    /// Command rejected or run failed
    Error(ErrorCode),
}

impl Response {
    /// Parse a response line (without the trailing newline)
    pub fn parse(line: &str) -> Result<Self> {
        match line.trim() {
            "MOVING" => Ok(Response::Moving),
            "GOAL_REACHED" => Ok(Response::GoalReached),
            "HOMING: BACKOFF" => Ok(Response::HomingBackoff),
            "HOMING: SEARCH" => Ok(Response::HomingSearch),
            "HOMING_COMPLETE" => Ok(Response::HomingComplete),
            "STOPPED" => Ok(Response::Stopped),
            "OK" => Ok(Response::Ok),
            trimmed => {
                if let Some(code) = trimmed.strip_prefix("ERROR: ") {
                    return Ok(Response::Error(ErrorCode::parse(code)?));
                }
                if let Some(rest) = trimmed.strip_prefix("MOVING: ") {
                    return parse_progress(rest, trimmed);
                }
                Err(GimbalError::InvalidLine(trimmed.to_string()))
            }
        }
    }

    /// Format as a wire line (no trailing newline)
    pub fn encode(&self) -> String {
        match self {
            Response::Moving => String::from("MOVING"),
            Response::Progress {
                pan_remaining,
                tilt_remaining,
            } => format!("MOVING: PAN={} TILT={}", pan_remaining, tilt_remaining),
            Response::GoalReached => String::from("GOAL_REACHED"),
            Response::HomingBackoff => String::from("HOMING: BACKOFF"),
            Response::HomingSearch => String::from("HOMING: SEARCH"),
            Response::HomingComplete => String::from("HOMING_COMPLETE"),
            Response::Stopped => String::from("STOPPED"),
            Response::Ok => String::from("OK"),
            Response::Error(code) => format!("ERROR: {}", code.as_str()),
        }
    }
}

fn parse_progress(rest: &str, line: &str) -> Result<Response> {
    let mut tokens = rest.split_whitespace();
    let pan = tokens.next().and_then(|t| t.strip_prefix("PAN="));
    let tilt = tokens.next().and_then(|t| t.strip_prefix("TILT="));

    match (pan, tilt, tokens.next()) {
        (Some(pan), Some(tilt), None) => {
            let pan_remaining = pan
                .parse()
                .map_err(|_| GimbalError::InvalidLine(line.to_string()))?;
            let tilt_remaining = tilt
                .parse()
                .map_err(|_| GimbalError::InvalidLine(line.to_string()))?;
            Ok(Response::Progress {
                pan_remaining,
                tilt_remaining,
            })
        }
        _ => Err(GimbalError::InvalidLine(line.to_string())),
    }
}

/// Error code carried by an `"ERROR: <code>"` response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Move rejected: tilt axis has no zero reference
    Unhomed,
    /// Command rejected: emergency stop engaged, RESET required
    Stopped,
    /// Homing search exhausted without the switch triggering
    HomingTimeout,
    /// Limit switch behaved inconsistently during homing
    HomingFault,
    /// A move or homing run is already in progress
    Busy,
    /// Line did not parse as a command
    BadCommand,
    /// OFFSET value outside the configured bound
    OffsetRange,
}

impl ErrorCode {
    /// Wire spelling of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unhomed => "UNHOMED",
            ErrorCode::Stopped => "STOPPED",
            ErrorCode::HomingTimeout => "HOMING_TIMEOUT",
            ErrorCode::HomingFault => "HOMING_FAULT",
            ErrorCode::Busy => "BUSY",
            ErrorCode::BadCommand => "BAD_COMMAND",
            ErrorCode::OffsetRange => "OFFSET_RANGE",
        }
    }

    /// Parse the wire spelling
    pub fn parse(code: &str) -> Result<Self> {
        match code {
            "UNHOMED" => Ok(ErrorCode::Unhomed),
            "STOPPED" => Ok(ErrorCode::Stopped),
            "HOMING_TIMEOUT" => Ok(ErrorCode::HomingTimeout),
            "HOMING_FAULT" => Ok(ErrorCode::HomingFault),
            "BUSY" => Ok(ErrorCode::Busy),
            "BAD_COMMAND" => Ok(ErrorCode::BadCommand),
            "OFFSET_RANGE" => Ok(ErrorCode::OffsetRange),
            other => Err(GimbalError::InvalidLine(format!(
                "unknown error code: {}",
                other
            ))),
        }
    }

    /// Typed error this code maps to on the client side
    pub fn into_error(self) -> GimbalError {
        match self {
            ErrorCode::Unhomed => GimbalError::Unhomed,
            ErrorCode::Stopped => GimbalError::EmergencyStop,
            ErrorCode::HomingTimeout => GimbalError::HomingTimeout,
            ErrorCode::HomingFault => GimbalError::HomingFault("reported by device"),
            ErrorCode::Busy => GimbalError::Busy,
            ErrorCode::BadCommand => GimbalError::Device(String::from("BAD_COMMAND")),
            ErrorCode::OffsetRange => {
                GimbalError::InvalidParameter(String::from("homing offset out of range"))
            }
        }
    }
}

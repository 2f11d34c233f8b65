//! Actuator command selection and re-send suppression
//!
//! Precedence: emergency (clear the road) > speeding (raise) > safe (lower).
//! A command goes out when it differs from the last one sent, or when the
//! re-send interval has elapsed since it was last sent.

use crate::infra::config::{CommandProtocol, Config};
use crate::services::policy::FrameDecision;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Emergency vehicle present: lower and hold
    Clear,
    /// Speeding vehicle present: raise
    Raise,
    /// No speeding vehicle: lower
    Lower,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Clear => "clear",
            CommandKind::Raise => "raise",
            CommandKind::Lower => "lower",
        }
    }
}

/// Logical actuator command. `value` carries the reported speed for the
/// line protocol and is always 0 for the letter protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub kind: CommandKind,
    pub value: u32,
}

impl ActuatorCommand {
    /// Map a frame decision to a command for `protocol`
    pub fn from_decision(decision: &FrameDecision, protocol: CommandProtocol) -> Self {
        if decision.emergency {
            return Self { kind: CommandKind::Clear, value: 0 };
        }
        if decision.any_speeding {
            let value = match protocol {
                CommandProtocol::SpeedLine => {
                    decision.max_speeding_speed.map_or(0, |s| s.max(0.0).floor() as u32)
                }
                CommandProtocol::Letter => 0,
            };
            return Self { kind: CommandKind::Raise, value };
        }
        Self { kind: CommandKind::Lower, value: 0 }
    }

    /// Wire bytes for `protocol`
    pub fn encode(&self, protocol: CommandProtocol) -> Vec<u8> {
        match protocol {
            CommandProtocol::SpeedLine => match self.kind {
                CommandKind::Raise => format!("S:{}\n", self.value).into_bytes(),
                CommandKind::Clear | CommandKind::Lower => b"S:0\n".to_vec(),
            },
            CommandProtocol::Letter => match self.kind {
                CommandKind::Raise => b"R".to_vec(),
                CommandKind::Clear | CommandKind::Lower => b"L".to_vec(),
            },
        }
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind.as_str(), self.value)
    }
}

/// Last emitted command; never persisted
pub struct CommandThrottler {
    protocol: CommandProtocol,
    resend_interval_secs: f64,
    last: Option<(ActuatorCommand, f64)>,
}

impl CommandThrottler {
    pub fn new(config: &Config) -> Self {
        Self {
            protocol: config.command_protocol(),
            resend_interval_secs: config.resend_interval_ms() as f64 / 1000.0,
            last: None,
        }
    }

    pub fn protocol(&self) -> CommandProtocol {
        self.protocol
    }

    /// Command to emit for this frame at time `now` (seconds), or `None` to suppress
    pub fn next(&mut self, decision: &FrameDecision, now: f64) -> Option<ActuatorCommand> {
        let command = ActuatorCommand::from_decision(decision, self.protocol);
        let due = match self.last {
            None => true,
            Some((last, sent_at)) => last != command || now - sent_at >= self.resend_interval_secs,
        };
        if !due {
            return None;
        }
        self.last = Some((command, now));
        Some(command)
    }

    pub fn last(&self) -> Option<ActuatorCommand> {
        self.last.map(|(command, _)| command)
    }
}

//! Operating-mode state machine.

use serde::{Deserialize, Serialize};

/// Which subsystem currently owns motor output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CarMode {
    #[default]
    Free = 1,
    UltrasonicAuto = 2,
    InfraredLine = 3,
    ClampStop = 4,
    ClampUp = 5,
    ClampDown = 6,
}

impl CarMode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CarMode::Free),
            2 => Some(CarMode::UltrasonicAuto),
            3 => Some(CarMode::InfraredLine),
            4 => Some(CarMode::ClampStop),
            5 => Some(CarMode::ClampUp),
            6 => Some(CarMode::ClampDown),
            _ => None,
        }
    }

    /// Modes entered through an action request (gripper control).
    pub fn is_action(self) -> bool {
        matches!(self, CarMode::ClampStop | CarMode::ClampUp | CarMode::ClampDown)
    }

    /// Network servo commands are honored only in these modes.
    pub fn allows_servo(self) -> bool {
        matches!(self, CarMode::Free | CarMode::UltrasonicAuto)
    }
}

impl core::fmt::Display for CarMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            CarMode::Free => "free",
            CarMode::UltrasonicAuto => "ultrasonic-auto",
            CarMode::InfraredLine => "infrared-line",
            CarMode::ClampStop => "clamp-stop",
            CarMode::ClampUp => "clamp-up",
            CarMode::ClampDown => "clamp-down",
        };
        f.write_str(name)
    }
}

/// `CMD_MODE#<n>` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeRequest {
    Free,
    Ultrasonic,
    LineFollow,
}

impl ModeRequest {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ModeRequest::Free),
            1 => Some(ModeRequest::Ultrasonic),
            2 => Some(ModeRequest::LineFollow),
            _ => None,
        }
    }

    pub fn wire(self) -> i32 {
        match self {
            ModeRequest::Free => 0,
            ModeRequest::Ultrasonic => 1,
            ModeRequest::LineFollow => 2,
        }
    }

    pub fn target(self) -> CarMode {
        match self {
            ModeRequest::Free => CarMode::Free,
            ModeRequest::Ultrasonic => CarMode::UltrasonicAuto,
            ModeRequest::LineFollow => CarMode::InfraredLine,
        }
    }
}

/// `CMD_ACTION#<n>` request argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionRequest {
    Stop,
    Up,
    Down,
}

impl ActionRequest {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ActionRequest::Stop),
            1 => Some(ActionRequest::Up),
            2 => Some(ActionRequest::Down),
            _ => None,
        }
    }

    pub fn wire(self) -> i32 {
        match self {
            ActionRequest::Stop => 0,
            ActionRequest::Up => 1,
            ActionRequest::Down => 2,
        }
    }

    pub fn target(self) -> CarMode {
        match self {
            ActionRequest::Stop => CarMode::ClampStop,
            ActionRequest::Up => CarMode::ClampUp,
            ActionRequest::Down => CarMode::ClampDown,
        }
    }
}

/// `CMD_ACTION#<n>` reply argument, sent when a gripper action finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionReply {
    Stopped,
    UpComplete,
    DownComplete,
}

impl ActionReply {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ActionReply::Stopped),
            10 => Some(ActionReply::UpComplete),
            20 => Some(ActionReply::DownComplete),
            _ => None,
        }
    }

    pub fn wire(self) -> i32 {
        match self {
            ActionReply::Stopped => 0,
            ActionReply::UpComplete => 10,
            ActionReply::DownComplete => 20,
        }
    }

    /// Reply owed when `mode` completes.
    pub fn for_mode(mode: CarMode) -> Option<Self> {
        match mode {
            CarMode::ClampStop => Some(ActionReply::Stopped),
            CarMode::ClampUp => Some(ActionReply::UpComplete),
            CarMode::ClampDown => Some(ActionReply::DownComplete),
            _ => None,
        }
    }
}

/// Current mode plus the mode that was active before a gripper action began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeState {
    current: CarMode,
    before_action: CarMode,
}

impl ModeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> CarMode {
        self.current
    }

    pub fn before_action(&self) -> CarMode {
        self.before_action
    }

    /// Explicit mode request; also becomes the mode to return to after actions.
    pub fn request(&mut self, request: ModeRequest) -> CarMode {
        self.current = request.target();
        self.before_action = self.current;
        self.current
    }

    /// Enter a gripper action without touching the remembered mode.
    pub fn begin_action(&mut self, action: ActionRequest) -> CarMode {
        self.current = action.target();
        self.current
    }

    /// Leave an action, reverting to the mode active before it began.
    pub fn finish_action(&mut self) -> CarMode {
        self.current = self.before_action;
        self.current
    }

    /// Force the current mode (gamepad reset paths); the remembered mode is kept.
    pub fn force(&mut self, mode: CarMode) {
        self.current = mode;
    }
}

use harmoniq_pipe::line::{split_command, FOCUS, HIDE, IDLE, SHOW};
use harmoniq_pipe::{Fields, PipeError};
use harmoniq_rt::MailboxEntry;
use serde::{Deserialize, Serialize};

pub const GUI_IS_SHOWN: &str = "gui_is_shown";
pub const GUI_IS_HIDDEN: &str = "gui_is_hidden";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteEvent {
    pub on: bool,
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
}

impl NoteEvent {
    /// MIDI status byte, never zero, so it can travel through a mailbox slot.
    pub fn status(&self) -> u8 {
        let kind = if self.on { 0x90 } else { 0x80 };
        kind | (self.channel & 0x0F)
    }

    pub fn from_mailbox(entry: MailboxEntry) -> Option<Self> {
        let on = match entry.status & 0xF0 {
            0x90 => entry.data2 != 0,
            0x80 => false,
            _ => return None,
        };
        Some(Self {
            on,
            channel: entry.status & 0x0F,
            note: entry.data1,
            velocity: entry.data2,
        })
    }

    fn parse(fields: &mut Fields<'_>) -> Result<Self, PipeError> {
        Ok(Self {
            on: fields.next_bool()?,
            channel: fields.next("a MIDI channel")?,
            note: fields.next("a note number")?,
            velocity: fields.next("a velocity")?,
        })
    }

    fn to_args(self) -> String {
        format!("{} {} {} {}", self.on, self.channel, self.note, self.velocity)
    }
}

/// Lines the host sends to a bridge process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BridgeCommand {
    Show,
    Hide,
    Focus,
    Idle,
    Control { index: u32, value: f32 },
    Program { index: u32 },
    Note(NoteEvent),
    Ping { token: String },
}

impl BridgeCommand {
    pub fn parse(line: &str) -> Result<Self, PipeError> {
        let (command, args) = split_command(line);
        let mut fields = Fields::new(args);
        Ok(match command {
            SHOW => BridgeCommand::Show,
            HIDE => BridgeCommand::Hide,
            FOCUS => BridgeCommand::Focus,
            IDLE => BridgeCommand::Idle,
            "control" => BridgeCommand::Control {
                index: fields.next("a parameter index")?,
                value: fields.next("a parameter value")?,
            },
            "program" => BridgeCommand::Program {
                index: fields.next("a program index")?,
            },
            "note" => BridgeCommand::Note(NoteEvent::parse(&mut fields)?),
            "ping" => BridgeCommand::Ping {
                token: fields.next_str()?.to_owned(),
            },
            _ => {
                return Err(PipeError::Parse {
                    expected: "a bridge command",
                    line: line.to_owned(),
                })
            }
        })
    }

    pub fn to_line(&self) -> String {
        match self {
            BridgeCommand::Show => SHOW.to_owned(),
            BridgeCommand::Hide => HIDE.to_owned(),
            BridgeCommand::Focus => FOCUS.to_owned(),
            BridgeCommand::Idle => IDLE.to_owned(),
            BridgeCommand::Control { index, value } => format!("control {index} {value}"),
            BridgeCommand::Program { index } => format!("program {index}"),
            BridgeCommand::Note(note) => format!("note {}", note.to_args()),
            BridgeCommand::Ping { token } => format!("ping {token}"),
        }
    }
}

/// Lines a bridge process sends back to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BridgeEvent {
    GuiShown,
    GuiHidden,
    Control { index: u32, value: f32 },
    Note(NoteEvent),
    Pong { token: String },
    Exiting,
}

impl BridgeEvent {
    pub fn parse(line: &str) -> Result<Self, PipeError> {
        let (command, args) = split_command(line);
        let mut fields = Fields::new(args);
        Ok(match command {
            GUI_IS_SHOWN => BridgeEvent::GuiShown,
            GUI_IS_HIDDEN => BridgeEvent::GuiHidden,
            "control" => BridgeEvent::Control {
                index: fields.next("a parameter index")?,
                value: fields.next("a parameter value")?,
            },
            "note" => BridgeEvent::Note(NoteEvent::parse(&mut fields)?),
            "pong" => BridgeEvent::Pong {
                token: fields.next_str()?.to_owned(),
            },
            "exiting" => BridgeEvent::Exiting,
            _ => {
                return Err(PipeError::Parse {
                    expected: "a bridge event",
                    line: line.to_owned(),
                })
            }
        })
    }

    pub fn to_line(&self) -> String {
        match self {
            BridgeEvent::GuiShown => GUI_IS_SHOWN.to_owned(),
            BridgeEvent::GuiHidden => GUI_IS_HIDDEN.to_owned(),
            BridgeEvent::Control { index, value } => format!("control {index} {value}"),
            BridgeEvent::Note(note) => format!("note {}", note.to_args()),
            BridgeEvent::Pong { token } => format!("pong {token}"),
            BridgeEvent::Exiting => "exiting".to_owned(),
        }
    }
}

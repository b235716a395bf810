/// Line-oriented wire protocol shared by the client loops and the echo server
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for one inbound frame, delimiter included
pub const MAX_FRAME_LEN: usize = 4096;

pub const DELIMITER: char = '\n';

/// A decoded user intent coming off the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEvent {
    MoveUp,
    MoveDown,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallPosition {
    pub x: i16,
    pub y: i16,
    pub dx: i16,
    pub dy: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub left: u32,
    pub right: u32,
}

/// Discriminant of a [`Packet`], also its keyword on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    MoveUp,
    MoveDown,
    Quit,
    Ball,
    Score,
}

impl PacketKind {
    pub const ALL: [PacketKind; 5] = [
        PacketKind::MoveUp,
        PacketKind::MoveDown,
        PacketKind::Quit,
        PacketKind::Ball,
        PacketKind::Score,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            PacketKind::MoveUp => "up",
            PacketKind::MoveDown => "down",
            PacketKind::Quit => "quit",
            PacketKind::Ball => "ball",
            PacketKind::Score => "score",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.keyword() == word)
    }

    /// Command kinds travel bare; state updates carry a JSON payload
    pub fn has_payload(self) -> bool {
        matches!(self, PacketKind::Ball | PacketKind::Score)
    }
}

/// Wire envelope exchanged with the peer
///
/// New state-update kinds slot in as new variants with a payload; the framing
/// (`<kind>[ <json>]\n`) stays the same for all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    MoveUp,
    MoveDown,
    Quit,
    Ball(BallPosition),
    Score(Score),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("frame exceeds {max} bytes")]
    TooLong { max: usize },

    #[error("frame contains an embedded newline")]
    EmbeddedNewline,

    #[error("unknown packet kind '{0}'")]
    UnknownKind(String),

    #[error("packet '{0}' requires a payload")]
    MissingPayload(&'static str),

    #[error("packet '{0}' does not take a payload")]
    UnexpectedPayload(&'static str),

    #[error("invalid payload for '{kind}': {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl From<CommandEvent> for Packet {
    fn from(event: CommandEvent) -> Self {
        match event {
            CommandEvent::MoveUp => Packet::MoveUp,
            CommandEvent::MoveDown => Packet::MoveDown,
            CommandEvent::Quit => Packet::Quit,
        }
    }
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::MoveUp => PacketKind::MoveUp,
            Packet::MoveDown => PacketKind::MoveDown,
            Packet::Quit => PacketKind::Quit,
            Packet::Ball(_) => PacketKind::Ball,
            Packet::Score(_) => PacketKind::Score,
        }
    }

    /// Serialize into exactly one newline-terminated frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let kind = self.kind();
        let payload = match self {
            Packet::Ball(ball) => Some(to_payload(kind, ball)?),
            Packet::Score(score) => Some(to_payload(kind, score)?),
            Packet::MoveUp | Packet::MoveDown | Packet::Quit => None,
        };

        let mut frame = String::from(kind.keyword());
        if let Some(payload) = payload {
            frame.push(' ');
            frame.push_str(&payload);
        }
        if frame.contains(DELIMITER) {
            return Err(ProtocolError::EmbeddedNewline);
        }
        frame.push(DELIMITER);
        Ok(frame)
    }

    /// Parse one frame. The trailing delimiter (and a `\r` before it) is optional.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        if line.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::TooLong { max: MAX_FRAME_LEN });
        }
        let line = line.strip_suffix(DELIMITER).unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.contains(DELIMITER) {
            return Err(ProtocolError::EmbeddedNewline);
        }
        if line.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (word, payload) = match line.split_once(' ') {
            Some((word, rest)) => (word, Some(rest.trim())),
            None => (line, None),
        };
        let kind = PacketKind::from_keyword(word.trim())
            .ok_or_else(|| ProtocolError::UnknownKind(word.trim().to_string()))?;
        let payload = payload.filter(|p| !p.is_empty());

        match (kind.has_payload(), payload) {
            (false, Some(_)) => Err(ProtocolError::UnexpectedPayload(kind.keyword())),
            (true, None) => Err(ProtocolError::MissingPayload(kind.keyword())),
            (false, None) => Ok(match kind {
                PacketKind::MoveUp => Packet::MoveUp,
                PacketKind::MoveDown => Packet::MoveDown,
                _ => Packet::Quit,
            }),
            (true, Some(json)) => match kind {
                PacketKind::Ball => Ok(Packet::Ball(from_payload(kind, json)?)),
                _ => Ok(Packet::Score(from_payload(kind, json)?)),
            },
        }
    }
}

/// Byte stream for a sequence of commands, one frame per event in order
pub fn encode_all<I>(events: I) -> Result<String, ProtocolError>
where
    I: IntoIterator<Item = CommandEvent>,
{
    let mut out = String::new();
    for event in events {
        out.push_str(&Packet::from(event).encode()?);
    }
    Ok(out)
}

fn to_payload<T: Serialize>(kind: PacketKind, value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(|source| ProtocolError::Payload {
        kind: kind.keyword(),
        source,
    })
}

fn from_payload<T: for<'de> Deserialize<'de>>(
    kind: PacketKind,
    json: &str,
) -> Result<T, ProtocolError> {
    serde_json::from_str(json).map_err(|source| ProtocolError::Payload {
        kind: kind.keyword(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_encode_as_bare_lines() {
        assert_eq!(Packet::MoveUp.encode().unwrap(), "up\n");
        assert_eq!(Packet::MoveDown.encode().unwrap(), "down\n");
        assert_eq!(Packet::Quit.encode().unwrap(), "quit\n");
    }

    #[test]
    fn command_stream_is_concatenation_of_frames() {
        let events = [
            CommandEvent::MoveUp,
            CommandEvent::MoveUp,
            CommandEvent::MoveDown,
            CommandEvent::MoveUp,
        ];
        let stream = encode_all(events).unwrap();
        assert_eq!(stream, "up\nup\ndown\nup\n");
        assert_eq!(stream.matches('\n').count(), events.len());
        assert!(stream.lines().all(|line| !line.is_empty()));
    }

    #[test]
    fn state_updates_carry_json_on_one_line() {
        let packet = Packet::Ball(BallPosition { x: 30, y: 10, dx: 1, dy: -1 });
        let frame = packet.encode().unwrap();
        assert!(frame.starts_with("ball {"));
        assert!(frame.ends_with('\n'));
        assert_eq!(frame.matches('\n').count(), 1);
        assert_eq!(Packet::decode(&frame).unwrap(), packet);

        let score = Packet::decode("score {\"left\":3,\"right\":7}\r\n").unwrap();
        assert_eq!(score, Packet::Score(Score { left: 3, right: 7 }));
        assert_eq!(score.kind(), PacketKind::Score);
    }

    #[test]
    fn decode_accepts_lines_without_delimiter() {
        assert_eq!(Packet::decode("down").unwrap(), Packet::MoveDown);
        assert_eq!(Packet::decode("up\n").unwrap(), Packet::MoveUp);
    }

    #[test]
    fn decode_rejects_bad_frames() {
        assert!(matches!(Packet::decode("\n"), Err(ProtocolError::Empty)));
        assert!(matches!(
            Packet::decode("left\n"),
            Err(ProtocolError::UnknownKind(kind)) if kind == "left"
        ));
        assert!(matches!(
            Packet::decode("up 12\n"),
            Err(ProtocolError::UnexpectedPayload("up"))
        ));
        assert!(matches!(
            Packet::decode("ball\n"),
            Err(ProtocolError::MissingPayload("ball"))
        ));
        assert!(matches!(
            Packet::decode("score {\"left\":1}\n"),
            Err(ProtocolError::Payload { kind: "score", .. })
        ));
        assert!(matches!(
            Packet::decode("up\ndown\n"),
            Err(ProtocolError::EmbeddedNewline)
        ));
        let long = "x".repeat(MAX_FRAME_LEN + 1);
        assert!(matches!(Packet::decode(&long), Err(ProtocolError::TooLong { .. })));
        let padded = format!("up{}\n", " ".repeat(MAX_FRAME_LEN - 3));
        assert_eq!(Packet::decode(&padded).unwrap(), Packet::MoveUp);
    }

    #[test]
    fn keywords_are_unique() {
        for kind in PacketKind::ALL {
            assert_eq!(PacketKind::from_keyword(kind.keyword()), Some(kind));
        }
    }
}

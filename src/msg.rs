use crate::config::{ReadRequest, WriteRequest};
use chrono::Local;

/// Transport error text is capped before it reaches the log.
pub const ERROR_TEXT_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

pub enum Status {
    Connection(ConnectionState),
    SlaveRunning(bool),
}

pub enum Command {
    Connect,
    Disconnect,
    Read(ReadRequest),
    Write(WriteRequest),
    SetPollInterval(Option<u64>),
}

#[derive(Clone, Debug)]
pub struct Message {
    pub timestamp: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub enum LogMsg {
    Err(Message),
    Ok(Message),
    Info(Message),
}

impl LogMsg {
    fn stamp(msg: String) -> Message {
        Message {
            timestamp: format!("{}", Local::now().format("[ %d:%m:%Y | %H:%M:%S ]")),
            message: msg,
        }
    }

    pub fn info(msg: &str) -> LogMsg {
        Self::Info(Self::stamp(msg.to_owned()))
    }

    pub fn ok(msg: &str) -> LogMsg {
        Self::Ok(Self::stamp(msg.to_owned()))
    }

    pub fn err(msg: &str) -> LogMsg {
        Self::Err(Self::stamp(truncate(msg)))
    }

    pub fn render(&self) -> String {
        match self {
            Self::Err(v) => format!("{} ERR  {}", v.timestamp, v.message),
            Self::Ok(v) => format!("{} OK   {}", v.timestamp, v.message),
            Self::Info(v) => format!("{} INFO {}", v.timestamp, v.message),
        }
    }
}

pub fn truncate(msg: &str) -> String {
    if msg.chars().count() > ERROR_TEXT_LIMIT {
        let cut: String = msg.chars().take(ERROR_TEXT_LIMIT - 3).collect();
        format!("{}...", cut)
    } else {
        msg.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_truncate() {
        let short = "short error";
        assert_eq!(truncate(short), short);

        let long = "x".repeat(500);
        let capped = truncate(&long);
        assert_eq!(capped.chars().count(), ERROR_TEXT_LIMIT);
        assert!(capped.ends_with("..."));
    }

    #[test]
    fn ut_err_is_capped() {
        let long = "y".repeat(500);
        match LogMsg::err(&long) {
            LogMsg::Err(msg) => assert_eq!(msg.message.chars().count(), ERROR_TEXT_LIMIT),
            _ => panic!("wrong variant"),
        }
    }
}

pub mod del;
pub mod discard;
pub mod echo;
pub mod exec;
pub mod executable;
pub mod get;
pub mod hello;
pub mod multi;
pub mod ping;
pub mod set;
pub mod unwatch;
pub mod watch;

use bytes::Bytes;
use std::{str, vec};
use strum_macros::{AsRefStr, VariantNames};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::mutation_log;
use crate::store::{LockError, StoreError, Value};

use del::Del;
use discard::Discard;
use echo::Echo;
use exec::Exec;
use get::Get;
use hello::Hello;
use multi::Multi;
use ping::Ping;
use set::Set;
use unwatch::Unwatch;
use watch::Watch;

/// A parsed client request. Commands are plain values: they hold their arguments and
/// nothing about the connection they came from.
#[derive(Debug, PartialEq, Clone, AsRefStr, VariantNames)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Command {
    Del(Del),
    Echo(Echo),
    Get(Get),
    Hello(Hello),
    Ping(Ping),
    Set(Set),

    Discard(Discard),
    Exec(Exec),
    Multi(Multi),
    Unwatch(Unwatch),
    Watch(Watch),
}

impl Command {
    pub fn name(&self) -> &str {
        self.as_ref()
    }

    /// The store-facing side of the command, `None` for transaction control.
    pub fn executable(&self) -> Option<&dyn Executable> {
        match self {
            Command::Del(cmd) => Some(cmd),
            Command::Echo(cmd) => Some(cmd),
            Command::Get(cmd) => Some(cmd),
            Command::Hello(cmd) => Some(cmd),
            Command::Ping(cmd) => Some(cmd),
            Command::Set(cmd) => Some(cmd),

            Command::Discard(_)
            | Command::Exec(_)
            | Command::Multi(_)
            | Command::Unwatch(_)
            | Command::Watch(_) => None,
        }
    }

    /// Transaction control commands run right away, even inside MULTI.
    pub fn is_tx(&self) -> bool {
        self.executable().is_none()
    }

    pub fn is_modifying(&self) -> bool {
        self.executable().is_some_and(|cmd| cmd.is_modifying())
    }

    /// Renders the command back into the array a client would send for it.
    pub fn wire_args(&self) -> Frame {
        let mut args = vec![Frame::from(self.name())];

        match self {
            Command::Del(cmd) => args.extend(cmd.args()),
            Command::Echo(cmd) => args.extend(cmd.args()),
            Command::Get(cmd) => args.extend(cmd.args()),
            Command::Hello(cmd) => args.extend(cmd.args()),
            Command::Ping(cmd) => args.extend(cmd.args()),
            Command::Set(cmd) => args.extend(cmd.args()),
            Command::Watch(cmd) => args.extend(cmd.args()),
            Command::Discard(_) | Command::Exec(_) | Command::Multi(_) | Command::Unwatch(_) => {}
        }

        Frame::Array(args)
    }
}

impl TryFrom<Frame> for Command {
    type Error = CommandParserError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the Redis server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                })
            }
        };

        let parser = &mut CommandParser {
            parts: frames.into_iter(),
            position: 0,
        };

        let command_name = match parser.parse_command_name() {
            Err(CommandParserError::EndOfStream) => return Err(CommandParserError::EmptyCommand),
            result => result?,
        };

        let command = match &command_name[..] {
            "del" => Del::try_from(&mut *parser).map(Command::Del),
            "discard" => Discard::try_from(&mut *parser).map(Command::Discard),
            "echo" => Echo::try_from(&mut *parser).map(Command::Echo),
            "exec" => Exec::try_from(&mut *parser).map(Command::Exec),
            "get" => Get::try_from(&mut *parser).map(Command::Get),
            "hello" => Hello::try_from(&mut *parser).map(Command::Hello),
            "multi" => Multi::try_from(&mut *parser).map(Command::Multi),
            "ping" => Ping::try_from(&mut *parser).map(Command::Ping),
            "set" => Set::try_from(&mut *parser).map(Command::Set),
            "unwatch" => Unwatch::try_from(&mut *parser).map(Command::Unwatch),
            "watch" => Watch::try_from(&mut *parser).map(Command::Watch),
            _ => {
                return Err(CommandParserError::UnknownCommand {
                    command: command_name,
                })
            }
        };

        let command = command.and_then(|command| parser.finish().map(|()| command));

        // Running out of arguments, or having some left over, is an arity problem.
        command.map_err(|err| match err {
            CommandParserError::EndOfStream | CommandParserError::TrailingArguments => {
                CommandParserError::WrongArity {
                    command: command_name,
                }
            }
            err => err,
        })
    }
}

pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
    // Index of the last argument handed out, the command name being 0.
    position: usize,
}

impl CommandParser {
    fn next_frame(&mut self) -> Result<Frame, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;
        self.position += 1;
        Ok(frame)
    }

    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match command_name {
            Frame::Simple(s) => Ok(s.to_lowercase()),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_lowercase())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    /// Index of the argument returned by the last `next_*` call.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next_string(&mut self) -> Result<String, CommandParserError> {
        match self.next_frame()? {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    /// Like `next_string`, but running out of arguments is not an error.
    pub fn next_option(&mut self) -> Result<Option<String>, CommandParserError> {
        match self.next_string() {
            Ok(option) => Ok(Some(option)),
            Err(CommandParserError::EndOfStream) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Numeric arguments may arrive as integer frames or as decimal strings.
    pub fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        match self.next_frame()? {
            Frame::Integer(i) => Ok(i),
            Frame::Simple(string) => {
                string
                    .parse::<i64>()
                    .map_err(|_| CommandParserError::NotAnInteger {
                        position: self.position,
                    })
            }
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map_err(CommandParserError::InvalidUTF8String)?
                .parse::<i64>()
                .map_err(|_| CommandParserError::NotAnInteger {
                    position: self.position,
                }),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "integer".to_string(),
                actual: frame,
            }),
        }
    }

    pub fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        match self.next_frame()? {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    /// A value to store: raw bytes, or an integer when the client sent one natively.
    pub fn next_value(&mut self) -> Result<Value, CommandParserError> {
        match self.next_frame()? {
            Frame::Integer(i) => Ok(Value::Integer(i)),
            Frame::Simple(s) => Ok(Value::Bytes(Bytes::from(s))),
            Frame::Bulk(bytes) => Ok(Value::Bytes(bytes)),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple string, bulk string or integer".to_string(),
                actual: frame,
            }),
        }
    }

    /// Collects the remaining arguments as keys, at least one is required.
    pub fn remaining_strings(&mut self) -> Result<Vec<String>, CommandParserError> {
        let mut keys = vec![self.next_string()?];

        while let Some(key) = self.next_option()? {
            keys.push(key);
        }

        Ok(keys)
    }

    fn finish(&mut self) -> Result<(), CommandParserError> {
        match self.parts.next() {
            None => Ok(()),
            Some(_) => Err(CommandParserError::TrailingArguments),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("ERR Protocol error: invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("ERR Protocol error: empty command")]
    EmptyCommand,
    #[error("ERR unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArity { command: String },
    #[error("ERR syntax error at argument {position} of '{command}': {argument}")]
    InvalidCommandArgument {
        command: String,
        argument: String,
        position: usize,
    },
    #[error("ERR invalid option: {0}")]
    InvalidOption(String),
    #[error("ERR invalid expire time in '{command}' command")]
    InvalidExpireTime { command: String },
    #[error("ERR value is not an integer or out of range at argument {position}")]
    NotAnInteger { position: usize },
    #[error("NOPROTO unsupported protocol version {0}")]
    UnsupportedProtocol(i64),
    #[error("ERR Protocol error: invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("ERR Protocol error: attempting to extract a value failed due to the frame being fully consumed")]
    EndOfStream,
    #[error("ERR Protocol error: unexpected trailing arguments")]
    TrailingArguments,
}

/// Failure of a parsed command. Apart from `Lock` and `MutationLog` these are part of the
/// conversation with the client and leave the connection usable.
#[derive(Debug, ThisError, PartialEq, Clone)]
pub enum CommandError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("ERR key already exists")]
    KeyExists,
    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,
    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,
    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,
    #[error("ERR {0} can not be executed against the store")]
    NotExecutable(String),
    /// A queued command failed. `partial` holds the replies of the ones that ran before it.
    #[error("{source}")]
    ExecAborted {
        partial: Vec<Frame>,
        source: Box<CommandError>,
    },
    #[error("ERR {0}")]
    Lock(#[from] LockError),
    #[error("ERR {0}")]
    MutationLog(#[from] mutation_log::Error),
}

impl CommandError {
    /// Resource failures end the connection, everything else is just a reply.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommandError::Lock(_) | CommandError::MutationLog(_))
    }

    pub fn to_frame(&self) -> Frame {
        match self {
            CommandError::ExecAborted { partial, source } => {
                let mut frames = partial.clone();
                frames.push(source.to_frame());
                Frame::Array(frames)
            }
            err => Frame::Error(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::VariantNames;

    fn request(parts: &[&str]) -> Frame {
        Frame::Array(parts.iter().map(|part| Frame::from(*part)).collect())
    }

    #[test]
    fn parse_get_command_with_simple_string() {
        let get_frame = Frame::Array(vec![
            Frame::Simple(String::from("GET")),
            Frame::Simple(String::from("foo")),
        ]);

        let get_command = Command::try_from(get_frame).unwrap();

        assert_eq!(
            get_command,
            Command::Get(Get {
                keys: vec![String::from("foo")]
            })
        );
    }

    #[test]
    fn parse_get_command_with_bulk_string() {
        let get_frame = Frame::Array(vec![
            Frame::Simple(String::from("GET")),
            Frame::Bulk(Bytes::from("foo-from-bytes")),
        ]);

        let get_command = Command::try_from(get_frame).unwrap();

        assert_eq!(
            get_command,
            Command::Get(Get {
                keys: vec![String::from("foo-from-bytes")]
            })
        );
    }

    #[test]
    fn command_names_are_case_insensitive() {
        for name in ["ping", "PING", "PiNg"] {
            assert_eq!(
                Command::try_from(request(&[name])).unwrap(),
                Command::Ping(Ping { payload: None })
            );
        }
    }

    #[test]
    fn every_command_has_a_parser() {
        for name in Command::VARIANTS {
            let err = Command::try_from(request(&[*name])).err();
            assert!(
                !matches!(err, Some(CommandParserError::UnknownCommand { .. })),
                "{} is not dispatched",
                name
            );
        }
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            Command::try_from(request(&["FLUSHALL"])),
            Err(CommandParserError::UnknownCommand {
                command: "flushall".to_string()
            })
        );
    }

    #[test]
    fn not_an_array() {
        assert!(matches!(
            Command::try_from(Frame::from("PING")),
            Err(CommandParserError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn empty_array() {
        assert_eq!(
            Command::try_from(Frame::Array(vec![])),
            Err(CommandParserError::EmptyCommand)
        );
    }

    #[test]
    fn missing_and_extra_arguments() {
        assert_eq!(
            Command::try_from(request(&["SET", "key"])),
            Err(CommandParserError::WrongArity {
                command: "set".to_string()
            })
        );
        assert_eq!(
            Command::try_from(request(&["MULTI", "now"])),
            Err(CommandParserError::WrongArity {
                command: "multi".to_string()
            })
        );
    }

    #[test]
    fn flags() {
        let set = Command::try_from(request(&["SET", "a", "1"])).unwrap();
        assert!(set.is_modifying());
        assert!(!set.is_tx());

        let get = Command::try_from(request(&["GET", "a"])).unwrap();
        assert!(!get.is_modifying());
        assert!(!get.is_tx());

        for name in ["MULTI", "EXEC", "DISCARD", "UNWATCH"] {
            let cmd = Command::try_from(request(&[name])).unwrap();
            assert!(cmd.is_tx());
            assert!(!cmd.is_modifying());
            assert_eq!(cmd.name(), name);
        }
    }

    #[test]
    fn wire_args_round_trip() {
        for parts in [
            vec!["SET", "key", "value", "NX", "GET"],
            vec!["DEL", "a", "b"],
            vec!["GET", "a"],
            vec!["WATCH", "a", "b"],
            vec!["EXEC"],
        ] {
            let cmd = Command::try_from(request(&parts)).unwrap();
            assert_eq!(cmd.wire_args(), request(&parts));
            assert_eq!(Command::try_from(cmd.wire_args()).unwrap(), cmd);
        }
    }

    #[test]
    fn exec_aborted_reply_carries_partial_results() {
        let err = CommandError::ExecAborted {
            partial: vec![Frame::ok()],
            source: Box::new(CommandError::KeyExists),
        };

        assert_eq!(
            err.to_frame(),
            Frame::Array(vec![
                Frame::ok(),
                Frame::Error("ERR key already exists".to_string())
            ])
        );
        assert!(!err.is_fatal());
        assert!(CommandError::Lock(LockError::Timeout).is_fatal());
    }
}

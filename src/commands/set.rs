use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::{StoreError, StoreGuard, Value};

/// Set key to hold the string value. If key already holds a value, it is overwritten.
///
/// Ref: <https://redis.io/docs/latest/commands/set>
#[derive(Debug, PartialEq, Clone)]
pub struct Set {
    pub key: String,
    pub value: Value,
    pub options: SetOptions,
}

/// Precondition on the key's existence.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Existence {
    /// NX: only set the key if it does not already exist.
    NotExists,
    /// XX: only set the key if it already exists.
    Exists,
}

/// Options of a SET. Every setter validates against what was already set, so conflicting
/// options are rejected while parsing, before the store is touched.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct SetOptions {
    existence: Option<Existence>,
    get_previous: bool,
    keep_ttl: bool,
    expires_at: Option<SystemTime>,
}

impl SetOptions {
    pub fn existence(mut self, existence: Existence) -> Result<Self, CommandParserError> {
        if self.existence.is_some() {
            return Err(CommandParserError::InvalidOption(
                "existence condition provided more than once".to_string(),
            ));
        }

        self.existence = Some(existence);
        Ok(self)
    }

    /// GET: reply with the value the key held before, or null.
    pub fn get_previous(mut self) -> Self {
        self.get_previous = true;
        self
    }

    /// KEEPTTL: keep the expiration of an existing key.
    pub fn keep_ttl(mut self) -> Self {
        self.keep_ttl = true;
        self
    }

    pub fn expires_at(mut self, at: SystemTime) -> Result<Self, CommandParserError> {
        if self.expires_at.is_some() {
            return Err(CommandParserError::InvalidOption(
                "expiration provided more than once".to_string(),
            ));
        }

        self.expires_at = Some(at);
        Ok(self)
    }

    pub fn expires_in(self, ttl: Duration) -> Result<Self, CommandParserError> {
        let at = SystemTime::now().checked_add(ttl).ok_or_else(invalid_expire_time)?;
        self.expires_at(at)
    }
}

impl Set {
    pub(crate) fn args(&self) -> Vec<Frame> {
        let mut args = vec![
            Frame::Bulk(Bytes::copy_from_slice(self.key.as_bytes())),
            self.value.to_frame(),
        ];

        match self.options.existence {
            Some(Existence::NotExists) => args.push(Frame::from("NX")),
            Some(Existence::Exists) => args.push(Frame::from("XX")),
            None => {}
        }
        if self.options.get_previous {
            args.push(Frame::from("GET"));
        }
        if self.options.keep_ttl {
            args.push(Frame::from("KEEPTTL"));
        }
        // Always absolute, replaying the record later must not move the deadline.
        if let Some(at) = self.options.expires_at {
            let millis = at
                .duration_since(UNIX_EPOCH)
                .map_or(0, |since| since.as_millis());
            args.push(Frame::from("PXAT"));
            args.push(Frame::Bulk(Bytes::from(millis.to_string())));
        }

        args
    }
}

impl Executable for Set {
    fn exec(&self, store: &mut StoreGuard) -> Result<Frame, CommandError> {
        let previous = match store.get(&self.key) {
            Ok(entry) => Some(entry),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        match (self.options.existence, &previous) {
            (Some(Existence::NotExists), Some(_)) => return Err(CommandError::KeyExists),
            (Some(Existence::Exists), None) => return Err(StoreError::KeyNotFound.into()),
            _ => {}
        }

        let expires_at = match &previous {
            Some(previous) if self.options.keep_ttl => previous.expires_at(),
            _ => self.options.expires_at,
        };

        store.set(self.key.clone(), self.value.clone(), expires_at);

        if self.options.get_previous {
            Ok(previous.map_or(Frame::Null, |entry| entry.value().to_frame()))
        } else {
            Ok(Frame::ok())
        }
    }

    fn is_modifying(&self) -> bool {
        true
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let value = parser.next_value()?;

        let mut options = SetOptions::default();

        while let Some(option) = parser.next_option()? {
            options = match option.to_uppercase().as_str() {
                "NX" => options.existence(Existence::NotExists)?,
                "XX" => options.existence(Existence::Exists)?,
                "GET" => options.get_previous(),
                "KEEPTTL" => options.keep_ttl(),
                "EX" => options.expires_in(Duration::from_secs(next_expire(parser)?))?,
                "PX" => options.expires_in(Duration::from_millis(next_expire(parser)?))?,
                "EXAT" => {
                    let at = UNIX_EPOCH
                        .checked_add(Duration::from_secs(next_expire(parser)?))
                        .ok_or_else(invalid_expire_time)?;
                    options.expires_at(at)?
                }
                "PXAT" => {
                    let at = UNIX_EPOCH
                        .checked_add(Duration::from_millis(next_expire(parser)?))
                        .ok_or_else(invalid_expire_time)?;
                    options.expires_at(at)?
                }

                // Unexpected option
                _ => {
                    return Err(CommandParserError::InvalidCommandArgument {
                        command: "set".to_string(),
                        argument: option,
                        position: parser.position(),
                    })
                }
            };
        }

        Ok(Self {
            key,
            value,
            options,
        })
    }
}

fn next_expire(parser: &mut CommandParser) -> Result<u64, CommandParserError> {
    match parser.next_integer()? {
        value if value > 0 => Ok(value as u64),
        _ => Err(invalid_expire_time()),
    }
}

fn invalid_expire_time() -> CommandParserError {
    CommandParserError::InvalidExpireTime {
        command: "set".to_string(),
    }
}

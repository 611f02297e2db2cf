use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::StoreGuard;

/// Get the value of key. If the key does not exist null is returned. With several keys the
/// values come back as an array, a null standing in for every missing key.
///
/// Ref: <https://redis.io/docs/latest/commands/get>
#[derive(Debug, PartialEq, Clone)]
pub struct Get {
    pub keys: Vec<String>,
}

impl Get {
    pub(crate) fn args(&self) -> Vec<Frame> {
        self.keys
            .iter()
            .map(|key| Frame::Bulk(Bytes::copy_from_slice(key.as_bytes())))
            .collect()
    }
}

impl Executable for Get {
    fn exec(&self, store: &mut StoreGuard) -> Result<Frame, CommandError> {
        let mut values = Vec::with_capacity(self.keys.len());

        for key in &self.keys {
            match store.get(key) {
                Ok(entry) => values.push(entry.value().to_frame()),
                Err(err) if err.is_not_found() => values.push(Frame::Null),
                Err(err) => {
                    return Err(CommandError::ExecAborted {
                        partial: values,
                        source: Box::new(err.into()),
                    })
                }
            }
        }

        match <[Frame; 1]>::try_from(values) {
            Ok([value]) => Ok(value),
            Err(values) => Ok(Frame::Array(values)),
        }
    }
}

impl TryFrom<&mut CommandParser> for Get {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let keys = parser.remaining_strings()?;

        Ok(Self { keys })
    }
}

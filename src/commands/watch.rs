use bytes::Bytes;

use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;

/// Marks the given keys to be watched for conditional execution of a transaction.
///
/// Ref: <https://redis.io/docs/latest/commands/watch>
#[derive(Debug, PartialEq, Clone)]
pub struct Watch {
    pub keys: Vec<String>,
}

impl Watch {
    pub async fn exec(&self, session: &mut Session) -> Result<Frame, CommandError> {
        session.watch(&self.keys).await
    }

    pub(crate) fn args(&self) -> Vec<Frame> {
        self.keys
            .iter()
            .map(|key| Frame::Bulk(Bytes::copy_from_slice(key.as_bytes())))
            .collect()
    }
}

impl TryFrom<&mut CommandParser> for Watch {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let keys = parser.remaining_strings()?;

        Ok(Self { keys })
    }
}

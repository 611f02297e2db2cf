use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;

/// Flushes all previously queued commands in a transaction and forgets the watched keys.
///
/// Ref: <https://redis.io/docs/latest/commands/discard>
#[derive(Debug, PartialEq, Clone)]
pub struct Discard;

impl Discard {
    pub fn exec(&self, session: &mut Session) -> Result<Frame, CommandError> {
        session.discard_tx()
    }
}

impl TryFrom<&mut CommandParser> for Discard {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}

use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;

/// Flushes all the previously watched keys for a transaction.
///
/// Ref: <https://redis.io/docs/latest/commands/unwatch>
#[derive(Debug, PartialEq, Clone)]
pub struct Unwatch;

impl Unwatch {
    pub fn exec(&self, session: &mut Session) -> Result<Frame, CommandError> {
        session.unwatch();
        Ok(Frame::ok())
    }
}

impl TryFrom<&mut CommandParser> for Unwatch {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}

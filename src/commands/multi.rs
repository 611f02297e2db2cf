use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;

/// Marks the start of a transaction block. Subsequent commands are queued for atomic
/// execution using EXEC.
///
/// Ref: <https://redis.io/docs/latest/commands/multi>
#[derive(Debug, PartialEq, Clone)]
pub struct Multi;

impl Multi {
    pub fn exec(&self, session: &mut Session) -> Result<Frame, CommandError> {
        session.start_tx()
    }
}

impl TryFrom<&mut CommandParser> for Multi {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}

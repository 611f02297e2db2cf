use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;

/// Executes all previously queued commands in a transaction and restores the connection
/// state to normal. Replies with a null array when a watched key changed in the meantime.
///
/// Ref: <https://redis.io/docs/latest/commands/exec>
#[derive(Debug, PartialEq, Clone)]
pub struct Exec;

impl Exec {
    pub async fn exec(&self, session: &mut Session) -> Result<Frame, CommandError> {
        session.exec_tx().await
    }
}

impl TryFrom<&mut CommandParser> for Exec {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use bytes::Bytes;

    #[test]
    fn parse() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("exec"))]);

        assert_eq!(Command::try_from(frame).unwrap(), Command::Exec(Exec));
    }

    #[test]
    fn takes_no_arguments() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("EXEC")),
            Frame::Bulk(Bytes::from("now")),
        ]);

        assert!(matches!(
            Command::try_from(frame),
            Err(CommandParserError::WrongArity { .. })
        ));
    }
}

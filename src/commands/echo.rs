use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::StoreGuard;

/// Returns message.
///
/// Ref: <https://redis.io/docs/latest/commands/echo>
#[derive(Debug, PartialEq, Clone)]
pub struct Echo {
    pub message: Bytes,
}

impl Echo {
    pub(crate) fn args(&self) -> Vec<Frame> {
        vec![Frame::Bulk(self.message.clone())]
    }
}

impl Executable for Echo {
    fn exec(&self, _store: &mut StoreGuard) -> Result<Frame, CommandError> {
        Ok(Frame::Bulk(self.message.clone()))
    }
}

impl TryFrom<&mut CommandParser> for Echo {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let message = parser.next_bytes()?;

        Ok(Self { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::store::Store;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn echoes_binary_message() {
        let message = Bytes::from_static(b"a\r\nb\x00c");
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("ECHO")),
            Frame::Bulk(message.clone()),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(
            cmd,
            Command::Echo(Echo {
                message: message.clone()
            })
        );

        let store = Store::new();
        let mut store = store.lock(&CancellationToken::new()).await.unwrap();
        let res = cmd.executable().unwrap().exec(&mut store).unwrap();

        assert_eq!(res, Frame::Bulk(message));
    }

    #[test]
    fn missing_message() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("ECHO"))]);

        assert_eq!(
            Command::try_from(frame),
            Err(CommandParserError::WrongArity {
                command: "echo".to_string()
            })
        );
    }
}

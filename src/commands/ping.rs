use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::StoreGuard;

/// Returns PONG if no argument is provided, otherwise return a copy of the argument as a bulk.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq, Clone)]
pub struct Ping {
    pub payload: Option<Bytes>,
}

impl Ping {
    pub(crate) fn args(&self) -> Vec<Frame> {
        self.payload.iter().cloned().map(Frame::Bulk).collect()
    }
}

impl Executable for Ping {
    fn exec(&self, _store: &mut StoreGuard) -> Result<Frame, CommandError> {
        let res = match &self.payload {
            Some(payload) => Frame::Bulk(payload.clone()),
            None => Frame::Simple("PONG".to_string()),
        };

        Ok(res)
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let payload = match parser.next_bytes() {
            Ok(payload) => Some(payload),
            Err(CommandParserError::EndOfStream) => None,
            Err(e) => return Err(e),
        };

        Ok(Self { payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::store::Store;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn without_payload() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("PING"))]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(cmd, Command::Ping(Ping { payload: None }));

        let store = Store::new();
        let mut store = store.lock(&CancellationToken::new()).await.unwrap();
        let res = cmd.executable().unwrap().exec(&mut store).unwrap();

        assert_eq!(res, Frame::Simple("PONG".to_string()));
    }

    #[tokio::test]
    async fn with_payload() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("PING")),
            Frame::Bulk(Bytes::from("hello")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(
            cmd,
            Command::Ping(Ping {
                payload: Some(Bytes::from("hello"))
            })
        );

        let store = Store::new();
        let mut store = store.lock(&CancellationToken::new()).await.unwrap();
        let res = cmd.executable().unwrap().exec(&mut store).unwrap();

        assert_eq!(res, Frame::Bulk(Bytes::from("hello")));
    }

    #[test]
    fn too_many_arguments() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("PING")),
            Frame::Bulk(Bytes::from("a")),
            Frame::Bulk(Bytes::from("b")),
        ]);

        assert!(matches!(
            Command::try_from(frame),
            Err(CommandParserError::WrongArity { .. })
        ));
    }
}

use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::StoreGuard;

const SUPPORTED_PROTOCOL: i64 = 2;

/// Switch to a different protocol, replying with a description of the server. Only RESP2 is
/// spoken, so the only accepted version is 2.
///
/// Ref: <https://redis.io/docs/latest/commands/hello>
#[derive(Debug, PartialEq, Clone)]
pub struct Hello {
    pub protover: Option<i64>,
}

impl Hello {
    pub(crate) fn args(&self) -> Vec<Frame> {
        self.protover
            .iter()
            .map(|protover| Frame::Bulk(Bytes::from(protover.to_string())))
            .collect()
    }
}

impl Executable for Hello {
    fn exec(&self, _store: &mut StoreGuard) -> Result<Frame, CommandError> {
        let field = |name: &'static str| Frame::Bulk(Bytes::from_static(name.as_bytes()));

        Ok(Frame::Array(vec![
            field("server"),
            field("kvred"),
            field("version"),
            field(env!("CARGO_PKG_VERSION")),
            field("proto"),
            Frame::Integer(SUPPORTED_PROTOCOL),
            field("mode"),
            field("standalone"),
            field("role"),
            field("master"),
            field("modules"),
            Frame::Array(vec![]),
        ]))
    }
}

impl TryFrom<&mut CommandParser> for Hello {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let protover = match parser.next_integer() {
            Ok(protover) => Some(protover),
            Err(CommandParserError::EndOfStream) => None,
            Err(err) => return Err(err),
        };

        if let Some(protover) = protover {
            if protover != SUPPORTED_PROTOCOL {
                return Err(CommandParserError::UnsupportedProtocol(protover));
            }
        }

        Ok(Self { protover })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::store::Store;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn describes_the_server() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("HELLO")),
            Frame::Bulk(Bytes::from("2")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(cmd, Command::Hello(Hello { protover: Some(2) }));

        let store = Store::new();
        let mut store = store.lock(&CancellationToken::new()).await.unwrap();
        let res = cmd.executable().unwrap().exec(&mut store).unwrap();

        let Frame::Array(fields) = &res else {
            panic!("expected an array, got {:?}", res);
        };
        assert_eq!(fields.len(), 12);
        assert_eq!(fields[1], Frame::Bulk(Bytes::from("kvred")));
        assert_eq!(fields[5], Frame::Integer(2));
        assert_eq!(fields[11], Frame::Array(vec![]));
    }

    #[test]
    fn without_protover() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("hello"))]);

        assert_eq!(
            Command::try_from(frame).unwrap(),
            Command::Hello(Hello { protover: None })
        );
    }

    #[test]
    fn rejects_resp3() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("HELLO")),
            Frame::Integer(3),
        ]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(err, CommandParserError::UnsupportedProtocol(3));
        assert!(err.to_string().starts_with("NOPROTO"));
    }
}

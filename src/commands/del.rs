use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::StoreGuard;

/// Removes the specified keys. A key is ignored if it does not exist.
///
/// Ref: <https://redis.io/docs/latest/commands/del>
#[derive(Debug, PartialEq, Clone)]
pub struct Del {
    pub keys: Vec<String>,
}

impl Del {
    pub(crate) fn args(&self) -> Vec<Frame> {
        self.keys
            .iter()
            .map(|key| Frame::Bulk(Bytes::copy_from_slice(key.as_bytes())))
            .collect()
    }
}

impl Executable for Del {
    fn exec(&self, store: &mut StoreGuard) -> Result<Frame, CommandError> {
        let mut count = 0;

        for key in &self.keys {
            match store.del(key) {
                Ok(_) => count += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Frame::Integer(count))
    }

    fn is_modifying(&self) -> bool {
        true
    }
}

impl TryFrom<&mut CommandParser> for Del {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let keys = parser.remaining_strings()?;

        Ok(Self { keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::store::{Store, Value};
    use std::time::{Duration, SystemTime};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn multiple_keys() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("DEL")),
            Frame::Bulk(Bytes::from("foo")),
            Frame::Bulk(Bytes::from("bar")),
            Frame::Bulk(Bytes::from("baz")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(
            cmd,
            Command::Del(Del {
                keys: vec![
                    String::from("foo"),
                    String::from("bar"),
                    String::from("baz")
                ]
            })
        );

        let store = Store::new();
        let mut store = store.lock(&CancellationToken::new()).await.unwrap();

        store.set(String::from("foo"), Value::from("1"), None);
        store.set(String::from("bar"), Value::from("2"), None);
        // Already expired, it is not counted.
        store.set(
            String::from("baz"),
            Value::from("3"),
            Some(SystemTime::now() - Duration::from_secs(1)),
        );

        let res = cmd.executable().unwrap().exec(&mut store).unwrap();

        assert_eq!(res, Frame::Integer(2));
        assert!(store.is_empty());
    }

    #[test]
    fn zero_keys() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("DEL"))]);

        assert!(matches!(
            Command::try_from(frame),
            Err(CommandParserError::WrongArity { .. })
        ));
    }
}

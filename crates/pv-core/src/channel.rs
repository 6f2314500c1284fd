//! Command/query transport to the instrument.
//!
//! [`CommandChannel`] abstracts the request/reply link (serial line, GPIB
//! bridge, simulator) so the sweep protocol can be written once. A channel is
//! exclusively owned by whoever drives the instrument, hence `&mut self`.

use crate::error::{CommunicationError, CommunicationErrorKind};
use async_trait::async_trait;

/// Request/reply transport to an instrument that speaks ASCII commands.
#[async_trait]
pub trait CommandChannel: Send {
    /// Send a command that produces no reply.
    async fn write(&mut self, command: &str) -> Result<(), CommunicationError>;

    /// Send a query and return its (trimmed) reply line.
    async fn query(&mut self, command: &str) -> Result<String, CommunicationError>;

    /// Send a query whose reply is a delimited list of numbers.
    async fn query_values(&mut self, command: &str) -> Result<Vec<f64>, CommunicationError> {
        let reply = self.query(command).await?;
        parse_values(&reply).map_err(|message| {
            CommunicationError::new(CommunicationErrorKind::Protocol, command, message)
        })
    }
}

#[async_trait]
impl<C: CommandChannel + ?Sized> CommandChannel for Box<C> {
    async fn write(&mut self, command: &str) -> Result<(), CommunicationError> {
        (**self).write(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String, CommunicationError> {
        (**self).query(command).await
    }

    async fn query_values(&mut self, command: &str) -> Result<Vec<f64>, CommunicationError> {
        (**self).query_values(command).await
    }
}

/// Parse a numeric reply such as `"+1.0E-01,-2.5E-03,..."`.
///
/// Commas, semicolons and whitespace all separate values; empty fields are
/// skipped. An empty reply yields an empty vector.
pub fn parse_values(reply: &str) -> Result<Vec<f64>, String> {
    reply
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|field| !field.is_empty())
        .map(|field| {
            field
                .parse::<f64>()
                .map_err(|_| format!("non-numeric field '{}' in reply", field))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Canned {
        replies: VecDeque<String>,
    }

    #[async_trait]
    impl CommandChannel for Canned {
        async fn write(&mut self, _command: &str) -> Result<(), CommunicationError> {
            Ok(())
        }

        async fn query(&mut self, command: &str) -> Result<String, CommunicationError> {
            self.replies.pop_front().ok_or_else(|| {
                CommunicationError::new(CommunicationErrorKind::Closed, command, "no reply")
            })
        }
    }

    #[test]
    fn parses_scientific_comma_list() {
        let values = parse_values("+1.000000E-01,-2.5E-03, 3\r").unwrap();
        assert_eq!(values, vec![0.1, -0.0025, 3.0]);
    }

    #[test]
    fn parses_mixed_delimiters_and_empty_reply() {
        assert_eq!(parse_values("1;2 3,,4").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(parse_values("").unwrap().is_empty());
    }

    #[test]
    fn rejects_garbage_field() {
        let err = parse_values("1.0,OVFL,2.0").unwrap_err();
        assert!(err.contains("OVFL"));
    }

    #[tokio::test]
    async fn query_values_maps_parse_failure_to_protocol_error() {
        let mut channel = Canned {
            replies: VecDeque::from(vec!["1,2".to_string(), "1,x".to_string()]),
        };
        assert_eq!(channel.query_values(":TRAC:DATA?").await.unwrap(), vec![1.0, 2.0]);

        let err = channel.query_values(":TRAC:DATA?").await.unwrap_err();
        assert_eq!(err.kind, CommunicationErrorKind::Protocol);
        assert_eq!(err.command, ":TRAC:DATA?");
    }

    #[tokio::test]
    async fn boxed_channel_forwards() {
        let mut channel: Box<dyn CommandChannel> = Box::new(Canned {
            replies: VecDeque::from(vec!["KEITHLEY".to_string()]),
        });
        assert_eq!(channel.query("*IDN?").await.unwrap(), "KEITHLEY");
        assert!(channel.write("*RST").await.is_ok());
    }
}

//! Boundary to whatever actually talks to the router.
//!
//! The crate never opens a session itself. An [`Executor`] sends one command
//! line and returns the device's output; [`Device`] layers reading,
//! decoding and submitting encoded commands on top of it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::future::Future;
//!
//! use rtxconf::device::{Device, Executor};
//! use rtxconf::dialect::rtx;
//! use rtxconf::feature::StaticRoutes;
//!
//! struct Console;
//!
//! impl Executor for Console {
//!     fn execute(&mut self, command: &str) -> impl Future<Output = rtxconf::Result<String>> + Send {
//!         let command = command.to_string();
//!         async move { Ok(format!("# sent {}", command)) }
//!     }
//! }
//!
//! # async fn example() -> rtxconf::Result<()> {
//! let mut device = Device::new(Console, rtx::dialect());
//! let routes = device.read::<StaticRoutes>().await?;
//! println!("{} routes", routes.records.len());
//! # Ok(())
//! # }
//! ```

mod response;

pub use response::Response;

use std::future::Future;
use std::time::Instant;

use log::{debug, warn};

use crate::dialect::Dialect;
use crate::error::{ExecutorError, Result};
use crate::feature::{Decoded, Feature, Intent};
use crate::parser::{ParsedConfig, Parser};

/// Sends command lines to a router.
pub trait Executor: Send {
    /// Execute one command and return its output.
    fn execute(&mut self, command: &str) -> impl Future<Output = Result<String>> + Send;
}

/// An executor paired with the dialect of the device behind it.
pub struct Device<E> {
    executor: E,
    dialect: Dialect,
    parser: Parser,
}

impl<E: Executor> Device<E> {
    /// Create a device helper.
    pub fn new(executor: E, dialect: Dialect) -> Self {
        let parser = Parser::new(&dialect);
        Self {
            executor,
            dialect,
            parser,
        }
    }

    /// The dialect in use.
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Mutable access to the executor.
    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Return the executor.
    pub fn into_inner(self) -> E {
        self.executor
    }

    /// Run a show command and parse its output.
    pub async fn read_config(&mut self, show_command: &str) -> Result<ParsedConfig> {
        let output = self.executor.execute(show_command).await?;
        let parsed = self.parser.parse(&output);
        for ambiguity in &parsed.ambiguities {
            debug!(
                "'{}': line {} joined without a wrap rule",
                show_command, ambiguity.line_number
            );
        }
        Ok(parsed)
    }

    /// Read and decode every record of one feature.
    pub async fn read<F: Feature>(&mut self) -> Result<Decoded<F::Record>> {
        let parsed = self.read_config(F::show_command()).await?;
        let decoded = parsed.decode::<F>();
        debug!(
            "{}: {} records, {} rejected lines",
            F::NAME,
            decoded.records.len(),
            decoded.errors.len()
        );
        Ok(decoded)
    }

    /// Execute one command and classify its output.
    ///
    /// A delete (`no ...`) whose output only reports the entry as missing
    /// counts as success.
    pub async fn send_command(&mut self, command: &str) -> Result<Response> {
        let start = Instant::now();
        let output = self.executor.execute(command).await?;
        let elapsed = start.elapsed();

        if let Some(pattern) = self.dialect.detect_failure(&output) {
            if command.starts_with("no ") && self.dialect.is_not_found(&output) {
                debug!("'{}': already absent", command);
                return Ok(Response::new(command, output, elapsed));
            }
            let pattern = pattern.to_string();
            return Ok(Response::failed(command, output, elapsed, pattern));
        }
        Ok(Response::new(command, output, elapsed))
    }

    /// Execute commands in order, stopping at the first rejected one.
    pub async fn submit<S: AsRef<str>>(&mut self, commands: &[S]) -> Result<Vec<Response>> {
        let mut responses = Vec::with_capacity(commands.len());
        for command in commands {
            let response = self.send_command(command.as_ref()).await?;
            if let Some(message) = &response.failure_message {
                warn!("'{}' failed: {}", response.command, response.result.trim());
                return Err(ExecutorError::CommandFailed {
                    command: response.command.clone(),
                    message: message.clone(),
                }
                .into());
            }
            responses.push(response);
        }
        Ok(responses)
    }

    /// Encode a record and submit the commands.
    pub async fn apply<F: Feature>(
        &mut self,
        record: &F::Record,
        intent: Intent,
    ) -> Result<Vec<Response>> {
        let commands = F::encode(record, intent)?;
        self.submit(&commands).await
    }
}

impl<E> std::fmt::Debug for Device<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("dialect", &self.dialect.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::dialect::rtx;
    use crate::error::Error;
    use crate::feature::{FilterAction, IpFilter, IpFilters, Tunnels};

    #[derive(Default)]
    struct Scripted {
        outputs: HashMap<String, String>,
        sent: Vec<String>,
        broken: bool,
    }

    impl Scripted {
        fn with_output(mut self, command: &str, output: &str) -> Self {
            self.outputs.insert(command.to_string(), output.to_string());
            self
        }
    }

    impl Executor for Scripted {
        fn execute(&mut self, command: &str) -> impl Future<Output = Result<String>> + Send {
            self.sent.push(command.to_string());
            let result = if self.broken {
                Err(ExecutorError::Transport("connection reset".into()).into())
            } else {
                Ok(self.outputs.get(command).cloned().unwrap_or_default())
            };
            async move { result }
        }
    }

    const TUNNELS: &str = "\
tunnel select 1
 tunnel encapsulation ipsec
 ipsec tunnel 101
 tunnel enable 1
tunnel select 2
 tunnel encapsulation l2tpv3
 tunnel select none
";

    #[tokio::test]
    async fn test_read_decodes_show_output() {
        let executor = Scripted::default().with_output("show config", TUNNELS);
        let mut device = Device::new(executor, rtx::dialect());

        let decoded = device.read::<Tunnels>().await.unwrap();
        assert!(decoded.is_clean());
        assert_eq!(decoded.records.len(), 2);
        assert!(decoded.records[0].enabled);
        assert_eq!(device.into_inner().sent, vec!["show config"]);
    }

    #[tokio::test]
    async fn test_read_uses_feature_show_command() {
        let executor = Scripted::default().with_output(
            "show config | grep filter",
            "ip filter 1 pass * * tcp\nip lan1 secure filter in 1\n",
        );
        let mut device = Device::new(executor, rtx::dialect());
        let decoded = device.read::<IpFilters>().await.unwrap();
        assert_eq!(decoded.records.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_stops_at_first_failure() {
        let executor = Scripted::default()
            .with_output("ip filter 2 pass * * udp", "Error: Invalid parameter");
        let mut device = Device::new(executor, rtx::dialect());

        let commands = ["ip filter 1 pass * * tcp", "ip filter 2 pass * * udp", "ip filter 3 pass * * icmp"];
        let err = device.submit(&commands).await.unwrap_err();
        match err {
            Error::Executor(ExecutorError::CommandFailed { command, message }) => {
                assert_eq!(command, "ip filter 2 pass * * udp");
                assert_eq!(message, "Error:");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(device.executor_mut().sent.len(), 2);
    }

    #[test]
    fn test_delete_of_missing_entry_succeeds() {
        let executor = Scripted::default()
            .with_output("no ip filter 9", "Error: Filter not found")
            .with_output("ip filter 9 pass * * tcp", "Error: Filter not found");
        let mut device = Device::new(executor, rtx::dialect());

        tokio_test::block_on(async {
            let responses = device.submit(&["no ip filter 9"]).await.unwrap();
            assert!(responses[0].is_success());

            let response = device.send_command("ip filter 9 pass * * tcp").await.unwrap();
            assert!(!response.is_success());
        });
    }

    #[tokio::test]
    async fn test_apply_validates_before_sending() {
        let mut device = Device::new(Scripted::default(), rtx::dialect());
        let invalid = IpFilter::new(0, FilterAction::Pass, "*", "*", "tcp");
        let err = device.apply::<IpFilters>(&invalid, Intent::Set).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(device.executor_mut().sent.is_empty());

        let valid = IpFilter::new(5, FilterAction::Reject, "10.0.0.0/8", "*", "*");
        let responses = device.apply::<IpFilters>(&valid, Intent::Delete).await.unwrap();
        assert_eq!(responses[0].command, "no ip filter 5");
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let executor = Scripted {
            broken: true,
            ..Scripted::default()
        };
        let mut device = Device::new(executor, rtx::dialect());
        let err = device.read::<Tunnels>().await.unwrap_err();
        assert!(matches!(err, Error::Executor(ExecutorError::Transport(_))));
    }
}

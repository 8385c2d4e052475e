//! SCSI commands and responses for reading a tape drive's maximum temperature, as described in:
//! - SCSI Primary Commands – 2 (SPC-2):
//!   <https://www.rockbox.org/wiki/pub/Main/DataSheets/spc2r20.pdf>
//!   `SEND DIAGNOSTIC` is described in 7.23, `RECEIVE DIAGNOSTIC RESULTS` in 7.17.
//! - The temperature page (0x93) itself is vendor specific. Its layout is described in
//!   [`response`].

pub mod command;
pub mod command_descriptor;
pub mod response;

use std::io;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, ensure};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::sg::{HexBytes, TransferOutcome, TransferRequest, Transport};
use command::CommandBlock;
use response::Temperature;

/// Where a reading is at. Each step may only run from the state before it, and any
/// failure is terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    DiagnosticSent,
    DiagnosticReceived,
    TemperatureDecoded,
    Reported,
    Failed,
}

/// Reads the maximum temperature from a drive over any [`Transport`].
///
/// The steps are exposed individually, [`TemperatureReader::read_max_temperature`] runs
/// them all in order.
pub struct TemperatureReader<'a, T> {
    transport: &'a mut T,
    config: &'a Config,
    state: RunState,
}

impl<'a, T: Transport> TemperatureReader<'a, T> {
    pub fn new(transport: &'a mut T, config: &'a Config) -> Self {
        Self {
            transport,
            config,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Sends, receives and decodes the temperature page.
    pub async fn read_max_temperature(&mut self) -> Result<Temperature> {
        self.send_diagnostic().await?;
        let page = self.receive_diagnostic().await?;
        self.decode(&page)
    }

    /// Issues `SEND DIAGNOSTIC` with the parameter list selecting the temperature page.
    pub async fn send_diagnostic(&mut self) -> Result<()> {
        self.expect_state(RunState::Idle)?;
        let command = command::send_diagnostic();
        let payload = command::send_diagnostic_parameters();
        debug!(
            "sending {} command with cmd={} and dataOut={}",
            command.name,
            HexBytes(&command.cdb),
            HexBytes(&payload)
        );
        let result = self
            .issue(&command, TransferRequest::to_device(&command, &payload))
            .await;
        self.advance(result, RunState::DiagnosticSent)
            .wrap_err("failed to send SEND DIAGNOSTIC command")?;
        Ok(())
    }

    /// Issues `RECEIVE DIAGNOSTIC RESULTS` and returns the raw page.
    pub async fn receive_diagnostic(&mut self) -> Result<Vec<u8>> {
        self.expect_state(RunState::DiagnosticSent)?;
        let command = command::receive_diagnostic_results();
        debug!(
            "sending {} command with cmd={}",
            command.name,
            HexBytes(&command.cdb)
        );
        let result = self
            .issue(&command, TransferRequest::from_device(&command))
            .await;
        let outcome = self
            .advance(result, RunState::DiagnosticReceived)
            .wrap_err("failed to send RECEIVE DIAGNOSTIC RESULTS command")?;
        debug!("raw diagnostic data (hex): {}", hex::encode(&outcome.data_in));
        Ok(outcome.data_in)
    }

    /// Decodes the temperature out of a page returned by [`Self::receive_diagnostic`].
    pub fn decode(&mut self, page: &[u8]) -> Result<Temperature> {
        self.expect_state(RunState::DiagnosticReceived)?;
        let result = response::extract_temperature_field(page).and_then(|digits| {
            debug!("max temperature (hex): {digits}");
            let raw = response::decode_temperature(digits.as_str())?;
            let temperature = response::to_celsius(raw);
            debug!("max temperature (decimal): {}", temperature.raw());
            debug!("max temperature (°C): {}", temperature.celsius());
            Ok(temperature)
        });
        let temperature = self
            .advance(result, RunState::TemperatureDecoded)
            .wrap_err("error extracting temperature")?;
        Ok(temperature)
    }

    /// Formats the result line for a decoded temperature.
    pub fn report(&mut self, temperature: &Temperature) -> Result<String> {
        self.expect_state(RunState::TemperatureDecoded)?;
        self.state = RunState::Reported;
        Ok(format!("Max temperature since cartridge loaded: {temperature}°C"))
    }

    /// Runs a command and fails if the host reported a fault or the device didn't report
    /// GOOD status.
    async fn issue(
        &mut self,
        command: &CommandBlock,
        request: TransferRequest,
    ) -> Result<TransferOutcome, Error> {
        debug!(
            "executing SG_IO with cmd={}, dataLen={}",
            HexBytes(&request.cdb),
            request.data_transfer_len()
        );
        let outcome = self.transport.execute(request).await?;
        debug!(
            status = outcome.status,
            masked_status = outcome.masked_status,
            host_status = outcome.host_status,
            driver_status = outcome.driver_status,
            residual = outcome.residual,
            duration = ?outcome.duration,
            "{} completed",
            command.name
        );
        if outcome.is_host_fault() {
            return Err(Error::Transport(io::Error::other(format!(
                "{} failed in the host: host_status={:#06x}, driver_status={:#06x}",
                command.name, outcome.host_status, outcome.driver_status
            ))));
        }
        if !outcome.is_good() {
            if self.config.verbose {
                warn!("{} failed with status: {}", command.name, outcome.status);
                if outcome.sense.is_empty() {
                    warn!("no sense data returned");
                } else {
                    warn!("sense data: {}", hex::encode(outcome.sense.as_bytes()));
                }
            }
            return Err(Error::CommandStatus {
                command: command.name,
                status: outcome.status,
                sense: outcome.sense,
            });
        }
        info!("{} command sent successfully", command.name);
        Ok(outcome)
    }

    fn expect_state(&self, expected: RunState) -> Result<()> {
        ensure!(
            self.state == expected,
            "reading is in state {:?}, expected {:?}",
            self.state,
            expected
        );
        Ok(())
    }

    fn advance<V>(&mut self, result: Result<V, Error>, next: RunState) -> Result<V, Error> {
        self.state = if result.is_ok() {
            next
        } else {
            RunState::Failed
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::sg::{DataDirection, DataPhase, SenseBuffer};

    /// Replays canned outcomes and records every request it's given.
    #[derive(Default)]
    struct ScriptedTransport {
        outcomes: VecDeque<Result<TransferOutcome, Error>>,
        requests: Vec<TransferRequest>,
    }

    impl ScriptedTransport {
        fn with(outcomes: impl IntoIterator<Item = Result<TransferOutcome, Error>>) -> Self {
            Self {
                outcomes: outcomes.into_iter().collect(),
                requests: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn execute(&mut self, request: TransferRequest) -> Result<TransferOutcome, Error> {
            self.requests.push(request);
            self.outcomes
                .pop_front()
                .expect("transport called more times than scripted")
        }
    }

    fn outcome(status: u8, data_in: Vec<u8>) -> Result<TransferOutcome, Error> {
        Ok(TransferOutcome {
            status,
            masked_status: status >> 1,
            host_status: 0,
            driver_status: 0,
            residual: 0,
            duration: Duration::from_millis(5),
            sense: SenseBuffer::empty(),
            data_in,
        })
    }

    /// A 68 byte page with the temperature field set to `"00080401"`, i.e. 2113 raw.
    fn temperature_page() -> Vec<u8> {
        let mut page = vec![0_u8; 68];
        page[0] = 0x93;
        page[22..30].copy_from_slice(b"00080401");
        page
    }

    fn config() -> Config {
        Config {
            device: PathBuf::from("/dev/sg-test"),
            verbose: true,
        }
    }

    /// Collects formatted tracing output so tests can look at what was logged.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Fails SEND DIAGNOSTIC with CHECK CONDITION and returns what was logged.
    async fn logs_for_rejected_send(verbose: bool) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut sense = [0; 32];
        sense[..3].copy_from_slice(&[0x70, 0x00, 0x05]);
        let mut rejected = outcome(0x02, Vec::new()).unwrap();
        rejected.driver_status = 0x08;
        rejected.sense = SenseBuffer::new(sense, 18);
        let mut transport = ScriptedTransport::with([Ok(rejected)]);
        let config = Config { verbose, ..config() };
        let mut reader = TemperatureReader::new(&mut transport, &config);

        let err = reader.send_diagnostic().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CommandStatus { status: 0x02, .. })
        ));
        assert_eq!(reader.state(), RunState::Failed);
        logs.contents()
    }

    #[tokio::test]
    async fn reads_temperature_end_to_end() {
        let mut transport =
            ScriptedTransport::with([outcome(0, Vec::new()), outcome(0, temperature_page())]);
        let config = config();
        let mut reader = TemperatureReader::new(&mut transport, &config);

        let temperature = reader.read_max_temperature().await.unwrap();
        assert_eq!(temperature.raw(), 2113);
        assert_eq!(reader.state(), RunState::TemperatureDecoded);
        assert_eq!(
            reader.report(&temperature).unwrap(),
            "Max temperature since cartridge loaded: 8.3°C"
        );
        assert_eq!(reader.state(), RunState::Reported);

        let [send, receive] = transport.requests.as_slice() else {
            panic!("expected exactly two commands");
        };
        assert_eq!(send.cdb, command::send_diagnostic().cdb);
        assert_eq!(send.direction(), DataDirection::ToDevice);
        assert_eq!(
            send.data,
            DataPhase::Out(command::send_diagnostic_parameters().to_vec())
        );
        assert_eq!(send.timeout, Duration::from_secs(60));
        assert_eq!(receive.cdb, command::receive_diagnostic_results().cdb);
        assert_eq!(receive.data, DataPhase::In(68));
        assert_eq!(receive.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn bad_status_aborts_before_receive() {
        let mut sense = [0; 32];
        sense[..3].copy_from_slice(&[0x70, 0x00, 0x05]);
        let mut rejected = outcome(0x02, Vec::new()).unwrap();
        rejected.sense = SenseBuffer::new(sense, 18);
        let mut transport = ScriptedTransport::with([Ok(rejected)]);
        let config = config();
        let mut reader = TemperatureReader::new(&mut transport, &config);

        let err = reader.read_max_temperature().await.unwrap_err();
        assert_eq!(reader.state(), RunState::Failed);
        match err.downcast_ref::<Error>() {
            Some(Error::CommandStatus {
                command,
                status,
                sense,
            }) => {
                assert_eq!(*command, "SEND DIAGNOSTIC");
                assert_eq!(*status, 0x02);
                assert!(!sense.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // nothing after the failed command was issued, and nothing can be reported
        assert_eq!(transport.requests.len(), 1);
    }

    #[tokio::test]
    async fn host_timeout_aborts_before_receive() {
        // DID_TIME_OUT, the device never got to report a status
        let mut timed_out = outcome(0, Vec::new()).unwrap();
        timed_out.host_status = 0x03;
        let mut transport = ScriptedTransport::with([Ok(timed_out)]);
        let config = config();
        let mut reader = TemperatureReader::new(&mut transport, &config);

        let err = reader.read_max_temperature().await.unwrap_err();
        assert_eq!(reader.state(), RunState::Failed);
        match err.downcast_ref::<Error>() {
            Some(Error::Transport(source)) => {
                assert!(source.to_string().contains("host_status=0x0003"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests.len(), 1);
    }

    #[tokio::test]
    async fn host_fault_on_receive_is_not_decoded() {
        let mut lost = outcome(0, vec![0; 68]).unwrap();
        // DRIVER_TIMEOUT
        lost.driver_status = 0x06;
        let mut transport = ScriptedTransport::with([outcome(0, Vec::new()), Ok(lost)]);
        let config = config();
        let mut reader = TemperatureReader::new(&mut transport, &config);

        let err = reader.read_max_temperature().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Transport(_))
        ));
        assert!(err.to_string().contains("RECEIVE DIAGNOSTIC RESULTS"));
        assert_eq!(reader.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn sense_dump_only_when_verbose() {
        let verbose = logs_for_rejected_send(true).await;
        assert!(verbose.contains("sense data: 700005"));

        let quiet = logs_for_rejected_send(false).await;
        assert!(!quiet.contains("sense data"));
        assert!(!quiet.contains("failed with status"));
    }

    #[tokio::test]
    async fn bad_status_on_receive_is_fatal() {
        let mut transport =
            ScriptedTransport::with([outcome(0, Vec::new()), outcome(0x02, temperature_page())]);
        let config = config();
        let mut reader = TemperatureReader::new(&mut transport, &config);

        let err = reader.read_max_temperature().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CommandStatus {
                command: "RECEIVE DIAGNOSTIC RESULTS",
                ..
            })
        ));
        assert_eq!(reader.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let mut transport = ScriptedTransport::with([Err(Error::Transport(io::Error::from(
            io::ErrorKind::PermissionDenied,
        )))]);
        let config = config();
        let mut reader = TemperatureReader::new(&mut transport, &config);

        let err = reader.send_diagnostic().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Transport(_))
        ));
        assert!(err.to_string().contains("SEND DIAGNOSTIC"));
        assert_eq!(reader.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn short_page_fails_to_decode() {
        let mut transport =
            ScriptedTransport::with([outcome(0, Vec::new()), outcome(0, vec![b'0'; 29])]);
        let config = config();
        let mut reader = TemperatureReader::new(&mut transport, &config);

        let err = reader.read_max_temperature().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::PageTooShort { len: 29, .. })
        ));
        assert_eq!(reader.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn steps_must_run_in_order() {
        let mut transport = ScriptedTransport::default();
        let config = config();
        let mut reader = TemperatureReader::new(&mut transport, &config);

        assert!(reader.receive_diagnostic().await.is_err());
        assert!(reader.decode(&temperature_page()).is_err());
        assert!(reader.report(&response::to_celsius(0)).is_err());
        // out of order calls don't reach the transport or change the state
        assert_eq!(reader.state(), RunState::Idle);
        assert!(transport.requests.is_empty());
    }
}

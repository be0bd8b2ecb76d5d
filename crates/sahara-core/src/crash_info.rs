//! Crash-info collection (command-mode flow).
//!
//! Four fixed reads, each a CMD_EXECUTE / CMD_EXECUTE_RESP round trip
//! followed by a CMD_EXECUTE_DATA streaming read, appended in order to
//! a single labeled text report.

use tracing::{debug, warn};

use crate::events::{SaharaEvent, SaharaObserver};
use crate::protocol::constants::*;
use crate::protocol::packet;
use crate::session::{RetryCause, RetryState, SaharaSession, SessionError};
use crate::sink::OutputSink;
use crate::transport::Transport;

/// Name of the report artifact.
pub const CRASH_REPORT_NAME: &str = "crashinfo.txt";

/// The four fixed reads, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashField {
    BootVersion,
    ProductModel,
    SerialNumber,
    CrashInfo,
}

impl CrashField {
    pub const ALL: [CrashField; 4] = [
        CrashField::BootVersion,
        CrashField::ProductModel,
        CrashField::SerialNumber,
        CrashField::CrashInfo,
    ];

    pub fn exec_code(self) -> u32 {
        match self {
            CrashField::BootVersion => EXEC_BOOT_VERSION_READ,
            CrashField::ProductModel => EXEC_PRODUCT_MODEL_READ,
            CrashField::SerialNumber => EXEC_SERIAL_NUM_READ,
            CrashField::CrashInfo => EXEC_CRASH_INFO_READ,
        }
    }

    /// Report label for this field.
    pub fn label(self) -> &'static str {
        match self {
            CrashField::BootVersion => "SBL Version",
            CrashField::ProductModel => "Product Model",
            CrashField::SerialNumber => "Serial Num",
            CrashField::CrashInfo => "Crash Info",
        }
    }
}

/// The collected crash information.
#[derive(Debug, Clone, Default)]
pub struct CrashReport {
    pub boot_version: String,
    pub product_model: String,
    pub serial_number: String,
    pub crash_info: String,
}

impl CrashReport {
    pub fn field(&self, field: CrashField) -> &str {
        match field {
            CrashField::BootVersion => &self.boot_version,
            CrashField::ProductModel => &self.product_model,
            CrashField::SerialNumber => &self.serial_number,
            CrashField::CrashInfo => &self.crash_info,
        }
    }

    fn set(&mut self, field: CrashField, value: String) {
        match field {
            CrashField::BootVersion => self.boot_version = value,
            CrashField::ProductModel => self.product_model = value,
            CrashField::SerialNumber => self.serial_number = value,
            CrashField::CrashInfo => self.crash_info = value,
        }
    }
}

impl<T: Transport, O: SaharaObserver> SaharaSession<T, O> {
    /// Fetch all four fields and write the report. The report file is
    /// opened once and synced after the final line.
    pub(crate) fn collect_crash_info<S: OutputSink>(
        &mut self,
        sink: &mut S,
    ) -> Result<CrashReport, SessionError> {
        let mut file = sink.create(CRASH_REPORT_NAME)?;
        file.append(b"Crash Summary: \n")?;

        let mut report = CrashReport::default();
        for field in CrashField::ALL {
            let payload = self.crash_exec_read(field)?;
            let value = String::from_utf8_lossy(&payload).into_owned();

            file.append(field.label().as_bytes())?;
            file.append(b": ")?;
            file.append(&payload)?;
            file.append(b"\n")?;

            self.observer.on_event(&SaharaEvent::CrashField {
                label: field.label().to_string(),
                value: value.clone(),
            });
            report.set(field, value);
        }
        file.append(b"End Basic Crash Information\n")?;
        file.sync()?;

        Ok(report)
    }

    /// One field: execute the read command, then stream its payload.
    fn crash_exec_read(&mut self, field: CrashField) -> Result<Vec<u8>, SessionError> {
        // CMD_EXECUTE until the target acknowledges with a well-formed
        // response.
        let mut retry = RetryState::new("crash info execute");
        let (data_code, data_len) = loop {
            self.send_packet(&packet::command_execute(field.exec_code()))?;
            match self.recv_framed() {
                Ok(pkt) if pkt.command == CMD_EXECUTE_RESP => {
                    match (pkt.u32_at(8), pkt.u32_at(12)) {
                        (Some(code), Some(len)) => break (code, len),
                        _ => {
                            warn!(len = pkt.bytes.len(), "truncated execute response");
                            self.retry_tick(&mut retry, RetryCause::Other)?;
                        }
                    }
                }
                Ok(pkt) => {
                    warn!(
                        field = field.label(),
                        command = %format!("{:#04x}", pkt.command),
                        "unexpected execute response"
                    );
                    self.retry_tick(&mut retry, RetryCause::Other)?;
                }
                Err(e) => self.retry_recv_failure(&mut retry, e)?,
            }
        };
        debug!(
            field = field.label(),
            code = %format!("{data_code:#06x}"),
            len = data_len,
            "execute acknowledged"
        );

        // CMD_EXECUTE_DATA, then exactly `data_len` raw bytes.
        let mut retry = RetryState::new("crash info data");
        loop {
            self.send_packet(&packet::command_execute_data(data_code))?;
            match self.recv_raw(data_len as usize) {
                Ok(payload) => return Ok(payload),
                Err(e) => self.retry_recv_failure(&mut retry, e)?,
            }
        }
    }
}

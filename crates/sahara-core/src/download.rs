//! Region download (memory-debug flow).
//!
//! Fetches the announced memory table, then streams each region to its
//! output artifact in chunks of at most `MAX_MEM_READ_LEN`, tracking
//! the read cursor and surfacing target-side truncation per region.

use tracing::{debug, info, warn};

use crate::events::{SaharaEvent, SaharaObserver};
use crate::memory::MemoryTable;
use crate::protocol::constants::MAX_MEM_READ_LEN;
use crate::protocol::packet::{self, ProtocolError};
use crate::session::{RetryCause, RetryState, SaharaSession, SessionError};
use crate::sink::{OutputSink, SinkFile};
use crate::transport::Transport;

/// Outcome of one region's download.
#[derive(Debug, Clone)]
pub struct RegionDump {
    /// Artifact name, as announced in the region table.
    pub name: String,
    pub bytes_written: u64,
    /// False when the target truncated the transfer early.
    pub complete: bool,
}

/// Outcome of the whole memory-debug flow.
#[derive(Debug, Clone, Default)]
pub struct DumpResult {
    pub regions: Vec<RegionDump>,
}

impl DumpResult {
    pub fn is_complete(&self) -> bool {
        self.regions.iter().all(|r| r.complete)
    }

    pub fn total_bytes(&self) -> u64 {
        self.regions.iter().map(|r| r.bytes_written).sum()
    }
}

impl<T: Transport, O: SaharaObserver> SaharaSession<T, O> {
    /// Read the region table at the announced address and parse it.
    pub(crate) fn fetch_memory_table(
        &mut self,
        addr: u32,
        len: u32,
    ) -> Result<MemoryTable, SessionError> {
        let mut retry = RetryState::new("memory table read");
        loop {
            self.send_packet(&packet::memory_read(addr, len))?;
            match self.recv_raw(len as usize) {
                Ok(raw) => {
                    let table = MemoryTable::parse(&raw);
                    if table.is_empty() {
                        return Err(SessionError::InvalidMemoryTable);
                    }
                    info!(
                        regions = table.len(),
                        total_bytes = table.total_len(),
                        "memory table parsed"
                    );
                    return Ok(table);
                }
                // The target aborting a table read gets the same bounded
                // re-request as any other bad receipt.
                Err(SessionError::Protocol(ProtocolError::InvalidEndOfImage)) => {
                    warn!("target aborted memory table read, retrying");
                    self.retry_tick(&mut retry, RetryCause::Other)?;
                }
                Err(e) => self.retry_recv_failure(&mut retry, e)?,
            }
        }
    }

    /// Download every region in table order. Truncated regions keep
    /// their partial artifact and are reported with `complete = false`;
    /// later regions are still processed.
    pub(crate) fn download_regions<S: OutputSink>(
        &mut self,
        sink: &mut S,
        table: &mut MemoryTable,
    ) -> Result<DumpResult, SessionError> {
        let total = table.len();
        let mut result = DumpResult::default();

        for index in 0..total {
            let (addr, len, filename) = {
                let region = table.get(index).ok_or(SessionError::InvalidMemoryTable)?;
                (region.addr, region.len, region.filename.clone())
            };

            if addr == 0 || len == 0 {
                // Declared but empty region: the artifact still exists.
                debug!(region = index + 1, file = %filename, "region has no data");
                drop(sink.create(&filename)?);
                result.regions.push(RegionDump {
                    name: filename,
                    bytes_written: 0,
                    complete: true,
                });
                continue;
            }

            self.observer.on_event(&SaharaEvent::RegionStarted {
                index,
                total,
                filename: filename.clone(),
                len,
            });
            let dump = self.download_region(sink, table, index, total, filename)?;
            self.observer.on_event(&SaharaEvent::RegionFinished {
                index,
                bytes_written: dump.bytes_written,
                complete: dump.complete,
            });
            result.regions.push(dump);
        }

        info!(
            regions = result.regions.len(),
            bytes = result.total_bytes(),
            complete = result.is_complete(),
            "end of memory regions"
        );
        Ok(result)
    }

    fn download_region<S: OutputSink>(
        &mut self,
        sink: &mut S,
        table: &mut MemoryTable,
        index: usize,
        total: usize,
        filename: String,
    ) -> Result<RegionDump, SessionError> {
        let mut file: Option<Box<dyn SinkFile>> = None;
        let mut bytes_written: u64 = 0;
        let mut prev_percent: u32 = 0;

        loop {
            let (next_read, remaining) = {
                let region = table.get(index).ok_or(SessionError::InvalidMemoryTable)?;
                (region.next_read, region.remaining())
            };
            if remaining == 0 {
                break;
            }
            let chunk_len = remaining.min(MAX_MEM_READ_LEN as u32);

            let mut retry = RetryState::new("memory region read");
            let data = loop {
                self.send_packet(&packet::memory_read(next_read, chunk_len))?;
                match self.recv_raw(chunk_len as usize) {
                    Ok(data) => break data,
                    Err(SessionError::Protocol(ProtocolError::InvalidEndOfImage)) => {
                        // Target truncated this region; keep what we have
                        // and move on to the next one.
                        warn!(
                            region = index + 1,
                            total,
                            bytes = bytes_written,
                            "transfer ended early by target"
                        );
                        if let Some(mut f) = file.take() {
                            f.sync()?;
                        }
                        return Ok(RegionDump {
                            name: filename,
                            bytes_written,
                            complete: false,
                        });
                    }
                    Err(e) => self.retry_recv_failure(&mut retry, e)?,
                }
            };

            if file.is_none() {
                file = Some(sink.create(&filename)?);
            }
            if let Some(f) = file.as_mut() {
                f.append(&data)?;
            }
            bytes_written += data.len() as u64;

            let percent = {
                let region = table.get_mut(index).ok_or(SessionError::InvalidMemoryTable)?;
                region.next_read += data.len() as u32;
                region.percent_complete()
            };
            if percent >= prev_percent + 10 || percent == 100 {
                self.observer.on_event(&SaharaEvent::RegionProgress {
                    index,
                    total,
                    percent,
                });
                prev_percent = percent;
            }
        }

        if let Some(mut f) = file.take() {
            f.sync()?;
        }
        Ok(RegionDump {
            name: filename,
            bytes_written,
            complete: true,
        })
    }
}

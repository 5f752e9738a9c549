//! Large object streaming.
//!
//! Reads and writes are split into [`LOB_IO_LENGTH`] chunks, all sent while
//! holding the connection lock so no other request interleaves.

use bytes::{Bytes, BytesMut};
use cas_protocol::{LobKind, LobLocator};

use crate::client::Driver;
use crate::error::{Error, Result};
use crate::failover::TimeBudget;
use crate::registry::ConnectionId;

/// Largest chunk sent or requested in one round trip.
pub const LOB_IO_LENGTH: usize = 128 * 1024;

impl Driver {
    /// Create an empty large object.
    pub async fn lob_new(&self, conn: ConnectionId, kind: LobKind) -> Result<LobLocator> {
        let (_, mut guard) = self.lock_connection(conn).await?;
        let budget = TimeBudget::start(guard.login_timeout);
        guard.ensure_session(self.transport(), &budget).await?;
        let result = guard.session_mut()?.lob_new(kind).await;
        let lob = guard.observe(result)?;
        guard.note_work_done();
        Ok(lob)
    }

    /// Write `data` at `offset`; returns the bytes written. The locator's
    /// size grows when the write extends the object.
    pub async fn lob_write(
        &self,
        conn: ConnectionId,
        lob: &mut LobLocator,
        offset: u64,
        data: &[u8],
    ) -> Result<usize> {
        let (_, mut guard) = self.lock_connection(conn).await?;
        let mut written = 0;

        for chunk in data.chunks(LOB_IO_LENGTH) {
            let at = offset + written as u64;
            let result = guard.session_mut()?.lob_write(lob, at, chunk).await;
            let n = guard.observe(result)?;
            written += n;
            if n < chunk.len() {
                break;
            }
        }

        lob.size = lob.size.max(offset + written as u64);
        guard.note_work_done();
        tracing::trace!(connection = %conn, offset, written, "lob written");
        Ok(written)
    }

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Reading at or past the end of the object fails with
    /// [`Error::InvalidLobReadPosition`]; a read that crosses the end is
    /// truncated.
    pub async fn lob_read(
        &self,
        conn: ConnectionId,
        lob: &LobLocator,
        offset: u64,
        len: usize,
    ) -> Result<Bytes> {
        if offset >= lob.size {
            return Err(Error::InvalidLobReadPosition {
                offset,
                size: lob.size,
            });
        }
        let available = usize::try_from(lob.size - offset).unwrap_or(usize::MAX);
        let wanted = len.min(available);

        let (_, mut guard) = self.lock_connection(conn).await?;
        let mut out = BytesMut::with_capacity(wanted);
        while out.len() < wanted {
            let at = offset + out.len() as u64;
            let chunk_len = (wanted - out.len()).min(LOB_IO_LENGTH);
            let result = guard.session_mut()?.lob_read(lob, at, chunk_len).await;
            let chunk = guard.observe(result)?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }

        tracing::trace!(connection = %conn, offset, read = out.len(), "lob read");
        Ok(out.freeze())
    }
}

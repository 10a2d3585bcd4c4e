//! Multi-device synchronization engine
//!
//! One exchange per request: the client's change batch is applied under
//! last-write-wins, then the outbound delta is computed, all inside a single
//! transaction so the watermark handed back reflects exactly this call's
//! writes plus previously committed state. On any store error the
//! transaction rolls back and the caller sees a transient failure with no
//! partial effect; retrying with the same watermark is safe because the
//! batch is idempotent under LWW.
//!
//! Ordering rests entirely on client-supplied millisecond timestamps. There
//! is no skew correction: a device with a fast clock wins conflicts. That is
//! an accepted trade-off (simplicity over causal correctness), not a defect.

mod apply;
mod delta;
mod types;

pub use types::{CardProgress, ChangeSet, NewCard, SyncRequest, SyncResponse, UpdateSet};

use sqlx::SqlitePool;

use crate::db::now_ms;
use crate::error::Result;

/// Run one synchronization exchange for the given scope.
///
/// The response watermark is wall-clock time taken once, after the change
/// batch is applied and before the delta is read, so everything this call
/// wrote is at or before it.
pub async fn sync_exchange(
    pool: &SqlitePool,
    user_id: &str,
    request: &SyncRequest,
) -> Result<SyncResponse> {
    let mut tx = pool.begin().await?;

    apply::apply_changes(&mut tx, user_id, &request.changes).await?;

    let server_timestamp = now_ms();

    let updates = delta::compute_delta(&mut tx, user_id, request.last_sync_timestamp).await?;

    tx.commit().await?;

    Ok(SyncResponse {
        server_timestamp,
        updates,
    })
}

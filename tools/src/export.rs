//! Event export as JSON lines.

use crate::AdminError;
use sourced_iam_core::event_store::EventStore;
use sourced_iam_core::search::SearchQueryBuilder;
use std::io::Write;

/// Write every event of `instance_id` to `out`, one JSON object per line, in
/// global position order.
///
/// Events are read in pages of `page_size` so the log is never held in memory
/// at once. Returns the number of events written.
///
/// # Errors
///
/// Returns [`AdminError`] if the log cannot be read or `out` cannot be written.
#[tracing::instrument(skip(event_store, out))]
pub async fn export_events<W>(
    event_store: &dyn EventStore,
    instance_id: &str,
    page_size: u64,
    out: &mut W,
) -> Result<u64, AdminError>
where
    W: Write + Send,
{
    let page_size = page_size.max(1);
    let mut last_position = 0;
    let mut written = 0u64;

    loop {
        let query = SearchQueryBuilder::new(instance_id)
            .order_by_position()
            .position_after(last_position)
            .limit(page_size);
        let page = event_store.filter(query).await?;

        for event in &page {
            serde_json::to_writer(&mut *out, event)?;
            out.write_all(b"\n")?;
            last_position = event.position;
            written += 1;
        }

        tracing::debug!(page = page.len(), last_position, "Exported page");
        if (page.len() as u64) < page_size {
            break;
        }
    }

    out.flush()?;
    tracing::info!(instance_id, events = written, "Export finished");
    Ok(written)
}

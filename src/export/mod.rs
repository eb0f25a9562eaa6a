use crate::influx::{Client, InfluxError, Point, Precision};

/// Destination parameters for one export run.
#[derive(Debug, Clone)]
pub struct PushOptions {
    pub database: String,
    pub retention_policy: Option<String>,
    pub precision: Precision,
    /// Points per HTTP request.
    pub batch_size: usize,
    /// Points rendered per streamed body chunk within a request.
    pub chunk_size: usize,
}

fn progress_percent(sent: usize, expected: usize) -> f64 {
    if expected == 0 {
        return 100.0;
    }
    (sent as f64 / expected as f64) * 100.0
}

/// Pushes a point stream to the destination in consecutive batches.
///
/// One batch is in flight at a time; each is fully awaited before the
/// next begins, so destination writes never overlap within a run. The
/// first failing batch aborts the remaining stream. `expected_total`
/// only feeds progress logging; the walk may emit fewer points because
/// of sparsification.
pub async fn push<I>(
    client: &Client,
    opts: &PushOptions,
    points: I,
    expected_total: usize,
) -> Result<usize, InfluxError>
where
    I: IntoIterator<Item = Point>,
{
    let batch_size = opts.batch_size.max(1);
    let mut iter = points.into_iter();
    let mut sent = 0usize;

    loop {
        let batch: Vec<Point> = iter.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }

        let count = batch.len();
        client
            .write(
                &opts.database,
                opts.retention_policy.as_deref(),
                opts.precision,
                batch,
                opts.chunk_size,
            )
            .await?;

        sent += count;
        tracing::info!(
            sent,
            expected = expected_total,
            percent = format!("{:.1}", progress_percent(sent, expected_total)),
            "pushed batch",
        );
    }

    tracing::info!(sent, "export complete");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 200), 0.0);
        assert_eq!(progress_percent(50, 200), 25.0);
        assert_eq!(progress_percent(200, 200), 100.0);
        assert_eq!(progress_percent(5, 0), 100.0);
    }
}

//! Scalar extraction from a single event file.

use super::proto::decode_event;
use super::record::{Frame, Records};
use crate::error::{StatError, StatResult};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// `(step, value)` pairs in file order.
pub type ScalarSeries = Vec<(i64, f64)>;

/// Read every scalar for the requested `tags` from one event file.
///
/// Every requested tag gets an entry. A tag the file never logged maps to an
/// empty series and is reported as a warning naming the tag and the file.
pub fn extract_scalars<S: AsRef<str>>(
    path: &Path,
    tags: &[S],
) -> StatResult<BTreeMap<String, ScalarSeries>> {
    let data = std::fs::read(path).map_err(|source| StatError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut series: BTreeMap<String, ScalarSeries> = tags
        .iter()
        .map(|t| (t.as_ref().to_string(), Vec::new()))
        .collect();
    let mut records = 0usize;
    let mut bad_checksums = 0usize;
    let mut wall_times: Option<(f64, f64)> = None;

    for frame in Records::new(&data) {
        let (offset, payload) = match frame {
            Frame::Record {
                offset,
                payload,
                checksum_ok,
            } => {
                if !checksum_ok {
                    debug!("Checksum mismatch at byte {} in {}", offset, path.display());
                    bad_checksums += 1;
                }
                (offset, payload)
            }
            Frame::Truncated { offset } => {
                warn!(
                    "Truncated record at byte {} in {}; ignoring the rest of the file",
                    offset,
                    path.display()
                );
                break;
            }
        };
        records += 1;

        let event = decode_event(payload).map_err(|e| StatError::Decode {
            path: path.to_path_buf(),
            offset,
            reason: e.to_string(),
        })?;

        if event.wall_time > 0.0 {
            wall_times = Some(match wall_times {
                Some((first, last)) => (first.min(event.wall_time), last.max(event.wall_time)),
                None => (event.wall_time, event.wall_time),
            });
        }

        for scalar in event.scalars {
            if let Some(points) = series.get_mut(&scalar.tag) {
                points.push((event.step, scalar.value));
            }
        }
    }

    let span = wall_times.map_or(0.0, |(first, last)| last - first);
    debug!(
        "Read {} records spanning {:.0}s from {}",
        records,
        span,
        path.display()
    );

    if bad_checksums > 0 {
        warn!(
            "{} of {} records in {} failed their checksum; their values were still read",
            bad_checksums,
            records,
            path.display()
        );
    }

    for (tag, points) in &series {
        if points.is_empty() {
            let diag = StatError::MissingTag {
                tag: tag.clone(),
                file: path.display().to_string(),
            };
            warn!("{}", diag);
        }
    }

    Ok(series)
}

//! Human-readable rendering of sizes, progress and plans.

use filedrop_transfer::{ChunkPlan, format_size};
use filedrop_uploader::{ProgressEvent, Stage};

/// Parses a byte size such as `1048576`, `512KiB`, `5MiB` or `1GiB`.
///
/// Suffixes are binary (`K`, `KB` and `KiB` all mean 1024) and case
/// insensitive.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, suffix) = input.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size: {input:?}"))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size suffix: {other:?}")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {input:?}"))
}

/// One progress line, e.g. `[ 57%] uploading 2/4 chunks`.
pub fn format_progress(event: &ProgressEvent) -> String {
    let detail = match (event.stage, event.current, event.total) {
        (Stage::Calculating, Some(done), Some(total)) => {
            format!("hashing {} / {}", format_size(done), format_size(total))
        }
        (Stage::Uploading, Some(done), Some(total)) => format!("uploading {done}/{total} chunks"),
        (Stage::Merging, _, _) => "merging".to_string(),
        (Stage::Done, _, _) => "done".to_string(),
        (Stage::Failed, _, _) => format!(
            "failed: {}",
            event.message.as_deref().unwrap_or("unknown error")
        ),
        (Stage::Cancelled, _, _) => "cancelled".to_string(),
        (stage, _, _) => format!("{stage:?}").to_lowercase(),
    };
    format!("[{:>3}%] {detail}", event.percent)
}

/// Lines describing how `plan` splits the file.
pub fn describe_plan(name: &str, plan: &ChunkPlan) -> Vec<String> {
    let mut lines = Vec::with_capacity(plan.chunks().len() + 1);
    if plan.single_shot {
        lines.push(format!(
            "{name}: {} in a single request",
            format_size(plan.file_size)
        ));
        return lines;
    }

    lines.push(format!(
        "{name}: {} in {} chunks of {}",
        format_size(plan.file_size),
        plan.total_chunks(),
        format_size(plan.chunk_size)
    ));
    for chunk in plan.chunks() {
        lines.push(format!(
            "  #{:<4} offset {:>12}  length {}",
            chunk.index,
            chunk.offset,
            format_size(chunk.length)
        ));
    }
    lines
}

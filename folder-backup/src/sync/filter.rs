use time::OffsetDateTime;

/// Watermark used when no previous run has been recorded.
pub const INITIAL_WATERMARK: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

/// A file qualifies when it was modified at or after the previous run started.
pub fn should_upload(modified: OffsetDateTime, watermark: OffsetDateTime) -> bool {
    modified >= watermark
}

use crate::{MAX_PART_SIZE, MIN_PART_SIZE, TransferError};

/// Validates a part size against the service limits.
///
/// Accepts powers of two from 1 MiB up to 4 GiB.
pub fn validate_part_size(part_size: u64) -> Result<(), TransferError> {
    if !part_size.is_power_of_two() || !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&part_size) {
        return Err(TransferError::InvalidPartSize(part_size));
    }
    Ok(())
}

use std::time::Duration;

// length of "BookSeats" + "\r\n"
const REQUEST_OVERHEAD: usize = 11;
// two u32 coordinates per seat, at most 10 digits each
const DIGITS_PER_SEAT: usize = 20;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("the venue is too large: {rows} rows x {cols} columns")]
    TooLarge { rows: u32, cols: u32 },
}

/// Immutable server settings, built once at startup.
///
/// The buffer sizes are derived from the grid dimensions so a single
/// read can always hold the longest `BookSeats` request, and a single
/// listing can always hold every seat of the venue.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub rows: u32,
    pub cols: u32,
    pub port: u16,
    pub max_workers: usize,
    pub recv_timeout: Duration,
    pub total_seats: usize,
    pub max_request_bytes: usize,
    pub max_listing_bytes: usize,
}

impl ServerConfig {
    pub fn new(
        rows: u32,
        cols: u32,
        port: u16,
        max_workers: usize,
        recv_timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        if rows == 0 {
            return Err(ConfigError::Zero("rows"));
        }
        if cols == 0 {
            return Err(ConfigError::Zero("cols"));
        }
        if max_workers == 0 {
            return Err(ConfigError::Zero("the number of workers"));
        }
        if recv_timeout_secs == 0 {
            return Err(ConfigError::Zero("the receive timeout"));
        }

        let too_large = || ConfigError::TooLarge { rows, cols };
        let total_seats = (rows as usize)
            .checked_mul(cols as usize)
            .ok_or_else(too_large)?;
        // booking codes are u32, every seat must be able to hold a distinct one
        if total_seats >= u32::MAX as usize {
            return Err(too_large());
        }

        // every coordinate plus the commas between them
        let max_request_bytes = total_seats
            .checked_mul(DIGITS_PER_SEAT + 2)
            .and_then(|bytes| bytes.checked_add(REQUEST_OVERHEAD - 1))
            .ok_or_else(too_large)?;

        Ok(Self {
            rows,
            cols,
            port,
            max_workers,
            recv_timeout: Duration::from_secs(recv_timeout_secs),
            total_seats,
            max_request_bytes,
            // the listing drops the command name and CR LF, but carries a NUL
            max_listing_bytes: max_request_bytes - 10,
        })
    }

    /// How long shutdown waits for in-flight workers.
    pub fn grace_period(&self) -> Duration {
        self.recv_timeout * 2
    }
}

use std::{
    collections::HashSet,
    fmt::Write,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::config::ServerConfig;

/// The grid is shared by every worker; all access goes through this lock
/// so a booking's check and commit happen in one critical section.
pub type SharedGrid = Arc<Mutex<Grid>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    pub booked: bool,
    // zero while the seat is free
    pub code: u32,
}

/// Why a booking or a revocation was refused.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    #[error("an odd number of coordinates was provided")]
    NotEven,

    #[error("a coordinate is not a number or lies outside the venue")]
    Exceed,

    #[error("more seats were requested than the venue holds")]
    TooMuch,

    #[error("no seat was requested")]
    WholeEmpty,

    #[error("at least one of the requested seats is already booked")]
    NotAvailable,

    #[error("no booking matches the code")]
    NoUnique,

    #[error("the code is not a number")]
    NotANumber,
}

impl FailReason {
    // the token sent after "Fail:"
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotEven => "noteven",
            Self::Exceed => "exceed",
            Self::TooMuch => "toomuch",
            Self::WholeEmpty => "wholeempty",
            Self::NotAvailable => "notavail",
            Self::NoUnique => "nounique",
            Self::NotANumber => "notanumber",
        }
    }
}

/// A fixed rows x cols venue, stored row-major.
#[derive(Debug)]
pub struct Grid {
    rows: u32,
    cols: u32,
    seats: Vec<Seat>,
    listing_capacity: usize,
    last_code: u32,
}

impl Grid {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            rows: config.rows,
            cols: config.cols,
            seats: vec![Seat::default(); config.total_seats],
            listing_capacity: config.max_listing_bytes,
            last_code: 0,
        }
    }

    pub fn shared(config: &ServerConfig) -> SharedGrid {
        Arc::new(Mutex::new(Self::new(config)))
    }

    // coordinates are 1-based and must already be range checked
    fn index(&self, row: u32, col: u32) -> usize {
        (row as usize - 1) * self.cols as usize + (col as usize - 1)
    }

    pub fn booked_count(&self) -> usize {
        self.seats.iter().filter(|seat| seat.booked).count()
    }

    /// Lists every free seat as `row,col,row,col,...`, in row-major order.
    pub fn list_available(&self) -> String {
        let mut listing = String::with_capacity(self.listing_capacity);

        let cols = self.cols as usize;
        for (idx, seat) in self.seats.iter().enumerate() {
            if seat.booked {
                continue;
            }

            if !listing.is_empty() {
                listing.push(',');
            }
            // writing into a String cannot fail
            let _ = write!(listing, "{},{}", idx / cols + 1, idx % cols + 1);
        }

        listing
    }

    /// Books every seat named by a comma separated list of `row,col` pairs.
    ///
    /// Either all the seats get booked under a single new code, or the grid
    /// is left untouched. Empty tokens (`1,,1`) are skipped.
    pub fn book(&mut self, coordinates: &str) -> Result<u32, FailReason> {
        self.book_at(coordinates, unix_seconds())
    }

    fn book_at(&mut self, coordinates: &str, now: u32) -> Result<u32, FailReason> {
        let tokens: Vec<&str> = coordinates
            .split(',')
            .filter(|token| !token.is_empty())
            .collect();

        if tokens.len() % 2 != 0 {
            return Err(FailReason::NotEven);
        }

        let mut targets = Vec::with_capacity(tokens.len() / 2);
        for pair in tokens.chunks_exact(2) {
            let (Ok(row), Ok(col)) = (pair[0].parse::<u32>(), pair[1].parse::<u32>()) else {
                return Err(FailReason::Exceed);
            };

            if row == 0 || col == 0 || row > self.rows || col > self.cols {
                return Err(FailReason::Exceed);
            }

            targets.push(self.index(row, col));
        }

        if targets.len() > self.seats.len() {
            return Err(FailReason::TooMuch);
        }

        if targets.is_empty() {
            return Err(FailReason::WholeEmpty);
        }

        // check everything before touching anything
        if targets.iter().any(|&idx| self.seats[idx].booked) {
            return Err(FailReason::NotAvailable);
        }

        let code = self.next_code(now);
        for idx in targets {
            self.seats[idx] = Seat { booked: true, code };
        }

        Ok(code)
    }

    /// Frees every seat booked under `code`.
    pub fn revoke(&mut self, code: &str) -> Result<(), FailReason> {
        let code: u32 = code.parse().map_err(|_| FailReason::NotANumber)?;
        if code == 0 {
            return Err(FailReason::NoUnique);
        }

        let mut revoked = 0;
        for seat in self.seats.iter_mut().filter(|seat| seat.code == code) {
            *seat = Seat::default();
            revoked += 1;
        }

        match revoked {
            0 => Err(FailReason::NoUnique),
            _ => Ok(()),
        }
    }

    // Codes follow the wall clock but never repeat:
    // two bookings within the same second get consecutive codes.
    // Once the sequence reaches u32::MAX (the clock saturates there in 2106)
    // the lowest code held by no seat is handed out instead.
    fn next_code(&mut self, now: u32) -> u32 {
        let code = self
            .last_code
            .checked_add(1)
            .map(|next| now.max(next))
            .filter(|candidate| !self.seats.iter().any(|seat| seat.code == *candidate))
            .unwrap_or_else(|| self.lowest_unused_code());

        self.last_code = code;
        code
    }

    fn lowest_unused_code(&self) -> u32 {
        let used: HashSet<u32> = self.seats.iter().map(|seat| seat.code).collect();

        // the venue holds fewer seats than there are codes, so one is always free
        (1..=u32::MAX)
            .find(|code| !used.contains(code))
            .unwrap_or(u32::MAX)
    }
}

// seconds since the epoch, saturating at u32::MAX
fn unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

use crate::grid::FailReason;

pub const TERMINATOR: &[u8] = b"\r\n";
pub const INVALID_RESPONSE: &str = "Op:invalid\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetAvailableSeats,
    BookSeats,
    RevokeBooking,
}

// Command names are distinct prefixes, so the first match wins.
pub const COMMANDS: [Command; 3] = [
    Command::GetAvailableSeats,
    Command::BookSeats,
    Command::RevokeBooking,
];

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAvailableSeats => "GetAvailableSeats",
            Self::BookSeats => "BookSeats",
            Self::RevokeBooking => "RevokeBooking",
        }
    }

    pub fn has_argument(&self) -> bool {
        !matches!(self, Self::GetAvailableSeats)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetAvailableSeats,
    // the raw coordinate list: x1,y1,x2,y2,...
    BookSeats(String),
    // the raw booking code
    RevokeBooking(String),
}

impl Request {
    /// Parses the bytes received by a single read.
    ///
    /// A request is `<name><argument>\r\n` with nothing between the name and
    /// the argument. Returns None when the terminator is missing, the name is
    /// unknown, or a required argument is empty.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let end = frame
            .windows(TERMINATOR.len())
            .position(|window| window == TERMINATOR)?;
        let body = &frame[..end];

        let command = COMMANDS
            .into_iter()
            .find(|command| body.starts_with(command.name().as_bytes()))?;

        let argument = &body[command.name().len()..];
        if command.has_argument() && argument.is_empty() {
            return None;
        }
        let argument = || String::from_utf8_lossy(argument).into_owned();

        match command {
            // trailing bytes after a bare command are ignored
            Command::GetAvailableSeats => Some(Self::GetAvailableSeats),
            Command::BookSeats => Some(Self::BookSeats(argument())),
            Command::RevokeBooking => Some(Self::RevokeBooking(argument())),
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Self::GetAvailableSeats => Command::GetAvailableSeats,
            Self::BookSeats(_) => Command::BookSeats,
            Self::RevokeBooking(_) => Command::RevokeBooking,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Listing(String),
    Booked(u32),
    Revoked,
    Failed(FailReason),
    Invalid,
}

impl Response {
    /// Encodes the response frame.
    ///
    /// Every frame is a NUL terminated string and the NUL is part of what
    /// goes on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let text = match self {
            Self::Listing(listing) => listing.clone(),
            Self::Booked(code) => format!("Success:{code}"),
            Self::Revoked => "Success".to_owned(),
            Self::Failed(reason) => format!("Fail:{}", reason.as_str()),
            Self::Invalid => INVALID_RESPONSE.to_owned(),
        };

        let mut frame = text.into_bytes();
        frame.push(0);
        frame
    }
}

#[cfg(test)]
mod tests {
    use crate::grid::FailReason;

    use super::{Command, Request, Response};

    #[test]
    fn parse_valid_requests() {
        let raw_requests: [&[u8]; 5] = [
            b"GetAvailableSeats\r\n",
            b"GetAvailableSeats\r\n\0\0\0",
            b"BookSeats1,1,1,2\r\n",
            b"RevokeBooking1700000000\r\n",
            b"BookSeats(1,1)\r\nleftover",
        ];

        let expected_requests = [
            Request::GetAvailableSeats,
            Request::GetAvailableSeats,
            Request::BookSeats("1,1,1,2".into()),
            Request::RevokeBooking("1700000000".into()),
            Request::BookSeats("(1,1)".into()),
        ];

        for (raw, expected) in raw_requests.into_iter().zip(expected_requests) {
            assert_eq!(Request::parse(raw), Some(expected));
        }
    }

    #[test]
    fn parse_invalid_requests() {
        let raw_requests: [&[u8]; 8] = [
            b"Ping\r\n",
            b"GetAvailableSeats",
            b"GetAvailableSeats\n",
            b"BookSeats1,1",
            b"BookSeats\r\n",
            b"RevokeBooking\r\n",
            b"bookseats1,1\r\n",
            b"",
        ];

        for raw in raw_requests {
            assert_eq!(Request::parse(raw), None, "{:?}", raw);
        }
    }

    #[test]
    fn command_table() {
        assert_eq!(Command::GetAvailableSeats.name().len(), 17);
        assert_eq!(Command::BookSeats.name().len(), 9);
        assert_eq!(Command::RevokeBooking.name().len(), 13);
        assert!(!Command::GetAvailableSeats.has_argument());
        assert!(Command::BookSeats.has_argument());
        assert_eq!(
            Request::BookSeats("1,1".into()).command(),
            Command::BookSeats
        );
    }

    #[test]
    fn encode_responses() {
        let responses = [
            Response::Listing("1,1,1,2".into()),
            Response::Listing(String::new()),
            Response::Booked(1700000000),
            Response::Revoked,
            Response::Failed(FailReason::NotEven),
            Response::Failed(FailReason::Exceed),
            Response::Failed(FailReason::TooMuch),
            Response::Failed(FailReason::WholeEmpty),
            Response::Failed(FailReason::NotAvailable),
            Response::Failed(FailReason::NoUnique),
            Response::Failed(FailReason::NotANumber),
            Response::Invalid,
        ];

        let expected: [&[u8]; 12] = [
            b"1,1,1,2\0",
            b"\0",
            b"Success:1700000000\0",
            b"Success\0",
            b"Fail:noteven\0",
            b"Fail:exceed\0",
            b"Fail:toomuch\0",
            b"Fail:wholeempty\0",
            b"Fail:notavail\0",
            b"Fail:nounique\0",
            b"Fail:notanumber\0",
            b"Op:invalid\r\n\0",
        ];

        for (response, expected) in responses.into_iter().zip(expected) {
            assert_eq!(response.to_bytes(), expected);
        }
    }
}

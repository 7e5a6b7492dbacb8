//! Handles creating responses to clients.

use std::io::{self, Write};

/// Represents a response to a client.
#[derive(Debug, PartialEq)]
pub enum Response<'a> {
    /// You done messed up A-A-ron.
    BadFormat,
    /// A reserved job was buried
    Buried,
    Deleted,
    /// A CRLF was expected after a job body but not encountered
    ExpectedCrlf,
    /// A peek found a job
    Found { id: u64, body: &'a [u8] },
    Inserted(u64),
    /// An internal error (a bug)
    InternalError,
    JobTooBig,
    /// A single job was kicked
    Kicked,
    /// Many jobs were kicked
    KickedJobs(u64),
    NotFound,
    /// Sent when an ignore is issued against the last tube in the watch list
    NotIgnored,
    /// A YAML document, in answer to a stats or list command
    Ok(&'a str),
    Paused,
    Released,
    /// A job was reserved, here it is
    Reserved { id: u64, body: &'a [u8] },
    /// A reserve-with-timeout timed out
    TimedOut,
    /// A reservation's TTR was reset
    Touched,
    UnknownCommand,
    /// Successfully `use`ed a tube
    Using(&'a str),
    /// How many tubes are now watched
    Watching(usize),
}

impl<'a> Response<'a> {
    /// Write this response to `writer` in its wire format.
    pub fn serialize_into<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Self::BadFormat => writer.write_all(b"BAD_FORMAT\r\n"),
            Self::Buried => writer.write_all(b"BURIED\r\n"),
            Self::Deleted => writer.write_all(b"DELETED\r\n"),
            Self::ExpectedCrlf => writer.write_all(b"EXPECTED_CRLF\r\n"),
            Self::Found { id, body } => with_body(writer, "FOUND", *id, body),
            Self::Inserted(id) => write!(writer, "INSERTED {}\r\n", id),
            Self::InternalError => writer.write_all(b"INTERNAL_ERROR\r\n"),
            Self::JobTooBig => writer.write_all(b"JOB_TOO_BIG\r\n"),
            Self::Kicked => writer.write_all(b"KICKED\r\n"),
            Self::KickedJobs(num) => write!(writer, "KICKED {}\r\n", num),
            Self::NotFound => writer.write_all(b"NOT_FOUND\r\n"),
            Self::NotIgnored => writer.write_all(b"NOT_IGNORED\r\n"),
            Self::Ok(yaml) => {
                write!(writer, "OK {}\r\n", yaml.len())?;
                writer.write_all(yaml.as_bytes())?;
                writer.write_all(b"\r\n")
            }
            Self::Paused => writer.write_all(b"PAUSED\r\n"),
            Self::Released => writer.write_all(b"RELEASED\r\n"),
            Self::Reserved { id, body } => with_body(writer, "RESERVED", *id, body),
            Self::TimedOut => writer.write_all(b"TIMED_OUT\r\n"),
            Self::Touched => writer.write_all(b"TOUCHED\r\n"),
            Self::UnknownCommand => writer.write_all(b"UNKNOWN_COMMAND\r\n"),
            Self::Using(tube) => write!(writer, "USING {}\r\n", tube),
            Self::Watching(num) => write!(writer, "WATCHING {}\r\n", num),
        }
    }
}

/// `<word> <id> <bytes>\r\n<body>\r\n`
fn with_body<W: Write>(writer: &mut W, word: &str, id: u64, body: &[u8]) -> io::Result<()> {
    write!(writer, "{} {} {}\r\n", word, id, body.len())?;
    writer.write_all(body)?;
    writer.write_all(b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_wire {
        ($response:expr, $expect:expr) => {{
            let mut buf = Vec::new();
            let expect: &[u8] = $expect;
            $response.serialize_into(&mut buf).unwrap();
            assert_eq!(String::from_utf8_lossy(&buf), String::from_utf8_lossy(expect));
        }}
    }

    #[test]
    fn bare_words() {
        assert_wire! { Response::BadFormat, b"BAD_FORMAT\r\n" }
        assert_wire! { Response::Buried, b"BURIED\r\n" }
        assert_wire! { Response::Deleted, b"DELETED\r\n" }
        assert_wire! { Response::ExpectedCrlf, b"EXPECTED_CRLF\r\n" }
        assert_wire! { Response::InternalError, b"INTERNAL_ERROR\r\n" }
        assert_wire! { Response::JobTooBig, b"JOB_TOO_BIG\r\n" }
        assert_wire! { Response::Kicked, b"KICKED\r\n" }
        assert_wire! { Response::NotFound, b"NOT_FOUND\r\n" }
        assert_wire! { Response::NotIgnored, b"NOT_IGNORED\r\n" }
        assert_wire! { Response::Paused, b"PAUSED\r\n" }
        assert_wire! { Response::Released, b"RELEASED\r\n" }
        assert_wire! { Response::TimedOut, b"TIMED_OUT\r\n" }
        assert_wire! { Response::Touched, b"TOUCHED\r\n" }
        assert_wire! { Response::UnknownCommand, b"UNKNOWN_COMMAND\r\n" }
    }

    #[test]
    fn numbered() {
        assert_wire! { Response::Inserted(1), b"INSERTED 1\r\n" }
        assert_wire! { Response::Inserted(u64::MAX), b"INSERTED 18446744073709551615\r\n" }
        assert_wire! { Response::KickedJobs(0), b"KICKED 0\r\n" }
        assert_wire! { Response::KickedJobs(313), b"KICKED 313\r\n" }
        assert_wire! { Response::Watching(1), b"WATCHING 1\r\n" }
        assert_wire! { Response::Watching(12), b"WATCHING 12\r\n" }
    }

    #[test]
    fn jobs() {
        assert_wire! {
            Response::Found { id: 12, body: b"resize image 4471" },
            b"FOUND 12 17\r\nresize image 4471\r\n"
        }
        assert_wire! {
            Response::Found { id: 3, body: b"" },
            b"FOUND 3 0\r\n\r\n"
        }
        assert_wire! {
            Response::Reserved { id: 90210, body: b"line one\r\nline two" },
            b"RESERVED 90210 18\r\nline one\r\nline two\r\n"
        }
        assert_wire! {
            Response::Reserved { id: 1, body: &[0, 159, 146, 150] },
            b"RESERVED 1 4\r\n\x00\x9f\x92\x96\r\n"
        }
    }

    #[test]
    fn yaml() {
        assert_wire! {
            Response::Ok("---\n- default\n- mail\n"),
            b"OK 21\r\n---\n- default\n- mail\n\r\n"
        }
        assert_wire! { Response::Ok(""), b"OK 0\r\n\r\n" }
    }

    #[test]
    fn tube_names() {
        assert_wire! { Response::Using("default"), b"USING default\r\n" }
        assert_wire! { Response::Using("($odd)/tube;name"), b"USING ($odd)/tube;name\r\n" }
    }
}

//! Handles parsing requests from clients.
//!
//! Requests are parsed straight out of the connection's read buffer without copying: tube
//! names and job bodies in a [`Request`] point back into that buffer.

use crate::error::{Error, Result};
use derive_builder::Builder;
/// Export this so's people can get at the `ErrorKind` values and crap without having to import
/// nom into their project.
pub use nom;

use nom::{
    IResult,
    bytes::streaming::{take, take_while1},
    character::{
        is_alphanumeric,
        complete::{self as num, char, crlf},
        streaming::crlf as streaming_crlf,
    },
    combinator::value,
    error::{Error as NomError, ErrorKind},
    sequence::{delimited, preceded, terminated, tuple},
};

/// The longest tube name we accept, in bytes.
pub const MAX_TUBE_NAME: usize = 200;

/// Represents a beanstalkd request and its various arguments.
///
/// This has a lifetime that references the the byte slice it was parsed from, so their fates
/// are linked together.
#[derive(Debug, PartialEq)]
pub enum Request<'a> {
    /// Bury a job we have reserved, giving it a new priority
    Bury { id: u64, priority: u32 },
    Delete { id: u64 },
    /// Stop watching a tube
    Ignore { tube: &'a str },
    /// Kick up to `bound` buried (or, failing that, delayed) jobs in the used tube
    Kick { bound: u64 },
    KickJob { id: u64 },
    ListTubes,
    ListTubesWatched,
    /// Get the currently [`Use`][Request::Use]d tube
    ListTubeUsed,
    /// Hold off handing out jobs from a tube for `delay` seconds
    PauseTube { tube: &'a str, delay: u32 },
    /// Look at a job by its id
    Peek { id: u64 },
    PeekBuried,
    PeekDelayed,
    PeekReady,
    /// Put a job into the used tube
    Put { priority: u32, delay: u32, ttr: u32, body: &'a [u8] },
    Quit,
    /// Give back a reserved job with a new priority and delay
    Release { id: u64, priority: u32, delay: u32 },
    /// Wait for a job from any watched tube
    Reserve,
    ReserveJob { id: u64 },
    /// Like [`Reserve`][Request::Reserve], giving up after `timeout` seconds
    ReserveWithTimeout { timeout: u64 },
    Stats,
    StatsJob { id: u64 },
    StatsTube { tube: &'a str },
    /// Ask for more time on a reserved job
    Touch { id: u64 },
    /// Use a tube (to put jobs into it AND to peek/kick, which is weird)
    Use { tube: &'a str },
    /// Watch a tube (for job consumption)
    Watch { tube: &'a str },
}

impl<'a> Request<'a> {
    /// The name of the command as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bury { .. } => "bury",
            Self::Delete { .. } => "delete",
            Self::Ignore { .. } => "ignore",
            Self::Kick { .. } => "kick",
            Self::KickJob { .. } => "kick-job",
            Self::ListTubes => "list-tubes",
            Self::ListTubesWatched => "list-tubes-watched",
            Self::ListTubeUsed => "list-tube-used",
            Self::PauseTube { .. } => "pause-tube",
            Self::Peek { .. } => "peek",
            Self::PeekBuried => "peek-buried",
            Self::PeekDelayed => "peek-delayed",
            Self::PeekReady => "peek-ready",
            Self::Put { .. } => "put",
            Self::Quit => "quit",
            Self::Release { .. } => "release",
            Self::Reserve => "reserve",
            Self::ReserveJob { .. } => "reserve-job",
            Self::ReserveWithTimeout { .. } => "reserve-with-timeout",
            Self::Stats => "stats",
            Self::StatsJob { .. } => "stats-job",
            Self::StatsTube { .. } => "stats-tube",
            Self::Touch { .. } => "touch",
            Self::Use { .. } => "use",
            Self::Watch { .. } => "watch",
        }
    }
}

/// Turn a nom result into one of ours.
fn lift<'a, T>(res: IResult<&'a [u8], T>) -> Result<'a, (&'a [u8], T)> {
    match res {
        Ok(parsed) => Ok(parsed),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(Error::Parse(e)),
        Err(nom::Err::Incomplete(needed)) => Err(Error::ParseIncomplete(needed)),
    }
}

fn is_tube_char(chr: u8) -> bool {
    is_alphanumeric(chr) || b"-+/;.$_()".contains(&chr)
}

fn command(inp: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(|chr| is_alphanumeric(chr) || chr == b'-')(inp)
}

/// `\r\n`
fn no_args(inp: &[u8]) -> IResult<&[u8], ()> {
    value((), crlf)(inp)
}

/// ` <u64>\r\n`
fn one_u64(inp: &[u8]) -> IResult<&[u8], u64> {
    delimited(char(' '), num::u64, crlf)(inp)
}

/// ` <id> <priority>\r\n`
fn id_priority(inp: &[u8]) -> IResult<&[u8], (u64, u32)> {
    terminated(
        tuple((
            preceded(char(' '), num::u64),
            preceded(char(' '), num::u32),
        )),
        crlf,
    )(inp)
}

/// ` <id> <priority> <delay>\r\n`
fn id_priority_delay(inp: &[u8]) -> IResult<&[u8], (u64, u32, u32)> {
    terminated(
        tuple((
            preceded(char(' '), num::u64),
            preceded(char(' '), num::u32),
            preceded(char(' '), num::u32),
        )),
        crlf,
    )(inp)
}

/// ` <priority> <delay> <ttr> <bytes>\r\n`
fn put_header(inp: &[u8]) -> IResult<&[u8], (u32, u32, u32, u64)> {
    terminated(
        tuple((
            preceded(char(' '), num::u32),
            preceded(char(' '), num::u32),
            preceded(char(' '), num::u32),
            preceded(char(' '), num::u64),
        )),
        crlf,
    )(inp)
}

/// A tube name: up to [`MAX_TUBE_NAME`] bytes of letters, digits and `-+/;.$_()`, not
/// starting with a dash.
fn tube_name<'a>(inp: &'a [u8]) -> Result<'a, (&'a [u8], &'a str)> {
    let (rest, name) = lift(take_while1(is_tube_char)(inp))?;
    if name[0] == b'-' {
        return Err(Error::Parse(NomError::new(inp, ErrorKind::Char)));
    }
    if name.len() > MAX_TUBE_NAME {
        return Err(Error::BadTubeName);
    }
    Ok((rest, std::str::from_utf8(name)?))
}

/// ` <tube>\r\n`
fn one_tube<'a>(inp: &'a [u8]) -> Result<'a, (&'a [u8], &'a str)> {
    let (rest, _) = lift(char(' ')(inp))?;
    let (rest, tube) = tube_name(rest)?;
    let (rest, _) = lift(crlf(rest))?;
    Ok((rest, tube))
}

/// ` <tube> <delay>\r\n`
fn tube_delay<'a>(inp: &'a [u8]) -> Result<'a, (&'a [u8], (&'a str, u32))> {
    let (rest, _) = lift(char(' ')(inp))?;
    let (rest, tube) = tube_name(rest)?;
    let (rest, delay) = lift(delimited(char(' '), num::u32, crlf)(rest))?;
    Ok((rest, (tube, delay)))
}

/// A job body of exactly `size` bytes followed by `\r\n`.
fn body<'a>(inp: &'a [u8], size: u64) -> Result<'a, (&'a [u8], &'a [u8])> {
    let (rest, data) = lift(take(size as usize)(inp))?;
    match streaming_crlf::<_, NomError<&[u8]>>(rest) {
        Ok((rest, _)) => Ok((rest, data)),
        Err(nom::Err::Incomplete(needed)) => Err(Error::ParseIncomplete(needed)),
        Err(_) => Err(Error::ExpectedCrlf(size)),
    }
}

/// Options that change how requests are parsed.
#[derive(Builder, Debug)]
#[builder(pattern = "owned")]
pub struct ParseOptions {
    /// How many bytes our job size can be
    #[builder(default = "u16::MAX as u64")]
    max_job_size: u64,
}

impl ParseOptions {
    pub fn max_job_size(&self) -> u64 {
        self.max_job_size
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { max_job_size: u16::MAX as u64 }
    }
}

/// Takes a byte slice and parses it as a beanstalkd request (as per
/// https://github.com/beanstalkd/beanstalkd/blob/master/doc/protocol.txt)
///
/// This is a zero-copy operation that returns the remainder of the byte slice after parsing
/// is done, allowing for continued parsing.
///
/// The command line itself is parsed as a complete unit, so callers should wait until they
/// have buffered a full line (up to and including its `\r\n`) before calling this. A `put`'s
/// body may still be partially buffered, in which case we return
/// [`Error::ParseIncomplete`].
pub fn parse_request<'a>(inp: &'a [u8], options: &ParseOptions) -> Result<'a, (&'a [u8], Request<'a>)> {
    let (rest, cmd) = lift(command(inp))?;
    let parsed = match cmd {
        b"bury" => {
            let (rest, (id, priority)) = lift(id_priority(rest))?;
            (rest, Request::Bury { id, priority })
        }
        b"delete" => {
            let (rest, id) = lift(one_u64(rest))?;
            (rest, Request::Delete { id })
        }
        b"ignore" => {
            let (rest, tube) = one_tube(rest)?;
            (rest, Request::Ignore { tube })
        }
        b"kick" => {
            let (rest, bound) = lift(one_u64(rest))?;
            (rest, Request::Kick { bound })
        }
        b"kick-job" => {
            let (rest, id) = lift(one_u64(rest))?;
            (rest, Request::KickJob { id })
        }
        b"list-tubes" => (lift(no_args(rest))?.0, Request::ListTubes),
        b"list-tubes-watched" => (lift(no_args(rest))?.0, Request::ListTubesWatched),
        b"list-tube-used" => (lift(no_args(rest))?.0, Request::ListTubeUsed),
        b"pause-tube" => {
            let (rest, (tube, delay)) = tube_delay(rest)?;
            (rest, Request::PauseTube { tube, delay })
        }
        b"peek" => {
            let (rest, id) = lift(one_u64(rest))?;
            (rest, Request::Peek { id })
        }
        b"peek-buried" => (lift(no_args(rest))?.0, Request::PeekBuried),
        b"peek-delayed" => (lift(no_args(rest))?.0, Request::PeekDelayed),
        b"peek-ready" => (lift(no_args(rest))?.0, Request::PeekReady),
        b"put" => {
            let (rest, (priority, delay, ttr, size)) = lift(put_header(rest))?;
            if size > options.max_job_size {
                return Err(Error::JobTooBig(size));
            }
            let (rest, body) = body(rest, size)?;
            (rest, Request::Put { priority, delay, ttr, body })
        }
        b"quit" => (lift(no_args(rest))?.0, Request::Quit),
        b"release" => {
            let (rest, (id, priority, delay)) = lift(id_priority_delay(rest))?;
            (rest, Request::Release { id, priority, delay })
        }
        b"reserve" => (lift(no_args(rest))?.0, Request::Reserve),
        b"reserve-job" => {
            let (rest, id) = lift(one_u64(rest))?;
            (rest, Request::ReserveJob { id })
        }
        b"reserve-with-timeout" => {
            let (rest, timeout) = lift(one_u64(rest))?;
            (rest, Request::ReserveWithTimeout { timeout })
        }
        b"stats" => (lift(no_args(rest))?.0, Request::Stats),
        b"stats-job" => {
            let (rest, id) = lift(one_u64(rest))?;
            (rest, Request::StatsJob { id })
        }
        b"stats-tube" => {
            let (rest, tube) = one_tube(rest)?;
            (rest, Request::StatsTube { tube })
        }
        b"touch" => {
            let (rest, id) = lift(one_u64(rest))?;
            (rest, Request::Touch { id })
        }
        b"use" => {
            let (rest, tube) = one_tube(rest)?;
            (rest, Request::Use { tube })
        }
        b"watch" => {
            let (rest, tube) = one_tube(rest)?;
            (rest, Request::Watch { tube })
        }
        _ => return Err(Error::UnknownRequest(std::str::from_utf8(cmd)?)),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use const_format::concatcp;

    fn parse(bytes: &[u8]) -> Result<'_, (&[u8], Request<'_>)> {
        parse_request(bytes, &ParseOptions::default())
    }

    fn long_name(len: usize) -> String {
        "abcdefghij".repeat(len / 10 + 1)[..len].to_string()
    }

    macro_rules! assert_parse_err {
        ($inp:expr, $pos:expr, $kind:expr) => {{
            let bytes: &[u8] = $inp;
            match parse(bytes).unwrap_err() {
                Error::Parse(err) => assert_eq!((err.input, err.code), (&bytes[$pos..], $kind)),
                other => panic!("expected a parse error but got {:?}", other),
            }
        }}
    }

    macro_rules! assert_needs_more {
        ($inp:expr) => {{
            let res = parse($inp);
            assert!(matches!(res, Err(Error::ParseIncomplete(_))), "expected incomplete but got {:?}", res);
        }}
    }

    macro_rules! check_no_args {
        ($name:expr, $typo:expr, $req:expr) => {{
            assert_eq!(parse(concatcp!($name, "\r\n").as_bytes()).unwrap(), (&b""[..], $req));
            assert_eq!(parse(concatcp!($name, "\r\nstats\r\n").as_bytes()).unwrap(), (&b"stats\r\n"[..], $req));
            assert_eq!(parse(concatcp!($typo, "\r\n").as_bytes()).unwrap_err(), Error::UnknownRequest($typo));
            assert_parse_err!(concatcp!($name, " now\r\n").as_bytes(), $name.len(), ErrorKind::CrLf);
            assert_parse_err!(concatcp!($name, "\n").as_bytes(), $name.len(), ErrorKind::CrLf);
        }}
    }

    macro_rules! check_u64_arg {
        ($name:expr, $typo:expr, $make:expr) => {{
            let make = $make;
            assert_eq!(parse(concatcp!($name, " 18446744073709551615\r\n").as_bytes()).unwrap(), (&b""[..], make(u64::MAX)));
            assert_eq!(parse(concatcp!($name, " 42\r\nreserve\r\n").as_bytes()).unwrap(), (&b"reserve\r\n"[..], make(42)));
            assert_eq!(parse(concatcp!($typo, " 42\r\n").as_bytes()).unwrap_err(), Error::UnknownRequest($typo));
            assert_parse_err!(concatcp!($name, " 18446744073709551616\r\n").as_bytes(), $name.len() + 1, ErrorKind::Digit);
            assert_parse_err!(concatcp!($name, " -5\r\n").as_bytes(), $name.len() + 1, ErrorKind::Digit);
            assert_parse_err!(concatcp!($name, "\r\n").as_bytes(), $name.len(), ErrorKind::Char);
            assert_parse_err!(concatcp!($name, " 77 \r\n").as_bytes(), $name.len() + 3, ErrorKind::CrLf);
            assert_parse_err!(concatcp!($name, " 77\n").as_bytes(), $name.len() + 3, ErrorKind::CrLf);
        }}
    }

    macro_rules! check_tube_arg {
        ($name:expr, $typo:expr, $make:expr) => {{
            let make = $make;
            assert_eq!(parse(concatcp!($name, " emails.outbound_v2\r\n").as_bytes()).unwrap(), (&b""[..], make("emails.outbound_v2")));
            assert_eq!(
                parse(concatcp!($name, " ($weird)/+;.tube_-name\r\nquit\r\n").as_bytes()).unwrap(),
                (&b"quit\r\n"[..], make("($weird)/+;.tube_-name"))
            );
            let longest = long_name(MAX_TUBE_NAME);
            let req = format!("{} {}\r\n", $name, longest);
            assert_eq!(parse(req.as_bytes()).unwrap(), (&b""[..], make(longest.as_str())));
            let req = format!("{} {}\r\n", $name, long_name(MAX_TUBE_NAME + 1));
            assert_eq!(parse(req.as_bytes()).unwrap_err(), Error::BadTubeName);

            assert_eq!(parse(concatcp!($typo, " emails\r\n").as_bytes()).unwrap_err(), Error::UnknownRequest($typo));
            assert_parse_err!(concatcp!($name, " -leading-dash\r\n").as_bytes(), $name.len() + 1, ErrorKind::Char);
            assert_parse_err!(concatcp!($name, " \r\n").as_bytes(), $name.len() + 1, ErrorKind::TakeWhile1);
            assert_parse_err!(concatcp!($name, " has space\r\n").as_bytes(), $name.len() + 4, ErrorKind::CrLf);
            assert_parse_err!(concatcp!($name, " tube!\r\n").as_bytes(), $name.len() + 5, ErrorKind::CrLf);
            assert_needs_more!(concatcp!($name, " unfinished").as_bytes());
        }}
    }

    #[test]
    fn bury() {
        assert_eq!(parse(b"bury 5 10\r\n").unwrap(), (&b""[..], Request::Bury { id: 5, priority: 10 }));
        assert_eq!(
            parse(b"bury 18446744073709551615 4294967295\r\nquit\r\n").unwrap(),
            (&b"quit\r\n"[..], Request::Bury { id: u64::MAX, priority: u32::MAX })
        );
        assert_eq!(parse(b"burry 5 10\r\n").unwrap_err(), Error::UnknownRequest("burry"));
        assert_parse_err!(b"bury 5\r\n", 6, ErrorKind::Char);
        assert_parse_err!(b"bury 5 x\r\n", 7, ErrorKind::Digit);
        assert_parse_err!(b"bury 5 4294967296\r\n", 7, ErrorKind::Digit);
        assert_parse_err!(b"bury 5 10 \r\n", 9, ErrorKind::CrLf);
    }

    #[test]
    fn delete() {
        check_u64_arg! { "delete", "delet", |id| Request::Delete { id } }
    }

    #[test]
    fn ignore() {
        check_tube_arg! { "ignore", "ignroe", |tube| Request::Ignore { tube } }
    }

    #[test]
    fn kick() {
        check_u64_arg! { "kick", "kik", |bound| Request::Kick { bound } }
    }

    #[test]
    fn kick_job() {
        check_u64_arg! { "kick-job", "kick-jobs", |id| Request::KickJob { id } }
    }

    #[test]
    fn list_commands() {
        check_no_args! { "list-tubes", "list-tube", Request::ListTubes }
        check_no_args! { "list-tubes-watched", "list-tubes-watching", Request::ListTubesWatched }
        check_no_args! { "list-tube-used", "list-tubes-used", Request::ListTubeUsed }
    }

    #[test]
    fn pause_tube() {
        assert_eq!(
            parse(b"pause-tube emails 60\r\n").unwrap(),
            (&b""[..], Request::PauseTube { tube: "emails", delay: 60 })
        );
        assert_eq!(
            parse(b"pause-tube a 4294967295\r\nstats\r\n").unwrap(),
            (&b"stats\r\n"[..], Request::PauseTube { tube: "a", delay: u32::MAX })
        );
        let req = format!("pause-tube {} 1\r\n", long_name(MAX_TUBE_NAME + 1));
        assert_eq!(parse(req.as_bytes()).unwrap_err(), Error::BadTubeName);
        assert_parse_err!(b"pause-tube emails\r\n", 17, ErrorKind::Char);
        assert_parse_err!(b"pause-tube emails -1\r\n", 18, ErrorKind::Digit);
        assert_parse_err!(b"pause-tube -emails 60\r\n", 11, ErrorKind::Char);
        assert_parse_err!(b"pause-tube emails 60 \r\n", 20, ErrorKind::CrLf);
    }

    #[test]
    fn peeks() {
        check_u64_arg! { "peek", "peep", |id| Request::Peek { id } }
        check_no_args! { "peek-ready", "peek-redy", Request::PeekReady }
        check_no_args! { "peek-delayed", "peek-delay", Request::PeekDelayed }
        check_no_args! { "peek-buried", "peek-burried", Request::PeekBuried }
    }

    #[test]
    fn put() {
        assert_eq!(
            parse(b"put 4294967295 0 1 5\r\nhello\r\n").unwrap(),
            (&b""[..], Request::Put { priority: u32::MAX, delay: 0, ttr: 1, body: b"hello" })
        );
        assert_eq!(
            parse(b"put 1 2 3 0\r\n\r\nquit\r\n").unwrap(),
            (&b"quit\r\n"[..], Request::Put { priority: 1, delay: 2, ttr: 3, body: b"" })
        );
        // bodies are binary-safe, CRLFs included
        assert_eq!(
            parse(b"put 0 0 10 12\r\nline\r\nline\r\n\r\n").unwrap(),
            (&b""[..], Request::Put { priority: 0, delay: 0, ttr: 10, body: b"line\r\nline\r\n" })
        );

        assert_needs_more!(b"put");
        assert_needs_more!(b"put 1 2 3 5\r\nhel");
        assert_needs_more!(b"put 1 2 3 5\r\nhello");
        assert_needs_more!(b"put 1 2 3 5\r\nhello\r");
        assert_eq!(parse(b"put 1 2 3 5\r\nhello world\r\n").unwrap_err(), Error::ExpectedCrlf(5));

        assert_parse_err!(b"put 1 2 3\r\n", 9, ErrorKind::Char);
        assert_parse_err!(b"put 1 2 3 x\r\n", 10, ErrorKind::Digit);
        assert_parse_err!(b"put 4294967296 2 3 4\r\n", 4, ErrorKind::Digit);
        assert_parse_err!(b"put 1 2 3 4 \r\n", 11, ErrorKind::CrLf);
        assert_eq!(parse(b"putt 1 2 3 4\r\ntest\r\n").unwrap_err(), Error::UnknownRequest("putt"));
    }

    #[test]
    fn put_size_limit() {
        assert_eq!(parse(b"put 1 2 3 65536\r\n").unwrap_err(), Error::JobTooBig(65536));
        assert_needs_more!(b"put 1 2 3 65535\r\n");

        let options = ParseOptionsBuilder::default().max_job_size(4).build().unwrap();
        assert_eq!(options.max_job_size(), 4);
        assert_eq!(parse_request(b"put 1 2 3 5\r\nhello\r\n", &options).unwrap_err(), Error::JobTooBig(5));
        assert_eq!(
            parse_request(b"put 1 2 3 4\r\nhell\r\n", &options).unwrap().1,
            Request::Put { priority: 1, delay: 2, ttr: 3, body: b"hell" }
        );
    }

    #[test]
    fn release() {
        assert_eq!(
            parse(b"release 9 100 30\r\n").unwrap(),
            (&b""[..], Request::Release { id: 9, priority: 100, delay: 30 })
        );
        assert_eq!(parse(b"relase 9 100 30\r\n").unwrap_err(), Error::UnknownRequest("relase"));
        assert_parse_err!(b"release 9 100\r\n", 13, ErrorKind::Char);
        assert_parse_err!(b"release 9 4294967296 30\r\n", 10, ErrorKind::Digit);
        assert_parse_err!(b"release 9 100 30 \r\n", 16, ErrorKind::CrLf);
        assert_parse_err!(b"release x 100 30\r\n", 8, ErrorKind::Digit);
    }

    #[test]
    fn reserves() {
        check_no_args! { "reserve", "reserv", Request::Reserve }
        check_u64_arg! { "reserve-job", "reserve-jb", |id| Request::ReserveJob { id } }
        check_u64_arg! { "reserve-with-timeout", "reserve-with-timout", |timeout| Request::ReserveWithTimeout { timeout } }
    }

    #[test]
    fn stats() {
        check_no_args! { "stats", "stat", Request::Stats }
        check_u64_arg! { "stats-job", "stats-jobs", |id| Request::StatsJob { id } }
        check_tube_arg! { "stats-tube", "stats-tubes", |tube| Request::StatsTube { tube } }
    }

    #[test]
    fn touch() {
        check_u64_arg! { "touch", "tuch", |id| Request::Touch { id } }
    }

    #[test]
    fn use_and_watch() {
        check_tube_arg! { "use", "uses", |tube| Request::Use { tube } }
        check_tube_arg! { "watch", "wacth", |tube| Request::Watch { tube } }
    }

    #[test]
    fn quit() {
        check_no_args! { "quit", "exit", Request::Quit }
    }

    #[test]
    fn pipelined() {
        let mut buf: &[u8] = b"use mail\r\nput 10 0 60 5\r\nhello\r\nwatch mail\r\nignore default\r\nreserve-with-timeout 0\r\ndelete 1\r\nquit\r\n";
        let mut names = Vec::new();
        while !buf.is_empty() {
            let (rest, req) = parse(buf).unwrap();
            names.push(req.name());
            buf = rest;
        }
        assert_eq!(names, vec!["use", "put", "watch", "ignore", "reserve-with-timeout", "delete", "quit"]);
    }

    #[test]
    fn partial_line() {
        assert_needs_more!(b"use mai");
        assert_needs_more!(b"");
        assert_parse_err!(b"\r\n", 0, ErrorKind::TakeWhile1);
    }
}

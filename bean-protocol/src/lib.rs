//! The beanstalkd wire protocol: parsing client requests and writing server responses.

pub mod error;
pub mod request;
pub mod response;

pub use error::{Error, Result};
pub use request::{MAX_TUBE_NAME, ParseOptions, ParseOptionsBuilder, Request, nom, parse_request};
pub use response::Response;

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;

pub mod extract;
pub mod handler;
pub mod logging;
pub mod middleware;
pub mod service;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::error::{
    BoxedError, Error, ErrorKind, Result, ResultExt, SUCCESS_CODE, SUCCESS_MESSAGE, classify,
    classify_panic, panic_message,
};
pub use crate::handler::Envelope;

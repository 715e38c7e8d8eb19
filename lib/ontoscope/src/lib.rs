#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc(test(attr(deny(warnings))))]

pub mod app;
pub mod capture;
pub mod catalog;
pub mod config;
mod error;
pub mod query;
pub mod reasoner;
pub mod render;
pub mod store;
pub mod task;
pub mod vocab;

pub use crate::app::{App, AppState, Level, Notification, View};
pub use crate::config::AppConfig;
pub use crate::error::{
    ConfigError, Error, ParseError, PreconditionError, QueryError, ReasoningError,
    ReasoningErrorKind,
};

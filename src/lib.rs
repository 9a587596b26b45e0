#![forbid(unsafe_code)]

//! Building blocks of the Moosic backend: configuration, the two stream
//! sources, format ranking and the chunked audio relay.

pub mod config;
pub mod formats;
pub mod music;
pub mod relay;
pub mod resolver;
pub mod ytdlp;

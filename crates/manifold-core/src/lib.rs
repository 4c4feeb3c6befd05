#![allow(clippy::must_use_candidate)]

mod error;
mod principal;

pub use error::HttpError;
pub use principal::{AuthContext, Principal};

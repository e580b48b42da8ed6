//! Token line filters.
//!
//! A filter decides, per token, whether the token takes part in
//! counting, based on the token itself and the currently open
//! structural context. Filters are compiled into the binary and
//! selected by name; there is no runtime plug-in loading.

use crate::accum::Accumulator;
use crate::errors::ExtractError;
use crate::vertical::Token;

pub trait LineFilter: Send {
    fn apply(&self, tk: &Token, accum: &Accumulator) -> bool;
}

/// The default filter: every token participates.
pub struct PassAll;

impl LineFilter for PassAll {
    fn apply(&self, _tk: &Token, _accum: &Accumulator) -> bool {
        true
    }
}

/// Resolves a configured filter name. An empty name selects
/// [PassAll].
pub fn filter_by_name(name: &str) -> Result<Box<dyn LineFilter>, ExtractError> {
    match name {
        "" | "pass_all" => Ok(Box::new(PassAll)),
        _ => Err(ExtractError::ConfigInvalid(format!(
            "unknown line filter: {name}"
        ))),
    }
}

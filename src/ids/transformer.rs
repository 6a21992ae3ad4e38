//! Partition ↔ short form
//!
//! A short form is zero or more hierarchical ancestor segments
//! followed by a terminal segment, joined with `.`. The terminal
//! segment is a run of dimension prefixes (one per non-canonical
//! enumerated value) followed by the partition position:
//! `dh2` = done, high, position 2; `1.d1` = first child partition of
//! document `1` with status done.

use std::collections::BTreeMap;

use crate::canonical::{CanonicalView, WILDCARD};
use crate::dimension::DimensionSet;
use crate::error::{Error, Result};
use crate::partition::{DimensionValue, Partition};

pub struct IdTransformer<'a> {
    dims: &'a DimensionSet,
    view: &'a CanonicalView,
}

/// Parsed form of a terminal segment: resolved `(dimension, value)`
/// pairs plus the trailing position.
#[derive(Debug, PartialEq, Eq)]
pub struct TerminalSegment {
    pub values: BTreeMap<String, String>,
    pub position: u64,
}

impl<'a> IdTransformer<'a> {
    pub fn new(dims: &'a DimensionSet, view: &'a CanonicalView) -> Self {
        Self { dims, view }
    }

    /// Render the user-facing short form of a partition. Hierarchical
    /// values are expected to already be rendered parent short forms
    /// (the generator substitutes them before calling).
    pub fn to_short(&self, partition: &Partition) -> String {
        let mut segments = Vec::new();
        for dimension in self.dims.hierarchical() {
            if let Some(value) = partition.value_of(&dimension.name) {
                if !value.is_empty() {
                    segments.push(value.to_string());
                }
            }
        }
        segments.push(self.terminal_segment(partition));
        segments.join(".")
    }

    /// The terminal segment alone: non-canonical prefixes in
    /// dimension order, then the position.
    pub fn terminal_segment(&self, partition: &Partition) -> String {
        let mut out = String::new();
        for dimension in self.dims.enumerated() {
            let value = partition.value_of(&dimension.name).unwrap_or("");
            if value.is_empty() || self.view.is_canonical(&dimension.name, value) {
                continue;
            }
            if let Some(prefix) = dimension.prefix_for(value) {
                out.push_str(prefix);
            }
        }
        out.push_str(&partition.position.to_string());
        out
    }

    /// Parse a short form back into a partition. All but the last
    /// `.`-segment are ancestor short forms and land verbatim on the
    /// first hierarchical dimension; the caller resolves them against
    /// the live document set.
    pub fn from_short(&self, text: &str) -> Result<Partition> {
        if text.is_empty() {
            return Err(Error::parse("empty id"));
        }
        let segments: Vec<&str> = text.split('.').collect();
        let (terminal, ancestors) = match segments.split_last() {
            Some(parts) => parts,
            None => return Err(Error::parse("empty id")),
        };
        let parsed = self.parse_terminal(terminal)?;

        let mut values = Vec::new();
        let mut ancestor_chain = if ancestors.is_empty() {
            None
        } else {
            if self.dims.hierarchical().next().is_none() {
                return Err(Error::parse(format!(
                    "id '{text}' has ancestor segments but no hierarchical dimension is configured"
                )));
            }
            Some(ancestors.join("."))
        };

        for dimension in self.dims.iter() {
            if dimension.is_hierarchical() {
                if let Some(chain) = ancestor_chain.take() {
                    values.push(DimensionValue::new(&dimension.name, chain));
                }
                continue;
            }
            if let Some(value) = parsed.values.get(&dimension.name) {
                values.push(DimensionValue::new(&dimension.name, value.clone()));
                continue;
            }
            // Elided dimension: fill the canonical value back in.
            let fill = match self.view.filter_value(&dimension.name) {
                Some(WILDCARD) | None => dimension.default_value.clone(),
                Some(filter) => Some(filter.to_string()),
            };
            if let Some(fill) = fill {
                values.push(DimensionValue::new(&dimension.name, fill));
            }
        }

        Ok(Partition::new(values, parsed.position))
    }

    /// Parse a terminal segment: a strict prefix run greedily matched
    /// against the prefix table, then a position number.
    pub fn parse_terminal(&self, segment: &str) -> Result<TerminalSegment> {
        if segment.is_empty() {
            return Err(Error::parse("empty id segment"));
        }
        let digits_at = segment
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| Error::parse(format!("segment '{segment}' has no position")))?;
        let (run, digits) = segment.split_at(digits_at);
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::parse(format!(
                "segment '{segment}' interleaves prefixes and digits"
            )));
        }
        let position: u64 = digits
            .parse()
            .map_err(|_| Error::parse(format!("invalid position in segment '{segment}'")))?;

        let mut values = BTreeMap::new();
        let mut rest = run;
        while !rest.is_empty() {
            let (dimension, value, len) = self
                .dims
                .match_prefix(rest)
                .ok_or_else(|| Error::parse(format!("unknown prefix at '{rest}'")))?;
            if values
                .insert(dimension.to_string(), value.to_string())
                .is_some()
            {
                return Err(Error::parse(format!(
                    "segment '{segment}' repeats dimension '{dimension}'"
                )));
            }
            rest = &rest[len..];
        }

        Ok(TerminalSegment { values, position })
    }

    /// Re-render a parsed segment with prefixes in dimension order.
    /// Users may type prefixes in any order; the canonical form is
    /// what the generator produces.
    pub fn canonicalize_segment(&self, segment: &str) -> Result<String> {
        let parsed = self.parse_terminal(segment)?;
        let mut out = String::new();
        for dimension in self.dims.enumerated() {
            if let Some(value) = parsed.values.get(&dimension.name) {
                if let Some(prefix) = dimension.prefix_for(value) {
                    out.push_str(prefix);
                }
            }
        }
        out.push_str(&parsed.position.to_string());
        Ok(out)
    }
}

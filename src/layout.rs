//! Symbolic tensor layouts such as "NCHW" or "[N,?,...,C]".

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::error::PrePostError;

/// A single entry in a [`Layout`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AxisToken {
    /// An axis with a name, such as "N" or "BATCH". Names are stored upper-case.
    Named(String),
    /// An axis with unknown meaning, written as `?`.
    Any,
    /// Zero or more unnamed axes, written as `...`.
    Ellipsis,
}

impl AxisToken {
    fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            _ => None,
        }
    }
}

/// Names of the axes commonly used by pre/post-processing steps.
pub mod axis {
    pub const BATCH: &str = "N";
    pub const CHANNELS: &str = "C";
    pub const DEPTH: &str = "D";
    pub const HEIGHT: &str = "H";
    pub const WIDTH: &str = "W";
}

/// Symbolic description of the meaning of each axis of a tensor.
///
/// Layouts are parsed from strings in one of two forms:
///
/// - Compact, where each character names one axis: `"NCHW"`, `"N?HW"`,
///   `"N...C"`.
/// - Bracketed, where axis names can be longer: `"[N,C,H,W]"`,
///   `"[batch,?,...]"`.
///
/// `?` is an axis of unknown meaning and `...` stands for any number of
/// unknown axes. A layout may contain at most one ellipsis. Names are
/// case-insensitive. The empty string parses to the empty layout, which
/// means "no layout".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde_traits",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct Layout {
    tokens: SmallVec<[AxisToken; 5]>,
}

/// Layout tokens resolved against a concrete rank. Each entry is the axis
/// name, or `None` for an unnamed axis.
type ResolvedAxes<'a> = SmallVec<[Option<&'a str>; 5]>;

impl Layout {
    /// Parse a layout string. See [`Layout`] for the syntax.
    pub fn parse(text: &str) -> Result<Layout, PrePostError> {
        let syntax_error = |reason| PrePostError::InvalidLayoutSyntax {
            layout: text.to_string(),
            reason,
        };

        let trimmed = text.trim();
        let mut tokens = SmallVec::new();

        if let Some(inner) = trimmed.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| syntax_error("missing closing bracket"))?;
            if !inner.trim().is_empty() {
                for entry in inner.split(',') {
                    let entry = entry.trim();
                    let token = match entry {
                        "" => return Err(syntax_error("empty axis name")),
                        "?" => AxisToken::Any,
                        "..." => AxisToken::Ellipsis,
                        name if name.chars().all(is_name_char) => {
                            AxisToken::Named(name.to_ascii_uppercase())
                        }
                        _ => return Err(syntax_error("invalid character in axis name")),
                    };
                    tokens.push(token);
                }
            }
        } else {
            let mut chars = trimmed.chars();
            while let Some(ch) = chars.next() {
                let token = match ch {
                    '?' => AxisToken::Any,
                    '.' => {
                        if chars.next() != Some('.') || chars.next() != Some('.') {
                            return Err(syntax_error("expected \"...\""));
                        }
                        AxisToken::Ellipsis
                    }
                    ']' | ',' => return Err(syntax_error("unexpected bracket syntax")),
                    ch if is_name_char(ch) => AxisToken::Named(ch.to_ascii_uppercase().to_string()),
                    _ => return Err(syntax_error("invalid character in axis name")),
                };
                tokens.push(token);
            }
        }

        let layout = Layout { tokens };
        if layout.tokens.iter().filter(|t| **t == AxisToken::Ellipsis).count() > 1 {
            return Err(syntax_error("more than one ellipsis"));
        }
        for (i, name) in layout.names().enumerate() {
            if layout.names().skip(i + 1).any(|other| other == name) {
                return Err(syntax_error("duplicate axis name"));
            }
        }

        Ok(layout)
    }

    /// Return true if this is the empty layout.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[AxisToken] {
        &self.tokens
    }

    pub fn has_ellipsis(&self) -> bool {
        self.tokens.contains(&AxisToken::Ellipsis)
    }

    /// Return true if the layout has an axis with a given name.
    pub fn has_axis(&self, name: &str) -> bool {
        let name = name.to_ascii_uppercase();
        self.names().any(|n| n == name)
    }

    /// Iterate over the named axes in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(AxisToken::name)
    }

    /// Return the number of axes for a layout without an ellipsis, or the
    /// minimum number of axes otherwise.
    pub fn min_rank(&self) -> usize {
        self.tokens.len() - self.has_ellipsis() as usize
    }

    fn incompatible_rank(&self, rank: Option<usize>) -> PrePostError {
        PrePostError::IncompatibleRank {
            layout: self.to_string(),
            rank,
        }
    }

    /// Expand the layout into one entry per axis of a value with a given rank.
    fn resolve(&self, rank: Option<usize>) -> Result<ResolvedAxes<'_>, PrePostError> {
        let explicit = self.min_rank();
        let rank = match rank {
            Some(rank) if rank == explicit || (self.has_ellipsis() && rank > explicit) => rank,
            None if !self.has_ellipsis() => explicit,
            _ => return Err(self.incompatible_rank(rank)),
        };

        let mut axes = SmallVec::with_capacity(rank);
        for token in &self.tokens {
            match token {
                AxisToken::Named(name) => axes.push(Some(name.as_str())),
                AxisToken::Any => axes.push(None),
                AxisToken::Ellipsis => axes.extend(std::iter::repeat_n(None, rank - explicit)),
            }
        }
        Ok(axes)
    }

    /// Return the index of the axis called `name` in a value of a given rank.
    ///
    /// The rank can be omitted if the axis is not preceded by an ellipsis.
    pub fn find_axis(&self, name: &str, rank: Option<usize>) -> Result<usize, PrePostError> {
        let name = name.to_ascii_uppercase();
        let Some(pos) = self.tokens.iter().position(|t| t.name() == Some(name.as_str())) else {
            return Err(PrePostError::AxisNotFound {
                layout: self.to_string(),
                axis: name,
            });
        };

        if let Some(rank) = rank {
            let axes = self.resolve(Some(rank))?;
            return axes
                .iter()
                .position(|axis| *axis == Some(name.as_str()))
                .ok_or_else(|| self.incompatible_rank(Some(rank)));
        }

        let after_ellipsis = self.tokens[..pos].contains(&AxisToken::Ellipsis);
        if after_ellipsis {
            return Err(self.incompatible_rank(None));
        }
        Ok(pos)
    }

    pub fn height_idx(&self, rank: Option<usize>) -> Result<usize, PrePostError> {
        self.find_axis(axis::HEIGHT, rank)
    }

    pub fn width_idx(&self, rank: Option<usize>) -> Result<usize, PrePostError> {
        self.find_axis(axis::WIDTH, rank)
    }

    pub fn channels_idx(&self, rank: Option<usize>) -> Result<usize, PrePostError> {
        self.find_axis(axis::CHANNELS, rank)
    }

    /// Return the layout of a value after applying a transpose with
    /// permutation `perm`.
    ///
    /// Axis `i` of the result has the meaning of axis `perm[i]` of the input.
    /// Ellipses are expanded, so the result has exactly `perm.len()` axes.
    pub fn permuted(&self, perm: &[usize]) -> Result<Layout, PrePostError> {
        if self.is_empty() {
            return Ok(Layout::default());
        }
        let axes = self.resolve(Some(perm.len()))?;
        let tokens = perm
            .iter()
            .map(|&src| match axes.get(src).copied().flatten() {
                Some(name) => AxisToken::Named(name.to_string()),
                None => AxisToken::Any,
            })
            .collect();
        Ok(Layout { tokens })
    }

    fn is_bracketed(&self) -> bool {
        self.names().any(|name| name.chars().count() > 1)
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Compute the transpose permutation which converts a value with layout `src`
/// into layout `dst`.
///
/// The result `perm` follows the convention of the `Transpose` operator:
/// axis `i` of the output is axis `perm[i]` of the input. Returns `None` if
/// no transpose is needed.
///
/// Named axes are matched by name. An axis which is named in only one of the
/// layouts is matched against an unnamed axis of the other, which requires
/// the names of one layout to be a subset of the other's. Unmatched output
/// axes take the remaining input axes in order.
///
/// `rank` is the rank of the value, if known. It is required if either
/// layout contains an ellipsis.
pub fn find_permutation(
    src: &Layout,
    dst: &Layout,
    rank: Option<usize>,
) -> Result<Option<Vec<usize>>, PrePostError> {
    let rank = match rank {
        Some(rank) => Some(rank),
        None if src.has_ellipsis() || dst.has_ellipsis() => {
            let layout = if src.has_ellipsis() { src } else { dst };
            return Err(layout.incompatible_rank(None));
        }
        None if src.tokens.len() != dst.tokens.len() => {
            return Err(dst.incompatible_rank(Some(src.tokens.len())));
        }
        None => None,
    };

    let src_axes = src.resolve(rank)?;
    let dst_axes = dst.resolve(rank)?;

    let src_in_dst = src.names().all(|name| dst.has_axis(name));
    let dst_in_src = dst.names().all(|name| src.has_axis(name));
    if !src_in_dst && !dst_in_src {
        return Err(PrePostError::AxisMismatch {
            tensor: src.to_string(),
            model: dst.to_string(),
        });
    }

    let mut used: SmallVec<[bool; 5]> = SmallVec::from_elem(false, src_axes.len());
    let mut perm: Vec<Option<usize>> = dst_axes
        .iter()
        .map(|axis| {
            let name = (*axis)?;
            let src_idx = src_axes.iter().position(|a| *a == Some(name))?;
            used[src_idx] = true;
            Some(src_idx)
        })
        .collect();

    let mut unused = (0..src_axes.len()).filter(|i| !used[*i]);
    for slot in perm.iter_mut().filter(|slot| slot.is_none()) {
        *slot = unused.next();
    }

    let perm: Vec<usize> = perm.into_iter().flatten().collect();
    let is_identity = perm.iter().enumerate().all(|(i, &p)| i == p);
    Ok((!is_identity).then_some(perm))
}

/// Return true if `perm` contains each of `0..perm.len()` exactly once.
pub fn is_valid_permutation(perm: &[usize]) -> bool {
    let mut seen: SmallVec<[bool; 8]> = SmallVec::from_elem(false, perm.len());
    perm.iter().all(|&p| {
        if p >= seen.len() || seen[p] {
            return false;
        }
        seen[p] = true;
        true
    })
}

impl FromStr for Layout {
    type Err = PrePostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layout::parse(s)
    }
}

impl TryFrom<String> for Layout {
    type Error = PrePostError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Layout::parse(&s)
    }
}

impl From<Layout> for String {
    fn from(layout: Layout) -> String {
        layout.to_string()
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token_str = |token: &AxisToken| match token {
            AxisToken::Named(name) => name.clone(),
            AxisToken::Any => "?".to_string(),
            AxisToken::Ellipsis => "...".to_string(),
        };

        if self.is_bracketed() {
            let entries: Vec<_> = self.tokens.iter().map(token_str).collect();
            write!(f, "[{}]", entries.join(","))
        } else {
            for token in &self.tokens {
                write!(f, "{}", token_str(token))?;
            }
            Ok(())
        }
    }
}

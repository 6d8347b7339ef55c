use std::fmt;

use smallvec::SmallVec;

/// Size of one axis of a value in a [`Model`](crate::Model) graph.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde_traits", derive(serde::Serialize, serde::Deserialize))]
pub enum Dimension {
    /// A dimension whose size is fixed and specified as part of the model.
    Fixed(usize),

    /// A dimension whose size is determined at runtime.
    Dynamic,
}

impl Dimension {
    /// Return the size if this dimension is fixed.
    pub fn fixed(self) -> Option<usize> {
        match self {
            Self::Fixed(size) => Some(size),
            Self::Dynamic => None,
        }
    }

    pub fn is_dynamic(self) -> bool {
        self == Self::Dynamic
    }

    /// Return true if a value could have a size that matches both `self`
    /// and `other`.
    pub fn compatible(self, other: Dimension) -> bool {
        self.merge(other).is_some()
    }

    /// Return the most specific dimension compatible with both `self` and
    /// `other`, or `None` if they are incompatible.
    pub fn merge(self, other: Dimension) -> Option<Dimension> {
        match (self, other) {
            (Self::Dynamic, dim) | (dim, Self::Dynamic) => Some(dim),
            (Self::Fixed(a), Self::Fixed(b)) if a == b => Some(self),
            _ => None,
        }
    }

    /// Apply `f` to a fixed size. Dynamic dimensions stay dynamic.
    pub fn map(self, f: impl FnOnce(usize) -> usize) -> Dimension {
        match self {
            Self::Fixed(size) => Self::Fixed(f(size)),
            Self::Dynamic => Self::Dynamic,
        }
    }
}

impl From<usize> for Dimension {
    fn from(size: usize) -> Dimension {
        Dimension::Fixed(size)
    }
}

impl From<Option<usize>> for Dimension {
    fn from(size: Option<usize>) -> Dimension {
        size.map(Dimension::Fixed).unwrap_or(Dimension::Dynamic)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => write!(f, "{}", size),
            Self::Dynamic => write!(f, "?"),
        }
    }
}

/// Shape of a value which may have a dynamic rank, or dynamic dimensions.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde_traits", derive(serde::Serialize, serde::Deserialize))]
pub struct PartialShape {
    /// Dimensions, or `None` if the rank is unknown.
    dims: Option<SmallVec<[Dimension; 5]>>,
}

impl PartialShape {
    /// Create a shape with a known rank.
    pub fn new<D: Into<Dimension>>(dims: impl IntoIterator<Item = D>) -> PartialShape {
        PartialShape {
            dims: Some(dims.into_iter().map(Into::into).collect()),
        }
    }

    /// Create a shape with an unknown rank.
    pub fn dynamic() -> PartialShape {
        PartialShape { dims: None }
    }

    /// Create a shape of known rank where every dimension is dynamic.
    pub fn dynamic_with_rank(ndim: usize) -> PartialShape {
        PartialShape {
            dims: Some(SmallVec::from_elem(Dimension::Dynamic, ndim)),
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(|d| d.len())
    }

    pub fn dims(&self) -> Option<&[Dimension]> {
        self.dims.as_deref()
    }

    /// Return dimension `index`, or `Dynamic` if the rank is unknown.
    ///
    /// Panics if the rank is known and `index` is out of bounds.
    pub fn dim(&self, index: usize) -> Dimension {
        match &self.dims {
            Some(dims) => dims[index],
            None => Dimension::Dynamic,
        }
    }

    /// Replace dimension `index`. Does nothing if the rank is unknown.
    ///
    /// Panics if the rank is known and `index` is out of bounds.
    pub fn set_dim(&mut self, index: usize, dim: Dimension) {
        if let Some(dims) = &mut self.dims {
            dims[index] = dim;
        }
    }

    /// Return true if the rank and all dimensions are known.
    pub fn is_static(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(|d| !d.is_dynamic()))
    }

    /// Return the dimensions as sizes if the shape is static.
    pub fn to_static(&self) -> Option<Vec<usize>> {
        self.dims.as_ref()?.iter().map(|d| d.fixed()).collect()
    }

    /// Return true if a value could have a shape that matches both `self` and
    /// `other`.
    pub fn compatible(&self, other: &PartialShape) -> bool {
        self.merge(other).is_some()
    }

    /// Return the most specific shape compatible with both `self` and `other`.
    pub fn merge(&self, other: &PartialShape) -> Option<PartialShape> {
        let (a, b) = match (&self.dims, &other.dims) {
            (None, _) => return Some(other.clone()),
            (_, None) => return Some(self.clone()),
            (Some(a), Some(b)) => (a, b),
        };
        if a.len() != b.len() {
            return None;
        }
        let dims = a
            .iter()
            .zip(b.iter())
            .map(|(a, b)| a.merge(*b))
            .collect::<Option<SmallVec<_>>>()?;
        Some(PartialShape { dims: Some(dims) })
    }

    /// Return the shape after applying a transpose with permutation `perm`,
    /// where output axis `i` is input axis `perm[i]`.
    ///
    /// Shapes of unknown rank are returned unchanged.
    pub fn permuted(&self, perm: &[usize]) -> PartialShape {
        if self.dims.is_none() {
            return self.clone();
        }
        PartialShape::new(perm.iter().map(|&p| self.dim_or_dynamic(p)))
    }

    /// Return the shape which becomes `self` after a transpose with
    /// permutation `perm`.
    ///
    /// Shapes of unknown rank are returned unchanged.
    pub fn unpermuted(&self, perm: &[usize]) -> PartialShape {
        if self.dims.is_none() {
            return self.clone();
        }
        let mut dims: SmallVec<[Dimension; 5]> =
            SmallVec::from_elem(Dimension::Dynamic, perm.len());
        for (i, &p) in perm.iter().enumerate() {
            dims[p] = self.dim_or_dynamic(i);
        }
        PartialShape { dims: Some(dims) }
    }

    fn dim_or_dynamic(&self, index: usize) -> Dimension {
        self.dims
            .as_ref()
            .and_then(|dims| dims.get(index).copied())
            .unwrap_or(Dimension::Dynamic)
    }
}

impl<const N: usize> From<[usize; N]> for PartialShape {
    fn from(dims: [usize; N]) -> PartialShape {
        PartialShape::new(dims)
    }
}

impl From<&[usize]> for PartialShape {
    fn from(dims: &[usize]) -> PartialShape {
        PartialShape::new(dims.iter().copied())
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(dims) = &self.dims else {
            return write!(f, "[...]");
        };
        write!(f, "[")?;
        for (i, dim) in dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "]")
    }
}

/// Construct a [`PartialShape`] of known rank.
///
/// Each entry is either a size or `?` for a dynamic dimension. Entries that
/// are expressions with more than one token must be parenthesized.
///
/// ```
/// use prepost::{shape, Dimension};
///
/// let s = shape![?, 3, 224, 224];
/// assert_eq!(s.dim(0), Dimension::Dynamic);
/// assert_eq!(s.dim(1), Dimension::Fixed(3));
/// ```
#[macro_export]
macro_rules! shape {
    (@dim ?) => {
        $crate::Dimension::Dynamic
    };
    (@dim $x:expr) => {
        $crate::Dimension::from($x)
    };
    ($($x:tt),* $(,)?) => {
        $crate::PartialShape::new::<$crate::Dimension>([$($crate::shape!(@dim $x)),*])
    };
}

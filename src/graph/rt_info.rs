use rustc_hash::FxHashMap;

/// A value stored in a [`RuntimeInfo`] map.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde_traits",
    derive(serde::Serialize, serde::Deserialize),
    serde(untagged)
)]
pub enum RtValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&str> for RtValue {
    fn from(val: &str) -> RtValue {
        RtValue::Str(val.to_string())
    }
}

impl From<String> for RtValue {
    fn from(val: String) -> RtValue {
        RtValue::Str(val)
    }
}

impl From<i64> for RtValue {
    fn from(val: i64) -> RtValue {
        RtValue::Int(val)
    }
}

impl From<f64> for RtValue {
    fn from(val: f64) -> RtValue {
        RtValue::Float(val)
    }
}

impl From<bool> for RtValue {
    fn from(val: bool) -> RtValue {
        RtValue::Bool(val)
    }
}

/// Opaque key-value metadata attached to nodes and values.
///
/// Pre/post-processing copies runtime info from the nodes it replaces and
/// otherwise leaves it alone, except for the [`MEMORY_TYPE`] key.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde_traits", derive(serde::Serialize, serde::Deserialize))]
pub struct RuntimeInfo {
    entries: FxHashMap<String, RtValue>,
}

/// Runtime info key for the memory type of a model input, eg. a device
/// specific surface type for NV12 planes.
pub const MEMORY_TYPE: &str = "memory_type";

impl RuntimeInfo {
    pub fn new() -> RuntimeInfo {
        RuntimeInfo::default()
    }

    pub fn get(&self, key: &str) -> Option<&RtValue> {
        self.entries.get(key)
    }

    /// Return the value of a string entry.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            RtValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RtValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<RtValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RtValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

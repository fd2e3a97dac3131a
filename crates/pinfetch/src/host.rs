//! Reading settings from the host build tool's properties.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A host-provided property lookup, such as a build tool's project properties.
pub trait PropertyLookup {
    fn find_property(&self, key: &str) -> Option<String>;
}

impl PropertyLookup for HashMap<String, String> {
    fn find_property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<F> PropertyLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn find_property(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Required property; `desc` explains what it is for when it is missing.
pub fn proj(lookup: &impl PropertyLookup, key: &str, desc: &str) -> Result<String> {
    lookup
        .find_property(key)
        .ok_or_else(|| Error::UndefinedProperty {
            key: key.to_string(),
            desc: desc.to_string(),
        })
}

pub fn proj_optional(lookup: &impl PropertyLookup, key: &str) -> Option<String> {
    lookup.find_property(key)
}

/// Required property parsed as `T`.
pub fn proj_parse<T: FromStr>(lookup: &impl PropertyLookup, key: &str, desc: &str) -> Result<T> {
    let value = proj(lookup, key, desc)?;
    value.parse().map_err(|_| Error::WrongPropertyType {
        key: key.to_string(),
        desc: desc.to_string(),
        expected: std::any::type_name::<T>(),
        value,
    })
}

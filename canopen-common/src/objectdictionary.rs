//! Object dictionary model and EDS import.
//!
//! A dictionary is a flat map of `(index, subindex)` to [`Variable`]. EDS
//! files are read with `configparser`; `[XXXX]` sections describe plain
//! variables and `[XXXXsubN]` sections describe record/array members.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use configparser::ini::Ini;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// CANopen basic data types (CiA 301 data type indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int8,
    Int16,
    Int32,
    UInt8,
    UInt16,
    UInt32,
    Real32,
    VisibleString,
    OctetString,
    Int64,
    UInt64,
    Real64,
    Domain,
}

impl DataType {
    /// Map a CiA 301 data type index to a [`DataType`].
    pub fn from_index(index: u16) -> Option<Self> {
        match index {
            0x0001 => Some(Self::Boolean),
            0x0002 => Some(Self::Int8),
            0x0003 => Some(Self::Int16),
            0x0004 => Some(Self::Int32),
            0x0005 => Some(Self::UInt8),
            0x0006 => Some(Self::UInt16),
            0x0007 => Some(Self::UInt32),
            0x0008 => Some(Self::Real32),
            0x0009 => Some(Self::VisibleString),
            0x000A => Some(Self::OctetString),
            0x000F => Some(Self::Domain),
            0x0011 => Some(Self::Real64),
            0x0015 => Some(Self::Int64),
            0x001B => Some(Self::UInt64),
            _ => None,
        }
    }

    /// Parse the `DataType=` value of an EDS entry ("0x0007", "7").
    pub fn from_eds_type(eds_type: &str) -> Option<Self> {
        parse_number(eds_type)
            .and_then(|value| u16::try_from(value).ok())
            .and_then(Self::from_index)
    }

    /// Encoded size in bytes, `None` for variable-length types.
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::Boolean | Self::Int8 | Self::UInt8 => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Real32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Real64 => Some(8),
            Self::VisibleString | Self::OctetString | Self::Domain => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    Const,
}

impl AccessType {
    pub fn from_eds(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ro" => Some(Self::ReadOnly),
            "wo" => Some(Self::WriteOnly),
            "rw" | "rwr" | "rww" => Some(Self::ReadWrite),
            "const" => Some(Self::Const),
            _ => None,
        }
    }

    pub fn is_readable(&self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// A single addressable entry of the dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub index: u16,
    pub subindex: u8,
    pub name: String,
    pub data_type: DataType,
    pub access: AccessType,
    pub default_value: Option<String>,
}

impl Variable {
    pub fn new(index: u16, subindex: u8, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            index,
            subindex,
            name: name.into(),
            data_type,
            access: AccessType::ReadWrite,
            default_value: None,
        }
    }

    pub fn with_access(mut self, access: AccessType) -> Self {
        self.access = access;
        self
    }
}

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("Object dictionary file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid entry [{section}]: {reason}")]
    InvalidEntry { section: String, reason: String },
}

/// In-memory object dictionary of one device.
#[derive(Debug, Clone, Default)]
pub struct ObjectDictionary {
    variables: BTreeMap<(u16, u8), Variable>,
    names: HashMap<String, (u16, u8)>,
    pub device_name: Option<String>,
}

impl ObjectDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable, replacing any entry at the same address.
    pub fn add(&mut self, variable: Variable) {
        let key = (variable.index, variable.subindex);
        if let Some(previous) = self.variables.get(&key) {
            if self.names.get(&previous.name) == Some(&key) {
                self.names.remove(&previous.name);
            }
        }
        self.names.insert(variable.name.clone(), key);
        self.variables.insert(key, variable);
    }

    pub fn get(&self, index: u16, subindex: u8) -> Option<&Variable> {
        self.variables.get(&(index, subindex))
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Variable> {
        self.names.get(name).and_then(|key| self.variables.get(key))
    }

    pub fn contains(&self, index: u16, subindex: u8) -> bool {
        self.variables.contains_key(&(index, subindex))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Variables in ascending (index, subindex) order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Variables an SDO client may read.
    pub fn readable(&self) -> impl Iterator<Item = &Variable> {
        self.iter().filter(|variable| variable.access.is_readable())
    }
}

/// Where a node's object dictionary comes from.
#[derive(Debug, Clone, Default)]
pub enum DictionarySource {
    /// No description; the node only routes frames.
    #[default]
    Empty,
    /// Path to an EDS file.
    Eds(PathBuf),
    /// An already built dictionary.
    Dictionary(ObjectDictionary),
    /// A dictionary shared with other nodes.
    Shared(Arc<ObjectDictionary>),
}

impl From<PathBuf> for DictionarySource {
    fn from(path: PathBuf) -> Self {
        Self::Eds(path)
    }
}

impl From<&Path> for DictionarySource {
    fn from(path: &Path) -> Self {
        Self::Eds(path.to_path_buf())
    }
}

impl From<ObjectDictionary> for DictionarySource {
    fn from(dictionary: ObjectDictionary) -> Self {
        Self::Dictionary(dictionary)
    }
}

impl From<Arc<ObjectDictionary>> for DictionarySource {
    fn from(dictionary: Arc<ObjectDictionary>) -> Self {
        Self::Shared(dictionary)
    }
}

impl<T: Into<DictionarySource>> From<Option<T>> for DictionarySource {
    fn from(source: Option<T>) -> Self {
        source.map(Into::into).unwrap_or_default()
    }
}

/// Resolve any [`DictionarySource`] into a shared dictionary.
pub fn import_any(source: DictionarySource) -> Result<Arc<ObjectDictionary>, DictionaryError> {
    match source {
        DictionarySource::Empty => Ok(Arc::new(ObjectDictionary::new())),
        DictionarySource::Eds(path) => import_eds(&path).map(Arc::new),
        DictionarySource::Dictionary(dictionary) => Ok(Arc::new(dictionary)),
        DictionarySource::Shared(dictionary) => Ok(dictionary),
    }
}

/// Parse an EDS file.
pub fn import_eds(path: &Path) -> Result<ObjectDictionary, DictionaryError> {
    if !path.exists() {
        return Err(DictionaryError::NotFound(path.to_path_buf()));
    }

    let mut config = Ini::new();
    let map = config.load(path).map_err(|reason| DictionaryError::Parse {
        path: path.to_path_buf(),
        reason,
    })?;

    let mut dictionary = ObjectDictionary::new();
    dictionary.device_name = map
        .get("deviceinfo")
        .and_then(|props| props.get("productname"))
        .and_then(|value| value.clone());

    for (section, properties) in &map {
        let Some((index, subindex)) = parse_section_name(section) else {
            continue;
        };

        let property = |key: &str| properties.get(key).and_then(|value| value.as_deref());

        // records and arrays only describe their members
        let Some(raw_type) = property("datatype") else {
            continue;
        };

        let data_type = DataType::from_eds_type(raw_type).unwrap_or_else(|| {
            debug!("[{}] unsupported data type {}, treating as DOMAIN", section, raw_type);
            DataType::Domain
        });
        let access = match property("accesstype") {
            Some(raw) => AccessType::from_eds(raw).ok_or_else(|| DictionaryError::InvalidEntry {
                section: section.clone(),
                reason: format!("unknown access type '{}'", raw),
            })?,
            None => AccessType::ReadWrite,
        };

        let mut name = property("parametername").unwrap_or("").to_string();
        if section.contains("sub") {
            if let Some(parent) = map
                .get(&format!("{:04x}", index))
                .and_then(|props| props.get("parametername"))
                .and_then(|value| value.as_deref())
            {
                name = format!("{}.{}", parent, name);
            }
        }

        dictionary.add(Variable {
            index,
            subindex,
            name,
            data_type,
            access,
            default_value: property("defaultvalue").map(str::to_string),
        });
    }

    Ok(dictionary)
}

/// `"1018"` -> `(0x1018, 0)`, `"1018sub2"` -> `(0x1018, 2)`.
fn parse_section_name(section: &str) -> Option<(u16, u8)> {
    let (index_str, sub_str) = match section.split_once("sub") {
        Some((index, sub)) => (index, Some(sub)),
        None => (section, None),
    };
    if index_str.len() != 4 {
        return None;
    }
    let index = u16::from_str_radix(index_str, 16).ok()?;
    let subindex = match sub_str {
        Some(sub) => u8::from_str_radix(sub, 16).ok()?,
        None => 0,
    };
    Some((index, subindex))
}

/// Parse "0x..." hex or plain decimal.
fn parse_number(value: &str) -> Option<u32> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

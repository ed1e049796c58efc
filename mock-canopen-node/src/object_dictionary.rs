//! Simulated object dictionary of the mock node.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rand::Rng;

use canopen_common::sdo::{
    ABORT_LENGTH_MISMATCH, ABORT_OBJECT_DOES_NOT_EXIST, ABORT_READ_ONLY, ABORT_WRITE_ONLY,
};
use canopen_common::{AccessType, DataType, SdoValue};

type Generator = Box<dyn Fn() -> Vec<u8> + Send + Sync>;

enum Value {
    /// Stored bytes, replaced by downloads when writable
    Static(Vec<u8>),
    /// Generated on each read
    Dynamic(Generator),
}

struct Entry {
    value: Value,
    data_type: DataType,
    access: AccessType,
}

fn data_type_of(value: &SdoValue) -> DataType {
    match value {
        SdoValue::Boolean(_) => DataType::Boolean,
        SdoValue::UInt8(_) => DataType::UInt8,
        SdoValue::UInt16(_) => DataType::UInt16,
        SdoValue::UInt32(_) => DataType::UInt32,
        SdoValue::UInt64(_) => DataType::UInt64,
        SdoValue::Int8(_) => DataType::Int8,
        SdoValue::Int16(_) => DataType::Int16,
        SdoValue::Int32(_) => DataType::Int32,
        SdoValue::Int64(_) => DataType::Int64,
        SdoValue::Real32(_) => DataType::Real32,
        SdoValue::Real64(_) => DataType::Real64,
        SdoValue::String(_) => DataType::VisibleString,
        SdoValue::Bytes(_) => DataType::OctetString,
    }
}

/// (index, subindex) -> value, static or generated.
#[derive(Default)]
pub struct SimulatedDictionary {
    entries: BTreeMap<(u16, u8), Entry>,
}

impl SimulatedDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixed value
    pub fn add_static(&mut self, index: u16, subindex: u8, value: SdoValue, access: AccessType) {
        self.entries.insert(
            (index, subindex),
            Entry {
                data_type: data_type_of(&value),
                value: Value::Static(value.to_le_bytes()),
                access,
            },
        );
    }

    /// Add a read-only value produced by `generator` on every read
    pub fn add_dynamic<F>(&mut self, index: u16, subindex: u8, data_type: DataType, generator: F)
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        self.entries.insert(
            (index, subindex),
            Entry {
                value: Value::Dynamic(Box::new(generator)),
                data_type,
                access: AccessType::ReadOnly,
            },
        );
    }

    /// Current bytes of an entry. Errors are SDO abort codes.
    pub fn read(&self, index: u16, subindex: u8) -> Result<(Vec<u8>, DataType), u32> {
        let entry = self
            .entries
            .get(&(index, subindex))
            .ok_or(ABORT_OBJECT_DOES_NOT_EXIST)?;
        if !entry.access.is_readable() {
            return Err(ABORT_WRITE_ONLY);
        }
        let bytes = match &entry.value {
            Value::Static(bytes) => bytes.clone(),
            Value::Dynamic(generator) => generator(),
        };
        Ok((bytes, entry.data_type))
    }

    /// Store downloaded bytes. Errors are SDO abort codes.
    pub fn write(&mut self, index: u16, subindex: u8, data: &[u8]) -> Result<(), u32> {
        let entry = self
            .entries
            .get_mut(&(index, subindex))
            .ok_or(ABORT_OBJECT_DOES_NOT_EXIST)?;
        if !entry.access.is_writable() {
            return Err(ABORT_READ_ONLY);
        }
        if entry.data_type.size().is_some_and(|size| size != data.len()) {
            return Err(ABORT_LENGTH_MISMATCH);
        }
        entry.value = Value::Static(data.to_vec());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// One line per entry, ordered by index
    pub fn summary(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|((index, subindex), entry)| {
                let kind = match entry.value {
                    Value::Static(_) => "Static",
                    Value::Dynamic(_) => "Dynamic",
                };
                format!(
                    "0x{:04X}:{:02X} - {} {:?} ({:?})",
                    index, subindex, kind, entry.data_type, entry.access
                )
            })
            .collect()
    }

    /// Standard identity objects plus simulated sensors.
    pub fn with_test_objects(node_id: u8) -> Self {
        let mut dictionary = Self::new();

        dictionary.add_static(0x1000, 0x00, SdoValue::UInt32(0x0000_0191), AccessType::Const);
        dictionary.add_static(0x1001, 0x00, SdoValue::UInt8(0), AccessType::ReadOnly);
        dictionary.add_static(
            0x1008,
            0x00,
            SdoValue::String(format!("N{:03}", node_id)),
            AccessType::Const,
        );
        dictionary.add_static(0x1017, 0x00, SdoValue::UInt16(1000), AccessType::ReadWrite);
        dictionary.add_static(0x1018, 0x01, SdoValue::UInt32(0x0000_0001), AccessType::ReadOnly);

        // temperature, 20-30 °C
        dictionary.add_dynamic(0x2000, 0x01, DataType::Real32, || {
            rand::rng().random_range(20.0f32..30.0).to_le_bytes().to_vec()
        });
        // pressure, 95-105 kPa
        dictionary.add_dynamic(0x2000, 0x02, DataType::Real32, || {
            rand::rng().random_range(95.0f32..105.0).to_le_bytes().to_vec()
        });

        let counter = Arc::new(AtomicU32::new(0));
        dictionary.add_dynamic(0x2001, 0x01, DataType::UInt32, move || {
            counter.fetch_add(1, Ordering::SeqCst).to_le_bytes().to_vec()
        });

        // voltage and current
        dictionary.add_dynamic(0x2002, 0x01, DataType::Real32, || {
            rand::rng().random_range(11.5f32..12.5).to_le_bytes().to_vec()
        });
        dictionary.add_dynamic(0x2002, 0x02, DataType::Real32, || {
            rand::rng().random_range(0.5f32..5.0).to_le_bytes().to_vec()
        });

        dictionary.add_static(0x2003, 0x01, SdoValue::UInt16(0x0031), AccessType::ReadOnly);
        dictionary.add_static(0x2003, 0x02, SdoValue::UInt16(0x000F), AccessType::ReadWrite);

        // motor speed
        dictionary.add_dynamic(0x2004, 0x01, DataType::Int32, || {
            rand::rng().random_range(1000i32..3000).to_le_bytes().to_vec()
        });

        let position = Arc::new(AtomicU32::new(0));
        dictionary.add_dynamic(0x2005, 0x01, DataType::Int32, move || {
            (position.fetch_add(10, Ordering::SeqCst) as i32)
                .to_le_bytes()
                .to_vec()
        });

        dictionary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_and_dynamic_reads() {
        let dictionary = SimulatedDictionary::with_test_objects(4);

        assert_eq!(
            dictionary.read(0x1000, 0),
            Ok((vec![0x91, 0x01, 0x00, 0x00], DataType::UInt32))
        );
        assert_eq!(
            dictionary.read(0x1008, 0),
            Ok((b"N004".to_vec(), DataType::VisibleString))
        );

        let first = dictionary.read(0x2001, 1).unwrap().0;
        let second = dictionary.read(0x2001, 1).unwrap().0;
        assert_eq!(first, 0u32.to_le_bytes().to_vec());
        assert_eq!(second, 1u32.to_le_bytes().to_vec());

        let (bytes, data_type) = dictionary.read(0x2000, 1).unwrap();
        let temperature = f32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(data_type, DataType::Real32);
        assert!((20.0..30.0).contains(&temperature));
    }

    #[test]
    fn test_missing_entry() {
        let dictionary = SimulatedDictionary::new();
        assert_eq!(dictionary.read(0x6000, 0), Err(ABORT_OBJECT_DOES_NOT_EXIST));
    }

    #[test]
    fn test_write_only_entry_is_not_readable() {
        let mut dictionary = SimulatedDictionary::new();
        dictionary.add_static(0x1010, 0x01, SdoValue::UInt32(0), AccessType::WriteOnly);

        assert_eq!(dictionary.read(0x1010, 0x01), Err(ABORT_WRITE_ONLY));
        assert_eq!(dictionary.write(0x1010, 0x01, b"save"), Ok(()));
        assert_eq!(dictionary.read(0x1010, 0x01), Err(ABORT_WRITE_ONLY));
    }

    #[test]
    fn test_writes() {
        let mut dictionary = SimulatedDictionary::with_test_objects(4);

        assert_eq!(dictionary.write(0x2003, 0x02, &[0x06, 0x00]), Ok(()));
        assert_eq!(dictionary.read(0x2003, 0x02).unwrap().0, vec![0x06, 0x00]);

        assert_eq!(dictionary.write(0x2003, 0x02, &[0x06]), Err(ABORT_LENGTH_MISMATCH));
        assert_eq!(dictionary.write(0x1000, 0x00, &[0; 4]), Err(ABORT_READ_ONLY));
        assert_eq!(dictionary.write(0x2001, 0x01, &[0; 4]), Err(ABORT_READ_ONLY));
        assert_eq!(dictionary.write(0x7000, 0x00, &[0]), Err(ABORT_OBJECT_DOES_NOT_EXIST));
    }

    #[test]
    fn test_summary_is_sorted() {
        let dictionary = SimulatedDictionary::with_test_objects(1);
        let summary = dictionary.summary();
        assert_eq!(summary.len(), dictionary.len());
        assert!(summary[0].starts_with("0x1000:00 - Static UInt32"));
        assert!(summary.last().unwrap().starts_with("0x2005:01 - Dynamic Int32"));
    }
}

//! pprof profile library.
//!
//! This library holds a resolved, string-based model of a pprof profile,
//! validates it, writes it as (gzip-compressed) protobuf and reads it back
//! from any `Read`-able source.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use pprof_parse::Profile;
//!
//! let file = File::open("profile.pb.gz").unwrap();
//! let profile = Profile::parse(file).unwrap();
//!
//! println!("Samples: {}", profile.samples.len());
//! println!("Locations: {}", profile.locations.len());
//! ```

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use prost::Message;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use thiserror::Error;

pub mod proto;

/// Structural problems that make a profile unusable by pprof tooling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing sample type information")]
    MissingSampleType,

    #[error("sample {index} has {found} values, expected {expected}")]
    SampleValueCount {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("found function with reserved id 0")]
    ZeroFunctionId,

    #[error("multiple functions with id {0}")]
    DuplicateFunctionId(u64),

    #[error("found location with reserved id 0")]
    ZeroLocationId,

    #[error("multiple locations with id {0}")]
    DuplicateLocationId(u64),

    #[error("location {location_id} references non-existent function {function_id}")]
    InvalidFunctionReference { location_id: u64, function_id: u64 },

    #[error("sample {sample_index} references non-existent location {location_id}")]
    InvalidLocationReference {
        sample_index: usize,
        location_id: u64,
    },
}

/// Errors that can occur while reading a pprof file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("string table index {0} out of range")]
    InvalidStringIndex(i64),

    #[error("invalid profile: {0}")]
    Invalid(#[from] ValidationError),
}

/// Result type for pprof parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors that can occur during pprof writing.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pprof writing operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

// ============================================================================
// Profile types
// ============================================================================

/// Type and unit of one sample value, e.g. `cpu`/`nanoseconds`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValueType {
    pub kind: String,
    pub unit: String,
}

impl ValueType {
    pub fn new(kind: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            unit: unit.into(),
        }
    }
}

/// A function, referenced by location lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Function {
    pub id: u64,
    pub name: String,
    pub system_name: String,
    pub filename: String,
    pub start_line: i64,
}

/// One (possibly inlined) function entry of a location.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line {
    /// Id of the referenced [`Function`], 0 if unknown.
    pub function_id: u64,
    pub line: i64,
}

/// A unique place in the program, shared between samples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub id: u64,
    pub address: u64,
    pub lines: Vec<Line>,
    pub is_folded: bool,
}

/// A weighted stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sample {
    /// Location ids, leaf first.
    pub location_ids: Vec<u64>,
    /// One value per profile sample type.
    pub values: Vec<i64>,
    pub labels: BTreeMap<String, Vec<String>>,
    pub num_labels: BTreeMap<String, Vec<i64>>,
}

/// A complete pprof profile with all string references resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub sample_types: Vec<ValueType>,
    pub samples: Vec<Sample>,
    pub locations: Vec<Location>,
    pub functions: Vec<Function>,
    pub time_nanos: i64,
    pub duration_nanos: i64,
    pub period_type: Option<ValueType>,
    pub period: i64,
    pub comments: Vec<String>,
    pub default_sample_type: String,
}

impl Profile {
    /// Parse a pprof profile from any `Read`-able source.
    ///
    /// Both gzip-compressed and raw protobuf input are accepted. The decoded
    /// profile is validated before it is returned.
    pub fn parse<R: Read>(mut reader: R) -> Result<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;

        // gzip magic number
        let data = if raw.starts_with(&[0x1f, 0x8b]) {
            let mut decoded = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
            decoded
        } else {
            raw
        };

        let message = proto::Profile::decode(data.as_slice())?;
        let profile = Self::from_proto(message)?;
        profile.check_valid()?;
        Ok(profile)
    }

    /// Check the structural invariants pprof tooling relies on.
    pub fn check_valid(&self) -> std::result::Result<(), ValidationError> {
        if self.sample_types.is_empty() {
            return Err(ValidationError::MissingSampleType);
        }

        let mut function_ids: HashSet<u64> = HashSet::new();
        for function in &self.functions {
            if function.id == 0 {
                return Err(ValidationError::ZeroFunctionId);
            }
            if !function_ids.insert(function.id) {
                return Err(ValidationError::DuplicateFunctionId(function.id));
            }
        }

        let mut location_ids: HashSet<u64> = HashSet::new();
        for location in &self.locations {
            if location.id == 0 {
                return Err(ValidationError::ZeroLocationId);
            }
            if !location_ids.insert(location.id) {
                return Err(ValidationError::DuplicateLocationId(location.id));
            }
            for line in &location.lines {
                if line.function_id != 0 && !function_ids.contains(&line.function_id) {
                    return Err(ValidationError::InvalidFunctionReference {
                        location_id: location.id,
                        function_id: line.function_id,
                    });
                }
            }
        }

        let expected = self.sample_types.len();
        for (index, sample) in self.samples.iter().enumerate() {
            if sample.values.len() != expected {
                return Err(ValidationError::SampleValueCount {
                    index,
                    expected,
                    found: sample.values.len(),
                });
            }
            for &location_id in &sample.location_ids {
                if !location_ids.contains(&location_id) {
                    return Err(ValidationError::InvalidLocationReference {
                        sample_index: index,
                        location_id,
                    });
                }
            }
        }

        Ok(())
    }

    /// Look up a function by id.
    pub fn function(&self, id: u64) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == id)
    }

    /// Look up a location by id.
    pub fn location(&self, id: u64) -> Option<&Location> {
        self.locations.iter().find(|l| l.id == id)
    }

    /// Names of the functions on a sample's stack, leaf first.
    ///
    /// Only the first line of every location is used; unresolvable entries
    /// are skipped.
    pub fn sample_function_names(&self, sample: &Sample) -> Vec<&str> {
        sample
            .location_ids
            .iter()
            .filter_map(|&id| self.location(id))
            .filter_map(|location| location.lines.first())
            .filter_map(|line| self.function(line.function_id))
            .map(|function| function.name.as_str())
            .collect()
    }

    /// Write this profile as gzip-compressed protobuf, the format pprof
    /// tooling expects on disk.
    pub fn write<W: Write>(&self, writer: W) -> WriteResult<()> {
        let mut gzip = GzEncoder::new(writer, Compression::default());
        gzip.write_all(&self.to_proto().encode_to_vec())?;
        gzip.finish()?;
        Ok(())
    }

    /// Write this profile as raw, uncompressed protobuf.
    pub fn write_uncompressed<W: Write>(&self, mut writer: W) -> WriteResult<()> {
        writer.write_all(&self.to_proto().encode_to_vec())?;
        Ok(())
    }

    /// Build the wire representation, interning every string.
    pub fn to_proto(&self) -> proto::Profile {
        let mut strings = StringTable::new();

        let sample_type = self
            .sample_types
            .iter()
            .map(|vt| strings.value_type(vt))
            .collect();

        let sample = self
            .samples
            .iter()
            .map(|s| {
                let mut label = Vec::new();
                for (key, values) in &s.labels {
                    for value in values {
                        label.push(proto::Label {
                            key: strings.intern(key),
                            str: strings.intern(value),
                            ..proto::Label::default()
                        });
                    }
                }
                for (key, values) in &s.num_labels {
                    for &num in values {
                        label.push(proto::Label {
                            key: strings.intern(key),
                            num,
                            ..proto::Label::default()
                        });
                    }
                }
                proto::Sample {
                    location_id: s.location_ids.clone(),
                    value: s.values.clone(),
                    label,
                }
            })
            .collect();

        let location = self
            .locations
            .iter()
            .map(|l| proto::Location {
                id: l.id,
                mapping_id: 0,
                address: l.address,
                line: l
                    .lines
                    .iter()
                    .map(|line| proto::Line {
                        function_id: line.function_id,
                        line: line.line,
                    })
                    .collect(),
                is_folded: l.is_folded,
            })
            .collect();

        let function = self
            .functions
            .iter()
            .map(|f| proto::Function {
                id: f.id,
                name: strings.intern(&f.name),
                system_name: strings.intern(&f.system_name),
                filename: strings.intern(&f.filename),
                start_line: f.start_line,
            })
            .collect();

        let period_type = self.period_type.as_ref().map(|vt| strings.value_type(vt));
        let comment = self.comments.iter().map(|c| strings.intern(c)).collect();
        let default_sample_type = strings.intern(&self.default_sample_type);

        proto::Profile {
            sample_type,
            sample,
            mapping: Vec::new(),
            location,
            function,
            string_table: strings.into_inner(),
            drop_frames: 0,
            keep_frames: 0,
            time_nanos: self.time_nanos,
            duration_nanos: self.duration_nanos,
            period_type,
            period: self.period,
            comment,
            default_sample_type,
        }
    }

    /// Resolve a decoded wire profile into the string-based model.
    pub fn from_proto(message: proto::Profile) -> Result<Self> {
        let strings = &message.string_table;
        let lookup = |index: i64| -> Result<String> {
            usize::try_from(index)
                .ok()
                .and_then(|i| strings.get(i))
                .cloned()
                .ok_or(ParseError::InvalidStringIndex(index))
        };
        let value_type = |vt: &proto::ValueType| -> Result<ValueType> {
            Ok(ValueType {
                kind: lookup(vt.r#type)?,
                unit: lookup(vt.unit)?,
            })
        };

        let sample_types = message
            .sample_type
            .iter()
            .map(value_type)
            .collect::<Result<Vec<_>>>()?;

        let mut samples = Vec::with_capacity(message.sample.len());
        for s in &message.sample {
            let mut labels: BTreeMap<String, Vec<String>> = BTreeMap::new();
            let mut num_labels: BTreeMap<String, Vec<i64>> = BTreeMap::new();
            for label in &s.label {
                let key = lookup(label.key)?;
                if label.str != 0 {
                    labels.entry(key).or_default().push(lookup(label.str)?);
                } else if label.num != 0 || label.num_unit != 0 {
                    num_labels.entry(key).or_default().push(label.num);
                }
            }
            samples.push(Sample {
                location_ids: s.location_id.clone(),
                values: s.value.clone(),
                labels,
                num_labels,
            });
        }

        let locations = message
            .location
            .iter()
            .map(|l| Location {
                id: l.id,
                address: l.address,
                lines: l
                    .line
                    .iter()
                    .map(|line| Line {
                        function_id: line.function_id,
                        line: line.line,
                    })
                    .collect(),
                is_folded: l.is_folded,
            })
            .collect();

        let functions = message
            .function
            .iter()
            .map(|f| {
                Ok(Function {
                    id: f.id,
                    name: lookup(f.name)?,
                    system_name: lookup(f.system_name)?,
                    filename: lookup(f.filename)?,
                    start_line: f.start_line,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let period_type = message.period_type.as_ref().map(value_type).transpose()?;
        let comments = message
            .comment
            .iter()
            .map(|&c| lookup(c))
            .collect::<Result<Vec<_>>>()?;

        Ok(Profile {
            sample_types,
            samples,
            locations,
            functions,
            time_nanos: message.time_nanos,
            duration_nanos: message.duration_nanos,
            period_type,
            period: message.period,
            comments,
            default_sample_type: lookup(message.default_sample_type)?,
        })
    }
}

// ============================================================================
// String table
// ============================================================================

/// Interning table used while encoding. Index 0 is always "".
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, i64>,
}

impl StringTable {
    fn new() -> Self {
        let mut index = HashMap::new();
        index.insert(String::new(), 0);
        Self {
            strings: vec![String::new()],
            index,
        }
    }

    fn intern(&mut self, text: &str) -> i64 {
        if let Some(&id) = self.index.get(text) {
            return id;
        }
        let id = self.strings.len() as i64;
        self.strings.push(text.to_string());
        self.index.insert(text.to_string(), id);
        id
    }

    fn value_type(&mut self, vt: &ValueType) -> proto::ValueType {
        proto::ValueType {
            r#type: self.intern(&vt.kind),
            unit: self.intern(&vt.unit),
        }
    }

    fn into_inner(self) -> Vec<String> {
        self.strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_profile() -> Profile {
        let mut labels = BTreeMap::new();
        labels.insert("thread_name".to_string(), vec!["main".to_string()]);
        let mut num_labels = BTreeMap::new();
        num_labels.insert("pid".to_string(), vec![42]);

        Profile {
            sample_types: vec![ValueType::new("cpu", "nanoseconds")],
            samples: vec![Sample {
                location_ids: vec![2, 1],
                values: vec![1_000_000],
                labels,
                num_labels,
            }],
            locations: vec![
                Location {
                    id: 1,
                    lines: vec![Line {
                        function_id: 1,
                        line: 0,
                    }],
                    ..Location::default()
                },
                Location {
                    id: 2,
                    lines: vec![Line {
                        function_id: 2,
                        line: 0,
                    }],
                    ..Location::default()
                },
            ],
            functions: vec![
                Function {
                    id: 1,
                    name: "main".to_string(),
                    system_name: "main".to_string(),
                    ..Function::default()
                },
                Function {
                    id: 2,
                    name: "work".to_string(),
                    system_name: "work".to_string(),
                    ..Function::default()
                },
            ],
            ..Profile::default()
        }
    }

    #[test]
    fn minimal_profile_is_valid() {
        assert_eq!(minimal_profile().check_valid(), Ok(()));
    }

    #[test]
    fn missing_sample_type_fails() {
        let mut profile = minimal_profile();
        profile.sample_types.clear();
        assert_eq!(
            profile.check_valid(),
            Err(ValidationError::MissingSampleType)
        );
    }

    #[test]
    fn sample_value_count_must_match_sample_types() {
        let mut profile = minimal_profile();
        profile.samples[0].values.push(3);
        assert_eq!(
            profile.check_valid(),
            Err(ValidationError::SampleValueCount {
                index: 0,
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn duplicate_location_id_fails() {
        let mut profile = minimal_profile();
        profile.locations[1].id = 1;
        assert_eq!(
            profile.check_valid(),
            Err(ValidationError::DuplicateLocationId(1))
        );
    }

    #[test]
    fn zero_function_id_fails() {
        let mut profile = minimal_profile();
        profile.functions[0].id = 0;
        assert_eq!(profile.check_valid(), Err(ValidationError::ZeroFunctionId));
    }

    #[test]
    fn invalid_function_reference_fails() {
        let mut profile = minimal_profile();
        profile.locations[0].lines[0].function_id = 99;
        assert_eq!(
            profile.check_valid(),
            Err(ValidationError::InvalidFunctionReference {
                location_id: 1,
                function_id: 99
            })
        );
    }

    #[test]
    fn invalid_location_reference_fails() {
        let mut profile = minimal_profile();
        profile.samples[0].location_ids.push(7);
        assert_eq!(
            profile.check_valid(),
            Err(ValidationError::InvalidLocationReference {
                sample_index: 0,
                location_id: 7
            })
        );
    }

    #[test]
    fn string_table_starts_with_empty_string() {
        let message = minimal_profile().to_proto();
        assert_eq!(message.string_table[0], "");
        assert_eq!(message.string_table[1], "cpu");
        assert_eq!(message.string_table[2], "nanoseconds");
        // "main" is interned once, shared by the label value and the function.
        let mains = message
            .string_table
            .iter()
            .filter(|s| s.as_str() == "main")
            .count();
        assert_eq!(mains, 1);
    }

    #[test]
    fn write_and_read_roundtrip() {
        let original = minimal_profile();

        let mut output = Vec::new();
        original.write(&mut output).unwrap();
        assert!(output.starts_with(&[0x1f, 0x8b]));

        let roundtrip = Profile::parse(Cursor::new(output)).unwrap();
        assert_eq!(roundtrip, original);
    }

    #[test]
    fn uncompressed_roundtrip() {
        let original = minimal_profile();

        let mut output = Vec::new();
        original.write_uncompressed(&mut output).unwrap();

        let roundtrip = Profile::parse(Cursor::new(output)).unwrap();
        assert_eq!(roundtrip, original);
    }

    #[test]
    fn sample_function_names_are_leaf_first() {
        let profile = minimal_profile();
        let names = profile.sample_function_names(&profile.samples[0]);
        assert_eq!(names, vec!["work", "main"]);
    }

    #[test]
    fn invalid_string_index_fails() {
        let mut message = minimal_profile().to_proto();
        message.function[0].name = 1000;

        let result = Profile::parse(Cursor::new(message.encode_to_vec()));
        assert!(matches!(result, Err(ParseError::InvalidStringIndex(1000))));
    }

    #[test]
    fn invalid_profile_is_rejected_on_parse() {
        let mut profile = minimal_profile();
        profile.samples[0].location_ids.push(9);

        let mut output = Vec::new();
        profile.write(&mut output).unwrap();

        let result = Profile::parse(Cursor::new(output));
        assert!(matches!(
            result,
            Err(ParseError::Invalid(
                ValidationError::InvalidLocationReference { location_id: 9, .. }
            ))
        ));
    }

    #[test]
    fn garbage_input_fails_to_decode() {
        let result = Profile::parse(Cursor::new(vec![0xff, 0xff, 0xff]));
        assert!(matches!(result, Err(ParseError::Decode(_))));
    }
}

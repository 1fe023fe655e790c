//! Byte spans in source files and the member references that cover them.
//!
//! A reference records where a field or method identifier occurs in a file,
//! which class owns it, and (for methods) its JVM descriptor. The span is
//! always exactly as wide as the UTF-8 encoding of the simple name, which is
//! what lets the applier verify the file before rewriting it.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use crate::mappings::Mappings;
use crate::wire;

/// A half-open byte interval `[start, end)` in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileLocation {
    start: u32,
    end: u32,
}

impl FileLocation {
    pub fn new(start: u32, end: u32) -> Self {
        assert!(start <= end, "start {start} greater than end {end}");
        Self { start, end }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn size(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the two intervals share any byte.
    pub fn has_overlap(&self, other: &FileLocation) -> bool {
        self.start.max(other.start) < self.end.min(other.end)
    }

    fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.start)?;
        out.write_u32::<BigEndian>(self.end)
    }

    fn read_from<R: Read>(input: &mut R) -> io::Result<Self> {
        let start = input.read_u32::<BigEndian>()?;
        let end = input.read_u32::<BigEndian>()?;
        if end < start {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("location end {end} before start {start}"),
            ));
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for FileLocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid file location: {s}"))?;
        let start: u32 = start.parse()?;
        let end: u32 = end.parse()?;
        anyhow::ensure!(start <= end, "invalid file location: {s}");
        Ok(Self { start, end })
    }
}

/// Checks a class internal name: non-empty, `/`-separated, no empty segments.
pub fn is_valid_internal_name(name: &str) -> bool {
    !name.is_empty() && name.split('/').all(|segment| !segment.is_empty())
}

/// A reference to a field identifier at a known byte span.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldReference {
    location: FileLocation,
    owner: String,
    name: String,
}

impl FieldReference {
    pub fn new(location: FileLocation, owner: impl Into<String>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let name = name.into();
        assert_eq!(
            location.size(),
            name.len(),
            "field {name} has size {} @ {location}",
            location.size()
        );
        Self { location, owner, name }
    }

    pub fn location(&self) -> FileLocation {
        self.location
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_blob<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.location.write_to(out)?;
        wire::write_prefixed_str(out, &format!("{}/{}", self.owner, self.name))
    }

    pub fn read_blob<R: Read>(input: &mut R) -> io::Result<Self> {
        let location = FileLocation::read_from(input)?;
        let (owner, name) = split_member_name(&wire::read_prefixed_str(input)?)?;
        check_reference_size(&location, &name)?;
        Ok(Self { location, owner, name })
    }
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.name, self.location)
    }
}

/// A reference to a method identifier at a known byte span.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodReference {
    location: FileLocation,
    owner: String,
    name: String,
    descriptor: String,
}

impl MethodReference {
    pub fn new(
        location: FileLocation,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        let owner = owner.into();
        let name = name.into();
        let descriptor = descriptor.into();
        assert_eq!(
            location.size(),
            name.len(),
            "method {name} has size {} @ {location}",
            location.size()
        );
        Self {
            location,
            owner,
            name,
            descriptor,
        }
    }

    pub fn location(&self) -> FileLocation {
        self.location
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn write_blob<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.location.write_to(out)?;
        wire::write_prefixed_str(out, &format!("{}/{}", self.owner, self.name))?;
        wire::write_prefixed_str(out, &self.descriptor)
    }

    pub fn read_blob<R: Read>(input: &mut R) -> io::Result<Self> {
        let location = FileLocation::read_from(input)?;
        let (owner, name) = split_member_name(&wire::read_prefixed_str(input)?)?;
        let descriptor = wire::read_prefixed_str(input)?;
        check_reference_size(&location, &name)?;
        Ok(Self {
            location,
            owner,
            name,
            descriptor,
        })
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}@{}",
            self.owner, self.name, self.descriptor, self.location
        )
    }
}

/// Splits `owner/member` at the last slash, validating the owner name.
fn split_member_name(internal_name: &str) -> io::Result<(String, String)> {
    let invalid = || {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid member internal name: {internal_name:?}"),
        )
    };
    let (owner, name) = internal_name.rsplit_once('/').ok_or_else(invalid)?;
    if name.is_empty() || !is_valid_internal_name(owner) {
        return Err(invalid());
    }
    Ok((owner.to_string(), name.to_string()))
}

fn check_reference_size(location: &FileLocation, name: &str) -> io::Result<()> {
    if location.size() != name.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "member {name} has size {} @ {location}",
                location.size()
            ),
        ));
    }
    Ok(())
}

/// Either kind of member reference, ordered by its location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberReference {
    Field(FieldReference),
    Method(MethodReference),
}

impl MemberReference {
    pub fn location(&self) -> FileLocation {
        match self {
            MemberReference::Field(field) => field.location(),
            MemberReference::Method(method) => method.location(),
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            MemberReference::Field(field) => field.owner(),
            MemberReference::Method(method) => method.owner(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MemberReference::Field(field) => field.name(),
            MemberReference::Method(method) => method.name(),
        }
    }

    pub fn start(&self) -> u32 {
        self.location().start()
    }

    pub fn size(&self) -> usize {
        self.location().size()
    }

    /// Looks up the renamed identifier, or `None` when the mappings leave it alone.
    pub fn remapped_name<'m>(&self, mappings: &'m Mappings) -> Option<&'m str> {
        let class = mappings.class_mappings(self.owner())?;
        match self {
            MemberReference::Field(field) => class.field_name(field.name()),
            MemberReference::Method(method) => class.method_name(method.name(), method.descriptor()),
        }
    }
}

impl PartialOrd for MemberReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemberReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location().cmp(&other.location())
    }
}

impl fmt::Display for MemberReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberReference::Field(field) => field.fmt(f),
            MemberReference::Method(method) => method.fmt(f),
        }
    }
}

impl From<FieldReference> for MemberReference {
    fn from(field: FieldReference) -> Self {
        MemberReference::Field(field)
    }
}

impl From<MethodReference> for MemberReference {
    fn from(method: MethodReference) -> Self {
        MemberReference::Method(method)
    }
}

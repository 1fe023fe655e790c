//! Decoder for the binary `.srg.dat` mapping format.
//!
//! The header (magic string, null terminator, version, compression code) is
//! always uncompressed; the class/method/field payload that follows may be
//! wrapped in an lz4 frame or gzip stream. `lzma2` is reserved by the format
//! but unsupported here.

use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;
use tracing::debug;

use crate::mappings::{ClassMappings, Mappings};
use crate::wire;

pub const MAGIC: &[u8] = b"SuperSrg binary mappings";
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum BinaryMappingsError {
    #[error("unexpected mappings header: {0}")]
    BadMagic(String),
    #[error("expected a null terminator after the mappings header")]
    MissingNullTerminator,
    #[error("unsupported mappings version: {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),
    #[error("forbidden compression: {0}")]
    ForbiddenCompression(String),
    #[error("empty class name in mappings")]
    EmptyClassName,
    #[error("empty {kind} name in class {class}")]
    EmptyMemberName { class: String, kind: &'static str },
    #[error("duplicate class entry: {0}")]
    DuplicateClass(String),
    #[error("truncated mappings payload")]
    Truncated,
    #[error("trailing bytes after mappings payload")]
    TrailingData,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The payload compression negotiated by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Uncompressed,
    Lz4Framed,
    Gzip,
}

impl CompressionFormat {
    pub fn code(self) -> &'static str {
        match self {
            CompressionFormat::Uncompressed => "",
            CompressionFormat::Lz4Framed => "lz4-frame",
            CompressionFormat::Gzip => "gzip",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, BinaryMappingsError> {
        match code {
            "" => Ok(CompressionFormat::Uncompressed),
            "lz4-frame" => Ok(CompressionFormat::Lz4Framed),
            "gzip" => Ok(CompressionFormat::Gzip),
            "lzma2" => Err(BinaryMappingsError::UnsupportedCompression(code.to_string())),
            other => Err(BinaryMappingsError::ForbiddenCompression(other.to_string())),
        }
    }

    fn reader<'a>(self, input: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        match self {
            CompressionFormat::Uncompressed => Ok(input),
            CompressionFormat::Lz4Framed => Ok(Box::new(lz4::Decoder::new(input)?)),
            CompressionFormat::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(input))),
        }
    }
}

pub fn read_mappings_file(path: &Path) -> Result<Mappings, BinaryMappingsError> {
    let file = File::open(path)?;
    decode(BufReader::new(file))
}

/// Decodes a complete binary mappings stream.
pub fn decode<R: Read>(mut input: R) -> Result<Mappings, BinaryMappingsError> {
    let mut magic = [0u8; MAGIC.len()];
    input
        .read_exact(&mut magic)
        .map_err(truncated_at_eof)?;
    if magic != MAGIC {
        return Err(BinaryMappingsError::BadMagic(hex::encode(magic)));
    }
    if input.read_u8().map_err(truncated_at_eof)? != 0 {
        return Err(BinaryMappingsError::MissingNullTerminator);
    }
    let version = input.read_u32::<BigEndian>().map_err(truncated_at_eof)?;
    if version != CURRENT_VERSION {
        return Err(BinaryMappingsError::UnsupportedVersion(version));
    }
    let code_len = input.read_u16::<BigEndian>().map_err(truncated_at_eof)? as usize;
    let code_bytes = wire::read_exact_vec(&mut input, code_len).map_err(truncated_at_eof)?;
    let code = String::from_utf8(code_bytes)
        .map_err(|e| BinaryMappingsError::ForbiddenCompression(hex::encode(e.as_bytes())))?;
    let compression = CompressionFormat::from_code(&code)?;
    debug!(compression = compression.code(), "decoding binary mappings");

    // lz4 frames are only validated once fully read, so slurp the payload
    // before parsing.
    let mut body = Vec::new();
    compression
        .reader(Box::new(input))?
        .read_to_end(&mut body)?;
    parse_body(&body)
}

fn parse_body(body: &[u8]) -> Result<Mappings, BinaryMappingsError> {
    let mut cursor = Cursor::new(body);
    let class_count = cursor.read_u32::<BigEndian>().map_err(truncated_at_eof)?;
    let mut seen = std::collections::HashSet::new();
    let mut classes: Vec<ClassMappings> = Vec::with_capacity(class_count.min(1 << 16) as usize);
    for _ in 0..class_count {
        let original_name = read_str(&mut cursor)?;
        if original_name.is_empty() {
            return Err(BinaryMappingsError::EmptyClassName);
        }
        if !seen.insert(original_name.clone()) {
            return Err(BinaryMappingsError::DuplicateClass(original_name));
        }
        let mut class = ClassMappings::new(&original_name);
        let revised_name = read_str(&mut cursor)?;
        if !revised_name.is_empty() {
            class.set_remapped_name(revised_name);
        }

        let method_count = cursor.read_u32::<BigEndian>().map_err(truncated_at_eof)?;
        for _ in 0..method_count {
            let old = read_str(&mut cursor)?;
            let new = read_str(&mut cursor)?;
            let descriptor = read_str(&mut cursor)?;
            // Revised descriptors are derivable from the class renames, so
            // the field is consumed and dropped.
            let _revised_descriptor = read_str(&mut cursor)?;
            if old.is_empty() {
                return Err(BinaryMappingsError::EmptyMemberName {
                    class: original_name.clone(),
                    kind: "method",
                });
            }
            // An empty revised name means the method keeps its name.
            if !new.is_empty() {
                class.rename_method(old, descriptor, new);
            }
        }

        let field_count = cursor.read_u32::<BigEndian>().map_err(truncated_at_eof)?;
        for _ in 0..field_count {
            let old = read_str(&mut cursor)?;
            let new = read_str(&mut cursor)?;
            if old.is_empty() || new.is_empty() {
                return Err(BinaryMappingsError::EmptyMemberName {
                    class: original_name.clone(),
                    kind: "field",
                });
            }
            class.rename_field(old, new);
        }
        classes.push(class);
    }
    if (cursor.position() as usize) < body.len() {
        return Err(BinaryMappingsError::TrailingData);
    }
    Ok(Mappings::from_classes(classes))
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> Result<String, BinaryMappingsError> {
    wire::read_prefixed_str(cursor).map_err(truncated_at_eof)
}

fn truncated_at_eof(e: io::Error) -> BinaryMappingsError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        BinaryMappingsError::Truncated
    } else {
        BinaryMappingsError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    struct TestClass<'a> {
        original: &'a str,
        revised: &'a str,
        methods: &'a [(&'a str, &'a str, &'a str, &'a str)],
        fields: &'a [(&'a str, &'a str)],
    }

    fn encode_body(classes: &[TestClass<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        body.write_u32::<BigEndian>(classes.len() as u32).unwrap();
        for class in classes {
            wire::write_prefixed_str(&mut body, class.original).unwrap();
            wire::write_prefixed_str(&mut body, class.revised).unwrap();
            body.write_u32::<BigEndian>(class.methods.len() as u32).unwrap();
            for (old, new, desc, new_desc) in class.methods {
                wire::write_prefixed_str(&mut body, old).unwrap();
                wire::write_prefixed_str(&mut body, new).unwrap();
                wire::write_prefixed_str(&mut body, desc).unwrap();
                wire::write_prefixed_str(&mut body, new_desc).unwrap();
            }
            body.write_u32::<BigEndian>(class.fields.len() as u32).unwrap();
            for (old, new) in class.fields {
                wire::write_prefixed_str(&mut body, old).unwrap();
                wire::write_prefixed_str(&mut body, new).unwrap();
            }
        }
        body
    }

    fn encode_file(compression: CompressionFormat, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.push(0);
        data.write_u32::<BigEndian>(CURRENT_VERSION).unwrap();
        let code = compression.code();
        data.write_u16::<BigEndian>(code.len() as u16).unwrap();
        data.extend_from_slice(code.as_bytes());
        match compression {
            CompressionFormat::Uncompressed => data.extend_from_slice(body),
            CompressionFormat::Lz4Framed => {
                let mut encoder = lz4::EncoderBuilder::new().level(1).build(&mut data).unwrap();
                encoder.write_all(body).unwrap();
                let (_, result) = encoder.finish();
                result.unwrap();
            }
            CompressionFormat::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(&mut data, flate2::Compression::default());
                encoder.write_all(body).unwrap();
                encoder.finish().unwrap();
            }
        }
        data
    }

    fn sample_classes() -> Vec<u8> {
        encode_body(&[TestClass {
            original: "com/a/Foo",
            revised: "com/b/Qux",
            methods: &[
                ("run", "go", "()V", ""),
                ("keep", "", "(I)V", "(I)V"),
            ],
            fields: &[("bar", "baz")],
        }])
    }

    #[test]
    fn decodes_uncompressed_mappings() {
        let data = encode_file(CompressionFormat::Uncompressed, &sample_classes());
        let mappings = decode(data.as_slice()).unwrap();
        let foo = mappings.class_mappings("com/a/Foo").unwrap();
        assert_eq!(foo.remapped_name(), Some("com/b/Qux"));
        assert_eq!(foo.field_name("bar"), Some("baz"));
        assert_eq!(foo.method_name("run", "()V"), Some("go"));
        // Empty revised name: the entry's descriptor fields are consumed
        // and the method keeps its name.
        assert_eq!(foo.method_name("keep", "(I)V"), None);
    }

    #[test]
    fn decodes_lz4_and_gzip_payloads() {
        for compression in [CompressionFormat::Lz4Framed, CompressionFormat::Gzip] {
            let data = encode_file(compression, &sample_classes());
            let mappings = decode(data.as_slice()).unwrap();
            assert_eq!(
                mappings
                    .class_mappings("com/a/Foo")
                    .unwrap()
                    .field_name("bar"),
                Some("baz")
            );
        }
    }

    #[test]
    fn mistyped_magic_fails_before_version_check() {
        let mut data = encode_file(CompressionFormat::Uncompressed, &sample_classes());
        data[5] ^= 0x20;
        // The version field is also corrupted; the magic check must win.
        data[MAGIC.len() + 1] = 0xFF;
        match decode(data.as_slice()).unwrap_err() {
            BinaryMappingsError::BadMagic(_) => {}
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_versions() {
        let mut data = encode_file(CompressionFormat::Uncompressed, &sample_classes());
        data[MAGIC.len() + 4] = 2;
        assert!(matches!(
            decode(data.as_slice()).unwrap_err(),
            BinaryMappingsError::UnsupportedVersion(_)
        ));
    }

    #[test]
    fn lzma2_is_reserved_unsupported() {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.push(0);
        data.write_u32::<BigEndian>(CURRENT_VERSION).unwrap();
        data.write_u16::<BigEndian>(5).unwrap();
        data.extend_from_slice(b"lzma2");
        assert!(matches!(
            decode(data.as_slice()).unwrap_err(),
            BinaryMappingsError::UnsupportedCompression(_)
        ));

        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.push(0);
        data.write_u32::<BigEndian>(CURRENT_VERSION).unwrap();
        data.write_u16::<BigEndian>(4).unwrap();
        data.extend_from_slice(b"zstd");
        assert!(matches!(
            decode(data.as_slice()).unwrap_err(),
            BinaryMappingsError::ForbiddenCompression(_)
        ));
    }

    #[test]
    fn truncated_payload_is_detected() {
        let data = encode_file(CompressionFormat::Uncompressed, &sample_classes());
        let cut = data.len() - 3;
        assert!(matches!(
            decode(&data[..cut]).unwrap_err(),
            BinaryMappingsError::Truncated
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut body = sample_classes();
        body.push(0);
        let data = encode_file(CompressionFormat::Uncompressed, &body);
        assert!(matches!(
            decode(data.as_slice()).unwrap_err(),
            BinaryMappingsError::TrailingData
        ));
    }

    #[test]
    fn duplicate_classes_are_rejected() {
        let body = encode_body(&[
            TestClass {
                original: "com/a/Foo",
                revised: "",
                methods: &[],
                fields: &[],
            },
            TestClass {
                original: "com/a/Foo",
                revised: "com/b/Qux",
                methods: &[],
                fields: &[],
            },
        ]);
        let data = encode_file(CompressionFormat::Uncompressed, &body);
        assert!(matches!(
            decode(data.as_slice()).unwrap_err(),
            BinaryMappingsError::DuplicateClass(_)
        ));
    }

    #[test]
    fn empty_field_names_are_rejected() {
        let body = encode_body(&[TestClass {
            original: "com/a/Foo",
            revised: "",
            methods: &[],
            fields: &[("bar", "")],
        }]);
        let data = encode_file(CompressionFormat::Uncompressed, &body);
        assert!(matches!(
            decode(data.as_slice()).unwrap_err(),
            BinaryMappingsError::EmptyMemberName { .. }
        ));
    }
}

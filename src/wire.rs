//! Length-prefixed framing helpers shared by the blob and mapping codecs.
//!
//! Everything on the wire is big-endian. Strings are a `u16` byte length
//! followed by UTF-8 bytes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Writes `s` as a `u16` byte-length prefix followed by its UTF-8 bytes.
pub fn write_prefixed_str<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes overflows u16 length prefix", s.len()),
        )
    })?;
    out.write_u16::<BigEndian>(len)?;
    out.write_all(s.as_bytes())
}

/// Reads a `u16`-prefixed UTF-8 string.
pub fn read_prefixed_str<R: Read>(input: &mut R) -> io::Result<String> {
    let len = input.read_u16::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid UTF-8: {e}")))
}

/// Reads exactly `len` bytes into a fresh buffer.
pub fn read_exact_vec<R: Read>(input: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn prefixed_str_round_trips() {
        let mut buf = Vec::new();
        write_prefixed_str(&mut buf, "com/example/Widget").unwrap();
        assert_eq!(&buf[..2], &[0, 18]);

        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(read_prefixed_str(&mut cursor).unwrap(), "com/example/Widget");
        assert_eq!(cursor.position() as usize, buf.len());
    }

    #[test]
    fn prefixed_str_rejects_oversized_strings() {
        let huge = "x".repeat(usize::from(u16::MAX) + 1);
        let err = write_prefixed_str(&mut Vec::new(), &huge).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn read_prefixed_str_fails_on_truncation() {
        let mut cursor = Cursor::new(&[0u8, 5, b'a', b'b'][..]);
        let err = read_prefixed_str(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}

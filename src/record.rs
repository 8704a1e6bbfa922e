use std::io::{self, Read};

use crate::error::{Error, Result};

/// Marks the start of every record on disk.
pub const RECORD_HEAD: &[u8] = b"<<J:";
/// Marks the end of every record on disk.
pub const RECORD_TAIL: &[u8] = b":J>>\n";

pub const MAX_URI_LEN: usize = 64 * 1024; // 64 KB
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024; // 16 MB

/// Longest hex run accepted for a numeric field, delimiter excluded.
const MAX_FIELD_LEN: usize = 16;

/// One logged request.
///
/// The exact text layout of a Record on disk:
///
/// [Head Marker]
/// [Verb: hex] ' '
/// [URI Len: hex] ':' [URI: N]
/// ' '
/// [Body Len: hex] ':' [Body: N]
/// [Tail Marker]
///
/// Lengths are the only framing; URI and body bytes are written unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
  pub verb: u32,
  pub uri: Vec<u8>,
  pub body: Vec<u8>,
}

impl Record {
  pub fn new(verb: u32, uri: impl Into<Vec<u8>>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      verb,
      uri: uri.into(),
      body: body.into(),
    }
  }

  /// Number of bytes this record occupies on disk once encoded.
  pub fn encoded_len(&self) -> usize {
    encoded_len(self.verb, self.uri.len(), persisted_body(&self.body).len())
  }
}

/// Result of decoding one record from a stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
  Record(Record),
  /// Clean end of the journal: not a single byte of a new record was present.
  Eof,
  /// The bytes do not form a complete record.
  Corrupt(String),
}

/// Drops one trailing NUL terminator, if present.
fn persisted_body(body: &[u8]) -> &[u8] {
  match body.split_last() {
    Some((0, rest)) => rest,
    _ => body,
  }
}

fn hex_digits(mut n: u64) -> usize {
  let mut digits = 1;
  while n >= 16 {
    n >>= 4;
    digits += 1;
  }
  digits
}

fn encoded_len(verb: u32, uri_len: usize, body_len: usize) -> usize {
  RECORD_HEAD.len()
    + hex_digits(verb as u64)
    + 1
    + hex_digits(uri_len as u64)
    + 1
    + uri_len
    + 1
    + hex_digits(body_len as u64)
    + 1
    + body_len
    + RECORD_TAIL.len()
}

/// Appends one encoded record to `buf`. Returns the number of bytes added.
///
/// Nothing is appended when the record is rejected.
pub fn encode_into(buf: &mut Vec<u8>, verb: u32, uri: &[u8], body: &[u8]) -> Result<usize> {
  if uri.len() > MAX_URI_LEN {
    return Err(Error::RecordTooLarge {
      field: "uri",
      len: uri.len(),
      max: MAX_URI_LEN,
    });
  }
  if body.len() > MAX_BODY_LEN {
    return Err(Error::RecordTooLarge {
      field: "body",
      len: body.len(),
      max: MAX_BODY_LEN,
    });
  }
  // A zero URI length is rejected when decoding, so it must never be written.
  if uri.is_empty() {
    return Err(Error::InvalidRecord("URI cannot be empty".into()));
  }

  let body = persisted_body(body);
  let total = encoded_len(verb, uri.len(), body.len());
  buf.reserve(total);

  buf.extend_from_slice(RECORD_HEAD);
  buf.extend_from_slice(format!("{:x} {:x}:", verb, uri.len()).as_bytes());
  buf.extend_from_slice(uri);
  buf.extend_from_slice(format!(" {:x}:", body.len()).as_bytes());
  buf.extend_from_slice(body);
  buf.extend_from_slice(RECORD_TAIL);

  Ok(total)
}

pub fn encode(verb: u32, uri: &[u8], body: &[u8]) -> Result<Vec<u8>> {
  let mut buf = Vec::new();
  encode_into(&mut buf, verb, uri, body)?;
  Ok(buf)
}

/// Decodes the next record from `reader`.
///
/// Framing problems, including a record cut short by the end of the stream,
/// come back as `Decoded::Corrupt`. Only genuine read failures are `Err`.
pub fn decode<R: Read>(reader: &mut R) -> io::Result<Decoded> {
  match decode_inner(reader) {
    Ok(Some(record)) => Ok(Decoded::Record(record)),
    Ok(None) => Ok(Decoded::Eof),
    Err(Fault::Corrupt(reason)) => Ok(Decoded::Corrupt(reason)),
    Err(Fault::Io(e)) => Err(e),
  }
}

enum Fault {
  Io(io::Error),
  Corrupt(String),
}

impl From<io::Error> for Fault {
  fn from(e: io::Error) -> Self {
    Fault::Io(e)
  }
}

fn corrupt<T>(reason: impl Into<String>) -> std::result::Result<T, Fault> {
  Err(Fault::Corrupt(reason.into()))
}

/// Reads until `buf` is full or the stream ends. Returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    match reader.read(&mut buf[filled..]) {
      Ok(0) => break,
      Ok(n) => filled += n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(filled)
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> std::result::Result<(), Fault> {
  let n = read_full(reader, buf)?;
  if n != buf.len() {
    return corrupt(format!("{} truncated: expected {} bytes, got {}", what, buf.len(), n));
  }
  Ok(())
}

fn read_byte<R: Read>(reader: &mut R, what: &str) -> std::result::Result<u8, Fault> {
  let mut byte = [0u8; 1];
  read_exact_or_corrupt(reader, &mut byte, what)?;
  Ok(byte[0])
}

/// Reads a hex number terminated by `delim`.
fn read_hex_field<R: Read>(reader: &mut R, delim: u8, what: &str) -> std::result::Result<u64, Fault> {
  let mut digits = [0u8; MAX_FIELD_LEN];
  let mut len = 0;

  loop {
    let byte = read_byte(reader, what)?;
    if byte == delim {
      break;
    }
    if len == MAX_FIELD_LEN {
      return corrupt(format!("{} exceeds {} digits", what, MAX_FIELD_LEN));
    }
    if !byte.is_ascii_hexdigit() {
      return corrupt(format!("{} contains non-hex byte {:#04x}", what, byte));
    }
    digits[len] = byte;
    len += 1;
  }

  if len == 0 {
    return corrupt(format!("{} is empty", what));
  }

  // Only ASCII hex digits were accepted above.
  let text = std::str::from_utf8(&digits[..len]).map_err(|e| Fault::Corrupt(format!("{}: {}", what, e)))?;
  u64::from_str_radix(text, 16).map_err(|e| Fault::Corrupt(format!("{}: {}", what, e)))
}

fn read_len_field<R: Read>(reader: &mut R, what: &str, max: usize) -> std::result::Result<usize, Fault> {
  let value = read_hex_field(reader, b':', what)?;
  match usize::try_from(value) {
    Ok(len) if len <= max => Ok(len),
    _ => corrupt(format!("{} {} exceeds limit {}", what, value, max)),
  }
}

fn decode_inner<R: Read>(reader: &mut R) -> std::result::Result<Option<Record>, Fault> {
  // 1. Head marker. Nothing at all means a clean end of journal.
  let mut head = [0u8; RECORD_HEAD.len()];
  let n = read_full(reader, &mut head)?;
  if n == 0 {
    return Ok(None);
  }
  if n != head.len() {
    return corrupt(format!("Head marker truncated: {} of {} bytes", n, head.len()));
  }
  if &head[..] != RECORD_HEAD {
    return corrupt(format!("Invalid head marker: {:?}", String::from_utf8_lossy(&head)));
  }

  // 2. Verb
  let verb = read_hex_field(reader, b' ', "verb")?;
  let verb = u32::try_from(verb).or_else(|_| corrupt(format!("verb {:#x} out of range", verb)))?;

  // 3. URI
  let uri_len = read_len_field(reader, "URI length", MAX_URI_LEN)?;
  if uri_len == 0 {
    return corrupt("URI length is zero");
  }
  let mut uri = vec![0u8; uri_len];
  read_exact_or_corrupt(reader, &mut uri, "URI")?;

  let sep = read_byte(reader, "field separator")?;
  if sep != b' ' {
    return corrupt(format!("Expected space after URI, found {:#04x}", sep));
  }

  // 4. Body. A zero length reads nothing.
  let body_len = read_len_field(reader, "body length", MAX_BODY_LEN)?;
  let mut body = vec![0u8; body_len];
  if body_len > 0 {
    read_exact_or_corrupt(reader, &mut body, "body")?;
  }

  // 5. Tail marker
  let mut tail = [0u8; RECORD_TAIL.len()];
  read_exact_or_corrupt(reader, &mut tail, "tail marker")?;
  if &tail[..] != RECORD_TAIL {
    return corrupt(format!("Invalid tail marker: {:?}", String::from_utf8_lossy(&tail)));
  }

  Ok(Some(Record { verb, uri, body }))
}

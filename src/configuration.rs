//! Configuration-port stream assembly and decoding
//!
//! The configuration connection answers each request with an XML document,
//! delivered in arbitrary TCP chunks. [`ConfigurationAssembler`] accumulates
//! bytes until a complete well-formed document is buffered;
//! [`ConfigurationDecoder`] then extracts the interface listing and/or the
//! base64-embedded project database, persisting the latter to a local cache
//! file.

use crate::error::{VantageError, VantageResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use quick_xml::events::Event;
use std::fs;
use std::path::{Path, PathBuf};

/// Shorthand the controller uses to open the embedded file payload. The
/// payload breaks XML parsing until this is rewritten into a regular
/// `<File>`/`</File>` pair.
const FILE_SHORTHAND_OPEN: &[u8] = b"<?File Encode=\"Base64\" /";
const FILE_SHORTHAND_CLOSE: &[u8] = b"?>";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Accumulates configuration-port bytes into complete documents.
///
/// The buffer stays raw bytes; only whole documents are converted to text,
/// so a chunk boundary inside a multi-byte character cannot corrupt a name
/// in the document.
#[derive(Debug, Default)]
pub struct ConfigurationAssembler {
    buffer: Vec<u8>,
}

impl ConfigurationAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; returns the first complete document once the buffer
    /// holds one, retaining any bytes that follow it.
    ///
    /// An unparseable buffer means the document is still in flight, never an
    /// error.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<String> {
        let chunk = if self.buffer.is_empty() {
            chunk.strip_prefix(UTF8_BOM).unwrap_or(chunk)
        } else {
            chunk
        };
        self.buffer.extend_from_slice(chunk);

        // The rewrite is atomic: it only fires once both delimiters are
        // buffered, so a chunk boundary inside the payload cannot produce a
        // half-converted element.
        rewrite_file_shorthand(&mut self.buffer);

        // Scan only the longest valid UTF-8 prefix; a truncated trailing
        // character simply means the document is not complete yet.
        let text = match std::str::from_utf8(&self.buffer) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&self.buffer[..e.valid_up_to()]).ok()?,
        };
        let end = first_document_end(text)?;

        let remainder = self.buffer.split_off(end);
        let document = std::mem::replace(&mut self.buffer, remainder);
        let leading_ws = self
            .buffer
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buffer.drain(..leading_ws);
        Some(String::from_utf8_lossy(&document).into_owned())
    }

    /// Bytes accumulated so far without forming a complete document.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Convert the self-closing `File` shorthand into an opening/closing element
/// pair, in place. Does nothing until both delimiters are present. The close
/// marker is searched only after the opener, so an XML declaration ahead of
/// it is left alone.
fn rewrite_file_shorthand(buffer: &mut Vec<u8>) -> bool {
    let Some(start) = find_subslice(buffer, FILE_SHORTHAND_OPEN, 0) else {
        return false;
    };
    let payload_start = start + FILE_SHORTHAND_OPEN.len();
    let Some(close) = find_subslice(buffer, FILE_SHORTHAND_CLOSE, payload_start) else {
        return false;
    };

    let mut rewritten = Vec::with_capacity(buffer.len() + "<File></File>".len());
    rewritten.extend_from_slice(&buffer[..start]);
    rewritten.extend_from_slice(b"<File>");
    rewritten.extend_from_slice(&buffer[payload_start..close]);
    rewritten.extend_from_slice(b"</File>");
    rewritten.extend_from_slice(&buffer[close + FILE_SHORTHAND_CLOSE.len()..]);
    *buffer = rewritten;
    true
}

/// Byte offset just past the first complete top-level element, or `None` if
/// the buffer does not yet contain one.
fn first_document_end(buffer: &str) -> Option<usize> {
    let mut reader = quick_xml::Reader::from_str(buffer);
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(reader.buffer_position());
                }
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    return Some(reader.buffer_position());
                }
            }
            Ok(Event::Eof) => return None,
            Ok(_) => {}
            // Malformed so far; more bytes may complete it.
            Err(_) => return None,
        }
    }
}

/// What a decoded document yielded for the database itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Database {
    /// Freshly downloaded from the controller and persisted to the cache.
    Downloaded(String),
    /// Served from the local cache file.
    Cached(String),
    /// No download in this document and no cache file on disk.
    Unavailable,
}

/// Everything extracted from one complete configuration document.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    /// Interface name to numeric id pairs, possibly empty.
    pub interfaces: Vec<(String, u32)>,
    pub database: Database,
}

/// Decodes assembled configuration documents and owns the cache file.
#[derive(Debug, Clone)]
pub struct ConfigurationDecoder {
    cache_path: PathBuf,
}

impl ConfigurationDecoder {
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Whether a previously downloaded database is already on disk.
    pub fn cache_exists(&self) -> bool {
        self.cache_path.exists()
    }

    /// Decode one complete document.
    ///
    /// The interface listing and the file payload are handled independently:
    /// a document carrying only the listing still resolves the database from
    /// the cache, which is what lets a cached session reach completion.
    pub fn decode(&self, document: &str) -> VantageResult<DecodeOutcome> {
        let interfaces = parse_interface_listing(document);
        if !interfaces.is_empty() {
            tracing::debug!("decoded {} interface entries", interfaces.len());
        }

        let database = match extract_file_payload(document) {
            Some(encoded) => {
                let text = decode_base64_text(&encoded)?;
                fs::write(&self.cache_path, &text).map_err(|e| VantageError::CacheIo {
                    path: self.cache_path.clone(),
                    message: e.to_string(),
                })?;
                tracing::info!(
                    "configuration database downloaded ({} bytes), cached at {}",
                    text.len(),
                    self.cache_path.display()
                );
                Database::Downloaded(text)
            }
            None => match fs::read_to_string(&self.cache_path) {
                Ok(text) => {
                    tracing::info!(
                        "configuration database served from cache at {}",
                        self.cache_path.display()
                    );
                    Database::Cached(text)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Database::Unavailable,
                Err(e) => {
                    return Err(VantageError::CacheIo {
                        path: self.cache_path.clone(),
                        message: e.to_string(),
                    })
                }
            },
        };

        Ok(DecodeOutcome {
            interfaces,
            database,
        })
    }
}

/// Extract `Name`/`IID` pairs from an `IIntrospection` interface listing.
/// Entries with a missing or non-numeric id are skipped.
fn parse_interface_listing(document: &str) -> Vec<(String, u32)> {
    let mut reader = quick_xml::Reader::from_str(document);
    let mut stack: Vec<String> = Vec::new();
    let mut name: Option<String> = None;
    let mut iid: Option<u32> = None;
    let mut interfaces = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let elem = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if elem == "Interface" {
                    name = None;
                    iid = None;
                }
                stack.push(elem);
            }
            Ok(Event::Text(t)) => {
                if !stack.iter().any(|s| s == "IIntrospection") {
                    continue;
                }
                let text = t.unescape().unwrap_or_default().trim().to_string();
                let n = stack.len();
                if n >= 2 && stack[n - 2] == "Interface" {
                    match stack[n - 1].as_str() {
                        "Name" => name = Some(text),
                        "IID" => iid = text.parse().ok(),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => {
                if stack.last().map(String::as_str) == Some("Interface") {
                    if let (Some(n), Some(id)) = (name.take(), iid.take()) {
                        interfaces.push((n, id));
                    }
                }
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            Ok(_) => {}
        }
    }
    interfaces
}

/// Base64 text of the embedded project file, if this document carries an
/// `IBackup` file-download response.
fn extract_file_payload(document: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(document);
    let mut stack: Vec<String> = Vec::new();
    let mut payload = String::new();
    let mut in_file = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let elem = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if elem == "File" && stack.iter().any(|s| s == "IBackup") {
                    in_file = true;
                }
                stack.push(elem);
            }
            Ok(Event::Text(t)) => {
                if in_file {
                    payload.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(_)) => {
                if stack.last().map(String::as_str) == Some("File") && in_file {
                    return Some(payload);
                }
                stack.pop();
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn decode_base64_text(encoded: &str) -> VantageResult<String> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| VantageError::DatabaseParse(format!("invalid base64 file payload: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERFACE_DOC: &str = "<IIntrospection><GetInterfaces><return>\
        <Interface><Name>Load</Name><IID>12</IID></Interface>\
        <Interface><Name>Thermostat</Name><IID>32</IID></Interface>\
        </return></GetInterfaces></IIntrospection>";

    const SAMPLE_DATABASE: &str =
        "<Project><Objects><Object><Load VID=\"2774\"><Name>Spot</Name></Load></Object></Objects></Project>";

    fn file_download_doc(database: &str) -> String {
        format!(
            "<IBackup><GetFile><return><?File Encode=\"Base64\" /{}?></return></GetFile></IBackup>",
            BASE64.encode(database)
        )
    }

    #[test]
    fn test_assembler_single_chunk() {
        let mut assembler = ConfigurationAssembler::new();
        let doc = assembler.push_chunk(INTERFACE_DOC.as_bytes());
        assert_eq!(doc.as_deref(), Some(INTERFACE_DOC));
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_assembler_waits_for_completion() {
        let mut assembler = ConfigurationAssembler::new();
        let (head, tail) = INTERFACE_DOC.split_at(40);
        assert!(assembler.push_chunk(head.as_bytes()).is_none());
        assert!(assembler.pending_len() > 0);
        assert_eq!(
            assembler.push_chunk(tail.as_bytes()).as_deref(),
            Some(INTERFACE_DOC)
        );
    }

    #[test]
    fn test_assembler_chunking_invariance() {
        let doc = file_download_doc(SAMPLE_DATABASE);
        let bytes = doc.as_bytes();

        let mut whole = ConfigurationAssembler::new();
        let expected = whole.push_chunk(bytes).expect("complete in one chunk");

        // Three arbitrarily sized chunks must assemble the same document.
        for (a, b) in [(10, 50), (1, bytes.len() - 1), (30, 31)] {
            let mut assembler = ConfigurationAssembler::new();
            assert!(assembler.push_chunk(&bytes[..a]).is_none());
            assert!(assembler.push_chunk(&bytes[a..b]).is_none());
            let assembled = assembler
                .push_chunk(&bytes[b..])
                .unwrap_or_else(|| panic!("incomplete with split ({}, {})", a, b));
            assert_eq!(assembled, expected);
        }
    }

    #[test]
    fn test_assembler_strips_bom() {
        let mut assembler = ConfigurationAssembler::new();
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(INTERFACE_DOC.as_bytes());
        assert_eq!(assembler.push_chunk(&bytes).as_deref(), Some(INTERFACE_DOC));
    }

    #[test]
    fn test_assembler_rewrites_file_shorthand() {
        let mut assembler = ConfigurationAssembler::new();
        let doc = assembler
            .push_chunk(file_download_doc(SAMPLE_DATABASE).as_bytes())
            .expect("complete document");
        assert!(doc.contains("<File>"));
        assert!(doc.contains("</File>"));
        assert!(!doc.contains("<?File"));
    }

    #[test]
    fn test_assembler_multibyte_chunk_boundary() {
        let doc = "<IIntrospection><GetInterfaces><return><Interface>\
            <Name>Entr\u{e9}e</Name><IID>7</IID></Interface>\
            </return></GetInterfaces></IIntrospection>";
        let bytes = doc.as_bytes();
        // Split inside the two-byte encoding of the accented character.
        let split = doc.find('\u{e9}').expect("accent") + 1;

        let mut assembler = ConfigurationAssembler::new();
        assert!(assembler.push_chunk(&bytes[..split]).is_none());
        let assembled = assembler.push_chunk(&bytes[split..]).expect("complete");
        assert_eq!(assembled, doc);
        assert!(assembled.contains("Entr\u{e9}e"));
    }

    #[test]
    fn test_assembler_pipelined_documents() {
        let mut assembler = ConfigurationAssembler::new();
        let download = file_download_doc(SAMPLE_DATABASE);
        let stream = format!("{}{}", INTERFACE_DOC, download);

        let first = assembler.push_chunk(stream.as_bytes());
        assert_eq!(first.as_deref(), Some(INTERFACE_DOC));
        // The second document is still buffered and comes out on the next
        // (empty) delivery.
        let second = assembler.push_chunk(b"").expect("second document");
        assert!(second.starts_with("<IBackup>"));
    }

    #[test]
    fn test_rewrite_requires_both_delimiters() {
        let partial = b"<IBackup><GetFile><return><?File Encode=\"Base64\" /QUJD";
        let mut buffer = partial.to_vec();
        assert!(!rewrite_file_shorthand(&mut buffer));
        assert_eq!(buffer, partial);
    }

    #[test]
    fn test_rewrite_skips_xml_declaration() {
        let mut buffer =
            b"<?xml version=\"1.0\"?><r><?File Encode=\"Base64\" /QUJD?></r>".to_vec();
        assert!(rewrite_file_shorthand(&mut buffer));
        let rewritten = String::from_utf8(buffer).expect("utf8");
        assert!(rewritten.starts_with("<?xml version=\"1.0\"?>"));
        assert!(rewritten.contains("<File>QUJD</File>"));
    }

    #[test]
    fn test_decoder_interface_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let decoder = ConfigurationDecoder::new(dir.path().join("vantage.dc"));

        let outcome = decoder.decode(INTERFACE_DOC).expect("decode");
        assert_eq!(
            outcome.interfaces,
            vec![("Load".to_string(), 12), ("Thermostat".to_string(), 32)]
        );
        // No file payload and no cache yet.
        assert_eq!(outcome.database, Database::Unavailable);
    }

    #[test]
    fn test_decoder_persists_download() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vantage.dc");
        let decoder = ConfigurationDecoder::new(&path);

        let mut assembler = ConfigurationAssembler::new();
        let doc = assembler
            .push_chunk(file_download_doc(SAMPLE_DATABASE).as_bytes())
            .expect("complete");
        let outcome = decoder.decode(&doc).expect("decode");

        assert_eq!(outcome.database, Database::Downloaded(SAMPLE_DATABASE.to_string()));
        assert_eq!(fs::read_to_string(&path).expect("cache file"), SAMPLE_DATABASE);
    }

    #[test]
    fn test_decoder_cache_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vantage.dc");

        // Session one downloads and persists.
        let mut assembler = ConfigurationAssembler::new();
        let doc = assembler
            .push_chunk(file_download_doc(SAMPLE_DATABASE).as_bytes())
            .expect("complete");
        ConfigurationDecoder::new(&path).decode(&doc).expect("decode");

        // Session two gets only the interface listing and must reproduce the
        // same database content from cache.
        let decoder = ConfigurationDecoder::new(&path);
        assert!(decoder.cache_exists());
        let outcome = decoder.decode(INTERFACE_DOC).expect("decode");
        assert_eq!(outcome.database, Database::Cached(SAMPLE_DATABASE.to_string()));
    }

    #[test]
    fn test_decoder_tolerates_wrapped_base64() {
        let dir = tempfile::tempdir().expect("tempdir");
        let decoder = ConfigurationDecoder::new(dir.path().join("vantage.dc"));

        let encoded = BASE64.encode(SAMPLE_DATABASE);
        let (a, b) = encoded.split_at(16);
        let doc = format!(
            "<IBackup><GetFile><return><File>{}\n{}</File></return></GetFile></IBackup>",
            a, b
        );
        let outcome = decoder.decode(&doc).expect("decode");
        assert_eq!(outcome.database, Database::Downloaded(SAMPLE_DATABASE.to_string()));
    }

    #[test]
    fn test_decoder_rejects_bad_base64() {
        let dir = tempfile::tempdir().expect("tempdir");
        let decoder = ConfigurationDecoder::new(dir.path().join("vantage.dc"));
        let doc = "<IBackup><GetFile><return><File>!!**</File></return></GetFile></IBackup>";
        assert!(matches!(
            decoder.decode(doc),
            Err(VantageError::DatabaseParse(_))
        ));
    }
}

//! Transfer encoding of finished artifacts.

use crate::filename::pdf_filename;
use crate::pdf::PdfArtifact;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderStringWriter;
use base64::Engine as _;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

pub const PDF_DATA_URL_PREFIX: &str = "data:application/pdf;base64,";

/// A transferable PDF: `data:` URL plus the file name to save it under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub encoded_data: String,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransferEncoder;

impl TransferEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode `artifact` and name it after `page_title`.
    pub fn encode(&self, artifact: &PdfArtifact, page_title: &str) -> Result<TransferPayload> {
        let encoded_data = encode_stream(artifact.binary_payload.as_slice(), artifact.byte_size)?;
        let filename = pdf_filename(page_title);
        debug!(
            "encoded {} bytes as {} chars for {}",
            artifact.byte_size,
            encoded_data.len(),
            filename
        );
        Ok(TransferPayload {
            encoded_data,
            filename,
        })
    }
}

/// Stream `reader` through a base64 encoder into a PDF `data:` URL.
///
/// Fails when reading fails or when the number of bytes read differs from
/// `expected_len`.
pub fn encode_stream<R: Read>(mut reader: R, expected_len: usize) -> Result<String> {
    let mut writer = EncoderStringWriter::from_consumer(PDF_DATA_URL_PREFIX.to_string(), &STANDARD);
    let copied = io::copy(&mut reader, &mut writer)
        .map_err(|e| Error::EncodingError(format!("failed to read artifact: {}", e)))?;
    if copied != expected_len as u64 {
        return Err(Error::EncodingError(format!(
            "artifact size mismatch: expected {} bytes, read {}",
            expected_len, copied
        )));
    }
    Ok(writer.into_inner())
}

/// Decode a base64 `data:` URL back into bytes.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let (meta, data) = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| Error::EncodingError("not a data URL".into()))?;
    if !meta.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        return Err(Error::EncodingError("data URL is not base64 encoded".into()));
    }
    STANDARD
        .decode(data.trim())
        .map_err(|e| Error::EncodingError(format!("invalid base64 payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk gone"))
        }
    }

    #[test]
    fn encodes_with_prefix_and_filename() {
        let artifact = PdfArtifact::new(b"%PDF-1.4 fake".to_vec());
        let payload = TransferEncoder::new().encode(&artifact, "Report: Q1/Q2 <Draft>").unwrap();
        assert!(payload.encoded_data.starts_with(PDF_DATA_URL_PREFIX));
        assert_eq!(payload.filename, "Report_ Q1_Q2 _Draft_.pdf");
        assert_eq!(decode_data_url(&payload.encoded_data).unwrap(), artifact.binary_payload);
    }

    #[test]
    fn size_mismatch_is_an_encoding_error() {
        let mut artifact = PdfArtifact::new(vec![1, 2, 3]);
        artifact.byte_size = 4;
        assert!(matches!(
            TransferEncoder::new().encode(&artifact, "t"),
            Err(Error::EncodingError(_))
        ));
    }

    #[test]
    fn read_failure_is_an_encoding_error() {
        assert!(matches!(encode_stream(FailingReader, 0), Err(Error::EncodingError(_))));
    }

    #[test]
    fn rejects_non_base64_urls() {
        assert!(decode_data_url("data:text/plain,hello").is_err());
        assert!(decode_data_url("https://example.com").is_err());
    }
}
